// =============================================================================
// WebSocket Handler — live candle stream per trading pair
// =============================================================================
//
// Clients connect to `/ws/{symbol}` and receive:
//   1. The pair's current live update immediately on connect.
//   2. One live update per simulator tick that mutates the pair.
//
// Each session registers a `WsSubscriber` with the registry. The simulator
// never touches the socket: it pushes into a bounded queue that this session
// drains. A full queue means the client is too slow, and the fan-out drops it.
//
// The session also answers Ping frames and unregisters on Close, on a read
// error, on a write that stalls past `WRITE_TIMEOUT`, or when the core closes
// the endpoint (shutdown or delivery failure).
// =============================================================================

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::CoreError;
use crate::market_data::{Subscriber, SubscriberId};

/// Longest a single frame write may take before the session is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

// =============================================================================
// Subscriber endpoint
// =============================================================================

/// Registry-facing half of a WebSocket session.
pub struct WsSubscriber {
    id: SubscriberId,
    outbound: mpsc::Sender<String>,
    closed: Notify,
}

impl WsSubscriber {
    pub fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
            closed: Notify::new(),
        }
    }
}

impl Subscriber for WsSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn send(&self, payload: &str) -> Result<(), CoreError> {
        self.outbound
            .try_send(payload.to_string())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    CoreError::Delivery("outbound queue full".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    CoreError::Delivery("connection closed".into())
                }
            })
    }

    fn close(&self) {
        self.closed.notify_one();
    }
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for `GET /ws/{symbol}`. Unknown symbols get a 404 before the
/// upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(symbol): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !state.registry.contains(&symbol) {
        warn!(symbol = %symbol, "WebSocket rejected: unknown trading pair");
        return CoreError::NotFound(symbol).into_response();
    }

    info!(symbol = %symbol, "new WebSocket connection");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, symbol))
        .into_response()
}

// =============================================================================
// Connection handler
// =============================================================================

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>, symbol: String) {
    let (tx, mut rx) = mpsc::channel(state.config.subscriber_buffer);
    let subscriber = Arc::new(WsSubscriber::new(tx));

    // Queue the current state first so the client has something to draw
    // before the next tick.
    match state.registry.instrument(&symbol) {
        Ok(instrument) => match serde_json::to_string(&instrument.live_update()) {
            Ok(initial) => {
                if let Err(e) = subscriber.send(&initial) {
                    debug!(symbol = %symbol, error = %e, "initial update not queued");
                }
            }
            Err(e) => debug!(symbol = %symbol, error = %e, "failed to serialise initial update"),
        },
        Err(e) => {
            warn!(error = %e, "error adding subscriber");
            return;
        }
    }

    if let Err(e) = state.registry.subscribe(&symbol, subscriber.clone()) {
        warn!(error = %e, "error adding subscriber");
        return;
    }
    state.connection_opened();

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            _ = subscriber.closed.notified() => {
                debug!(symbol = %symbol, "subscriber closed by core");
                let _ = send_frame(&mut sender, Message::Close(None)).await;
                break;
            }

            payload = rx.recv() => {
                let Some(text) = payload else { break };
                if let Err(e) = send_frame(&mut sender, Message::Text(text)).await {
                    debug!(symbol = %symbol, error = %e, "WebSocket send failed, disconnecting");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = send_frame(&mut sender, Message::Pong(data)).await {
                            debug!(error = %e, "failed to send Pong, disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(symbol = %symbol, "WebSocket Close frame received");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Client messages carry no meaning on this channel.
                    }
                    Some(Err(e)) => {
                        warn!(symbol = %symbol, error = %e, "WebSocket receive error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if let Err(e) = state.registry.unsubscribe(&symbol, subscriber.id()) {
        warn!(error = %e, "error removing subscriber");
    }
    state.connection_closed();
    info!(symbol = %symbol, "WebSocket connection closed");
}

/// Write one frame, giving up after [`WRITE_TIMEOUT`] so a client that
/// stopped reading cannot pin the session.
async fn send_frame<S>(sender: &mut S, msg: Message) -> Result<(), CoreError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(WRITE_TIMEOUT, sender.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CoreError::Delivery(e.to_string())),
        Err(_) => Err(CoreError::Delivery("write timed out".into())),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_queues_payload() {
        let (tx, mut rx) = mpsc::channel(2);
        let sub = WsSubscriber::new(tx);
        sub.send("hello").unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn full_queue_is_delivery_failure() {
        let (tx, _rx) = mpsc::channel(1);
        let sub = WsSubscriber::new(tx);
        sub.send("a").unwrap();
        assert!(matches!(sub.send("b"), Err(CoreError::Delivery(_))));
    }

    #[tokio::test]
    async fn dropped_receiver_is_delivery_failure() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sub = WsSubscriber::new(tx);
        assert!(matches!(sub.send("a"), Err(CoreError::Delivery(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out() {
        let sink = futures_util::sink::unfold((), |(), _msg: Message| async {
            std::future::pending::<Result<(), std::io::Error>>().await
        });
        let mut sink = std::pin::pin!(sink);

        let result = send_frame(&mut sink, Message::Text("late".into())).await;
        assert!(matches!(result, Err(CoreError::Delivery(msg)) if msg == "write timed out"));
    }

    #[tokio::test]
    async fn write_to_ready_sink_succeeds() {
        let mut sent: Vec<Message> = Vec::new();
        send_frame(&mut sent, Message::Text("now".into())).await.unwrap();
        assert!(matches!(sent.as_slice(), [Message::Text(t)] if t == "now"));
    }

    #[tokio::test]
    async fn close_wakes_session() {
        let (tx, _rx) = mpsc::channel(1);
        let sub = WsSubscriber::new(tx);
        sub.close();
        tokio::time::timeout(std::time::Duration::from_millis(100), sub.closed.notified())
            .await
            .expect("close did not notify");
    }
}
