// =============================================================================
// Shared handler state
// =============================================================================
//
// Handlers receive `Arc<AppState>`. The registry does its own per-pair
// locking; the only other mutable field is an atomic connection counter.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::registry::Registry;
use crate::runtime_config::SimConfig;

pub struct AppState {
    pub registry: Arc<Registry>,
    pub config: SimConfig,
    /// Open WebSocket sessions.
    pub ws_connections: AtomicU64,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, config: SimConfig) -> Self {
        Self {
            registry,
            config,
            ws_connections: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_opened(&self) {
        self.ws_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.ws_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Payload of `GET /api/health`.
    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok",
            uptime_secs: self.start_time.elapsed().as_secs(),
            pairs: self.registry.pair_count(),
            subscribers: self.registry.subscriber_count(),
            ws_connections: self.ws_connections.load(Ordering::Relaxed),
            server_time: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub pairs: usize,
    pub subscribers: usize,
    pub ws_connections: u64,
    pub server_time: i64,
}
