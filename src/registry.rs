// =============================================================================
// Registry — symbol → instrument map and the entry point for core operations
// =============================================================================
//
// The map is filled once in `initialize` and never changes afterwards, so it
// needs no lock of its own; all concurrency is per instrument. Operations on
// different symbols never contend.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use rand::RngCore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::market_data::{
    generate_history, Candle, Entropy, InstrumentState, Simulator, SimulatorSettings, Subscriber,
    SubscriberId,
};
use crate::runtime_config::SimConfig;
use crate::types::PairSummary;

pub struct Registry {
    instruments: HashMap<String, Arc<InstrumentState>>,
    /// Same instruments, in configured order, for listing.
    ordered: Vec<Arc<InstrumentState>>,
    settings: SimulatorSettings,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Registry {
    /// Create every configured pair, generate its history, and start one
    /// simulator task per pair. Must be called from within a Tokio runtime.
    ///
    /// With `config.seed` set, pair `i` draws from a ChaCha stream seeded
    /// with `seed + i`, so a run is reproducible given the same clock.
    pub fn initialize(config: &SimConfig) -> Arc<Self> {
        match config.seed {
            Some(seed) => {
                let mut next = seed;
                Self::initialize_with(config, move |_| {
                    let entropy = Entropy::seeded(next);
                    next = next.wrapping_add(1);
                    entropy
                })
            }
            None => Self::initialize_with(config, |_| Entropy::os()),
        }
    }

    /// [`Registry::initialize`] with a caller-chosen entropy source per pair.
    pub fn initialize_with<R, F>(config: &SimConfig, mut make_entropy: F) -> Arc<Self>
    where
        R: RngCore + Send + 'static,
        F: FnMut(&str) -> Entropy<R>,
    {
        let settings = SimulatorSettings::from(config);
        let now_ms = Utc::now().timestamp_millis();

        let mut instruments = HashMap::with_capacity(config.pairs.len());
        let mut ordered = Vec::with_capacity(config.pairs.len());
        let mut simulators = Vec::with_capacity(config.pairs.len());

        for pair in &config.pairs {
            let instrument = Arc::new(InstrumentState::new(
                pair.symbol.clone(),
                pair.seed_price,
                config.history_len,
            ));
            let mut entropy = make_entropy(&pair.symbol);
            generate_history(&instrument, now_ms, settings.history_bucket_ms, &mut entropy);

            instruments.insert(pair.symbol.clone(), instrument.clone());
            ordered.push(instrument.clone());
            simulators.push(Simulator::new(instrument, settings, entropy));
        }

        let tasks = simulators
            .into_iter()
            .map(|sim| tokio::spawn(sim.run()))
            .collect();

        info!(pairs = ordered.len(), "trading pairs initialised");

        Arc::new(Self {
            instruments,
            ordered,
            settings,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn instrument(&self, symbol: &str) -> Result<&Arc<InstrumentState>, CoreError> {
        self.instruments
            .get(symbol)
            .ok_or_else(|| CoreError::NotFound(symbol.to_string()))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.instruments.contains_key(symbol)
    }

    /// Summary of every pair, in configured order.
    pub fn list_pairs(&self) -> Vec<PairSummary> {
        self.ordered.iter().map(|i| i.summary()).collect()
    }

    /// Copy of the closed-candle history for `symbol`.
    pub fn get_history(&self, symbol: &str) -> Result<Vec<Candle>, CoreError> {
        let instrument = self.instrument(symbol)?;

        if instrument.read().history.is_empty() {
            warn!(symbol = %symbol, "history empty on fetch, regenerating");
            generate_history(
                instrument,
                Utc::now().timestamp_millis(),
                self.settings.history_bucket_ms,
                &mut Entropy::os(),
            );
        }

        Ok(instrument.history())
    }

    pub fn subscribe(&self, symbol: &str, subscriber: Arc<dyn Subscriber>) -> Result<(), CoreError> {
        self.instrument(symbol)?.subscribe(subscriber);
        Ok(())
    }

    pub fn unsubscribe(&self, symbol: &str, id: SubscriberId) -> Result<(), CoreError> {
        self.instrument(symbol)?.unsubscribe(id);
        Ok(())
    }

    /// Subscribers across all pairs.
    pub fn subscriber_count(&self) -> usize {
        self.ordered.iter().map(|i| i.subscriber_count()).sum()
    }

    pub fn pair_count(&self) -> usize {
        self.ordered.len()
    }

    /// Stop every simulator, wait up to `grace` for them to exit (aborting
    /// stragglers), then close all subscribers.
    pub async fn shutdown(&self, grace: Duration) {
        for instrument in &self.ordered {
            instrument.stop();
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        if tokio::time::timeout(grace, join_all(tasks.iter_mut())).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "simulators did not stop in time, aborting");
            for task in &tasks {
                task.abort();
            }
        }

        for instrument in &self.ordered {
            instrument.close_subscribers();
        }
        info!("all simulators stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::market_data::instrument::tests::RecordingSubscriber;
    use crate::runtime_config::PairSeed;
    use crate::types::LiveUpdate;

    fn seeded_registry(config: &SimConfig) -> Arc<Registry> {
        let next = AtomicU64::new(100);
        Registry::initialize_with(config, |_| Entropy::seeded(next.fetch_add(1, Ordering::Relaxed)))
    }

    #[tokio::test(start_paused = true)]
    async fn same_seed_same_history() {
        let config = SimConfig {
            seed: Some(5),
            ..SimConfig::default()
        };
        let a = Registry::initialize(&config);
        let b = Registry::initialize(&config);

        // Both were generated within the same five-minute bucket unless the
        // wall clock crossed a boundary in between.
        let (ha, hb) = (a.get_history("SOLUSDT").unwrap(), b.get_history("SOLUSDT").unwrap());
        if ha[0].time == hb[0].time {
            assert_eq!(ha, hb);
        }
        assert_ne!(a.get_history("BTCUSDT").unwrap()[0].open, ha[0].open);

        a.shutdown(Duration::from_secs(1)).await;
        b.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn btc_history_after_initialize() {
        let registry = seeded_registry(&SimConfig::default());
        let history = registry.get_history("BTCUSDT").unwrap();

        assert_eq!(history.len(), 288);
        for pair in history.windows(2) {
            assert_eq!(pair[1].time - pair[0].time, 300_000);
        }
        let span = history[287].time - history[0].time;
        assert_eq!(span, 287 * 300_000);
        assert!(Utc::now().timestamp_millis() - history[287].time <= 2 * 300_000);

        let reported = registry
            .list_pairs()
            .into_iter()
            .find(|p| p.symbol == "BTCUSDT")
            .unwrap();
        assert_eq!(history[287].close, reported.last_price);

        registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_symbol_is_not_found() {
        let registry = seeded_registry(&SimConfig::default());
        let sub = RecordingSubscriber::new();

        assert!(matches!(registry.get_history("DOGEUSDT"), Err(CoreError::NotFound(s)) if s == "DOGEUSDT"));
        assert!(matches!(registry.subscribe("DOGEUSDT", sub.clone()), Err(CoreError::NotFound(_))));
        assert!(matches!(registry.unsubscribe("DOGEUSDT", sub.id()), Err(CoreError::NotFound(_))));
        assert!(!registry.contains("DOGEUSDT"));

        registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn list_pairs_follows_config_order() {
        let registry = seeded_registry(&SimConfig::default());
        let symbols: Vec<String> = registry.list_pairs().into_iter().map(|p| p.symbol).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT"]);
        assert_eq!(registry.pair_count(), 5);
        registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_receives_eth_updates() {
        let registry = seeded_registry(&SimConfig::default());
        let sub = RecordingSubscriber::new();
        registry.subscribe("ETHUSDT", sub.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;

        let received = sub.received.lock().clone();
        assert!(!received.is_empty());
        for raw in &received {
            let update: LiveUpdate = serde_json::from_str(raw).unwrap();
            assert_eq!(update.symbol, "ETHUSDT");
            assert!(update.last_candle.is_well_formed());
        }

        registry.unsubscribe("ETHUSDT", sub.id()).unwrap();
        registry.unsubscribe("ETHUSDT", sub.id()).unwrap();
        assert_eq!(registry.subscriber_count(), 0);

        registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_history_reads_are_consistent() {
        let config = SimConfig {
            price_tick_ms: 1,
            candle_check_ms: 1,
            live_interval_secs: 1,
            ..SimConfig::default()
        };
        let registry = seeded_registry(&config);

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        let history = registry.get_history("BTCUSDT").unwrap();
                        assert_eq!(history.len(), 288);
                        for pair in history.windows(2) {
                            assert!(pair[0].time < pair[1].time);
                        }
                        for candle in &history {
                            assert!(candle.is_well_formed());
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for reader in readers {
            reader.await.unwrap();
        }
        registry.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_simulators_and_closes_subscribers() {
        let config = SimConfig {
            pairs: vec![PairSeed { symbol: "SOLUSDT".into(), seed_price: 180.0 }],
            ..SimConfig::default()
        };
        let registry = seeded_registry(&config);
        let sub = RecordingSubscriber::new();
        registry.subscribe("SOLUSDT", sub.clone()).unwrap();

        registry.shutdown(Duration::from_secs(1)).await;

        assert!(*sub.closed.lock());
        assert_eq!(registry.subscriber_count(), 0);
        assert!(registry.instrument("SOLUSDT").unwrap().is_stopped());
        assert!(registry.tasks.lock().is_empty());
    }
}
