pub mod bootstrap;
pub mod broadcast;
pub mod candle;
pub mod entropy;
pub mod instrument;
pub mod simulator;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use bootstrap::generate_history;
pub use candle::Candle;
pub use entropy::Entropy;
pub use instrument::{InstrumentState, Subscriber, SubscriberId};
pub use simulator::{Simulator, SimulatorSettings};
