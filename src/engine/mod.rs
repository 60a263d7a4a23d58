pub mod bot;
pub mod reconciler;
pub mod scheduler;
pub mod state;

pub use bot::{BotEngine, EngineHandle};
pub use reconciler::DealReconciler;
pub use scheduler::CandleCloseScheduler;
pub use state::{EngineCommand, EngineSnapshot, PositionView, RankedSymbolView, SharedSnapshot};
