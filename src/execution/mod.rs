pub mod executor;
pub mod idempotency;
pub mod retry;

pub use executor::{CloseOrder, DecisionContext, ExecutionReport, OpenOrder, TradeExecutor};
pub use idempotency::{make_idempotency_key, IdempotencyCache};
pub use retry::call_with_retries;
