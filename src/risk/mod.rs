pub mod limits;
pub mod manager;
pub mod sizing;
pub mod sltp;

pub use limits::{count_positions, daily_loss_pct, drawdown_pct, PositionCounts};
pub use manager::{EquityState, RiskDecision, RiskManager, RiskState};
pub use sizing::{compute_volume, VolumeResult};
pub use sltp::{sltp_atr, sltp_rr, Sltp};
