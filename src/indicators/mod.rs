//! Pure technical indicator functions over f64 slices.
//!
//! All functions are deterministic and allocation-per-call; output vectors
//! have the same length as the input with NaN marking the warm-up region.

pub mod adx;
pub mod atr;
pub mod ema;
pub mod rsi;
pub mod two_pole;

pub use adx::{adx, AdxOutput};
pub use atr::{atr, rma, true_range};
pub use ema::{ema, sma};
pub use rsi::rsi;
pub use two_pole::{super_smoother_2pole, two_pole_oscillator, TwoPoleOutput};
