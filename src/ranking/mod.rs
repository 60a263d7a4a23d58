pub mod correlation;
pub mod normalizer;
pub mod ranker;
pub mod scorer;

pub use correlation::{greedy_correlation_filter, pearson, CorrelationDecision};
pub use normalizer::robust_minmax;
pub use ranker::{RankOutput, RankedSymbol, Ranker};
pub use scorer::{compute_score, ScoreComponents};
