pub mod features;
pub mod pipeline;

pub use features::{compute_features, FeatureBundle};
pub use pipeline::{CandleBundle, DataPipeline};
