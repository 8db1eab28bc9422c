//! Ensemble prediction components

pub mod aggregator;
pub mod confidence;
pub mod importance;
pub mod inference;
pub mod loader;
pub mod registry;
pub mod scanner;
pub mod scorer;

pub use aggregator::ScoreAggregator;
pub use inference::{InferenceEngine, ReloadOutcome};
pub use loader::ModelLoader;
pub use registry::{Generation, ModelEntry, WeightVector};
pub use scanner::{ArtifactScanner, ArtifactSelection};
pub use scorer::{Scorer, ScoringModel};

/// Algorithm names looked up in bundles and as `{algorithm}_*` files
pub const DEFAULT_ALGORITHMS: [&str; 5] = [
    "random_forest",
    "gradient_boosting",
    "xgboost",
    "lightgbm",
    "ridge",
];
