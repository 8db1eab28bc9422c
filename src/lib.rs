//! Price Ensemble Serving Library
//!
//! Combines several independently trained price-regression models into one
//! forecast with a confidence score and bounds, and hot-swaps newer model
//! artifacts without interrupting predictions in flight.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod serving;
pub mod types;

pub use config::AppConfig;
pub use error::{EnsembleError, Result};
pub use models::inference::{InferenceEngine, ReloadOutcome};
pub use types::{EngineStatus, PredictionResult};
