//! Type definitions shared with the serving layer

pub mod prediction;
pub mod request;
pub mod status;

pub use prediction::{FeatureImportance, PredictionResult};
pub use request::{BatchItem, ReloadReply, ResponseBody, ServingRequest, ServingResponse};
pub use status::{EngineState, EngineStatus, ModelStatus};
