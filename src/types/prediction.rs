//! Prediction result returned to the serving layer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One entry of the aggregated feature-importance ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Result of a single ensemble prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Point estimate
    pub prediction: f64,
    /// Inter-model agreement score in (0, 1]
    pub confidence: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    /// Per-model outputs; `None` marks a model that failed on this call
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub individual_predictions: BTreeMap<String, Option<f64>>,
    /// Highest-ranked features of the generation that served this call
    pub top_features: Vec<FeatureImportance>,
    pub model_version: String,
    pub source_artifact: PathBuf,
    /// True when at least one model failed and was left out
    pub degraded: bool,
    pub latency_seconds: f64,
}

impl PredictionResult {
    /// Names of models that failed on this call (only known when individual outputs were requested)
    pub fn failed_models(&self) -> Vec<&str> {
        self.individual_predictions
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Width of the prediction interval, when bounds were computed
    pub fn interval_width(&self) -> Option<f64> {
        match (self.lower_bound, self.upper_bound) {
            (Some(lo), Some(hi)) => Some(hi - lo),
            _ => None,
        }
    }
}
