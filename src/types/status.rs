//! Diagnostic view of the serving core

use crate::models::scanner::ArtifactKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No generation published yet
    #[default]
    Empty,
    /// A generation is active
    Ready,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub name: String,
    pub kind: String,
    pub weight: f64,
    pub reports_importances: bool,
}

/// Snapshot of the active generation
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub artifact_dir: Option<PathBuf>,
    pub version: Option<String>,
    pub models: Vec<ModelStatus>,
    pub weights: BTreeMap<String, f64>,
    pub scaler_loaded: bool,
    pub artifact_kind: Option<ArtifactKind>,
    pub source_artifact: Option<PathBuf>,
    pub source_modified: Option<DateTime<Utc>>,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
    pub metadata: Map<String, Value>,
    /// Generations published since start-up
    pub reload_count: u64,
}

impl EngineStatus {
    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }
}
