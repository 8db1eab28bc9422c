//! Model artifact loader

use crate::error::{EnsembleError, Result};
use crate::models::registry::{Generation, GenerationParts, ModelEntry};
use crate::models::scanner::{ArtifactFile, ArtifactSelection};
use crate::models::scorer::{FeatureScaler, Scorer, ScoringModel};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Top-level shape of a bundle artifact.
///
/// Algorithm entries live next to the named fields; anything that is neither
/// a named field nor a supported algorithm is kept as opaque metadata.
#[derive(Debug, Deserialize)]
struct BundleArtifact {
    #[serde(default)]
    weights: Option<BTreeMap<String, f64>>,
    #[serde(default, alias = "timestamp")]
    version: Option<Value>,
    #[serde(default)]
    feature_names: Vec<String>,
    #[serde(default, alias = "scaler")]
    preprocessor: Option<FeatureScaler>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Turns a scanner selection into a [`Generation`]
#[derive(Debug, Clone)]
pub struct ModelLoader {
    /// Supported algorithm names, in ensemble order
    algorithms: Vec<String>,
}

impl ModelLoader {
    pub fn new(algorithms: Vec<String>) -> Self {
        Self { algorithms }
    }

    /// Build a generation from the selected artifact.
    ///
    /// Individual models that fail to decode are skipped with a warning; the
    /// build only fails when nothing usable is left.
    pub fn load(&self, selection: &ArtifactSelection) -> Result<Generation> {
        match selection {
            ArtifactSelection::TunedBundle(file) | ArtifactSelection::Bundle(file) => {
                self.load_bundle(file, selection)
            }
            ArtifactSelection::PerAlgorithm {
                models,
                preprocessor,
                ..
            } => self.load_per_algorithm(models, preprocessor.as_ref(), selection),
        }
    }

    fn load_bundle(&self, file: &ArtifactFile, selection: &ArtifactSelection) -> Result<Generation> {
        info!(path = %file.path.display(), kind = ?selection.kind(), "Loading ensemble bundle");

        let mut bundle: BundleArtifact = read_json(&file.path)?;

        if let Some(scaler) = &bundle.preprocessor {
            scaler
                .validate()
                .map_err(|reason| EnsembleError::InvalidModel {
                    model: "preprocessor".to_string(),
                    reason,
                })?;
        }

        let mut models = Vec::new();
        for algorithm in &self.algorithms {
            let Some(value) = bundle.rest.remove(algorithm) else {
                continue;
            };

            match decode_model(algorithm, value) {
                Ok(model) => models.push(model),
                Err(e) => {
                    warn!(model = %algorithm, path = %file.path.display(), error = %e, "Failed to load model, skipping");
                }
            }
        }

        let version = match bundle.version.take() {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => file
                .path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("bundle")
                .to_string(),
        };

        if !bundle.rest.is_empty() {
            debug!(keys = ?bundle.rest.keys().collect::<Vec<_>>(), "Carrying bundle metadata");
        }

        self.finish(GenerationParts {
            version,
            models,
            weights: bundle.weights,
            scaler: bundle.preprocessor,
            feature_names: bundle.feature_names,
            source: selection.clone(),
            metadata: bundle.rest,
        })
    }

    fn load_per_algorithm(
        &self,
        files: &[(String, ArtifactFile)],
        preprocessor: Option<&ArtifactFile>,
        selection: &ArtifactSelection,
    ) -> Result<Generation> {
        info!(
            dir = %selection.primary_path().display(),
            files = files.len(),
            "Loading per-algorithm artifacts"
        );

        // every model sees the scaled vector, so a broken scaler fails the build
        let scaler = match preprocessor {
            Some(file) => {
                let scaler: FeatureScaler = read_json(&file.path)?;
                scaler
                    .validate()
                    .map_err(|reason| EnsembleError::InvalidModel {
                        model: "preprocessor".to_string(),
                        reason,
                    })?;
                Some(scaler)
            }
            None => None,
        };

        let mut models = Vec::new();
        for (algorithm, file) in files {
            let loaded = read_json::<Value>(&file.path).and_then(|v| decode_model(algorithm, v));
            match loaded {
                Ok(model) => models.push(model),
                Err(e) => {
                    warn!(model = %algorithm, path = %file.path.display(), error = %e, "Failed to load model, skipping");
                }
            }
        }

        let modified: DateTime<Utc> = selection.modified().into();
        let version = format!(
            "per_algorithm@{}",
            modified.to_rfc3339_opts(SecondsFormat::Secs, true)
        );

        let mut metadata = Map::new();
        metadata.insert(
            "files".to_string(),
            Value::from(
                selection
                    .files()
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>(),
            ),
        );

        self.finish(GenerationParts {
            version,
            models,
            weights: None,
            scaler,
            feature_names: Vec::new(),
            source: selection.clone(),
            metadata,
        })
    }

    fn finish(&self, parts: GenerationParts) -> Result<Generation> {
        let generation = Generation::new(parts)?;

        info!(
            version = %generation.version(),
            count = generation.models().len(),
            scaler = generation.scaler().is_some(),
            "Loaded {} models: {:?}",
            generation.models().len(),
            generation.model_names()
        );

        Ok(generation)
    }
}

fn decode_model(algorithm: &str, value: Value) -> Result<ModelEntry> {
    let model: ScoringModel =
        serde_json::from_value(value).map_err(|e| EnsembleError::InvalidModel {
            model: algorithm.to_string(),
            reason: e.to_string(),
        })?;

    model
        .validate()
        .map_err(|reason| EnsembleError::InvalidModel {
            model: algorithm.to_string(),
            reason,
        })?;

    debug!(model = %algorithm, kind = model.kind(), "Model decoded");
    Ok(ModelEntry::new(algorithm, Arc::new(model)))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|source| EnsembleError::ArtifactIo {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&raw).map_err(|source| EnsembleError::ArtifactFormat {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn algorithms() -> Vec<String> {
        ["random_forest", "gradient_boosting", "ridge"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn artifact(path: PathBuf) -> ArtifactFile {
        ArtifactFile {
            path,
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    fn linear(intercept: f64) -> Value {
        json!({"kind": "linear", "coefficients": [1.0, 0.0], "intercept": intercept})
    }

    #[test]
    fn test_bundle_with_metadata_and_equal_weights() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ensemble_20260101.json");
        let bundle = json!({
            "ridge": linear(10.0),
            "random_forest": {
                "kind": "tree_ensemble",
                "combine": {"method": "average"},
                "trees": [{"nodes": [{"value": 50.0}]}],
                "feature_importances": [0.6, 0.4]
            },
            "feature_names": ["price_lag_1", "volume_7d"],
            "training_samples": 1200,
            "metrics": {"rmse": 3.2}
        });
        fs::write(&path, bundle.to_string()).unwrap();

        let loader = ModelLoader::new(algorithms());
        let selection = ArtifactSelection::Bundle(artifact(path));
        let generation = loader.load(&selection).unwrap();

        assert_eq!(generation.model_names(), vec!["random_forest", "ridge"]);
        assert!((generation.weights().get("ridge") - 0.5).abs() < 1e-12);
        assert_eq!(generation.version(), "ensemble_20260101");
        assert_eq!(generation.metadata()["training_samples"], json!(1200));
        assert!(generation.metadata().contains_key("metrics"));
        assert!(!generation.metadata().contains_key("ridge"));
        assert_eq!(generation.top_features(5)[0].feature, "price_lag_1");
    }

    #[test]
    fn test_bundle_skips_broken_entry_and_keeps_weights() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ensemble_tuned_x.json");
        let bundle = json!({
            "ridge": linear(10.0),
            "gradient_boosting": {"kind": "tree_ensemble", "trees": []},
            "weights": {"ridge": 2.0, "gradient_boosting": 2.0},
            "version": "tuned-7"
        });
        fs::write(&path, bundle.to_string()).unwrap();

        let loader = ModelLoader::new(algorithms());
        let generation = loader
            .load(&ArtifactSelection::TunedBundle(artifact(path)))
            .unwrap();

        assert_eq!(generation.model_names(), vec!["ridge"]);
        assert_eq!(generation.weights().get("ridge"), 1.0);
        assert_eq!(generation.version(), "tuned-7");
    }

    #[test]
    fn test_bundle_with_no_models_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ensemble_empty.json");
        fs::write(&path, json!({"version": "1", "unknown_algo": linear(1.0)}).to_string()).unwrap();

        let loader = ModelLoader::new(algorithms());
        let result = loader.load(&ArtifactSelection::Bundle(artifact(path)));
        assert!(matches!(result, Err(EnsembleError::EmptyArtifact { .. })));
    }

    #[test]
    fn test_corrupt_bundle_is_format_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ensemble_bad.json");
        fs::write(&path, "{ not json").unwrap();

        let loader = ModelLoader::new(algorithms());
        let result = loader.load(&ArtifactSelection::Bundle(artifact(path)));
        assert!(matches!(result, Err(EnsembleError::ArtifactFormat { .. })));
    }

    #[test]
    fn test_per_algorithm_partial_load() {
        let dir = tempdir().unwrap();
        let ridge = dir.path().join("ridge_1.json");
        let forest = dir.path().join("random_forest_1.json");
        let pre = dir.path().join("preprocessor_1.json");
        fs::write(&ridge, linear(5.0).to_string()).unwrap();
        fs::write(&forest, "garbage").unwrap();
        fs::write(
            &pre,
            json!({"mean": [0.0, 0.0], "scale": [1.0, 1.0], "feature_names": ["a", "b"]}).to_string(),
        )
        .unwrap();

        let selection = ArtifactSelection::PerAlgorithm {
            dir: dir.path().to_path_buf(),
            models: vec![
                ("random_forest".to_string(), artifact(forest)),
                ("ridge".to_string(), artifact(ridge)),
            ],
            preprocessor: Some(artifact(pre)),
        };

        let generation = ModelLoader::new(algorithms()).load(&selection).unwrap();
        assert_eq!(generation.model_names(), vec!["ridge"]);
        assert!(generation.scaler().is_some());
        assert_eq!(generation.feature_names(), &["a".to_string(), "b".to_string()]);
        assert!(generation.version().starts_with("per_algorithm@2023-11-14T"));
    }

    #[test]
    fn test_per_algorithm_broken_scaler_fails() {
        let dir = tempdir().unwrap();
        let ridge = dir.path().join("ridge_1.json");
        let pre = dir.path().join("preprocessor_1.json");
        fs::write(&ridge, linear(5.0).to_string()).unwrap();
        fs::write(&pre, json!({"mean": [0.0], "scale": []}).to_string()).unwrap();

        let selection = ArtifactSelection::PerAlgorithm {
            dir: dir.path().to_path_buf(),
            models: vec![("ridge".to_string(), artifact(ridge))],
            preprocessor: Some(artifact(pre)),
        };

        let result = ModelLoader::new(algorithms()).load(&selection);
        assert!(matches!(result, Err(EnsembleError::InvalidModel { .. })));
    }
}
