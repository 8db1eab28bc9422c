//! Immutable model generations and their weight vectors

use crate::error::{EnsembleError, Result};
use crate::models::aggregator::ModelOutput;
use crate::models::importance::{self, ImportanceReport};
use crate::models::scanner::ArtifactSelection;
use crate::models::scorer::{FeatureScaler, Scorer, ScoringError};
use crate::types::prediction::FeatureImportance;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// A named scoring component inside a generation
#[derive(Clone)]
pub struct ModelEntry {
    name: String,
    scorer: Arc<dyn Scorer>,
}

impl ModelEntry {
    pub fn new(name: impl Into<String>, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            name: name.into(),
            scorer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        self.scorer.kind()
    }

    pub fn predict(&self, features: &[f64]) -> std::result::Result<f64, ScoringError> {
        self.scorer.predict(features)
    }

    /// Importances keyed by feature name; positions without a name become `feature_<i>`
    pub fn named_importances(&self, feature_names: &[String]) -> Option<Vec<(String, f64)>> {
        let importances = self.scorer.feature_importances()?;
        Some(
            importances
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let name = feature_names
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| format!("feature_{}", i));
                    (name, *v)
                })
                .collect(),
        )
    }
}

impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("name", &self.name)
            .field("kind", &self.scorer.kind())
            .finish()
    }
}

/// Normalised model weights. Always sums to 1 over the loaded models.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightVector {
    weights: BTreeMap<String, f64>,
}

impl WeightVector {
    /// Build a weight vector for `models`.
    ///
    /// With no explicit mapping (or one that names none of the loaded models,
    /// or sums to zero) every model gets an equal share. Explicit weights for
    /// models that are not loaded are dropped; loaded models the mapping does
    /// not mention get zero.
    pub fn normalized(explicit: Option<&BTreeMap<String, f64>>, models: &[String]) -> Result<Self> {
        let explicit = match explicit {
            Some(map) if !map.is_empty() => map,
            _ => return Ok(Self::equal(models)),
        };

        for (name, weight) in explicit {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(EnsembleError::InvalidWeights(format!(
                    "weight for {} is {}",
                    name, weight
                )));
            }
            if !models.iter().any(|m| m == name) {
                warn!(model = %name, "Weight given for a model that is not loaded, dropping");
            }
        }

        let total: f64 = models.iter().filter_map(|m| explicit.get(m)).sum();
        if total <= 0.0 {
            warn!("Explicit weights sum to zero over loaded models, using equal weights");
            return Ok(Self::equal(models));
        }

        let weights = models
            .iter()
            .map(|m| {
                let weight = match explicit.get(m) {
                    Some(w) => w / total,
                    None => {
                        warn!(model = %m, "No weight given for loaded model, it will not contribute");
                        0.0
                    }
                };
                (m.clone(), weight)
            })
            .collect();

        Ok(Self { weights })
    }

    /// Equal share across `models`
    pub fn equal(models: &[String]) -> Self {
        let share = if models.is_empty() {
            0.0
        } else {
            1.0 / models.len() as f64
        };
        Self {
            weights: models.iter().map(|m| (m.clone(), share)).collect(),
        }
    }

    /// Weight of a model, zero when unknown
    pub fn get(&self, model: &str) -> f64 {
        self.weights.get(model).copied().unwrap_or(0.0)
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Everything a loader hands over to build a generation
pub struct GenerationParts {
    pub version: String,
    pub models: Vec<ModelEntry>,
    pub weights: Option<BTreeMap<String, f64>>,
    pub scaler: Option<FeatureScaler>,
    pub feature_names: Vec<String>,
    pub source: ArtifactSelection,
    pub metadata: Map<String, Value>,
}

/// One immutable, versioned set of models, weights and optional scaler.
///
/// Built once from an artifact and never mutated; newer artifacts produce a
/// new generation that replaces this one as a whole.
#[derive(Debug)]
pub struct Generation {
    version: String,
    models: Vec<ModelEntry>,
    weights: WeightVector,
    scaler: Option<Arc<FeatureScaler>>,
    feature_names: Vec<String>,
    source: ArtifactSelection,
    metadata: Map<String, Value>,
    feature_ranking: Vec<FeatureImportance>,
}

impl Generation {
    pub fn new(parts: GenerationParts) -> Result<Self> {
        let GenerationParts {
            version,
            models,
            weights,
            scaler,
            feature_names,
            source,
            metadata,
        } = parts;

        Self::assemble(
            version,
            models,
            weights.as_ref(),
            scaler.map(Arc::new),
            feature_names,
            source,
            metadata,
        )
    }

    fn assemble(
        version: String,
        models: Vec<ModelEntry>,
        weights: Option<&BTreeMap<String, f64>>,
        scaler: Option<Arc<FeatureScaler>>,
        mut feature_names: Vec<String>,
        source: ArtifactSelection,
        metadata: Map<String, Value>,
    ) -> Result<Self> {
        if models.is_empty() {
            return Err(EnsembleError::EmptyArtifact {
                path: source.primary_path().to_path_buf(),
            });
        }

        let mut seen = HashSet::new();
        for model in &models {
            if !seen.insert(model.name()) {
                return Err(EnsembleError::InvalidModel {
                    model: model.name().to_string(),
                    reason: "duplicate model name".to_string(),
                });
            }
        }

        if feature_names.is_empty() {
            if let Some(scaler) = &scaler {
                feature_names = scaler.feature_names.clone();
            }
        }

        let names: Vec<String> = models.iter().map(|m| m.name().to_string()).collect();
        let weights = WeightVector::normalized(weights, &names)?;

        let reports: Vec<ImportanceReport> = models
            .iter()
            .filter_map(|m| {
                m.named_importances(&feature_names).map(|importances| ImportanceReport {
                    weight: weights.get(m.name()),
                    importances,
                })
            })
            .collect();
        let feature_ranking = importance::aggregate(&reports);

        Ok(Self {
            version,
            models,
            weights,
            scaler,
            feature_names,
            source,
            metadata,
            feature_ranking,
        })
    }

    /// Sibling generation sharing the same components under new weights
    pub fn with_weights(&self, weights: &BTreeMap<String, f64>) -> Result<Self> {
        Self::assemble(
            format!("{}+reweighted", self.version),
            self.models.clone(),
            Some(weights),
            self.scaler.clone(),
            self.feature_names.clone(),
            self.source.clone(),
            self.metadata.clone(),
        )
    }

    /// Run every model on one feature vector.
    ///
    /// The shared scaler is applied first; a shape mismatch there fails the
    /// whole call. Individual model failures are kept as values.
    pub fn score(&self, features: &[f64]) -> Result<Vec<ModelOutput>> {
        let scaled;
        let input = match &self.scaler {
            Some(scaler) => {
                scaled = scaler.transform(features)?;
                scaled.as_slice()
            }
            None => features,
        };

        Ok(self
            .models
            .iter()
            .map(|model| {
                let start = Instant::now();
                let outcome = model.predict(input);
                ModelOutput {
                    model: model.name().to_string(),
                    outcome,
                    elapsed: start.elapsed(),
                }
            })
            .collect())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn weights(&self) -> &WeightVector {
        &self.weights
    }

    pub fn scaler(&self) -> Option<&FeatureScaler> {
        self.scaler.as_deref()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn source(&self) -> &ArtifactSelection {
        &self.source
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Full aggregated importance ranking, highest first
    pub fn feature_ranking(&self) -> &[FeatureImportance] {
        &self.feature_ranking
    }

    pub fn top_features(&self, n: usize) -> Vec<FeatureImportance> {
        importance::top_n(&self.feature_ranking, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::scanner::ArtifactFile;
    use crate::models::scorer::{LinearModel, Node, ScoringModel, Tree, TreeCombine, TreeEnsemble};
    use proptest::prelude::*;
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn source() -> ArtifactSelection {
        ArtifactSelection::Bundle(ArtifactFile {
            path: PathBuf::from("models/ensemble_test.json"),
            modified: SystemTime::UNIX_EPOCH,
        })
    }

    fn constant(value: f64) -> Arc<dyn Scorer> {
        Arc::new(ScoringModel::Linear(LinearModel {
            coefficients: vec![0.0, 0.0],
            intercept: value,
        }))
    }

    fn forest_with_importances(importances: Vec<f64>) -> Arc<dyn Scorer> {
        Arc::new(ScoringModel::TreeEnsemble(TreeEnsemble {
            trees: vec![Tree {
                nodes: vec![Node {
                    feature_index: 0,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                    value: Some(1.0),
                }],
            }],
            combine: TreeCombine::Average,
            base_score: 0.0,
            feature_importances: Some(importances),
        }))
    }

    fn parts(models: Vec<ModelEntry>, weights: Option<BTreeMap<String, f64>>) -> GenerationParts {
        GenerationParts {
            version: "v1".to_string(),
            models,
            weights,
            scaler: None,
            feature_names: names(&["close", "volume"]),
            source: source(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_equal_weights_when_none_given() {
        let weights = WeightVector::normalized(None, &names(&["a", "b", "c"])).unwrap();
        for model in ["a", "b", "c"] {
            assert!((weights.get(model) - 1.0 / 3.0).abs() < 1e-12);
        }
        assert!((weights.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_explicit_weights_normalised_and_filtered() {
        let mut explicit = BTreeMap::new();
        explicit.insert("a".to_string(), 3.0);
        explicit.insert("b".to_string(), 1.0);
        explicit.insert("not_loaded".to_string(), 10.0);

        let weights = WeightVector::normalized(Some(&explicit), &names(&["a", "b", "c"])).unwrap();
        assert_eq!(weights.get("a"), 0.75);
        assert_eq!(weights.get("b"), 0.25);
        assert_eq!(weights.get("c"), 0.0);
        assert_eq!(weights.get("not_loaded"), 0.0);
        assert_eq!(weights.len(), 3);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut explicit = BTreeMap::new();
        explicit.insert("a".to_string(), -1.0);
        assert!(matches!(
            WeightVector::normalized(Some(&explicit), &names(&["a"])),
            Err(EnsembleError::InvalidWeights(_))
        ));
    }

    #[test]
    fn test_zero_sum_falls_back_to_equal() {
        let mut explicit = BTreeMap::new();
        explicit.insert("a".to_string(), 0.0);
        let weights = WeightVector::normalized(Some(&explicit), &names(&["a", "b"])).unwrap();
        assert_eq!(weights.get("a"), 0.5);
        assert_eq!(weights.get("b"), 0.5);
    }

    #[test]
    fn test_generation_rejects_empty_and_duplicates() {
        assert!(matches!(
            Generation::new(parts(vec![], None)),
            Err(EnsembleError::EmptyArtifact { .. })
        ));

        let models = vec![
            ModelEntry::new("ridge", constant(1.0)),
            ModelEntry::new("ridge", constant(2.0)),
        ];
        assert!(matches!(
            Generation::new(parts(models, None)),
            Err(EnsembleError::InvalidModel { .. })
        ));
    }

    #[test]
    fn test_generation_scores_every_model() {
        let models = vec![
            ModelEntry::new("ridge", constant(100.0)),
            ModelEntry::new("lasso", constant(300.0)),
        ];
        let generation = Generation::new(parts(models, None)).unwrap();

        let outputs = generation.score(&[1.0, 2.0]).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].value(), Some(100.0));
        assert_eq!(outputs[1].value(), Some(300.0));

        // linear models check length themselves
        let outputs = generation.score(&[1.0]).unwrap();
        assert!(outputs.iter().all(|o| o.value().is_none()));
    }

    #[test]
    fn test_scaler_shape_is_fatal() {
        let mut p = parts(vec![ModelEntry::new("ridge", constant(1.0))], None);
        p.scaler = Some(FeatureScaler {
            mean: vec![0.0, 0.0],
            scale: vec![1.0, 1.0],
            feature_names: vec![],
        });
        let generation = Generation::new(p).unwrap();
        assert!(matches!(
            generation.score(&[1.0, 2.0, 3.0]),
            Err(EnsembleError::FeatureShape { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_feature_ranking_uses_names() {
        let models = vec![
            ModelEntry::new("random_forest", forest_with_importances(vec![0.9, 0.1])),
            ModelEntry::new("ridge", constant(1.0)),
        ];
        let generation = Generation::new(parts(models, None)).unwrap();
        let top = generation.top_features(5);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].feature, "close");
        assert!((top[0].importance - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_with_weights_shares_models() {
        let models = vec![
            ModelEntry::new("a", constant(1.0)),
            ModelEntry::new("b", constant(2.0)),
        ];
        let generation = Generation::new(parts(models, None)).unwrap();

        let mut explicit = BTreeMap::new();
        explicit.insert("a".to_string(), 1.0);
        explicit.insert("b".to_string(), 3.0);
        let reweighted = generation.with_weights(&explicit).unwrap();

        assert_eq!(reweighted.weights().get("b"), 0.75);
        assert_eq!(reweighted.source(), generation.source());
        assert_eq!(reweighted.version(), "v1+reweighted");
        assert_eq!(generation.weights().get("b"), 0.5);
    }

    proptest! {
        #[test]
        fn normalized_weights_sum_to_one(
            raw in prop::collection::vec(0.0f64..100.0, 1..8),
        ) {
            let models: Vec<String> = (0..raw.len()).map(|i| format!("m{}", i)).collect();
            let explicit: BTreeMap<String, f64> =
                models.iter().cloned().zip(raw.iter().copied()).collect();
            let weights = WeightVector::normalized(Some(&explicit), &models).unwrap();
            prop_assert!((weights.total() - 1.0).abs() < 1e-9);
        }
    }
}
