//! Prediction orchestrator: owns the active generation and hot-reloads it

use crate::config::{AppConfig, EngineConfig};
use crate::error::{EnsembleError, Result};
use crate::metrics::ServingMetrics;
use crate::models::aggregator::{self, ModelOutput, ScoreAggregator, VoteSummary};
use crate::models::loader::ModelLoader;
use crate::models::registry::Generation;
use crate::models::scanner::{ArtifactScanner, ArtifactSelection};
use crate::types::prediction::PredictionResult;
use crate::types::status::{EngineState, EngineStatus, ModelStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What a refresh-if-newer check did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Active generation kept
    Unchanged,
    /// A newer artifact was loaded and published
    Swapped { version: String },
    /// Nothing loadable on disk
    NoArtifact,
    /// Another caller is rebuilding; the current generation stays in use
    InProgress,
    /// Scan or build failed; the previous generation (if any) stays active
    Failed { reason: String },
}

/// Multi-model ensemble inference engine.
///
/// Holds exactly one active [`Generation`]. Each prediction clones the
/// generation pointer once and uses only that generation, so a concurrent
/// swap never mixes models from two artifacts within one result.
pub struct InferenceEngine {
    scanner: Option<ArtifactScanner>,
    loader: ModelLoader,
    /// The only mutable state; written once per published generation
    active: RwLock<Option<Arc<Generation>>>,
    /// Serialises generation builds and weight updates
    reload_gate: Mutex<()>,
    /// Last selection that failed to build; not retried until the disk changes
    rejected: Mutex<Option<ArtifactSelection>>,
    options: EngineConfig,
    metrics: Arc<ServingMetrics>,
    generations_published: AtomicU64,
}

impl InferenceEngine {
    /// Create an engine from configuration and try an initial load.
    ///
    /// An empty or missing artifact directory is not an error: the engine
    /// starts empty and picks up the first artifact that appears.
    pub fn new(config: &AppConfig) -> Self {
        let engine = Self::with_scanner(
            ArtifactScanner::new(&config.artifacts.dir, config.artifacts.algorithms.clone()),
            config.engine.clone(),
        );

        info!(
            dir = %config.artifacts.dir,
            algorithms = ?config.artifacts.algorithms,
            "Inference engine initialized"
        );

        engine.reload_if_newer();
        engine
    }

    /// Create an engine over an artifact directory with default settings
    pub fn with_artifact_dir<P: AsRef<Path>>(dir: P) -> Self {
        let config = AppConfig {
            artifacts: crate::config::ArtifactsConfig {
                dir: dir.as_ref().display().to_string(),
                ..AppConfig::default().artifacts
            },
            ..AppConfig::default()
        };
        Self::new(&config)
    }

    fn with_scanner(scanner: ArtifactScanner, options: EngineConfig) -> Self {
        Self {
            loader: ModelLoader::new(scanner.algorithms().to_vec()),
            scanner: Some(scanner),
            active: RwLock::new(None),
            reload_gate: Mutex::new(()),
            rejected: Mutex::new(None),
            options,
            metrics: Arc::new(ServingMetrics::new()),
            generations_published: AtomicU64::new(0),
        }
    }

    /// Serve a fixed generation with no artifact directory behind it
    pub fn from_generation(generation: Generation, options: EngineConfig) -> Self {
        Self {
            scanner: None,
            loader: ModelLoader::new(Vec::new()),
            active: RwLock::new(Some(Arc::new(generation))),
            reload_gate: Mutex::new(()),
            rejected: Mutex::new(None),
            options,
            metrics: Arc::new(ServingMetrics::new()),
            generations_published: AtomicU64::new(1),
        }
    }

    pub fn metrics(&self) -> Arc<ServingMetrics> {
        self.metrics.clone()
    }

    /// The generation new predictions will use
    pub fn current_generation(&self) -> Option<Arc<Generation>> {
        self.active.read().clone()
    }

    pub fn state(&self) -> EngineState {
        if self.active.read().is_some() {
            EngineState::Ready
        } else {
            EngineState::Empty
        }
    }

    /// Get the number of loaded models
    pub fn model_count(&self) -> usize {
        self.current_generation()
            .map(|g| g.models().len())
            .unwrap_or(0)
    }

    /// Publish a new generation. The write lock covers only the assignment.
    fn publish(&self, generation: Arc<Generation>) {
        *self.active.write() = Some(generation);
        self.generations_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Swap in a newer artifact if one exists.
    ///
    /// Never raises: failures are logged and the previous generation stays
    /// active.
    pub fn reload_if_newer(&self) -> ReloadOutcome {
        let Some(scanner) = &self.scanner else {
            return ReloadOutcome::Unchanged;
        };

        let selection = match scanner.scan() {
            Ok(Some(selection)) => selection,
            Ok(None) => {
                if self.state() == EngineState::Empty {
                    warn!(dir = %scanner.dir().display(), "No model artifacts found");
                } else {
                    debug!(dir = %scanner.dir().display(), "No artifacts on disk, keeping active generation");
                }
                return ReloadOutcome::NoArtifact;
            }
            Err(e) => {
                warn!(error = %e, "Artifact scan failed, keeping active generation");
                return ReloadOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if !self.is_newer(&selection) {
            return ReloadOutcome::Unchanged;
        }

        if self.already_rejected(&selection) {
            return ReloadOutcome::Unchanged;
        }

        // while empty, wait for the in-flight build instead of failing the call
        let _gate = if self.state() == EngineState::Empty {
            self.reload_gate.lock()
        } else {
            match self.reload_gate.try_lock() {
                Some(gate) => gate,
                None => return ReloadOutcome::InProgress,
            }
        };

        // another caller may have published or failed while we waited
        if !self.is_newer(&selection) || self.already_rejected(&selection) {
            return ReloadOutcome::Unchanged;
        }

        match self.build_and_publish(&selection) {
            Ok(generation) => ReloadOutcome::Swapped {
                version: generation.version().to_string(),
            },
            Err(e) => {
                error!(
                    path = %selection.primary_path().display(),
                    error = %e,
                    "Reload discarded, keeping previous generation"
                );
                ReloadOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Rebuild from the best artifact on disk even if it is not newer.
    ///
    /// Unlike [`reload_if_newer`](Self::reload_if_newer) this reports failures
    /// to the caller; the previous generation still stays active.
    pub fn force_reload(&self) -> Result<Arc<Generation>> {
        let scanner = self.scanner.as_ref().ok_or(EnsembleError::NoModelsLoaded)?;
        let _gate = self.reload_gate.lock();

        let selection = scanner.scan()?.ok_or_else(|| EnsembleError::NoArtifact {
            dir: scanner.dir().to_path_buf(),
        })?;

        self.build_and_publish(&selection)
    }

    /// Publish the active models under a new weight mapping
    pub fn update_weights(&self, weights: &BTreeMap<String, f64>) -> Result<Arc<Generation>> {
        let _gate = self.reload_gate.lock();
        let current = self.current_generation().ok_or(EnsembleError::NoModelsLoaded)?;

        let generation = Arc::new(current.with_weights(weights)?);
        self.publish(generation.clone());

        info!(
            version = %generation.version(),
            weights = ?generation.weights().as_map(),
            "Weights updated"
        );
        Ok(generation)
    }

    fn is_newer(&self, selection: &ArtifactSelection) -> bool {
        match self.current_generation() {
            Some(current) => selection.modified() > current.source().modified(),
            None => true,
        }
    }

    fn already_rejected(&self, selection: &ArtifactSelection) -> bool {
        let rejected = self.rejected.lock().as_ref() == Some(selection);
        if rejected {
            debug!(
                path = %selection.primary_path().display(),
                "Newest artifact already failed to load, keeping active generation"
            );
        }
        rejected
    }

    fn build_and_publish(&self, selection: &ArtifactSelection) -> Result<Arc<Generation>> {
        let start = Instant::now();

        match self.loader.load(selection) {
            Ok(generation) => {
                let generation = Arc::new(generation);
                self.publish(generation.clone());
                self.metrics.record_reload(true);
                *self.rejected.lock() = None;

                info!(
                    version = %generation.version(),
                    models = generation.models().len(),
                    path = %selection.primary_path().display(),
                    load_ms = start.elapsed().as_millis() as u64,
                    "Generation published"
                );
                Ok(generation)
            }
            Err(e) => {
                self.metrics.record_reload(false);
                *self.rejected.lock() = Some(selection.clone());
                Err(e)
            }
        }
    }

    /// Generation for one call, after the refresh-if-newer check
    fn generation_for_call(&self) -> Result<Arc<Generation>> {
        if self.options.reload_on_predict {
            self.reload_if_newer();
        }
        self.current_generation().ok_or(EnsembleError::NoModelsLoaded)
    }

    /// Run inference on one feature vector.
    ///
    /// With `include_confidence` the point estimate is the mean of model
    /// outputs, accompanied by confidence and bounds; without it the point
    /// estimate is the weighted average and those fields are absent.
    pub fn predict(
        &self,
        features: &[f64],
        include_individual: bool,
        include_confidence: bool,
    ) -> Result<PredictionResult> {
        let start = Instant::now();
        let result = self.generation_for_call().and_then(|generation| {
            self.predict_on(&generation, features, include_individual, include_confidence, start)
        });

        if result.is_err() {
            self.metrics.record_failure();
        }
        result
    }

    /// Run inference on a batch of feature vectors.
    ///
    /// One reload check and one generation serve the whole batch.
    pub fn batch_predict(&self, features_batch: &[Vec<f64>]) -> Vec<Result<PredictionResult>> {
        let generation = self.generation_for_call().ok();

        features_batch
            .iter()
            .map(|features| {
                let result = match &generation {
                    Some(generation) => {
                        self.predict_on(generation, features, true, true, Instant::now())
                    }
                    None => Err(EnsembleError::NoModelsLoaded),
                };
                if result.is_err() {
                    self.metrics.record_failure();
                }
                result
            })
            .collect()
    }

    /// Weighted average of model outputs
    pub fn predict_weighted_average(&self, features: &[f64]) -> Result<f64> {
        let generation = self.generation_for_call()?;
        let outputs = self.score(&generation, features)?;
        ScoreAggregator::new(generation.weights()).weighted_average(&outputs)
    }

    /// Unweighted mean and variance of model outputs
    pub fn predict_voting(&self, features: &[f64]) -> Result<VoteSummary> {
        let generation = self.generation_for_call()?;
        let outputs = self.score(&generation, features)?;
        ScoreAggregator::voting(&outputs)
    }

    fn predict_on(
        &self,
        generation: &Generation,
        features: &[f64],
        include_individual: bool,
        include_confidence: bool,
        start: Instant,
    ) -> Result<PredictionResult> {
        let outputs = self.score(generation, features)?;
        let degraded = outputs.iter().any(|o| o.outcome.is_err());

        let (prediction, confidence, lower_bound, upper_bound) = if include_confidence {
            let estimate = ScoreAggregator::confidence_weighted(&outputs)?;
            (
                estimate.mean,
                Some(estimate.confidence),
                Some(estimate.lower_bound),
                Some(estimate.upper_bound),
            )
        } else {
            let value = ScoreAggregator::new(generation.weights()).weighted_average(&outputs)?;
            (value, None, None, None)
        };

        let individual_predictions = if include_individual {
            ScoreAggregator::individual(&outputs)
        } else {
            BTreeMap::new()
        };

        let latency = start.elapsed();
        self.metrics.record_prediction(latency, confidence, degraded);

        debug!(
            version = %generation.version(),
            prediction = prediction,
            confidence = ?confidence,
            degraded = degraded,
            "Ensemble prediction complete"
        );

        Ok(PredictionResult {
            prediction,
            confidence,
            lower_bound,
            upper_bound,
            individual_predictions,
            top_features: generation.top_features(self.options.top_features),
            model_version: generation.version().to_string(),
            source_artifact: generation.source().primary_path().to_path_buf(),
            degraded,
            latency_seconds: latency.as_secs_f64(),
        })
    }

    /// Score all models and record per-model metrics
    fn score(&self, generation: &Generation, features: &[f64]) -> Result<Vec<ModelOutput>> {
        let outputs = generation.score(features)?;
        let slow = self.options.slow_model_threshold();

        for output in &outputs {
            self.metrics.record_model_time(&output.model, output.elapsed);

            if let Err(e) = &output.outcome {
                self.metrics.record_model_failure(&output.model);
                warn!(model = %output.model, error = %e, "Model inference failed");
            }

            if let Some(limit) = slow {
                if output.elapsed > limit {
                    self.metrics.record_slow_model();
                    warn!(
                        model = %output.model,
                        elapsed_ms = output.elapsed.as_millis() as u64,
                        limit_ms = limit.as_millis() as u64,
                        "Slow model call"
                    );
                }
            }
        }

        self.metrics
            .record_model_agreement(&aggregator::successful(&outputs));
        Ok(outputs)
    }

    /// Diagnostic snapshot of the active generation
    pub fn status(&self) -> EngineStatus {
        let artifact_dir = self.scanner.as_ref().map(|s| s.dir().to_path_buf());
        let reload_count = self.generations_published.load(Ordering::Relaxed);

        let Some(generation) = self.current_generation() else {
            return EngineStatus {
                artifact_dir,
                reload_count,
                ..EngineStatus::default()
            };
        };

        let models = generation
            .models()
            .iter()
            .map(|m| ModelStatus {
                name: m.name().to_string(),
                kind: m.kind().to_string(),
                weight: generation.weights().get(m.name()),
                reports_importances: m.named_importances(&[]).is_some(),
            })
            .collect();

        EngineStatus {
            state: EngineState::Ready,
            artifact_dir,
            version: Some(generation.version().to_string()),
            models,
            weights: generation.weights().as_map().clone(),
            scaler_loaded: generation.scaler().is_some(),
            artifact_kind: Some(generation.source().kind()),
            source_artifact: Some(generation.source().primary_path().to_path_buf()),
            source_modified: Some(generation.source().modified().into()),
            feature_count: generation
                .scaler()
                .map(|s| s.feature_count())
                .unwrap_or(generation.feature_names().len()),
            feature_names: generation.feature_names().to_vec(),
            metadata: generation.metadata().clone(),
            reload_count,
        }
    }
}
