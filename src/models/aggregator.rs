//! Score aggregation for the multi-model ensemble

use crate::error::{EnsembleError, Result};
use crate::models::confidence::{self, ConfidenceEstimate};
use crate::models::registry::WeightVector;
use crate::models::scorer::ScoringError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one model on one feature vector
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub model: String,
    pub outcome: std::result::Result<f64, ScoringError>,
    pub elapsed: Duration,
}

impl ModelOutput {
    pub fn value(&self) -> Option<f64> {
        self.outcome.as_ref().ok().copied()
    }
}

/// Unweighted vote over successful outputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoteSummary {
    /// Arithmetic mean of successful outputs
    pub prediction: f64,
    /// Population variance of successful outputs
    pub variance: f64,
    /// Number of models that contributed
    pub votes: usize,
}

/// Combines per-model outputs using a generation's weight vector.
pub struct ScoreAggregator<'a> {
    weights: &'a WeightVector,
}

impl<'a> ScoreAggregator<'a> {
    pub fn new(weights: &'a WeightVector) -> Self {
        Self { weights }
    }

    /// `sum(weight * output)` over models that produced a value.
    ///
    /// A failed model's weight is not handed to the survivors, so partial
    /// failure pulls the estimate toward zero.
    pub fn weighted_average(&self, outputs: &[ModelOutput]) -> Result<f64> {
        let mut any = false;
        let mut weighted_sum = 0.0;

        for output in outputs {
            if let Some(value) = output.value() {
                weighted_sum += self.weights.get(&output.model) * value;
                any = true;
            }
        }

        if !any {
            return Err(no_valid(outputs));
        }
        if !weighted_sum.is_finite() {
            return Err(non_finite("weighted average", outputs));
        }
        Ok(weighted_sum)
    }

    /// Mean and variance of successful outputs, ignoring weights
    pub fn voting(outputs: &[ModelOutput]) -> Result<VoteSummary> {
        let values = successful(outputs);
        let (mean, std_dev) = confidence::mean_and_std(&values).ok_or_else(|| no_valid(outputs))?;

        let variance = std_dev * std_dev;
        if !variance.is_finite() {
            return Err(non_finite("vote variance", outputs));
        }

        Ok(VoteSummary {
            prediction: mean,
            variance,
            votes: values.len(),
        })
    }

    /// Mean of successful outputs with confidence and bounds
    pub fn confidence_weighted(outputs: &[ModelOutput]) -> Result<ConfidenceEstimate> {
        let estimate = confidence::estimate(&successful(outputs)).ok_or_else(|| no_valid(outputs))?;
        if !estimate.is_representable() {
            return Err(non_finite("confidence bounds", outputs));
        }
        Ok(estimate)
    }

    /// Per-model breakdown, `None` for models that failed
    pub fn individual(outputs: &[ModelOutput]) -> BTreeMap<String, Option<f64>> {
        outputs
            .iter()
            .map(|o| (o.model.clone(), o.value()))
            .collect()
    }

    /// Get the weight vector in use
    pub fn weights(&self) -> &WeightVector {
        self.weights
    }
}

/// Values of all models that succeeded, in model order
pub fn successful(outputs: &[ModelOutput]) -> Vec<f64> {
    outputs.iter().filter_map(ModelOutput::value).collect()
}

fn no_valid(outputs: &[ModelOutput]) -> EnsembleError {
    EnsembleError::NoValidPredictions {
        attempted: outputs.len(),
    }
}

fn non_finite(stage: &'static str, outputs: &[ModelOutput]) -> EnsembleError {
    EnsembleError::NonFiniteEstimate {
        stage,
        models: outputs.len(),
    }
}
