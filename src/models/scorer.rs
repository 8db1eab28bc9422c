//! Scoring components decoded from model artifacts

use crate::error::EnsembleError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single scoring component on a single feature vector.
///
/// Kept as a value inside per-model outputs, so it is cheap to clone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("expected {expected} features, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("feature index {index} out of range for {len} features")]
    FeatureIndex { index: usize, len: usize },

    #[error("non-finite output {0}")]
    NonFinite(f64),

    #[error("malformed model: {0}")]
    Malformed(String),

    #[error("{0}")]
    Failed(String),
}

/// Anything that maps a feature vector to a scalar price estimate.
pub trait Scorer: Send + Sync {
    /// Score one feature vector
    fn predict(&self, features: &[f64]) -> Result<f64, ScoringError>;

    /// Per-feature importances, indexed by feature position
    fn feature_importances(&self) -> Option<&[f64]> {
        None
    }

    /// Short name of the component family, for status output
    fn kind(&self) -> &'static str;
}

/// Linear regression family (ridge, lasso, OLS).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinearModel {
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
}

impl LinearModel {
    fn validate(&self) -> Result<(), String> {
        if self.coefficients.is_empty() {
            return Err("linear model has no coefficients".to_string());
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err("linear model has non-finite parameters".to_string());
        }
        Ok(())
    }
}

impl Scorer for LinearModel {
    fn predict(&self, features: &[f64]) -> Result<f64, ScoringError> {
        if features.len() != self.coefficients.len() {
            return Err(ScoringError::LengthMismatch {
                expected: self.coefficients.len(),
                actual: features.len(),
            });
        }

        let value = self
            .coefficients
            .iter()
            .zip(features)
            .map(|(c, x)| c * x)
            .sum::<f64>()
            + self.intercept;

        finite(value)
    }

    fn kind(&self) -> &'static str {
        "linear"
    }
}

/// A decision tree node (internal or leaf)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Feature index to compare (internal nodes)
    #[serde(default)]
    pub feature_index: usize,
    /// Go left when `features[feature_index] <= threshold`
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub left: usize,
    #[serde(default)]
    pub right: usize,
    /// Leaf value; `None` for internal nodes
    #[serde(default)]
    pub value: Option<f64>,
}

/// A single regression tree, root at index 0
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    fn eval(&self, features: &[f64]) -> Result<f64, ScoringError> {
        let mut idx = 0usize;

        // A valid path never visits more nodes than the tree holds.
        for _ in 0..=self.nodes.len() {
            let node = self
                .nodes
                .get(idx)
                .ok_or_else(|| ScoringError::Malformed(format!("node {} missing", idx)))?;

            if let Some(value) = node.value {
                return Ok(value);
            }

            let feature_value =
                *features
                    .get(node.feature_index)
                    .ok_or(ScoringError::FeatureIndex {
                        index: node.feature_index,
                        len: features.len(),
                    })?;

            idx = if feature_value <= node.threshold {
                node.left
            } else {
                node.right
            };
        }

        Err(ScoringError::Malformed("cycle in tree".to_string()))
    }

    fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node.value {
                Some(v) if !v.is_finite() => {
                    return Err(format!("leaf {} has non-finite value", i));
                }
                Some(_) => {}
                None => {
                    if node.left >= self.nodes.len() || node.right >= self.nodes.len() {
                        return Err(format!("node {} points outside the tree", i));
                    }
                    if node.left == i || node.right == i {
                        return Err(format!("node {} points to itself", i));
                    }
                }
            }
        }
        Ok(())
    }
}

/// How tree outputs are combined.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TreeCombine {
    /// Bagged forests: mean of tree outputs
    Average,
    /// Boosted ensembles: `base_score + learning_rate * sum(tree outputs)`
    Additive { learning_rate: f64 },
}

/// Tree ensemble family (random forest, gradient boosting, xgboost, lightgbm).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeEnsemble {
    pub trees: Vec<Tree>,
    pub combine: TreeCombine,
    #[serde(default)]
    pub base_score: f64,
    #[serde(default)]
    pub feature_importances: Option<Vec<f64>>,
}

impl TreeEnsemble {
    fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("tree ensemble has no trees".to_string());
        }
        if let TreeCombine::Additive { learning_rate } = self.combine {
            if !learning_rate.is_finite() {
                return Err("non-finite learning rate".to_string());
            }
        }
        if let Some(importances) = &self.feature_importances {
            if importances.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err("feature importances must be finite and non-negative".to_string());
            }
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate().map_err(|e| format!("tree {}: {}", i, e))?;
        }
        Ok(())
    }
}

impl Scorer for TreeEnsemble {
    fn predict(&self, features: &[f64]) -> Result<f64, ScoringError> {
        let mut sum = 0.0;
        for tree in &self.trees {
            sum += tree.eval(features)?;
        }

        let value = match self.combine {
            TreeCombine::Average => self.base_score + sum / self.trees.len() as f64,
            TreeCombine::Additive { learning_rate } => self.base_score + learning_rate * sum,
        };

        finite(value)
    }

    fn feature_importances(&self) -> Option<&[f64]> {
        self.feature_importances.as_deref()
    }

    fn kind(&self) -> &'static str {
        "tree_ensemble"
    }
}

/// Closed set of scoring components an artifact can carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringModel {
    Linear(LinearModel),
    TreeEnsemble(TreeEnsemble),
}

impl ScoringModel {
    /// Structural checks run once at load time
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ScoringModel::Linear(m) => m.validate(),
            ScoringModel::TreeEnsemble(m) => m.validate(),
        }
    }
}

impl Scorer for ScoringModel {
    fn predict(&self, features: &[f64]) -> Result<f64, ScoringError> {
        match self {
            ScoringModel::Linear(m) => m.predict(features),
            ScoringModel::TreeEnsemble(m) => m.predict(features),
        }
    }

    fn feature_importances(&self) -> Option<&[f64]> {
        match self {
            ScoringModel::Linear(m) => m.feature_importances(),
            ScoringModel::TreeEnsemble(m) => m.feature_importances(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ScoringModel::Linear(m) => m.kind(),
            ScoringModel::TreeEnsemble(m) => m.kind(),
        }
    }
}

/// Shared standardisation applied before every model in a generation.
///
/// `(x - mean) / scale`, with zero scales treated as 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    #[serde(default)]
    pub feature_names: Vec<String>,
}

impl FeatureScaler {
    pub fn validate(&self) -> Result<(), String> {
        if self.mean.len() != self.scale.len() {
            return Err(format!(
                "mean has {} entries but scale has {}",
                self.mean.len(),
                self.scale.len()
            ));
        }
        if !self.feature_names.is_empty() && self.feature_names.len() != self.mean.len() {
            return Err("feature_names length does not match mean".to_string());
        }
        if self.mean.iter().chain(&self.scale).any(|v| !v.is_finite()) {
            return Err("scaler has non-finite parameters".to_string());
        }
        Ok(())
    }

    pub fn feature_count(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, features: &[f64]) -> Result<Vec<f64>, EnsembleError> {
        if features.len() != self.mean.len() {
            return Err(EnsembleError::FeatureShape {
                expected: self.mean.len(),
                actual: features.len(),
            });
        }

        Ok(features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| {
                let s = if *s == 0.0 { 1.0 } else { *s };
                (x - m) / s
            })
            .collect())
    }
}

fn finite(value: f64) -> Result<f64, ScoringError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ScoringError::NonFinite(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: f64) -> Node {
        Node {
            feature_index: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value: Some(value),
        }
    }

    fn stump(feature_index: usize, threshold: f64, low: f64, high: f64) -> Tree {
        Tree {
            nodes: vec![
                Node {
                    feature_index,
                    threshold,
                    left: 1,
                    right: 2,
                    value: None,
                },
                leaf(low),
                leaf(high),
            ],
        }
    }

    #[test]
    fn test_linear_predict() {
        let model = LinearModel {
            coefficients: vec![2.0, -1.0],
            intercept: 10.0,
        };
        assert_eq!(model.predict(&[3.0, 4.0]), Ok(12.0));
        assert_eq!(
            model.predict(&[1.0]),
            Err(ScoringError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_forest_averages_trees() {
        let forest = TreeEnsemble {
            trees: vec![stump(0, 5.0, 100.0, 200.0), stump(1, 0.5, 300.0, 400.0)],
            combine: TreeCombine::Average,
            base_score: 0.0,
            feature_importances: Some(vec![0.7, 0.3]),
        };
        // tree 1 -> 100 (2 <= 5), tree 2 -> 400 (1 > 0.5)
        assert_eq!(forest.predict(&[2.0, 1.0]), Ok(250.0));
        assert_eq!(forest.feature_importances(), Some(&[0.7, 0.3][..]));
    }

    #[test]
    fn test_boosted_is_additive() {
        let boosted = TreeEnsemble {
            trees: vec![stump(0, 5.0, -10.0, 10.0), stump(0, 5.0, -20.0, 20.0)],
            combine: TreeCombine::Additive { learning_rate: 0.5 },
            base_score: 100.0,
            feature_importances: None,
        };
        assert_eq!(boosted.predict(&[9.0]), Ok(115.0));
    }

    #[test]
    fn test_tree_feature_out_of_range() {
        let forest = TreeEnsemble {
            trees: vec![stump(3, 1.0, 0.0, 1.0)],
            combine: TreeCombine::Average,
            base_score: 0.0,
            feature_importances: None,
        };
        assert_eq!(
            forest.predict(&[1.0]),
            Err(ScoringError::FeatureIndex { index: 3, len: 1 })
        );
    }

    #[test]
    fn test_validate_rejects_dangling_child() {
        let model = ScoringModel::TreeEnsemble(TreeEnsemble {
            trees: vec![Tree {
                nodes: vec![Node {
                    feature_index: 0,
                    threshold: 1.0,
                    left: 1,
                    right: 7,
                    value: None,
                }],
            }],
            combine: TreeCombine::Average,
            base_score: 0.0,
            feature_importances: None,
        });
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_scoring_model_json_shape() {
        let json = r#"{
            "kind": "tree_ensemble",
            "combine": {"method": "additive", "learning_rate": 0.1},
            "base_score": 50.0,
            "trees": [{"nodes": [
                {"feature_index": 0, "threshold": 1.5, "left": 1, "right": 2},
                {"value": 10.0},
                {"value": 20.0}
            ]}]
        }"#;
        let model: ScoringModel = serde_json::from_str(json).unwrap();
        assert!(model.validate().is_ok());
        assert_eq!(model.kind(), "tree_ensemble");
        assert_eq!(model.predict(&[2.0]), Ok(52.0));

        let linear: ScoringModel =
            serde_json::from_str(r#"{"kind": "linear", "coefficients": [1.0], "intercept": 2.0}"#)
                .unwrap();
        assert_eq!(linear.predict(&[3.0]), Ok(5.0));
        assert!(linear.feature_importances().is_none());
    }

    #[test]
    fn test_scaler_transform() {
        let scaler = FeatureScaler {
            mean: vec![10.0, 0.0],
            scale: vec![2.0, 0.0],
            feature_names: vec![],
        };
        assert_eq!(scaler.transform(&[14.0, 3.0]).unwrap(), vec![2.0, 3.0]);
        assert!(matches!(
            scaler.transform(&[1.0]),
            Err(EnsembleError::FeatureShape {
                expected: 2,
                actual: 1
            })
        ));
    }
}
