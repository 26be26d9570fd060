//! Pretrained isolation forest, evaluated natively.
//!
//! The artifact is a JSON export of a fitted forest: each tree is a flat node
//! array where splits reference their children by index and leaves carry the
//! number of training samples that reached them. Scoring follows the usual
//! isolation-forest definition; a row is an outlier when its decision value
//! (`-score - offset`) is negative.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detect::classifier::OutlierModel;
use crate::detect::features::FEATURE_COUNT;
use crate::detect::{ClassifyError, NATIVE_INLIER, NATIVE_OUTLIER};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

fn default_offset() -> f64 {
    -0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    pub feature_names: Vec<String>,
    /// Sub-sample size each tree was grown on.
    pub max_samples: usize,
    #[serde(default = "default_offset")]
    pub offset: f64,
    pub trees: Vec<IsolationTree>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// Go left when `x[feature] <= threshold`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        samples: usize,
    },
}

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

impl IsolationForest {
    /// Load and validate the artifact at `path`.
    pub fn load(path: &Path) -> Result<Self, ClassifyError> {
        let unavailable = |reason: String| ClassifyError::ModelUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
        let forest: Self = serde_json::from_str(&content).map_err(|e| unavailable(e.to_string()))?;
        forest.validate().map_err(unavailable)?;

        info!(
            path = %path.display(),
            trees = forest.trees.len(),
            features = ?forest.feature_names,
            "Loaded anomaly model"
        );
        if forest.feature_names.len() != FEATURE_COUNT {
            warn!(
                expected = FEATURE_COUNT,
                found = forest.feature_names.len(),
                "Model feature width differs from telemetry features; every tick will fail"
            );
        }
        Ok(forest)
    }

    /// Structural checks. Children must come after their parent, which also
    /// rules out cycles.
    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        if self.max_samples < 2 {
            return Err(format!("max_samples must be at least 2, got {}", self.max_samples));
        }
        if !self.offset.is_finite() {
            return Err("offset is not finite".to_string());
        }

        let width = self.feature_names.len();
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(format!("tree {t} has no nodes"));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                if let Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } = node
                {
                    if *feature >= width {
                        return Err(format!("tree {t} node {i}: feature {feature} out of range"));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("tree {t} node {i}: threshold is not finite"));
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= tree.nodes.len() {
                            return Err(format!("tree {t} node {i}: invalid child index {child}"));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn path_length(&self, tree: &IsolationTree, row: &[f64]) -> f64 {
        let mut idx = 0;
        let mut depth = 0.0;
        while let Some(node) = tree.nodes.get(idx) {
            match node {
                Node::Leaf { samples } => return depth + average_path_length(*samples),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
        depth
    }

    /// Anomaly score in `(0, 1]`; higher is more anomalous.
    pub fn score(&self, row: &[f64]) -> f64 {
        let total: f64 = self.trees.iter().map(|t| self.path_length(t, row)).sum();
        let mean = total / self.trees.len() as f64;
        2f64.powf(-mean / average_path_length(self.max_samples))
    }

    /// Signed distance to the boundary; negative for outliers.
    pub fn decision(&self, row: &[f64]) -> f64 {
        -self.score(row) - self.offset
    }
}

impl OutlierModel for IsolationForest {
    fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Vec<i8> {
        rows.iter()
            .map(|row| {
                if self.decision(row) >= 0.0 {
                    NATIVE_INLIER
                } else {
                    NATIVE_OUTLIER
                }
            })
            .collect()
    }
}
