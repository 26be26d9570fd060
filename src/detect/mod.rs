//! Anomaly classification and alert fan-out.

pub mod alert;
pub mod classifier;
pub mod features;
pub mod forest;
pub mod summary;

pub use self::alert::{AlertDispatcher, AlertEvent, DispatchReport};
pub use self::classifier::{AnomalyClassifier, OutlierModel};
pub use self::features::FeatureVector;
pub use self::forest::IsolationForest;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("model unavailable at {}: {reason}", path.display())]
    ModelUnavailable { path: PathBuf, reason: String },

    #[error("feature width mismatch: expected {expected}, got {found}")]
    FeatureMismatch { expected: usize, found: usize },

    #[error("model returned unknown native label {0}")]
    UnknownLabel(i8),

    #[error("model returned {labels} labels for {rows} rows")]
    LabelCount { rows: usize, labels: usize },
}

/// Native label the model uses for inliers.
pub const NATIVE_INLIER: i8 = 1;
/// Native label the model uses for outliers.
pub const NATIVE_OUTLIER: i8 = -1;

/// Published classification of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Normal,
    Anomaly,
}

impl Status {
    /// Fixed lookup from the model's native encoding.
    pub fn from_native(label: i8) -> Result<Self, ClassifyError> {
        match label {
            NATIVE_INLIER => Ok(Status::Normal),
            NATIVE_OUTLIER => Ok(Status::Anomaly),
            other => Err(ClassifyError::UnknownLabel(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Normal => "normal",
            Status::Anomaly => "anomaly",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
