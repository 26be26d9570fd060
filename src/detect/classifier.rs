use std::path::Path;
use std::sync::Arc;

use crate::detect::features::{FeatureVector, FEATURE_COUNT};
use crate::detect::forest::IsolationForest;
use crate::detect::{ClassifyError, Status};

/// A pretrained two-class outlier model.
pub trait OutlierModel: Send + Sync {
    /// Feature width the model was fitted on.
    fn n_features(&self) -> usize;

    /// Native labels, one per row, in row order.
    fn predict(&self, rows: &[Vec<f64>]) -> Vec<i8>;
}

/// Maps feature batches to domain statuses through a pretrained model.
#[derive(Clone)]
pub struct AnomalyClassifier {
    model: Arc<dyn OutlierModel>,
}

impl AnomalyClassifier {
    pub fn new(model: impl OutlierModel + 'static) -> Self {
        Self {
            model: Arc::new(model),
        }
    }

    /// Load the isolation forest artifact. Failure here is fatal to the
    /// caller; the model is never reloaded per tick.
    pub fn load(path: &Path) -> Result<Self, ClassifyError> {
        Ok(Self::new(IsolationForest::load(path)?))
    }

    pub fn classify(&self, features: &[FeatureVector]) -> Result<Vec<Status>, ClassifyError> {
        let rows: Vec<Vec<f64>> = features.iter().map(FeatureVector::to_vector).collect();
        self.classify_rows(&rows)
    }

    /// Label `i` corresponds to row `i`.
    pub fn classify_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<Status>, ClassifyError> {
        if self.model.n_features() != FEATURE_COUNT {
            return Err(ClassifyError::FeatureMismatch {
                expected: self.model.n_features(),
                found: FEATURE_COUNT,
            });
        }
        if let Some(row) = rows.iter().find(|r| r.len() != FEATURE_COUNT) {
            return Err(ClassifyError::FeatureMismatch {
                expected: FEATURE_COUNT,
                found: row.len(),
            });
        }
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let native = self.model.predict(rows);
        if native.len() != rows.len() {
            return Err(ClassifyError::LabelCount {
                rows: rows.len(),
                labels: native.len(),
            });
        }
        native.into_iter().map(Status::from_native).collect()
    }
}
