use serde::Serialize;

use crate::detect::features::FeatureVector;

/// Min/max of one signal over a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        values.fold(None, |acc, v| match acc {
            None => Some(Range { min: v, max: v }),
            Some(r) => Some(Range {
                min: r.min.min(v),
                max: r.max.max(v),
            }),
        })
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.1}-{:.1}]", self.min, self.max)
    }
}

/// Per-signal data range of a feature batch. `None` for an empty batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchSummary {
    pub rows: usize,
    pub temp: Range,
    pub humidity: Range,
    pub message_rate: Range,
}

impl BatchSummary {
    pub fn of(features: &[FeatureVector]) -> Option<Self> {
        Some(Self {
            rows: features.len(),
            temp: Range::of(features.iter().map(|f| f.temp))?,
            humidity: Range::of(features.iter().map(|f| f.humidity))?,
            message_rate: Range::of(features.iter().map(|f| f.message_rate))?,
        })
    }
}
