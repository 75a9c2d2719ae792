//! Training samples

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::Fingerprint;

/// A stored training sample; at most one exists per `content_hash`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    /// Hash of the canonical feature vector, also the sample identity
    pub content_hash: Fingerprint,
    pub features: Value,
    pub labels: Value,
    pub quality_score: f64,
    pub source_url: String,
    pub used_in_training: bool,
}

/// Candidate sample submitted for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub features: Value,
    pub labels: Value,
    pub quality_score: f64,
    pub source_url: String,
}

impl NewSample {
    pub fn new(features: Value, quality_score: f64, source_url: impl Into<String>) -> Self {
        Self {
            features,
            labels: Value::Null,
            quality_score,
            source_url: source_url.into(),
        }
    }

    /// Attach labels
    pub fn labels(mut self, labels: Value) -> Self {
        self.labels = labels;
        self
    }
}

/// Outcome of a deduplicated insert
#[derive(Debug, Clone, PartialEq)]
pub enum SampleInsert {
    /// New row written
    Inserted(TrainingSample),
    /// A row with the same content hash already existed; nothing written
    Duplicate(TrainingSample),
    /// Quality score under the configured threshold; nothing written
    BelowQuality { score: f64, threshold: f64 },
}

impl SampleInsert {
    /// A duplicate was detected
    pub fn duplicate(&self) -> bool {
        matches!(self, SampleInsert::Duplicate(_))
    }

    /// The stored sample (new or existing)
    pub fn sample(&self) -> Option<&TrainingSample> {
        match self {
            SampleInsert::Inserted(sample) | SampleInsert::Duplicate(sample) => Some(sample),
            SampleInsert::BelowQuality { .. } => None,
        }
    }

    /// Identity of the stored sample
    pub fn id(&self) -> Option<Fingerprint> {
        self.sample().map(|sample| sample.content_hash)
    }
}
