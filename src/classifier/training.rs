use std::collections::HashMap;
use std::path::Path;
use log::info;
use tokio::fs;

use crate::device::types::{EmgSample, Pose};
use crate::error::TrainingDataError;
use crate::resources::TRAINING_SAMPLES_JSON;

/// Labelled EMG samples, immutable once loaded.
///
/// Samples are kept in a fixed enumeration order: poses in `Pose::KNOWN` order (FIST, SPREAD,
/// LEFT, RIGHT), and within a pose in the order they appear in the source file. The classifier
/// breaks ties by this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingSet {
    samples: Vec<(Pose, EmgSample)>,
}

impl TrainingSet {
    /// Parse `{"FIST": [[c0, ..., c7], ...], "SPREAD": [...], ...}`. Every key must name a known
    /// pose; a pose may be missing.
    pub fn from_json(json: &str) -> Result<Self, TrainingDataError> {
        let mut labelled: HashMap<String, Vec<EmgSample>> = serde_json::from_str(json)?;
        let mut samples = Vec::new();

        for pose in Pose::KNOWN {
            if let Some(vectors) = labelled.remove(pose.name()) {
                samples.extend(vectors.into_iter().map(|sample| (pose, sample)));
            }
        }

        if let Some(label) = labelled.into_keys().min() {
            return Err(TrainingDataError::UnknownLabel { label });
        }

        Ok(TrainingSet { samples })
    }

    pub fn bundled() -> Result<Self, TrainingDataError> {
        Self::from_json(TRAINING_SAMPLES_JSON)
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrainingDataError> {
        info!("Reading training data from {}", path.as_ref().to_string_lossy());
        let json = fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn samples(&self) -> &[(Pose, EmgSample)] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn count(&self, pose: Pose) -> usize {
        self.samples.iter().filter(|(label, _)| *label == pose).count()
    }
}

impl FromIterator<(Pose, EmgSample)> for TrainingSet {
    fn from_iter<I: IntoIterator<Item = (Pose, EmgSample)>>(iter: I) -> Self {
        TrainingSet { samples: iter.into_iter().collect() }
    }
}
