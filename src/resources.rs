/// Labelled EMG samples the pose classifier is trained with, keyed by pose name.
pub const TRAINING_SAMPLES_JSON: &str = include_str!("../resources/training_samples.json");
