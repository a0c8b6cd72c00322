//! k-nearest-neighbour pose classification of EMG samples.

pub mod training;

use log::debug;

use crate::device::types::{EmgSample, Pose};
use crate::classifier::training::TrainingSet;

pub struct PoseClassifier {
    training: TrainingSet,
    k: usize,
}

impl PoseClassifier {
    pub fn new(training: TrainingSet, k: usize) -> Self {
        debug!("Pose classifier with {} samples, k = {}", training.len(), k);
        PoseClassifier { training, k }
    }

    /**
     * Classify `sample` by plurality vote among its `k` nearest training samples (euclidean
     * distance, compared squared).
     *
     * Neighbours are ranked by distance, equal distances by position in the training set's
     * enumeration order. Among labels with the highest vote count the one ranked first in that
     * neighbour list wins. Returns `Pose::Unknown` when there is nothing to vote (empty training
     * set or `k` of 0).
     */
    pub fn classify(&self, sample: &EmgSample) -> Pose {
        let mut neighbours: Vec<(i64, usize, Pose)> = self.training
            .samples()
            .iter()
            .enumerate()
            .map(|(index, (pose, trained))| (sample.distance_squared(trained), index, *pose))
            .collect();
        neighbours.sort_unstable_by_key(|&(distance, index, _)| (distance, index));
        neighbours.truncate(self.k);

        // in order of first appearance among the neighbours
        let mut votes: Vec<(Pose, usize)> = Vec::with_capacity(Pose::KNOWN.len());
        for (_, _, pose) in &neighbours {
            match votes.iter_mut().find(|(voted, _)| voted == pose) {
                Some((_, count)) => *count += 1,
                None => votes.push((*pose, 1)),
            }
        }

        let mut winner: Option<(Pose, usize)> = None;
        for (pose, count) in votes {
            if winner.map_or(true, |(_, best)| count > best) {
                winner = Some((pose, count));
            }
        }

        winner.map_or(Pose::Unknown, |(pose, _)| pose)
    }
}
