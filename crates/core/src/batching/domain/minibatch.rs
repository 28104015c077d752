use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::shared::error::Result;

/// Where dispensing resumes: the epoch and the next utterance within it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenserPosition {
    pub epoch: usize,
    pub utterance: usize,
}

/// A fixed-shape batch of padded utterances.
///
/// `inputs` is `(batch_size, max_length, input_dim)` and `targets` is
/// `(batch_size, max_length)`; rows past `keys.len()` and frames past
/// `lengths[i]` are zero.
#[derive(Clone, Debug)]
pub struct Minibatch {
    pub inputs: Array3<f32>,
    pub targets: Array2<u32>,
    pub lengths: Vec<usize>,
    pub keys: Vec<String>,
    pub epoch: usize,
    /// True only on the first batch after the source wrapped around.
    pub epoch_boundary: bool,
    /// Resume point for the batch that follows this one.
    pub position_after: DispenserPosition,
}

impl Minibatch {
    /// Number of real utterances.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn total_frames(&self) -> usize {
        self.lengths.iter().sum()
    }

    /// Fraction of the `(batch_size, max_length)` grid that holds real frames.
    pub fn fill_ratio(&self) -> f64 {
        let cells = self.targets.len();
        if cells == 0 {
            return 0.0;
        }
        self.total_frames() as f64 / cells as f64
    }
}

/// Endless supply of minibatches for a trainer.
pub trait BatchSource: Send {
    fn next_batch(&mut self) -> Result<Minibatch>;

    fn batch_size(&self) -> usize;

    /// Width of one spliced input frame.
    fn input_dim(&self) -> usize;

    fn max_length(&self) -> usize;

    fn utterances_per_epoch(&self) -> usize;

    fn batches_per_epoch(&self) -> usize {
        self.utterances_per_epoch().div_ceil(self.batch_size().max(1))
    }
}
