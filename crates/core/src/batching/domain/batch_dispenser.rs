use ndarray::{s, Array2, Array3, ArrayView1};

use super::minibatch::{BatchSource, DispenserPosition, Minibatch};
use crate::features::domain::feature_source::{FeatureSource, Utterance};
use crate::shared::error::{PipelineError, Result};
use crate::targets::domain::alignment_table::AlignmentTable;
use crate::targets::domain::target_coder::TargetCoder;

/// Pairs utterances from a [`FeatureSource`] with their encoded alignments
/// and packs them into fixed-shape minibatches, epoch after epoch.
///
/// Batches hold whole utterances and never span two epochs, so the last
/// batch of a pass can be short. The batch after a wraparound carries
/// `epoch_boundary = true`.
pub struct BatchDispenser<F, C> {
    features: F,
    alignments: AlignmentTable,
    coder: C,
    batch_size: usize,
    input_dim: usize,
    epoch: usize,
}

impl<F: FeatureSource, C: TargetCoder> BatchDispenser<F, C> {
    /// Reads the first utterance to learn the input width, then rewinds.
    pub fn new(mut features: F, alignments: AlignmentTable, coder: C, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::Config("batch size must be positive".to_string()));
        }
        features.reset();
        let first = features
            .read_next()?
            .ok_or_else(|| PipelineError::Consistency("feature source has no utterances".to_string()))?;
        let input_dim = first.features.ncols();
        features.reset();

        log::debug!(
            "Dispenser over {} utterances: batch size {batch_size}, input dim {input_dim}, max length {}",
            features.len(),
            features.max_length()
        );
        Ok(Self {
            features,
            alignments,
            coder,
            batch_size,
            input_dim,
            epoch: 0,
        })
    }

    pub fn get_batch(&mut self) -> Result<Minibatch> {
        let mut epoch_boundary = false;
        if !self.features.has_next() {
            self.features.reset();
            self.epoch += 1;
            epoch_boundary = true;
            log::debug!("Starting epoch {}", self.epoch);
        }

        let max_length = self.features.max_length();
        let mut inputs = Array3::<f32>::zeros((self.batch_size, max_length, self.input_dim));
        let mut targets = Array2::<u32>::zeros((self.batch_size, max_length));
        let mut lengths = vec![0; self.batch_size];
        let mut keys = Vec::with_capacity(self.batch_size);

        while keys.len() < self.batch_size {
            let Some(utterance) = self.features.read_next()? else {
                break;
            };
            let labels = self.labels_for(&utterance, max_length)?;
            let row = keys.len();
            let frames = utterance.frames();
            inputs
                .slice_mut(s![row, ..frames, ..])
                .assign(&utterance.features);
            targets
                .slice_mut(s![row, ..frames])
                .assign(&ArrayView1::from(&labels[..frames]));
            lengths[row] = frames;
            keys.push(utterance.key);
        }

        Ok(Minibatch {
            inputs,
            targets,
            lengths,
            keys,
            epoch: self.epoch,
            epoch_boundary,
            position_after: self.position(),
        })
    }

    pub fn position(&self) -> DispenserPosition {
        DispenserPosition {
            epoch: self.epoch,
            utterance: self.features.position(),
        }
    }

    /// Resumes from a position recorded in [`Minibatch::position_after`].
    pub fn seek(&mut self, position: DispenserPosition) -> Result<()> {
        self.features.seek(position.utterance)?;
        self.epoch = position.epoch;
        Ok(())
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn num_classes(&self) -> usize {
        self.coder.num_classes()
    }

    fn labels_for(&self, utterance: &Utterance, max_length: usize) -> Result<Vec<u32>> {
        let key = &utterance.key;
        let raw = self.alignments.get(key).ok_or_else(|| {
            PipelineError::Consistency(format!("utterance '{key}' has no alignment"))
        })?;
        if raw.len() != utterance.original_frames {
            return Err(PipelineError::Consistency(format!(
                "utterance '{key}' has {} feature frames but {} aligned labels",
                utterance.original_frames,
                raw.len()
            )));
        }
        if utterance.frames() > max_length {
            return Err(PipelineError::Consistency(format!(
                "utterance '{key}' has {} frames, more than the maximum {max_length}",
                utterance.frames()
            )));
        }
        if utterance.features.ncols() != self.input_dim {
            return Err(PipelineError::Consistency(format!(
                "utterance '{key}' has input width {}, expected {}",
                utterance.features.ncols(),
                self.input_dim
            )));
        }
        let mut labels = self.coder.encode(raw)?;
        labels.truncate(utterance.frames());
        Ok(labels)
    }
}

impl<F: FeatureSource, C: TargetCoder> BatchSource for BatchDispenser<F, C> {
    fn next_batch(&mut self) -> Result<Minibatch> {
        self.get_batch()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn max_length(&self) -> usize {
        self.features.max_length()
    }

    fn utterances_per_epoch(&self) -> usize {
        self.features.len()
    }
}
