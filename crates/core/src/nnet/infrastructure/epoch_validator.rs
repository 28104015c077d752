use std::collections::HashSet;
use std::time::Instant;

use ndarray::s;

use crate::batching::domain::minibatch::{BatchSource, Minibatch};
use crate::nnet::domain::nnet::{NnetShape, NnetTrainer};
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::error::{PipelineError, Result};

/// What one validated pass over the training data looked like.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpochReport {
    pub batches: usize,
    pub utterances: usize,
    pub frames: usize,
    /// Distinct label ids seen in real frames.
    pub labels_used: usize,
    pub mean_fill_ratio: f64,
}

/// A stand-in trainer that pulls exactly one epoch and checks every batch.
///
/// Verifies tensor shapes, label ranges, padding and that each utterance
/// appears once, so data problems surface before a real training run.
pub struct EpochValidator {
    logger: Box<dyn PipelineLogger>,
    report: Option<EpochReport>,
}

impl EpochValidator {
    pub fn new(logger: Box<dyn PipelineLogger>) -> Self {
        Self {
            logger,
            report: None,
        }
    }

    /// Statistics of the last completed pass.
    pub fn report(&self) -> Option<&EpochReport> {
        self.report.as_ref()
    }

    fn check_batch(&self, shape: &NnetShape, batch: &Minibatch, max_length: usize, batch_size: usize) -> Result<()> {
        if batch.inputs.dim() != (batch_size, max_length, shape.input_dim) {
            return Err(PipelineError::Consistency(format!(
                "batch inputs have shape {:?}, expected ({batch_size}, {max_length}, {})",
                batch.inputs.dim(),
                shape.input_dim
            )));
        }
        if batch.targets.dim() != (batch_size, max_length) || batch.lengths.len() != batch_size {
            return Err(PipelineError::Consistency(format!(
                "batch targets have shape {:?} with {} lengths, expected ({batch_size}, {max_length})",
                batch.targets.dim(),
                batch.lengths.len()
            )));
        }
        for (row, &length) in batch.lengths.iter().enumerate() {
            let real = row < batch.keys.len();
            if !real && length != 0 {
                return Err(PipelineError::Consistency(format!(
                    "padding row {row} has length {length}"
                )));
            }
            if let Some(&label) = batch
                .targets
                .slice(s![row, ..length])
                .iter()
                .find(|&&l| l as usize >= shape.num_labels)
            {
                return Err(PipelineError::Consistency(format!(
                    "utterance '{}' has label {label}, network has {} outputs",
                    batch.keys[row], shape.num_labels
                )));
            }
        }
        Ok(())
    }
}

impl NnetTrainer for EpochValidator {
    fn train(&mut self, shape: NnetShape, batches: &mut dyn BatchSource) -> Result<()> {
        if batches.input_dim() != shape.input_dim {
            return Err(PipelineError::Consistency(format!(
                "batch input width {} does not match network input {}",
                batches.input_dim(),
                shape.input_dim
            )));
        }
        let total = batches.batches_per_epoch();
        let max_length = batches.max_length();
        let batch_size = batches.batch_size();
        self.logger.info(&format!(
            "Validating one epoch: {total} batches of {batch_size}, max length {max_length}, {} labels",
            shape.num_labels
        ));

        let mut seen = HashSet::new();
        let mut labels = HashSet::new();
        let mut report = EpochReport::default();
        let mut fill_sum = 0.0;
        for index in 0..total {
            let started = Instant::now();
            let batch = batches.next_batch()?;
            self.logger
                .timing("batch", started.elapsed().as_secs_f64() * 1000.0);

            if index > 0 && batch.epoch_boundary {
                return Err(PipelineError::Consistency(format!(
                    "epoch ended after {index} of {total} batches"
                )));
            }
            self.check_batch(&shape, &batch, max_length, batch_size)?;
            for (row, key) in batch.keys.iter().enumerate() {
                if !seen.insert(key.clone()) {
                    return Err(PipelineError::Consistency(format!(
                        "utterance '{key}' dispensed twice in one epoch"
                    )));
                }
                labels.extend(batch.targets.slice(s![row, ..batch.lengths[row]]).iter().copied());
            }

            report.batches += 1;
            report.utterances += batch.len();
            report.frames += batch.total_frames();
            fill_sum += batch.fill_ratio();
            self.logger.metric("fill_ratio", batch.fill_ratio());
            self.logger.progress(index + 1, total);
        }

        if report.utterances != batches.utterances_per_epoch() {
            return Err(PipelineError::Consistency(format!(
                "epoch covered {} of {} utterances",
                report.utterances,
                batches.utterances_per_epoch()
            )));
        }
        report.labels_used = labels.len();
        report.mean_fill_ratio = fill_sum / report.batches.max(1) as f64;
        self.logger.info(&format!(
            "Epoch OK: {} utterances, {} frames, {} of {} labels used, mean fill {:.3}",
            report.utterances,
            report.frames,
            report.labels_used,
            shape.num_labels,
            report.mean_fill_ratio
        ));
        if report.labels_used < shape.num_labels {
            log::warn!(
                "{} labels never occur in the training alignments",
                shape.num_labels - report.labels_used
            );
        }
        self.report = Some(report);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::domain::batch_dispenser::tests::corpus;
    use crate::batching::domain::batch_dispenser::BatchDispenser;
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use crate::targets::domain::target_coder::AlignmentCoder;
    use approx::assert_relative_eq;
    use std::sync::{Arc, Mutex};

    /// Records metric names so tests can see what the validator reported.
    struct RecordingLogger {
        metrics: Arc<Mutex<Vec<String>>>,
    }

    impl PipelineLogger for RecordingLogger {
        fn progress(&mut self, _current: usize, _total: usize) {}
        fn timing(&mut self, _step: &str, _duration_ms: f64) {}
        fn metric(&mut self, name: &str, _value: f64) {
            self.metrics.lock().unwrap().push(name.to_string());
        }
        fn info(&mut self, _message: &str) {}
    }

    fn dispenser(frames: &[usize], batch_size: usize, classes: usize) -> impl BatchSource {
        let (source, alignments) = corpus(frames, 5);
        BatchDispenser::new(source, alignments, AlignmentCoder::new(classes), batch_size).unwrap()
    }

    #[test]
    fn test_validates_full_epoch() {
        let metrics = Arc::new(Mutex::new(Vec::new()));
        let mut validator = EpochValidator::new(Box::new(RecordingLogger {
            metrics: metrics.clone(),
        }));
        let mut batches = dispenser(&[5, 3, 2, 4, 1], 2, 4);

        validator
            .train(NnetShape::new(2, 0, 4), &mut batches)
            .unwrap();

        let report = validator.report().unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(report.utterances, 5);
        assert_eq!(report.frames, 15);
        assert_eq!(report.labels_used, 4);
        // 15 real frames over 3 batches of 2 x 5
        assert_relative_eq!(report.mean_fill_ratio, 0.5);
        assert_eq!(metrics.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_label_beyond_network_outputs() {
        let mut validator = EpochValidator::new(Box::new(NullPipelineLogger));
        let mut batches = dispenser(&[2, 2, 2], 3, 4);
        let err = validator
            .train(NnetShape::new(2, 0, 2), &mut batches)
            .unwrap_err();
        assert!(err.to_string().contains("label 2"));
    }

    #[test]
    fn test_input_width_mismatch() {
        let mut validator = EpochValidator::new(Box::new(NullPipelineLogger));
        let mut batches = dispenser(&[2], 1, 4);
        assert!(validator.train(NnetShape::new(2, 3, 4), &mut batches).is_err());
        assert!(validator.report().is_none());
    }
}
