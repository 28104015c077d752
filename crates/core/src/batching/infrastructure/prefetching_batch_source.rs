use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use crate::batching::domain::minibatch::{BatchSource, Minibatch};
use crate::shared::error::{PipelineError, Result};

const DEFAULT_PREFETCH_DEPTH: usize = 4;

/// Assembles batches on a worker thread, up to `depth` ahead of the consumer.
///
/// Batches arrive in the order the inner source produced them, so epoch
/// flags and `position_after` are unchanged. The worker stops after the
/// first error, which is handed to the consumer in sequence.
pub struct PrefetchingBatchSource {
    batch_rx: Option<Receiver<Result<Minibatch>>>,
    worker: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
    batch_size: usize,
    input_dim: usize,
    max_length: usize,
    utterances_per_epoch: usize,
}

impl PrefetchingBatchSource {
    pub fn new<S: BatchSource + 'static>(source: S) -> Self {
        Self::with_depth(source, DEFAULT_PREFETCH_DEPTH)
    }

    pub fn with_depth<S: BatchSource + 'static>(mut source: S, depth: usize) -> Self {
        let batch_size = source.batch_size();
        let input_dim = source.input_dim();
        let max_length = source.max_length();
        let utterances_per_epoch = source.utterances_per_epoch();

        let (batch_tx, batch_rx) = crossbeam_channel::bounded::<Result<Minibatch>>(depth.max(1));
        let stopped = Arc::new(AtomicBool::new(false));
        let worker_stopped = Arc::clone(&stopped);
        let worker = std::thread::spawn(move || {
            while !worker_stopped.load(Ordering::Relaxed) {
                let batch = source.next_batch();
                let failed = batch.is_err();
                if batch_tx.send(batch).is_err() || failed {
                    break;
                }
            }
        });

        Self {
            batch_rx: Some(batch_rx),
            worker: Some(worker),
            stopped,
            batch_size,
            input_dim,
            max_length,
            utterances_per_epoch,
        }
    }

    /// Batches assembled but not yet consumed.
    pub fn queued(&self) -> usize {
        self.batch_rx.as_ref().map_or(0, Receiver::len)
    }
}

impl BatchSource for PrefetchingBatchSource {
    fn next_batch(&mut self) -> Result<Minibatch> {
        let rx = self
            .batch_rx
            .as_ref()
            .ok_or_else(|| PipelineError::Consistency("prefetcher already shut down".to_string()))?;
        rx.recv().map_err(|_| {
            PipelineError::Consistency("prefetch worker stopped after an earlier error".to_string())
        })?
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn max_length(&self) -> usize {
        self.max_length
    }

    fn utterances_per_epoch(&self) -> usize {
        self.utterances_per_epoch
    }
}

impl Drop for PrefetchingBatchSource {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        // Unblocks a worker waiting on a full channel.
        drop(self.batch_rx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Prefetch worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::domain::batch_dispenser::tests::corpus;
    use crate::batching::domain::batch_dispenser::BatchDispenser;
    use crate::targets::domain::alignment_table::AlignmentTable;
    use crate::targets::domain::target_coder::AlignmentCoder;

    #[test]
    fn test_preserves_order_and_epoch_flags() {
        let frames = [3, 1, 4, 1, 5];
        let (source, alignments) = corpus(&frames, 5);
        let mut direct = BatchDispenser::new(source, alignments, AlignmentCoder::new(4), 2).unwrap();
        let (source, alignments) = corpus(&frames, 5);
        let prefetched = BatchDispenser::new(source, alignments, AlignmentCoder::new(4), 2).unwrap();
        let mut prefetched = PrefetchingBatchSource::with_depth(prefetched, 2);

        assert_eq!(prefetched.batch_size(), 2);
        assert_eq!(prefetched.utterances_per_epoch(), 5);
        for _ in 0..7 {
            let a = direct.get_batch().unwrap();
            let b = prefetched.next_batch().unwrap();
            assert_eq!(a.keys, b.keys);
            assert_eq!(a.epoch_boundary, b.epoch_boundary);
            assert_eq!(a.position_after, b.position_after);
            assert_eq!(a.inputs, b.inputs);
        }
    }

    #[test]
    fn test_error_is_delivered_then_worker_stops() {
        let (source, _) = corpus(&[2, 2], 5);
        let mut alignments = AlignmentTable::new();
        alignments.insert("u1".into(), vec![0, 0]).unwrap();
        let dispenser = BatchDispenser::new(source, alignments, AlignmentCoder::new(4), 1).unwrap();
        let mut prefetched = PrefetchingBatchSource::new(dispenser);

        assert_eq!(prefetched.next_batch().unwrap().keys, vec!["u1"]);
        assert!(matches!(
            prefetched.next_batch(),
            Err(PipelineError::Consistency(m)) if m.contains("'u2'")
        ));
        assert!(prefetched.next_batch().is_err());
    }

    #[test]
    fn test_drop_with_full_queue_does_not_hang() {
        let (source, alignments) = corpus(&[1, 1, 1], 5);
        let dispenser = BatchDispenser::new(source, alignments, AlignmentCoder::new(4), 1).unwrap();
        let prefetched = PrefetchingBatchSource::with_depth(dispenser, 1);
        drop(prefetched);
    }
}
