use std::sync::{Arc, Mutex, MutexGuard};

use crate::batching::domain::minibatch::{BatchSource, Minibatch};
use crate::shared::error::{PipelineError, Result};

/// Cloneable handle that lets several trainer threads pull from one source.
///
/// Every call takes the same lock, so each batch is assembled by exactly one
/// caller and the epoch/ordering contract of the inner source holds.
pub struct SharedBatchDispenser<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedBatchDispenser<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: BatchSource> SharedBatchDispenser<S> {
    pub fn new(source: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
        }
    }

    /// Runs `f` with exclusive access, e.g. to seek the inner dispenser.
    pub fn with_source<T>(&self, f: impl FnOnce(&mut S) -> T) -> Result<T> {
        Ok(f(&mut *self.lock()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, S>> {
        self.inner
            .lock()
            .map_err(|_| PipelineError::Consistency("batch source lock poisoned".to_string()))
    }

    fn read<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        match self.inner.lock() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl<S: BatchSource> BatchSource for SharedBatchDispenser<S> {
    fn next_batch(&mut self) -> Result<Minibatch> {
        self.lock()?.next_batch()
    }

    fn batch_size(&self) -> usize {
        self.read(|s| s.batch_size())
    }

    fn input_dim(&self) -> usize {
        self.read(|s| s.input_dim())
    }

    fn max_length(&self) -> usize {
        self.read(|s| s.max_length())
    }

    fn utterances_per_epoch(&self) -> usize {
        self.read(|s| s.utterances_per_epoch())
    }
}
