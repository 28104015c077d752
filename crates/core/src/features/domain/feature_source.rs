use ndarray::Array2;

use crate::shared::error::Result;

/// One normalized, context-expanded utterance.
#[derive(Clone, Debug)]
pub struct Utterance {
    pub key: String,
    pub speaker: String,
    /// `min(original_frames, max_length)` rows of spliced features.
    pub features: Array2<f32>,
    /// Frame count before length capping.
    pub original_frames: usize,
}

impl Utterance {
    pub fn frames(&self) -> usize {
        self.features.nrows()
    }

    pub fn was_truncated(&self) -> bool {
        self.original_frames > self.features.nrows()
    }
}

/// Sequential, restartable source of utterances in a fixed order.
///
/// The position is the index of the next utterance to be read, so it can be
/// persisted and restored with [`FeatureSource::seek`].
pub trait FeatureSource: Send {
    /// Returns `None` once every utterance has been read.
    fn read_next(&mut self) -> Result<Option<Utterance>>;

    fn has_next(&self) -> bool;

    /// Rewinds to the first utterance.
    fn reset(&mut self);

    fn position(&self) -> usize;

    fn seek(&mut self, position: usize) -> Result<()>;

    /// Number of utterances in one pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper bound on the frames of any returned utterance.
    fn max_length(&self) -> usize;

    /// Number of frames concatenated around each centre frame per side.
    fn context_width(&self) -> usize;
}
