use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::batching::domain::minibatch::BatchSource;
use crate::shared::error::Result;

/// Layer sizes the network is built with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NnetShape {
    /// Raw feature dimension before context splicing.
    pub feature_dim: usize,
    /// Spliced input width, `feature_dim * (2 * context_width + 1)`.
    pub input_dim: usize,
    pub num_labels: usize,
}

impl NnetShape {
    pub fn new(feature_dim: usize, context_width: usize, num_labels: usize) -> Self {
        Self {
            feature_dim,
            input_dim: feature_dim * (2 * context_width + 1),
            num_labels,
        }
    }
}

/// Trains an acoustic network from an endless batch supply.
///
/// The trainer decides how many batches to draw; the epoch flags on each
/// minibatch tell it where passes end.
pub trait NnetTrainer: Send {
    fn train(&mut self, shape: NnetShape, batches: &mut dyn BatchSource) -> Result<()>;
}

/// Produces per-frame pseudo-likelihoods for one utterance.
pub trait NnetDecoder: Send {
    /// Returns a `(frames, num_labels)` matrix for `features` of shape
    /// `(frames, input_dim)`.
    fn posteriors(&mut self, key: &str, features: ArrayView2<'_, f32>) -> Result<Array2<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_input_dim() {
        let shape = NnetShape::new(13, 5, 2000);
        assert_eq!(shape.input_dim, 143);
        assert_eq!(NnetShape::new(40, 0, 10).input_dim, 40);
    }
}
