use std::path::Path;

use super::stage::{Generation, Stage};
use crate::features::domain::feature_spec::FeatureSpec;
use crate::shared::error::Result;

/// Performs one stage. The scheduler has already checked its inputs.
pub trait StageExecutor {
    fn execute(&mut self, stage: Stage) -> Result<()>;
}

/// Opaque GMM-HMM operations of an external acoustic toolkit.
///
/// Each call blocks until the toolkit finishes and succeeds only if its
/// artifact exists afterwards.
pub trait AcousticToolkit {
    fn train(&mut self, generation: Generation) -> Result<()>;

    /// Aligns the training data and writes per-job pdf alignments.
    fn align(&mut self, generation: Generation) -> Result<()>;

    /// Builds the decoding graph and decodes the GMM test features.
    fn test(&mut self, generation: Generation) -> Result<()>;

    /// Decodes network pseudo-likelihoods prepared in `decode_dir`.
    fn decode_posteriors(&mut self, decode_dir: &Path) -> Result<()>;
}

/// Runs the acoustic front end over a data directory.
pub trait FeatureExtractor {
    /// Leaves `feats.scp` and its ark in `feat_dir`.
    fn extract(&mut self, data_dir: &Path, feat_dir: &Path, spec: &FeatureSpec) -> Result<()>;
}
