use std::fs;
use std::path::Path;

use crate::features::domain::feature_spec::FeatureSpec;
use crate::features::infrastructure::feature_prep;
use crate::shared::constants::{SPK2UTT, TEXT, UTT2SPK};
use crate::shared::error::{PipelineError, Result};
use crate::stages::domain::stage_executor::FeatureExtractor;

/// Summary of a computed feature directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSummary {
    pub speakers: usize,
    pub max_length: usize,
}

/// Turns a Kaldi data directory into a normalized-ready feature directory:
/// features, per-speaker CMVN statistics and the longest utterance length.
pub struct ComputeFeaturesUseCase {
    extractor: Box<dyn FeatureExtractor>,
}

impl ComputeFeaturesUseCase {
    pub fn new(extractor: Box<dyn FeatureExtractor>) -> Self {
        Self { extractor }
    }

    pub fn run(&mut self, data_dir: &Path, feat_dir: &Path, spec: &FeatureSpec) -> Result<FeatureSummary> {
        fs::create_dir_all(feat_dir).map_err(|e| PipelineError::io(feat_dir, e))?;

        // 1. Speaker and transcript tables travel with the features
        copy_table(data_dir, feat_dir, UTT2SPK, true)?;
        copy_table(data_dir, feat_dir, SPK2UTT, false)?;
        copy_table(data_dir, feat_dir, TEXT, false)?;

        // 2. Front end
        log::info!("Computing {} ({}) features into {}", spec.name, spec.kind, feat_dir.display());
        self.extractor.extract(data_dir, feat_dir, spec)?;

        // 3. Normalization statistics and length bound for the reader
        let speakers = feature_prep::compute_cmvn(feat_dir)?;
        let max_length = feature_prep::write_max_length(feat_dir)?;
        Ok(FeatureSummary { speakers, max_length })
    }
}

fn copy_table(data_dir: &Path, feat_dir: &Path, name: &str, required: bool) -> Result<()> {
    let source = data_dir.join(name);
    if !source.is_file() {
        if required {
            return Err(PipelineError::Consistency(format!(
                "data directory {} has no {name}",
                data_dir.display()
            )));
        }
        return Ok(());
    }
    let target = feat_dir.join(name);
    fs::copy(&source, &target).map_err(|e| PipelineError::io(&target, e))?;
    Ok(())
}
