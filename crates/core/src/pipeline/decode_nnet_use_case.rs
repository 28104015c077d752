use std::fs;
use std::path::Path;

use crate::features::domain::cmvn::CmvnMode;
use crate::features::domain::feature_source::FeatureSource;
use crate::features::infrastructure::ark_writer::ArkWriter;
use crate::features::infrastructure::feature_reader::{FeatureReader, FeatureReaderConfig};
use crate::nnet::domain::nnet::NnetDecoder;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::constants::{
    CMVN_INDEX, FEATS_INDEX, GMM_MODEL, GRAPH_DIR, LIKELIHOODS_ARK, MAX_LENGTH, TEXT, UTT2SPK,
};
use crate::shared::error::{PipelineError, Result};
use crate::shared::text_table;
use crate::stages::domain::experiment_layout::ExperimentLayout;
use crate::stages::domain::stage::{FeatureKind, FeatureSet};
use crate::stages::domain::stage_executor::AcousticToolkit;

/// Writes network pseudo-likelihoods for the test set and decodes them
/// with the supervising GMM's graph.
pub struct DecodeNnetUseCase {
    layout: ExperimentLayout,
    context_width: usize,
    cmvn_mode: CmvnMode,
}

impl DecodeNnetUseCase {
    pub fn new(layout: ExperimentLayout, context_width: usize, cmvn_mode: CmvnMode) -> Self {
        Self {
            layout,
            context_width,
            cmvn_mode,
        }
    }

    /// Returns the number of decoded utterances.
    pub fn run(
        &self,
        decoder: &mut dyn NnetDecoder,
        toolkit: &mut dyn AcousticToolkit,
        logger: &mut dyn PipelineLogger,
    ) -> Result<usize> {
        let decode_dir = self.layout.decode_dir();
        let feat_dir = self.layout.feature_dir(FeatureSet::Test, FeatureKind::Dnn);
        fs::create_dir_all(&decode_dir).map_err(|e| PipelineError::io(&decode_dir, e))?;

        // 1. Pseudo-likelihoods, one matrix per test utterance
        let index_path = decode_dir.join(FEATS_INDEX);
        let ark_path = decode_dir.join(LIKELIHOODS_ARK);
        for stale in [&index_path, &ark_path] {
            if stale.exists() {
                fs::remove_file(stale).map_err(|e| PipelineError::io(stale, e))?;
            }
        }
        let max_length = text_table::read_single_integer(&feat_dir.join(MAX_LENGTH))?;
        let mut reader = FeatureReader::open(
            &feat_dir.join(FEATS_INDEX),
            &feat_dir.join(CMVN_INDEX),
            &feat_dir.join(UTT2SPK),
            FeatureReaderConfig {
                context_width: self.context_width,
                max_length,
                cmvn_mode: self.cmvn_mode,
            },
        )?;
        let total = reader.len();
        let mut writer = ArkWriter::create(&index_path, &ark_path)?;
        while let Some(utterance) = reader.read_next()? {
            let likelihoods = decoder.posteriors(&utterance.key, utterance.features.view())?;
            if likelihoods.nrows() != utterance.frames() {
                return Err(PipelineError::Consistency(format!(
                    "decoder returned {} frames for '{}' with {} frames",
                    likelihoods.nrows(),
                    utterance.key,
                    utterance.frames()
                )));
            }
            writer.write(&utterance.key, likelihoods.view())?;
            logger.progress(writer.len(), total);
        }
        let decoded = writer.len();
        writer.finish()?;
        logger.info(&format!("Wrote pseudo-likelihoods for {decoded} utterances"));

        // 2. Everything the decoding script reads besides the likelihoods
        let supervisor = self.layout.supervisor_dir();
        copy_file(&supervisor.join(GMM_MODEL), &decode_dir.join(GMM_MODEL))?;
        copy_dir(&supervisor.join(GRAPH_DIR), &decode_dir.join(GRAPH_DIR))?;
        copy_file(&feat_dir.join(UTT2SPK), &decode_dir.join(UTT2SPK))?;
        if feat_dir.join(TEXT).is_file() {
            copy_file(&feat_dir.join(TEXT), &decode_dir.join(TEXT))?;
        } else {
            log::warn!("No {TEXT} in {}; decoding will not be scored", feat_dir.display());
        }

        // 3. Lattice decoding and scoring
        toolkit.decode_posteriors(&decode_dir)?;
        Ok(decoded)
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to).map_err(|e| PipelineError::io(from, e))?;
    Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(|e| PipelineError::io(to, e))?;
    for entry in fs::read_dir(from).map_err(|e| PipelineError::io(from, e))? {
        let entry = entry.map_err(|e| PipelineError::io(from, e))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            copy_dir(&source, &target)?;
        } else {
            copy_file(&source, &target)?;
        }
    }
    Ok(())
}
