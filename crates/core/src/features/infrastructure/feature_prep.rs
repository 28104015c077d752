use std::collections::BTreeMap;
use std::path::Path;

use super::ark_reader::ArkReader;
use super::ark_writer::ArkWriter;
use super::feature_index::FeatureIndex;
use crate::features::domain::cmvn::CmvnAccumulator;
use crate::shared::constants::{
    CMVN_ARK, CMVN_INDEX, FEATS_INDEX, MAX_LENGTH, SHUFFLED_FEATS_INDEX, UTT2SPK,
};
use crate::shared::error::{PipelineError, Result};
use crate::shared::text_table;

/// Accumulates per-speaker CMVN statistics over a feature directory and
/// writes them to `cmvn.ark` / `cmvn.scp` in the same directory.
///
/// Returns the number of speakers written.
pub fn compute_cmvn(feat_dir: &Path) -> Result<usize> {
    let mut reader = ArkReader::open(&feat_dir.join(FEATS_INDEX))?;
    let utt2spk = text_table::read_map(&feat_dir.join(UTT2SPK))?;

    let mut accumulators: BTreeMap<String, CmvnAccumulator> = BTreeMap::new();
    let mut cursor = 0;
    while let Some((key, features, next)) = reader.read_next(cursor)? {
        let speaker = utt2spk.get(&key).ok_or_else(|| {
            PipelineError::Consistency(format!("utterance '{key}' has no speaker in utt2spk"))
        })?;
        accumulators
            .entry(speaker.clone())
            .or_insert_with(|| CmvnAccumulator::new(features.ncols()))
            .add(features.view())
            .map_err(|e| PipelineError::Consistency(format!("utterance '{key}': {e}")))?;
        cursor = next;
    }

    let index_path = feat_dir.join(CMVN_INDEX);
    let ark_path = feat_dir.join(CMVN_ARK);
    for stale in [&index_path, &ark_path] {
        if stale.exists() {
            std::fs::remove_file(stale).map_err(|e| PipelineError::io(stale, e))?;
        }
    }
    let mut writer = ArkWriter::create(&index_path, &ark_path)?;
    for (speaker, acc) in &accumulators {
        writer.write(speaker, acc.to_matrix().view())?;
    }
    writer.finish()?;
    log::info!(
        "Wrote CMVN statistics for {} speakers to {}",
        accumulators.len(),
        index_path.display()
    );
    Ok(accumulators.len())
}

/// Scans every utterance header and records the longest frame count in `maxlength`.
pub fn write_max_length(feat_dir: &Path) -> Result<usize> {
    let mut reader = ArkReader::open(&feat_dir.join(FEATS_INDEX))?;
    let max_length = reader.max_length()?;
    text_table::write_single_integer(&feat_dir.join(MAX_LENGTH), max_length)?;
    log::info!("Longest utterance in {} has {max_length} frames", feat_dir.display());
    Ok(max_length)
}

/// Writes a seeded permutation of `feats.scp` to `feats_shuffled.scp`.
pub fn shuffle_index(feat_dir: &Path, seed: u64) -> Result<usize> {
    let index = FeatureIndex::load(&feat_dir.join(FEATS_INDEX))?;
    let shuffled = index.shuffled(seed);
    shuffled.save(&feat_dir.join(SHUFFLED_FEATS_INDEX))?;
    log::info!(
        "Shuffled {} utterances with seed {seed} into {}",
        shuffled.len(),
        SHUFFLED_FEATS_INDEX
    );
    Ok(shuffled.len())
}
