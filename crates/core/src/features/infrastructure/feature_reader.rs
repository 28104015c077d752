use std::collections::HashMap;
use std::path::Path;

use ndarray::s;

use super::ark_reader::ArkReader;
use crate::features::domain::cmvn::{CmvnMode, CmvnStats};
use crate::features::domain::context_window::splice;
use crate::features::domain::feature_source::{FeatureSource, Utterance};
use crate::shared::error::{PipelineError, Result};
use crate::shared::text_table;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureReaderConfig {
    pub context_width: usize,
    pub max_length: usize,
    pub cmvn_mode: CmvnMode,
}

/// Reads utterances from an ark index, applies per-speaker CMVN, splices
/// context and caps the length.
pub struct FeatureReader {
    features: ArkReader,
    cmvn: HashMap<String, CmvnStats>,
    utt2spk: HashMap<String, String>,
    config: FeatureReaderConfig,
    position: usize,
}

impl FeatureReader {
    pub fn new(
        features: ArkReader,
        cmvn: HashMap<String, CmvnStats>,
        utt2spk: HashMap<String, String>,
        config: FeatureReaderConfig,
    ) -> Self {
        Self {
            features,
            cmvn,
            utt2spk,
            config,
            position: 0,
        }
    }

    pub fn open(
        index_path: &Path,
        cmvn_index_path: &Path,
        utt2spk_path: &Path,
        config: FeatureReaderConfig,
    ) -> Result<Self> {
        let features = ArkReader::open(index_path)?;
        let cmvn = load_cmvn(cmvn_index_path)?;
        let utt2spk = text_table::read_map(utt2spk_path)?;
        log::info!(
            "Feature reader over {} utterances, {} speakers (context {}, max length {})",
            features.index().len(),
            cmvn.len(),
            config.context_width,
            config.max_length
        );
        Ok(Self::new(features, cmvn, utt2spk, config))
    }

    /// Checks that every utterance resolves to a speaker with CMVN stats,
    /// without reading any features.
    pub fn check_coverage(&self) -> Result<()> {
        for key in self.features.index().keys() {
            let speaker = self.speaker_of(key)?;
            self.stats_of(key, speaker)?;
        }
        Ok(())
    }

    /// Raw feature dimension, known after the first read.
    pub fn feature_dim(&self) -> Option<usize> {
        self.features.dim()
    }

    fn speaker_of(&self, key: &str) -> Result<&str> {
        self.utt2spk
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| PipelineError::Consistency(format!("utterance '{key}' has no speaker in utt2spk")))
    }

    fn stats_of(&self, key: &str, speaker: &str) -> Result<&CmvnStats> {
        self.cmvn.get(speaker).ok_or_else(|| {
            PipelineError::Consistency(format!(
                "speaker '{speaker}' of utterance '{key}' has no CMVN statistics"
            ))
        })
    }
}

impl FeatureSource for FeatureReader {
    fn read_next(&mut self) -> Result<Option<Utterance>> {
        let Some((key, mut raw, next)) = self.features.read_next(self.position)? else {
            return Ok(None);
        };
        let speaker = self.speaker_of(&key)?.to_string();
        self.stats_of(&key, &speaker)?
            .apply(&mut raw, self.config.cmvn_mode)
            .map_err(|e| PipelineError::Consistency(format!("utterance '{key}': {e}")))?;

        let original_frames = raw.nrows();
        let mut features = splice(raw.view(), self.config.context_width);
        if original_frames > self.config.max_length {
            log::debug!(
                "Truncating {key} from {original_frames} to {} frames",
                self.config.max_length
            );
            features = features.slice(s![..self.config.max_length, ..]).to_owned();
        }

        self.position = next;
        Ok(Some(Utterance {
            key,
            speaker,
            features,
            original_frames,
        }))
    }

    fn has_next(&self) -> bool {
        self.position < self.features.index().len()
    }

    fn reset(&mut self) {
        self.position = 0;
    }

    fn position(&self) -> usize {
        self.position
    }

    fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.features.index().len() {
            return Err(PipelineError::Consistency(format!(
                "cannot seek to utterance {position}, index has {}",
                self.features.index().len()
            )));
        }
        self.position = position;
        Ok(())
    }

    fn len(&self) -> usize {
        self.features.index().len()
    }

    fn max_length(&self) -> usize {
        self.config.max_length
    }

    fn context_width(&self) -> usize {
        self.config.context_width
    }
}

/// Loads per-speaker CMVN statistics through a `cmvn.scp` index.
pub fn load_cmvn(cmvn_index_path: &Path) -> Result<HashMap<String, CmvnStats>> {
    let mut reader = ArkReader::open(cmvn_index_path)?;
    let mut stats = HashMap::with_capacity(reader.index().len());
    let mut cursor = 0;
    while let Some((speaker, matrix, next)) = reader.read_next(cursor)? {
        let parsed = CmvnStats::from_accumulators(matrix.view()).map_err(|e| {
            PipelineError::format(cmvn_index_path, format!("speaker '{speaker}': {e}"))
        })?;
        stats.insert(speaker, parsed);
        cursor = next;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::domain::cmvn::CmvnAccumulator;
    use crate::features::infrastructure::ark_writer::ArkWriter;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use std::fs;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        feats: PathBuf,
        cmvn: PathBuf,
        utt2spk: PathBuf,
    }

    fn ramp(frames: usize, dim: usize, base: f32) -> Array2<f32> {
        Array2::from_shape_fn((frames, dim), |(t, d)| base + t as f32 + d as f32 * 0.5)
    }

    /// Two speakers, three utterances; `utt2spk` and `cmvn` can be tampered with.
    fn fixture(utt2spk: &str, speakers_with_stats: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let feats = dir.path().join("feats.scp");
        let items = [
            ("u1", ramp(5, 2, 0.0), "s1"),
            ("u2", ramp(3, 2, 10.0), "s2"),
            ("u3", ramp(8, 2, 20.0), "s1"),
        ];
        let mut writer = ArkWriter::create(&feats, &dir.path().join("feats.ark")).unwrap();
        let mut accs: HashMap<&str, CmvnAccumulator> = HashMap::new();
        for (key, m, spk) in &items {
            writer.write(key, m.view()).unwrap();
            accs.entry(*spk).or_insert_with(|| CmvnAccumulator::new(2)).add(m.view()).unwrap();
        }
        writer.finish().unwrap();

        let cmvn = dir.path().join("cmvn.scp");
        let mut writer = ArkWriter::create(&cmvn, &dir.path().join("cmvn.ark")).unwrap();
        for spk in speakers_with_stats {
            writer.write(spk, accs[spk].to_matrix().view()).unwrap();
        }
        writer.finish().unwrap();

        let utt2spk_path = dir.path().join("utt2spk");
        fs::write(&utt2spk_path, utt2spk).unwrap();
        Fixture {
            _dir: dir,
            feats,
            cmvn,
            utt2spk: utt2spk_path,
        }
    }

    fn full_fixture() -> Fixture {
        fixture("u1 s1\nu2 s2\nu3 s1\n", &["s1", "s2"])
    }

    fn config(context_width: usize, max_length: usize) -> FeatureReaderConfig {
        FeatureReaderConfig {
            context_width,
            max_length,
            cmvn_mode: CmvnMode::MeanAndVariance,
        }
    }

    fn open(fx: &Fixture, cfg: FeatureReaderConfig) -> FeatureReader {
        FeatureReader::open(&fx.feats, &fx.cmvn, &fx.utt2spk, cfg).unwrap()
    }

    #[test]
    fn test_reads_all_utterances_in_index_order() {
        let fx = full_fixture();
        let mut reader = open(&fx, config(1, 100));
        let mut keys = Vec::new();
        while let Some(utt) = reader.read_next().unwrap() {
            assert_eq!(utt.features.ncols(), 2 * 3);
            let frames = utt.frames();
            keys.push((utt.key, utt.speaker, frames));
        }
        assert_eq!(
            keys,
            vec![
                ("u1".into(), "s1".into(), 5),
                ("u2".into(), "s2".into(), 3),
                ("u3".into(), "s1".into(), 8)
            ]
        );
        assert!(!reader.has_next());
        assert_eq!(reader.feature_dim(), Some(2));
    }

    #[test]
    fn test_speaker_normalization_applied() {
        let fx = full_fixture();
        let mut reader = open(&fx, config(0, 100));
        // u2 is the only utterance of s2, so its normalized columns have zero mean.
        reader.seek(1).unwrap();
        let utt = reader.read_next().unwrap().unwrap();
        assert_eq!(utt.key, "u2");
        for col in utt.features.columns() {
            assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_truncates_to_max_length_and_reports_original() {
        let fx = full_fixture();
        let mut reader = open(&fx, config(2, 4));
        let u1 = reader.read_next().unwrap().unwrap();
        assert_eq!(u1.frames(), 4);
        assert_eq!(u1.original_frames, 5);
        assert!(u1.was_truncated());
        let u2 = reader.read_next().unwrap().unwrap();
        assert_eq!(u2.frames(), 3);
        assert!(!u2.was_truncated());
    }

    #[test]
    fn test_reset_restarts_from_first() {
        let fx = full_fixture();
        let mut reader = open(&fx, config(0, 100));
        while reader.read_next().unwrap().is_some() {}
        reader.reset();
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_next().unwrap().unwrap().key, "u1");
    }

    #[test]
    fn test_seek_past_end_rejected() {
        let fx = full_fixture();
        let mut reader = open(&fx, config(0, 100));
        assert!(reader.seek(3).is_ok());
        assert!(reader.seek(4).is_err());
    }

    #[test]
    fn test_missing_speaker_is_consistency_error() {
        let fx = fixture("u1 s1\nu3 s1\n", &["s1", "s2"]);
        let mut reader = open(&fx, config(0, 100));
        reader.read_next().unwrap();
        assert!(matches!(reader.read_next(), Err(PipelineError::Consistency(_))));
        assert!(reader.check_coverage().is_err());
    }

    #[test]
    fn test_missing_cmvn_is_consistency_error() {
        let fx = fixture("u1 s1\nu2 s2\nu3 s1\n", &["s1"]);
        let mut reader = open(&fx, config(0, 100));
        reader.seek(1).unwrap();
        let err = reader.read_next().unwrap_err();
        assert!(matches!(err, PipelineError::Consistency(_)));
        assert!(err.to_string().contains("s2"));
    }

    #[test]
    fn test_check_coverage_passes_on_complete_inputs() {
        let fx = full_fixture();
        assert!(open(&fx, config(0, 100)).check_coverage().is_ok());
    }
}
