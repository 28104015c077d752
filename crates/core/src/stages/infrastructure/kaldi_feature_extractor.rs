use std::fs;
use std::path::{Path, PathBuf};

use super::external_command::ExternalCommand;
use crate::features::domain::feature_spec::{FeatureSpec, FeatureType};
use crate::shared::constants::FEATS_INDEX;
use crate::shared::error::{PipelineError, Result};
use crate::stages::domain::stage_executor::FeatureExtractor;

/// Kaldi data-dir files the front end reads besides the speaker maps.
const SOURCE_FILES: [&str; 2] = ["wav.scp", "segments"];

/// Computes features with the recipe's `make_mfcc.sh` / `make_fbank.sh`
/// and optionally appends deltas with `add-deltas`.
///
/// Features are written uncompressed so the ark reader can load them.
pub struct KaldiFeatureExtractor {
    kaldi_egs: PathBuf,
    cmd: String,
    num_jobs: usize,
}

impl KaldiFeatureExtractor {
    pub fn new(kaldi_egs: PathBuf, cmd: String, num_jobs: usize) -> Self {
        Self {
            kaldi_egs,
            cmd,
            num_jobs,
        }
    }

    pub fn extract_command(&self, feat_dir: &Path, spec: &FeatureSpec) -> ExternalCommand {
        let script = match spec.kind {
            FeatureType::Mfcc => "steps/make_mfcc.sh",
            FeatureType::Fbank => "steps/make_fbank.sh",
        };
        ExternalCommand::new(script, &self.kaldi_egs)
            .option("nj", self.num_jobs)
            .option("cmd", &self.cmd)
            .option("compress", "false")
            .path_arg(feat_dir)
            .path_arg(&feat_dir.join("log"))
            .path_arg(&feat_dir.join("data"))
            .expects(feat_dir.join(FEATS_INDEX))
    }

    pub fn delta_command(&self, feat_dir: &Path, order: u32) -> ExternalCommand {
        let ark = feat_dir.join("data").join("deltas.ark");
        let scp = feat_dir.join("deltas.scp");
        ExternalCommand::new("add-deltas", &self.kaldi_egs)
            .arg(format!("--delta-order={order}"))
            .arg(format!("scp:{}", feat_dir.join(FEATS_INDEX).display()))
            .arg(format!("ark,scp:{},{}", ark.display(), scp.display()))
            .expects(scp)
    }
}

impl FeatureExtractor for KaldiFeatureExtractor {
    fn extract(&mut self, data_dir: &Path, feat_dir: &Path, spec: &FeatureSpec) -> Result<()> {
        for name in SOURCE_FILES {
            let source = data_dir.join(name);
            if source.is_file() {
                let target = feat_dir.join(name);
                fs::copy(&source, &target).map_err(|e| PipelineError::io(&target, e))?;
            }
        }
        self.extract_command(feat_dir, spec).run()?;

        if let Some(order) = spec.dynamic.delta_order() {
            self.delta_command(feat_dir, order).run()?;
            let index = feat_dir.join(FEATS_INDEX);
            fs::rename(feat_dir.join("deltas.scp"), &index).map_err(|e| PipelineError::io(&index, e))?;
            log::info!("Appended order-{order} deltas to {}", feat_dir.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::domain::feature_spec::Dynamic;

    fn extractor() -> KaldiFeatureExtractor {
        KaldiFeatureExtractor::new(PathBuf::from("/egs"), "queue.pl".to_string(), 8)
    }

    #[test]
    fn test_fbank_command() {
        let spec = FeatureSpec {
            name: "fbank".to_string(),
            kind: FeatureType::Fbank,
            dynamic: Dynamic::Nodelta,
        };
        let cmd = extractor().extract_command(Path::new("/f/fbank"), &spec);
        assert_eq!(cmd.program(), "steps/make_fbank.sh");
        assert_eq!(
            cmd.args(),
            [
                "--nj", "8", "--cmd", "queue.pl", "--compress", "false",
                "/f/fbank", "/f/fbank/log", "/f/fbank/data"
            ]
        );
    }

    #[test]
    fn test_delta_command_writes_side_index() {
        let cmd = extractor().delta_command(Path::new("/f/mfcc"), 2);
        assert_eq!(
            cmd.args(),
            [
                "--delta-order=2",
                "scp:/f/mfcc/feats.scp",
                "ark,scp:/f/mfcc/data/deltas.ark,/f/mfcc/deltas.scp"
            ]
        );
    }
}
