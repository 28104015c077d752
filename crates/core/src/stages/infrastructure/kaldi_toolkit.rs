use std::fs;
use std::path::{Path, PathBuf};

use super::external_command::ExternalCommand;
use crate::shared::constants::{job_alignment_file, GMM_MODEL, KALDI_DECODE_DIR, NUM_PDFS};
use crate::shared::error::{PipelineError, Result};
use crate::shared::text_table;
use crate::stages::domain::experiment_layout::ExperimentLayout;
use crate::stages::domain::stage::{FeatureKind, FeatureSet, Generation};
use crate::stages::domain::stage_executor::AcousticToolkit;

/// Kaldi recipe settings; all paths absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KaldiSettings {
    /// Recipe directory the scripts run from (`steps/`, `utils/`, `path.sh`).
    pub kaldi_egs: PathBuf,
    /// Job dispatcher passed as `--cmd`, e.g. `run.pl`.
    pub cmd: String,
    pub num_jobs: usize,
    pub lang: PathBuf,
    pub lang_test: PathBuf,
    pub tri_leaves: usize,
    pub tri_gaussians: usize,
    pub lda_leaves: usize,
    pub lda_gaussians: usize,
    /// Script that decodes network pseudo-likelihoods.
    pub decode_script: PathBuf,
}

/// Runs GMM-HMM training, alignment and decoding through Kaldi recipe scripts.
pub struct KaldiToolkit {
    layout: ExperimentLayout,
    settings: KaldiSettings,
}

impl KaldiToolkit {
    pub fn new(layout: ExperimentLayout, settings: KaldiSettings) -> Self {
        Self { layout, settings }
    }

    fn script(&self, name: &str) -> ExternalCommand {
        ExternalCommand::new(name, &self.settings.kaldi_egs)
    }

    fn train_features(&self) -> PathBuf {
        self.layout.feature_dir(FeatureSet::Train, FeatureKind::Gmm)
    }

    pub fn train_command(&self, generation: Generation) -> ExternalCommand {
        let s = &self.settings;
        let dir = self.layout.model_dir(generation);
        let command = match generation {
            Generation::Mono => self
                .script("steps/train_mono.sh")
                .option("nj", s.num_jobs)
                .option("cmd", &s.cmd),
            Generation::Tri => self
                .script("steps/train_deltas.sh")
                .option("cmd", &s.cmd)
                .arg(s.tri_leaves.to_string())
                .arg(s.tri_gaussians.to_string()),
            Generation::Lda => self
                .script("steps/train_lda_mllt.sh")
                .option("cmd", &s.cmd)
                .arg(s.lda_leaves.to_string())
                .arg(s.lda_gaussians.to_string()),
        };
        let mut command = command.path_arg(&self.train_features()).path_arg(&s.lang);
        if let Some(seed) = generation.seed() {
            command = command.path_arg(&self.layout.alignment_dir(seed));
        }
        command.path_arg(&dir).expects(dir.join(GMM_MODEL))
    }

    pub fn align_commands(&self, generation: Generation) -> Vec<ExternalCommand> {
        let s = &self.settings;
        let dir = self.layout.model_dir(generation);
        let ali_dir = self.layout.alignment_dir(generation);
        let mut commands = vec![self
            .script("steps/align_si.sh")
            .option("nj", s.num_jobs)
            .option("cmd", &s.cmd)
            .path_arg(&self.train_features())
            .path_arg(&s.lang)
            .path_arg(&dir)
            .path_arg(&ali_dir)
            .expects(ali_dir.join("ali.1.gz"))];
        for job in 1..=s.num_jobs {
            let pdf_file = ali_dir.join(job_alignment_file(job));
            commands.push(
                self.script("ali-to-pdf")
                    .path_arg(&dir.join(GMM_MODEL))
                    .arg(format!("ark:gunzip -c {}|", ali_dir.join(format!("ali.{job}.gz")).display()))
                    .arg(format!("ark,t:|gzip -c > {}", pdf_file.display()))
                    .expects(pdf_file),
            );
        }
        commands
    }

    pub fn test_commands(&self, generation: Generation) -> Vec<ExternalCommand> {
        let s = &self.settings;
        let dir = self.layout.model_dir(generation);
        let graph = self.layout.graph_dir(generation);
        let mut mkgraph = self.script("utils/mkgraph.sh");
        if generation == Generation::Mono {
            mkgraph = mkgraph.arg("--mono");
        }
        let decode_dir = dir.join("decode");
        vec![
            mkgraph
                .path_arg(&s.lang_test)
                .path_arg(&dir)
                .path_arg(&graph)
                .expects(graph.join("HCLG.fst")),
            self.script("steps/decode.sh")
                .option("nj", s.num_jobs)
                .option("cmd", &s.cmd)
                .path_arg(&graph)
                .path_arg(&self.layout.feature_dir(FeatureSet::Test, FeatureKind::Gmm))
                .path_arg(&decode_dir)
                .expects(decode_dir),
        ]
    }

    pub fn decode_command(&self, decode_dir: &Path) -> ExternalCommand {
        let s = &self.settings;
        let output = decode_dir.join(KALDI_DECODE_DIR);
        ExternalCommand::new(s.decode_script.to_string_lossy(), &s.kaldi_egs)
            .option("cmd", &s.cmd)
            .option("nj", s.num_jobs)
            .path_arg(&decode_dir.join("graph"))
            .path_arg(decode_dir)
            .path_arg(&output)
            .expects(output)
    }

    /// Reads the model's pdf count and records it as `graph/num_pdfs`.
    fn record_num_pdfs(&self, generation: Generation) -> Result<usize> {
        let model = self.layout.model_file(generation);
        let info = self.script("hmm-info").path_arg(&model).run_captured()?;
        let num_pdfs = parse_num_pdfs(&info).ok_or_else(|| PipelineError::ExternalTool {
            program: "hmm-info".to_string(),
            message: format!("no pdf count in output for {}", model.display()),
        })?;
        let graph = self.layout.graph_dir(generation);
        fs::create_dir_all(&graph).map_err(|e| PipelineError::io(&graph, e))?;
        text_table::write_single_integer(&graph.join(NUM_PDFS), num_pdfs)?;
        log::info!("{} model has {num_pdfs} pdfs", generation.name());
        Ok(num_pdfs)
    }
}

impl AcousticToolkit for KaldiToolkit {
    fn train(&mut self, generation: Generation) -> Result<()> {
        self.train_command(generation).run()?;
        self.record_num_pdfs(generation)?;
        Ok(())
    }

    fn align(&mut self, generation: Generation) -> Result<()> {
        self.align_commands(generation)
            .iter()
            .try_for_each(ExternalCommand::run)
    }

    fn test(&mut self, generation: Generation) -> Result<()> {
        self.test_commands(generation)
            .iter()
            .try_for_each(ExternalCommand::run)
    }

    fn decode_posteriors(&mut self, decode_dir: &Path) -> Result<()> {
        self.decode_command(decode_dir).run()
    }
}

/// Extracts the count from a `number of pdfs N` line of `hmm-info`.
pub fn parse_num_pdfs(info: &str) -> Option<usize> {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("number of pdfs"))
        .and_then(|rest| rest.trim().parse().ok())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::stages::domain::experiment_layout::tests::layout;

    pub(crate) fn settings(root: &Path) -> KaldiSettings {
        KaldiSettings {
            kaldi_egs: root.join("egs"),
            cmd: "run.pl".to_string(),
            num_jobs: 2,
            lang: root.join("lang"),
            lang_test: root.join("lang_test"),
            tri_leaves: 2000,
            tri_gaussians: 10000,
            lda_leaves: 2500,
            lda_gaussians: 15000,
            decode_script: root.join("kaldi/decode.sh"),
        }
    }

    fn toolkit() -> KaldiToolkit {
        let root = Path::new("/r");
        KaldiToolkit::new(layout(root), settings(root))
    }

    #[test]
    fn test_mono_train_command() {
        let cmd = toolkit().train_command(Generation::Mono);
        assert_eq!(cmd.program(), "steps/train_mono.sh");
        assert_eq!(
            cmd.args(),
            [
                "--nj", "2", "--cmd", "run.pl",
                "/r/features/train/mfcc", "/r/lang", "/r/exp/mono"
            ]
        );
    }

    #[test]
    fn test_lda_train_seeds_from_tri_alignments() {
        let cmd = toolkit().train_command(Generation::Lda);
        assert_eq!(cmd.program(), "steps/train_lda_mllt.sh");
        assert_eq!(
            cmd.args(),
            [
                "--cmd", "run.pl", "2500", "15000",
                "/r/features/train/mfcc", "/r/lang", "/r/exp/tri/ali", "/r/exp/lda"
            ]
        );
    }

    #[test]
    fn test_align_converts_every_job_to_pdfs() {
        let commands = toolkit().align_commands(Generation::Tri);
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].program(), "steps/align_si.sh");
        let second = &commands[2];
        assert_eq!(second.program(), "ali-to-pdf");
        assert_eq!(second.args()[1], "ark:gunzip -c /r/exp/tri/ali/ali.2.gz|");
        assert_eq!(second.args()[2], "ark,t:|gzip -c > /r/exp/tri/ali/pdf.2.gz");
    }

    #[test]
    fn test_mono_graph_is_built_with_mono_flag() {
        let commands = toolkit().test_commands(Generation::Mono);
        assert_eq!(commands[0].args()[0], "--mono");
        assert!(toolkit().test_commands(Generation::Tri)[0].args()[0] != "--mono");
    }

    #[test]
    fn test_decode_command_targets_kaldi_decode_dir() {
        let cmd = toolkit().decode_command(Path::new("/r/exp/dnn/decode"));
        assert_eq!(cmd.program(), "/r/kaldi/decode.sh");
        assert_eq!(
            cmd.args()[4..],
            [
                "/r/exp/dnn/decode/graph",
                "/r/exp/dnn/decode",
                "/r/exp/dnn/decode/kaldi_decode"
            ]
        );
    }

    #[test]
    fn test_parse_num_pdfs() {
        let info = "number of phones 48\nnumber of pdfs 1873\nnumber of transition-ids 7000\n";
        assert_eq!(parse_num_pdfs(info), Some(1873));
        assert_eq!(parse_num_pdfs("garbage"), None);
    }
}
