use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::features::domain::cmvn::CmvnMode;
use crate::features::domain::feature_spec::FeatureSpec;
use crate::pipeline::train_nnet_use_case::TrainNnetSettings;
use crate::shared::error::{PipelineError, Result};
use crate::stages::domain::experiment_layout::ExperimentLayout;
use crate::stages::domain::stage::{Stage, StageSet};
use crate::stages::infrastructure::kaldi_toolkit::KaldiSettings;

/// Everything a run needs, loaded once and validated up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub directories: Directories,
    #[serde(rename = "gmm-features")]
    pub gmm_features: FeatureSpec,
    #[serde(rename = "dnn-features")]
    pub dnn_features: FeatureSpec,
    pub nnet: NnetConfig,
    pub general: GeneralConfig,
    /// `{"train(mono)": true, ...}`; stages not listed are disabled.
    #[serde(default)]
    pub stages: BTreeMap<Stage, bool>,
    #[serde(default)]
    pub gmm: GmmConfig,
    #[serde(default)]
    pub decode: DecodeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Directories {
    pub train_data: PathBuf,
    pub test_data: PathBuf,
    pub train_features: PathBuf,
    pub test_features: PathBuf,
    pub expdir: PathBuf,
    pub kaldi_egs: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NnetConfig {
    pub name: String,
    /// Model directory under `expdir` whose alignments supervise training.
    pub gmm_name: String,
    /// 0 starts fresh (and reshuffles); anything else resumes.
    pub starting_step: usize,
    pub context_width: usize,
    /// Utterances per minibatch.
    pub batch_size: usize,
    #[serde(default)]
    pub shuffle_seed: u64,
    #[serde(default)]
    pub cmvn: CmvnMode,
    /// Batches assembled ahead on a worker thread; 0 disables prefetching.
    #[serde(default)]
    pub prefetch: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    pub num_jobs: usize,
    pub cmd: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GmmConfig {
    pub mono_name: String,
    pub tri_name: String,
    pub lda_name: String,
    /// Kaldi lang directory, relative to `kaldi_egs` unless absolute.
    pub lang: PathBuf,
    pub lang_test: PathBuf,
    pub tri_leaves: usize,
    pub tri_gaussians: usize,
    pub lda_leaves: usize,
    pub lda_gaussians: usize,
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            mono_name: "mono".to_string(),
            tri_name: "tri".to_string(),
            lda_name: "lda".to_string(),
            lang: PathBuf::from("data/lang"),
            lang_test: PathBuf::from("data/lang_test"),
            tri_leaves: 2000,
            tri_gaussians: 10000,
            lda_leaves: 2500,
            lda_gaussians: 15000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DecodeConfig {
    /// Decoding script for network pseudo-likelihoods.
    pub script: PathBuf,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            script: PathBuf::from("kaldi/decode.sh"),
        }
    }
}

impl PipelineConfig {
    /// Reads, validates and makes every relative path absolute against `base`.
    ///
    /// `base` is normally the directory the tool was started from; lang
    /// directories resolve against `kaldi_egs` instead.
    pub fn load(path: &Path, base: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let mut config = Self::from_json(&text)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        config.resolve_paths(base);
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let names = [
            ("gmm-features.name", &self.gmm_features.name),
            ("dnn-features.name", &self.dnn_features.name),
            ("nnet.name", &self.nnet.name),
            ("nnet.gmm_name", &self.nnet.gmm_name),
            ("gmm.mono_name", &self.gmm.mono_name),
            ("gmm.tri_name", &self.gmm.tri_name),
            ("gmm.lda_name", &self.gmm.lda_name),
        ];
        for (field, value) in names {
            if value.is_empty() || value.contains(['/', '\\']) || value == "." || value == ".." {
                return Err(PipelineError::Config(format!(
                    "{field} must be a plain directory name, got '{value}'"
                )));
            }
        }
        if self.nnet.batch_size == 0 {
            return Err(PipelineError::Config("nnet.batch_size must be positive".to_string()));
        }
        if self.general.num_jobs == 0 {
            return Err(PipelineError::Config("general.num_jobs must be positive".to_string()));
        }
        if self.general.cmd.trim().is_empty() {
            return Err(PipelineError::Config("general.cmd must not be empty".to_string()));
        }
        let generations = [&self.gmm.mono_name, &self.gmm.tri_name, &self.gmm.lda_name];
        if generations[0] == generations[1]
            || generations[1] == generations[2]
            || generations[0] == generations[2]
        {
            return Err(PipelineError::Config(
                "gmm generation names must be distinct".to_string(),
            ));
        }
        if generations.contains(&&self.nnet.name) {
            return Err(PipelineError::Config(format!(
                "nnet.name '{}' collides with a GMM model directory",
                self.nnet.name
            )));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let d = &mut self.directories;
        for dir in [
            &mut d.train_data,
            &mut d.test_data,
            &mut d.train_features,
            &mut d.test_features,
            &mut d.expdir,
            &mut d.kaldi_egs,
        ] {
            *dir = absolute(base, dir);
        }
        self.decode.script = absolute(base, &self.decode.script);
        self.gmm.lang = absolute(&self.directories.kaldi_egs, &self.gmm.lang);
        self.gmm.lang_test = absolute(&self.directories.kaldi_egs, &self.gmm.lang_test);
    }

    pub fn enabled_stages(&self) -> StageSet {
        StageSet::from_flags(&self.stages)
    }

    pub fn resumes_training(&self) -> bool {
        self.nnet.starting_step > 0
    }

    pub fn layout(&self) -> ExperimentLayout {
        let d = &self.directories;
        ExperimentLayout {
            train_data: d.train_data.clone(),
            test_data: d.test_data.clone(),
            train_features: d.train_features.clone(),
            test_features: d.test_features.clone(),
            expdir: d.expdir.clone(),
            gmm_features: self.gmm_features.name.clone(),
            dnn_features: self.dnn_features.name.clone(),
            generation_dirs: [
                self.gmm.mono_name.clone(),
                self.gmm.tri_name.clone(),
                self.gmm.lda_name.clone(),
            ],
            gmm_name: self.nnet.gmm_name.clone(),
            nnet_name: self.nnet.name.clone(),
            alignment_jobs: self.general.num_jobs,
        }
    }

    pub fn train_settings(&self) -> TrainNnetSettings {
        TrainNnetSettings {
            context_width: self.nnet.context_width,
            batch_size: self.nnet.batch_size,
            starting_step: self.nnet.starting_step,
            shuffle_seed: self.nnet.shuffle_seed,
            cmvn_mode: self.nnet.cmvn,
            prefetch: self.nnet.prefetch,
            alignment_jobs: self.general.num_jobs,
        }
    }

    pub fn kaldi_settings(&self) -> KaldiSettings {
        KaldiSettings {
            kaldi_egs: self.directories.kaldi_egs.clone(),
            cmd: self.general.cmd.clone(),
            num_jobs: self.general.num_jobs,
            lang: self.gmm.lang.clone(),
            lang_test: self.gmm.lang_test.clone(),
            tri_leaves: self.gmm.tri_leaves,
            tri_gaussians: self.gmm.tri_gaussians,
            lda_leaves: self.gmm.lda_leaves,
            lda_gaussians: self.gmm.lda_gaussians,
            decode_script: self.decode.script.clone(),
        }
    }
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
