use std::path::{Path, PathBuf};

use super::stage::{FeatureKind, FeatureSet, Generation};
use crate::shared::constants::{
    job_alignment_file, ALIGNMENT_DIR, ALL_ALIGNMENTS, DECODE_DIR, FEATS_INDEX, GMM_MODEL,
    GRAPH_DIR, NUM_PDFS,
};

/// Where every artifact of an experiment lives on disk.
///
/// Artifacts are the only record of completed stages, so all path
/// derivations go through here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentLayout {
    pub train_data: PathBuf,
    pub test_data: PathBuf,
    pub train_features: PathBuf,
    pub test_features: PathBuf,
    pub expdir: PathBuf,
    pub gmm_features: String,
    pub dnn_features: String,
    /// Model directory names under `expdir` for mono, tri and lda.
    pub generation_dirs: [String; 3],
    /// Generation directory whose alignments supervise the network.
    pub gmm_name: String,
    pub nnet_name: String,
    /// Parallel jobs the supervising alignment was split into.
    pub alignment_jobs: usize,
}

impl ExperimentLayout {
    pub fn data_dir(&self, set: FeatureSet) -> &Path {
        match set {
            FeatureSet::Train => &self.train_data,
            FeatureSet::Test => &self.test_data,
        }
    }

    pub fn feature_dir(&self, set: FeatureSet, kind: FeatureKind) -> PathBuf {
        let root = match set {
            FeatureSet::Train => &self.train_features,
            FeatureSet::Test => &self.test_features,
        };
        let name = match kind {
            FeatureKind::Gmm => &self.gmm_features,
            FeatureKind::Dnn => &self.dnn_features,
        };
        root.join(name)
    }

    pub fn feature_index(&self, set: FeatureSet, kind: FeatureKind) -> PathBuf {
        self.feature_dir(set, kind).join(FEATS_INDEX)
    }

    /// DNN features are the GMM features when both carry the same name.
    pub fn dnn_features_shared(&self) -> bool {
        self.dnn_features == self.gmm_features
    }

    pub fn model_dir(&self, generation: Generation) -> PathBuf {
        let index = match generation {
            Generation::Mono => 0,
            Generation::Tri => 1,
            Generation::Lda => 2,
        };
        self.expdir.join(&self.generation_dirs[index])
    }

    pub fn model_file(&self, generation: Generation) -> PathBuf {
        self.model_dir(generation).join(GMM_MODEL)
    }

    pub fn alignment_dir(&self, generation: Generation) -> PathBuf {
        self.model_dir(generation).join(ALIGNMENT_DIR)
    }

    pub fn graph_dir(&self, generation: Generation) -> PathBuf {
        self.model_dir(generation).join(GRAPH_DIR)
    }

    pub fn supervisor_dir(&self) -> PathBuf {
        self.expdir.join(&self.gmm_name)
    }

    pub fn supervisor_alignment_dir(&self) -> PathBuf {
        self.supervisor_dir().join(ALIGNMENT_DIR)
    }

    pub fn supervisor_all_alignments(&self) -> PathBuf {
        self.supervisor_alignment_dir().join(ALL_ALIGNMENTS)
    }

    /// One `pdf.N.gz` per alignment job, numbered from 1.
    pub fn supervisor_job_alignments(&self) -> Vec<PathBuf> {
        let dir = self.supervisor_alignment_dir();
        (1..=self.alignment_jobs)
            .map(|job| dir.join(job_alignment_file(job)))
            .collect()
    }

    pub fn supervisor_num_pdfs(&self) -> PathBuf {
        self.supervisor_dir().join(GRAPH_DIR).join(NUM_PDFS)
    }

    pub fn nnet_dir(&self) -> PathBuf {
        self.expdir.join(&self.nnet_name)
    }

    pub fn decode_dir(&self) -> PathBuf {
        self.nnet_dir().join(DECODE_DIR)
    }
}
