use std::path::PathBuf;
use std::time::Instant;

use super::experiment_layout::ExperimentLayout;
use super::stage::{FeatureKind, FeatureSet, GmmStep, Stage, StageSet};
use super::stage_executor::StageExecutor;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::constants::{
    CMVN_INDEX, GMM_MODEL, GRAPH_DIR, MAX_LENGTH, SHUFFLED_FEATS_INDEX, UTT2SPK,
};
use crate::shared::error::{PipelineError, Result};

/// An enabled stage and whether the run will actually perform it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStage {
    pub stage: Stage,
    pub skip_reason: Option<String>,
}

/// Orders enabled stages canonically and gates each on its input artifacts.
///
/// Enabled stages always execute; the only skip is DNN feature computation
/// when the DNN features are the GMM features.
pub struct StageScheduler {
    enabled: StageSet,
    layout: ExperimentLayout,
    resume_training: bool,
}

impl StageScheduler {
    /// `resume_training` makes `train(nnet)` reuse the existing shuffled index.
    pub fn new(enabled: StageSet, layout: ExperimentLayout, resume_training: bool) -> Self {
        Self {
            enabled,
            layout,
            resume_training,
        }
    }

    pub fn layout(&self) -> &ExperimentLayout {
        &self.layout
    }

    pub fn plan(&self) -> Vec<PlannedStage> {
        self.enabled
            .iter()
            .map(|stage| {
                let skip_reason = match stage {
                    Stage::Features {
                        kind: FeatureKind::Dnn,
                        ..
                    } if self.layout.dnn_features_shared() => Some(format!(
                        "DNN features '{}' are the GMM features",
                        self.layout.dnn_features
                    )),
                    _ => None,
                };
                PlannedStage { stage, skip_reason }
            })
            .collect()
    }

    /// Artifacts that must exist before `stage` may run.
    pub fn requirements(&self, stage: Stage) -> Vec<PathBuf> {
        let l = &self.layout;
        let gmm_train = || l.feature_index(FeatureSet::Train, FeatureKind::Gmm);
        let gmm_test = || l.feature_index(FeatureSet::Test, FeatureKind::Gmm);
        match stage {
            Stage::Features { set, .. } => vec![l.data_dir(set).to_path_buf()],
            Stage::Gmm {
                generation,
                step: GmmStep::Train,
            } => {
                let mut required = vec![gmm_train()];
                if let Some(seed) = generation.seed() {
                    required.push(l.alignment_dir(seed));
                }
                required
            }
            Stage::Gmm {
                generation,
                step: GmmStep::Align,
            } => vec![l.model_file(generation), gmm_train()],
            Stage::Gmm {
                generation,
                step: GmmStep::Test,
            } => vec![l.model_file(generation), gmm_test()],
            Stage::NnetTrain => {
                let feat_dir = l.feature_dir(FeatureSet::Train, FeatureKind::Dnn);
                let mut required = l.supervisor_job_alignments();
                required.extend([
                    l.supervisor_num_pdfs(),
                    l.feature_index(FeatureSet::Train, FeatureKind::Dnn),
                    feat_dir.join(CMVN_INDEX),
                    feat_dir.join(UTT2SPK),
                    feat_dir.join(MAX_LENGTH),
                ]);
                if self.resume_training {
                    required.push(feat_dir.join(SHUFFLED_FEATS_INDEX));
                }
                required
            }
            Stage::NnetTest => {
                let feat_dir = l.feature_dir(FeatureSet::Test, FeatureKind::Dnn);
                vec![
                    l.supervisor_dir().join(GMM_MODEL),
                    l.supervisor_dir().join(GRAPH_DIR),
                    l.feature_index(FeatureSet::Test, FeatureKind::Dnn),
                    feat_dir.join(CMVN_INDEX),
                    feat_dir.join(UTT2SPK),
                    feat_dir.join(MAX_LENGTH),
                ]
            }
        }
    }

    /// Fails with the first missing artifact of `stage`.
    pub fn check(&self, stage: Stage) -> Result<()> {
        match self.requirements(stage).into_iter().find(|p| !p.exists()) {
            Some(path) => Err(PipelineError::Dependency {
                stage: stage.label().to_string(),
                path,
            }),
            None => Ok(()),
        }
    }

    /// Executes the plan in order and stops at the first failure.
    ///
    /// Returns the stages that ran.
    pub fn run(
        &self,
        executor: &mut dyn StageExecutor,
        logger: &mut dyn PipelineLogger,
    ) -> Result<Vec<Stage>> {
        let plan = self.plan();
        let mut executed = Vec::new();
        for (index, planned) in plan.iter().enumerate() {
            let stage = planned.stage;
            if let Some(reason) = &planned.skip_reason {
                logger.info(&format!("------- skipping {stage}: {reason} -------"));
                logger.progress(index + 1, plan.len());
                continue;
            }
            self.check(stage)?;

            logger.info(&format!("------- {stage} -------"));
            let started = Instant::now();
            executor.execute(stage).map_err(|e| e.in_stage(stage.label()))?;
            logger.timing(stage.label(), started.elapsed().as_secs_f64() * 1000.0);
            logger.progress(index + 1, plan.len());
            executed.push(stage);
        }
        Ok(executed)
    }
}
