use crate::features::domain::feature_spec::FeatureSpec;
use crate::nnet::domain::nnet::{NnetDecoder, NnetTrainer};
use crate::pipeline::compute_features_use_case::ComputeFeaturesUseCase;
use crate::pipeline::decode_nnet_use_case::DecodeNnetUseCase;
use crate::pipeline::pipeline_config::PipelineConfig;
use crate::pipeline::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use crate::pipeline::train_nnet_use_case::TrainNnetUseCase;
use crate::shared::error::{PipelineError, Result};
use crate::stages::domain::experiment_layout::ExperimentLayout;
use crate::stages::domain::stage::{FeatureKind, GmmStep, Stage};
use crate::stages::domain::stage_executor::{AcousticToolkit, FeatureExtractor, StageExecutor};
use crate::stages::infrastructure::kaldi_feature_extractor::KaldiFeatureExtractor;
use crate::stages::infrastructure::kaldi_toolkit::KaldiToolkit;

/// Maps each stage onto the feature front end, the acoustic toolkit or the
/// network.
///
/// Network stages need a trainer or decoder to be attached; without one
/// they fail with a configuration error.
pub struct ToolkitStageExecutor {
    layout: ExperimentLayout,
    gmm_features: FeatureSpec,
    dnn_features: FeatureSpec,
    features: ComputeFeaturesUseCase,
    toolkit: Box<dyn AcousticToolkit>,
    train: TrainNnetUseCase,
    decode: DecodeNnetUseCase,
    trainer: Option<Box<dyn NnetTrainer>>,
    decoder: Option<Box<dyn NnetDecoder>>,
    logger: Box<dyn PipelineLogger>,
}

impl ToolkitStageExecutor {
    pub fn new(
        config: &PipelineConfig,
        extractor: Box<dyn FeatureExtractor>,
        toolkit: Box<dyn AcousticToolkit>,
    ) -> Self {
        let layout = config.layout();
        let nnet = &config.nnet;
        Self {
            train: TrainNnetUseCase::new(layout.clone(), config.train_settings()),
            decode: DecodeNnetUseCase::new(layout.clone(), nnet.context_width, nnet.cmvn),
            layout,
            gmm_features: config.gmm_features.clone(),
            dnn_features: config.dnn_features.clone(),
            features: ComputeFeaturesUseCase::new(extractor),
            toolkit,
            trainer: None,
            decoder: None,
            logger: Box::new(NullPipelineLogger),
        }
    }

    /// Runs every GMM and feature stage through the Kaldi recipe scripts.
    pub fn kaldi(config: &PipelineConfig) -> Self {
        let extractor = KaldiFeatureExtractor::new(
            config.directories.kaldi_egs.clone(),
            config.general.cmd.clone(),
            config.general.num_jobs,
        );
        let toolkit = KaldiToolkit::new(config.layout(), config.kaldi_settings());
        Self::new(config, Box::new(extractor), Box::new(toolkit))
    }

    pub fn with_trainer(mut self, trainer: Box<dyn NnetTrainer>) -> Self {
        self.trainer = Some(trainer);
        self
    }

    pub fn with_decoder(mut self, decoder: Box<dyn NnetDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        self.logger = logger;
        self
    }
}

impl StageExecutor for ToolkitStageExecutor {
    fn execute(&mut self, stage: Stage) -> Result<()> {
        match stage {
            Stage::Features { set, kind } => {
                let spec = match kind {
                    FeatureKind::Gmm => &self.gmm_features,
                    FeatureKind::Dnn => &self.dnn_features,
                };
                let summary = self.features.run(
                    self.layout.data_dir(set),
                    &self.layout.feature_dir(set, kind),
                    spec,
                )?;
                self.logger.info(&format!(
                    "{} {} features: {} speakers, longest utterance {} frames",
                    set.name(),
                    spec.name,
                    summary.speakers,
                    summary.max_length
                ));
                Ok(())
            }
            Stage::Gmm { generation, step } => match step {
                GmmStep::Train => self.toolkit.train(generation),
                GmmStep::Align => self.toolkit.align(generation),
                GmmStep::Test => self.toolkit.test(generation),
            },
            Stage::NnetTrain => {
                let trainer = self.trainer.as_deref_mut().ok_or_else(|| {
                    PipelineError::Config("no network trainer is configured".to_string())
                })?;
                let shape = self.train.run(trainer)?;
                self.logger.info(&format!(
                    "Trained network {}: input {} -> {} labels",
                    self.layout.nnet_name, shape.input_dim, shape.num_labels
                ));
                Ok(())
            }
            Stage::NnetTest => {
                let decoder = self.decoder.as_deref_mut().ok_or_else(|| {
                    PipelineError::Config("no network decoder is configured".to_string())
                })?;
                self.decode
                    .run(decoder, self.toolkit.as_mut(), self.logger.as_mut())?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipeline_config::tests::EXAMPLE;
    use crate::stages::domain::stage::Generation;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Calls(Arc<Mutex<Vec<String>>>);

    impl Calls {
        fn push(&self, call: String) {
            self.0.lock().unwrap().push(call);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    struct StubToolkit(Calls);

    impl AcousticToolkit for StubToolkit {
        fn train(&mut self, generation: Generation) -> Result<()> {
            self.0.push(format!("train {}", generation.name()));
            Ok(())
        }

        fn align(&mut self, generation: Generation) -> Result<()> {
            self.0.push(format!("align {}", generation.name()));
            Ok(())
        }

        fn test(&mut self, generation: Generation) -> Result<()> {
            self.0.push(format!("test {}", generation.name()));
            Ok(())
        }

        fn decode_posteriors(&mut self, _decode_dir: &Path) -> Result<()> {
            self.0.push("decode".to_string());
            Ok(())
        }
    }

    struct StubExtractor(Calls);

    impl FeatureExtractor for StubExtractor {
        fn extract(&mut self, _data_dir: &Path, _feat_dir: &Path, spec: &FeatureSpec) -> Result<()> {
            self.0.push(format!("extract {}", spec.name));
            Err(PipelineError::ExternalTool {
                program: "steps/make_fbank.sh".to_string(),
                message: "stub".to_string(),
            })
        }
    }

    fn executor(calls: &Calls) -> ToolkitStageExecutor {
        let config = PipelineConfig::from_json(EXAMPLE).unwrap();
        ToolkitStageExecutor::new(
            &config,
            Box::new(StubExtractor(calls.clone())),
            Box::new(StubToolkit(calls.clone())),
        )
    }

    #[test]
    fn test_gmm_stages_dispatch_to_toolkit() {
        let calls = Calls::default();
        let mut executor = executor(&calls);
        for label in ["train(mono)", "align(tri)", "test(lda)"] {
            executor.execute(label.parse().unwrap()).unwrap();
        }
        assert_eq!(calls.take(), vec!["train mono", "align tri", "test lda"]);
    }

    #[test]
    fn test_feature_stage_uses_matching_spec() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("utt2spk"), "u1 s1\n").unwrap();
        let calls = Calls::default();
        let mut config = PipelineConfig::from_json(EXAMPLE).unwrap();
        config.directories.test_data = dir.path().to_path_buf();
        config.directories.test_features = dir.path().join("features");
        let mut executor = ToolkitStageExecutor::new(
            &config,
            Box::new(StubExtractor(calls.clone())),
            Box::new(StubToolkit(calls.clone())),
        );

        let err = executor.execute("features(test,dnn)".parse().unwrap()).unwrap_err();
        assert!(matches!(err, PipelineError::ExternalTool { .. }));
        assert_eq!(calls.take(), vec!["extract fbank"]);
    }

    #[test]
    fn test_network_stages_need_attached_network() {
        let calls = Calls::default();
        let mut executor = executor(&calls);
        for stage in [Stage::NnetTrain, Stage::NnetTest] {
            let err = executor.execute(stage).unwrap_err();
            assert!(matches!(err, PipelineError::Config(_)));
        }
        assert!(calls.take().is_empty());
    }
}
