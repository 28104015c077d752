use std::path::{Path, PathBuf};

use crate::batching::domain::batch_dispenser::BatchDispenser;
use crate::batching::domain::minibatch::BatchSource;
use crate::batching::infrastructure::prefetching_batch_source::PrefetchingBatchSource;
use crate::features::domain::cmvn::CmvnMode;
use crate::features::infrastructure::ark_reader::ArkReader;
use crate::features::infrastructure::feature_prep;
use crate::features::infrastructure::feature_reader::{FeatureReader, FeatureReaderConfig};
use crate::nnet::domain::nnet::{NnetShape, NnetTrainer};
use crate::shared::constants::{
    job_alignment_file, CMVN_INDEX, FEATS_INDEX, MAX_LENGTH, SHUFFLED_FEATS_INDEX, UTT2SPK,
};
use crate::shared::error::{PipelineError, Result};
use crate::shared::text_table;
use crate::stages::domain::experiment_layout::ExperimentLayout;
use crate::stages::domain::stage::{FeatureKind, FeatureSet};
use crate::targets::domain::target_coder::AlignmentCoder;
use crate::targets::infrastructure::alignment_file;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainNnetSettings {
    pub context_width: usize,
    pub batch_size: usize,
    /// 0 reshuffles the training index; later steps reuse it.
    pub starting_step: usize,
    pub shuffle_seed: u64,
    pub cmvn_mode: CmvnMode,
    /// Queue depth of the batch worker; 0 assembles batches inline.
    pub prefetch: usize,
    /// Alignment jobs written by the supervising GMM.
    pub alignment_jobs: usize,
}

/// Everything the trainer is handed.
pub struct TrainingInputs {
    pub shape: NnetShape,
    pub dispenser: BatchDispenser<FeatureReader, AlignmentCoder>,
}

/// Wires DNN training features and GMM alignments into a batch dispenser
/// and hands it to a trainer.
pub struct TrainNnetUseCase {
    layout: ExperimentLayout,
    settings: TrainNnetSettings,
}

impl TrainNnetUseCase {
    pub fn new(layout: ExperimentLayout, settings: TrainNnetSettings) -> Self {
        Self { layout, settings }
    }

    fn feat_dir(&self) -> PathBuf {
        self.layout.feature_dir(FeatureSet::Train, FeatureKind::Dnn)
    }

    /// Shuffles (on a fresh start), merges alignments and opens the dispenser.
    pub fn prepare(&self) -> Result<TrainingInputs> {
        let s = &self.settings;
        let feat_dir = self.feat_dir();

        // 1. Presentation order
        if s.starting_step == 0 {
            feature_prep::shuffle_index(&feat_dir, s.shuffle_seed)?;
        } else if !feat_dir.join(SHUFFLED_FEATS_INDEX).is_file() {
            return Err(PipelineError::Consistency(format!(
                "resuming at step {} needs an existing {} in {}",
                s.starting_step,
                SHUFFLED_FEATS_INDEX,
                feat_dir.display()
            )));
        } else {
            log::info!("Resuming at step {}; keeping {SHUFFLED_FEATS_INDEX}", s.starting_step);
        }

        // 2. Targets
        let ali_dir = self.layout.supervisor_alignment_dir();
        let parts: Vec<PathBuf> = (1..=s.alignment_jobs)
            .map(|job| ali_dir.join(job_alignment_file(job)))
            .collect();
        alignment_file::require_all(&parts)?;
        let merged = self.layout.supervisor_all_alignments();
        alignment_file::concatenate(&parts, &merged)?;
        let alignments = alignment_file::load_alignments(&merged)?;
        let num_labels = text_table::read_single_integer(&self.layout.supervisor_num_pdfs())?;
        log::info!(
            "Loaded {} alignments ({} frames) over {num_labels} pdfs",
            alignments.len(),
            alignments.total_frames()
        );

        // 3. Features
        let max_length = text_table::read_single_integer(&feat_dir.join(MAX_LENGTH))?;
        let reader = FeatureReader::open(
            &feat_dir.join(SHUFFLED_FEATS_INDEX),
            &feat_dir.join(CMVN_INDEX),
            &feat_dir.join(UTT2SPK),
            FeatureReaderConfig {
                context_width: s.context_width,
                max_length,
                cmvn_mode: s.cmvn_mode,
            },
        )?;
        reader.check_coverage()?;

        // 4. Network shape from the first stored utterance
        let feature_dim = first_feature_dim(&feat_dir.join(FEATS_INDEX))?;
        let shape = NnetShape::new(feature_dim, s.context_width, num_labels);

        let dispenser = BatchDispenser::new(reader, alignments, AlignmentCoder::new(num_labels), s.batch_size)?;
        if dispenser.input_dim() != shape.input_dim {
            return Err(PipelineError::Consistency(format!(
                "spliced features are {} wide, expected {}",
                dispenser.input_dim(),
                shape.input_dim
            )));
        }
        log::info!(
            "Network shape: {} x {} -> {} labels",
            shape.feature_dim,
            2 * s.context_width + 1,
            shape.num_labels
        );
        Ok(TrainingInputs { shape, dispenser })
    }

    pub fn run(&self, trainer: &mut dyn NnetTrainer) -> Result<NnetShape> {
        let TrainingInputs { shape, mut dispenser } = self.prepare()?;
        if self.settings.prefetch > 0 {
            let mut source = PrefetchingBatchSource::with_depth(dispenser, self.settings.prefetch);
            trainer.train(shape, &mut source)?;
        } else {
            trainer.train(shape, &mut dispenser)?;
        }
        Ok(shape)
    }
}

fn first_feature_dim(index_path: &Path) -> Result<usize> {
    let mut reader = ArkReader::open(index_path)?;
    match reader.read_next(0)? {
        Some((_, features, _)) => Ok(features.ncols()),
        None => Err(PipelineError::Consistency(format!(
            "{} lists no utterances",
            index_path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::infrastructure::ark_writer::ArkWriter;
    use crate::nnet::infrastructure::epoch_validator::EpochValidator;
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use crate::shared::constants::{FEATS_ARK, NUM_PDFS};
    use crate::stages::domain::experiment_layout::tests::layout;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use ndarray::Array2;
    use std::fs;
    use std::io::Write;

    const FRAMES: [usize; 5] = [3, 5, 2, 4, 5];

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    /// A DNN feature directory plus two alignment jobs under `root`.
    fn experiment(root: &Path) -> ExperimentLayout {
        let l = layout(root);
        let feat_dir = l.feature_dir(FeatureSet::Train, FeatureKind::Dnn);
        fs::create_dir_all(&feat_dir).unwrap();
        let mut writer = ArkWriter::create(&feat_dir.join(FEATS_INDEX), &feat_dir.join(FEATS_ARK)).unwrap();
        let mut utt2spk = String::new();
        let mut jobs = [String::new(), String::new()];
        for (i, &frames) in FRAMES.iter().enumerate() {
            let key = format!("u{i}");
            let features = Array2::from_shape_fn((frames, 2), |(t, d)| (i * 10 + t + d) as f32);
            writer.write(&key, features.view()).unwrap();
            utt2spk.push_str(&format!("{key} s{}\n", i % 2));
            let labels: Vec<String> = (0..frames).map(|t| ((t + i) % 3).to_string()).collect();
            jobs[i % 2].push_str(&format!("{key} {}\n", labels.join(" ")));
        }
        writer.finish().unwrap();
        fs::write(feat_dir.join(UTT2SPK), utt2spk).unwrap();
        feature_prep::compute_cmvn(&feat_dir).unwrap();
        feature_prep::write_max_length(&feat_dir).unwrap();

        let ali_dir = l.supervisor_alignment_dir();
        fs::create_dir_all(&ali_dir).unwrap();
        for (job, text) in jobs.iter().enumerate() {
            fs::write(ali_dir.join(job_alignment_file(job + 1)), gzip(text)).unwrap();
        }
        let graph = l.graph_dir(crate::stages::domain::stage::Generation::Tri);
        fs::create_dir_all(&graph).unwrap();
        fs::write(graph.join(NUM_PDFS), "3\n").unwrap();
        l
    }

    fn settings(starting_step: usize, prefetch: usize) -> TrainNnetSettings {
        TrainNnetSettings {
            context_width: 1,
            batch_size: 2,
            starting_step,
            shuffle_seed: 7,
            cmvn_mode: CmvnMode::MeanAndVariance,
            prefetch,
            alignment_jobs: 2,
        }
    }

    #[test]
    fn test_prepare_builds_shape_and_dispenser() {
        let dir = tempfile::tempdir().unwrap();
        let l = experiment(dir.path());
        let use_case = TrainNnetUseCase::new(l.clone(), settings(0, 0));
        let inputs = use_case.prepare().unwrap();

        assert_eq!(inputs.shape, NnetShape::new(2, 1, 3));
        assert_eq!(inputs.dispenser.input_dim(), 6);
        assert_eq!(inputs.dispenser.max_length(), 5);
        assert_eq!(inputs.dispenser.batches_per_epoch(), 3);
        assert!(l
            .feature_dir(FeatureSet::Train, FeatureKind::Dnn)
            .join(SHUFFLED_FEATS_INDEX)
            .is_file());
        assert!(l.supervisor_all_alignments().is_file());
    }

    #[test]
    fn test_validator_accepts_one_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let l = experiment(dir.path());
        for prefetch in [0, 2] {
            let mut validator = EpochValidator::new(Box::new(NullPipelineLogger));
            TrainNnetUseCase::new(l.clone(), settings(0, prefetch))
                .run(&mut validator)
                .unwrap();
            let report = validator.report().unwrap();
            assert_eq!(report.utterances, FRAMES.len());
            assert_eq!(report.frames, FRAMES.iter().sum::<usize>());
        }
    }

    #[test]
    fn test_resume_keeps_existing_order() {
        let dir = tempfile::tempdir().unwrap();
        let l = experiment(dir.path());
        let shuffled = l
            .feature_dir(FeatureSet::Train, FeatureKind::Dnn)
            .join(SHUFFLED_FEATS_INDEX);

        let err = TrainNnetUseCase::new(l.clone(), settings(3, 0)).prepare().err().unwrap();
        assert!(matches!(err, PipelineError::Consistency(m) if m.contains(SHUFFLED_FEATS_INDEX)));

        TrainNnetUseCase::new(l.clone(), settings(0, 0)).prepare().unwrap();
        let first = fs::read_to_string(&shuffled).unwrap();
        let mut resumed = settings(3, 0);
        resumed.shuffle_seed = 99;
        TrainNnetUseCase::new(l, resumed).prepare().unwrap();
        assert_eq!(fs::read_to_string(&shuffled).unwrap(), first);
    }

    #[test]
    fn test_missing_alignment_job_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let l = experiment(dir.path());
        let mut three_jobs = settings(0, 0);
        three_jobs.alignment_jobs = 3;
        let err = TrainNnetUseCase::new(l, three_jobs).prepare().err().unwrap();
        assert!(err.to_string().contains("pdf.3.gz"));
    }
}
