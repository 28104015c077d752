use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use hybrid_asr_core::features::infrastructure::feature_prep;
use hybrid_asr_core::nnet::infrastructure::epoch_validator::EpochValidator;
use hybrid_asr_core::pipeline::infrastructure::toolkit_stage_executor::ToolkitStageExecutor;
use hybrid_asr_core::pipeline::pipeline_config::PipelineConfig;
use hybrid_asr_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use hybrid_asr_core::pipeline::train_nnet_use_case::TrainNnetUseCase;
use hybrid_asr_core::stages::domain::stage::{FeatureKind, FeatureSet, Stage, StageSet};
use hybrid_asr_core::stages::domain::stage_scheduler::StageScheduler;

/// Staged training of hybrid GMM/DNN acoustic models.
#[derive(Parser)]
#[command(name = "hybrid-asr")]
struct Cli {
    /// Experiment configuration (JSON).
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the stages a run would execute, in order.
    Plan(StageOverrides),
    /// Execute the enabled stages.
    Run(StageOverrides),
    /// Write a fresh shuffled training index.
    Shuffle {
        /// Seed instead of the configured one.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Dispense one epoch of training batches and check every batch.
    CheckData,
}

#[derive(clap::Args)]
struct StageOverrides {
    /// Also run this stage, e.g. 'train(mono)' (repeatable).
    #[arg(long)]
    enable: Vec<Stage>,

    /// Skip this stage even if the configuration enables it (repeatable).
    #[arg(long)]
    disable: Vec<Stage>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let base = std::env::current_dir()?;
    let config = PipelineConfig::load(&cli.config, &base)?;
    log::info!("Experiment directory: {}", config.directories.expdir.display());

    match cli.command {
        Command::Plan(overrides) => print_plan(&scheduler(&config, &overrides)),
        Command::Run(overrides) => run_stages(&config, &scheduler(&config, &overrides))?,
        Command::Shuffle { seed } => {
            let feat_dir = config.layout().feature_dir(FeatureSet::Train, FeatureKind::Dnn);
            let seed = seed.unwrap_or(config.nnet.shuffle_seed);
            let count = feature_prep::shuffle_index(&feat_dir, seed)?;
            println!("Shuffled {count} utterances in {}", feat_dir.display());
        }
        Command::CheckData => check_data(&config)?,
    }
    Ok(())
}

fn scheduler(config: &PipelineConfig, overrides: &StageOverrides) -> StageScheduler {
    let mut stages: StageSet = config.enabled_stages();
    for &stage in &overrides.enable {
        stages.enable(stage);
    }
    for &stage in &overrides.disable {
        stages.disable(stage);
    }
    StageScheduler::new(stages, config.layout(), config.resumes_training())
}

fn print_plan(scheduler: &StageScheduler) {
    let plan = scheduler.plan();
    if plan.is_empty() {
        println!("No stages enabled.");
        return;
    }
    for (index, planned) in plan.iter().enumerate() {
        match &planned.skip_reason {
            Some(reason) => println!("{:2}. {} (skipped: {reason})", index + 1, planned.stage),
            None => {
                let missing: Vec<_> = scheduler
                    .requirements(planned.stage)
                    .into_iter()
                    .filter(|p| !p.exists())
                    .collect();
                if missing.is_empty() {
                    println!("{:2}. {}", index + 1, planned.stage);
                } else {
                    println!(
                        "{:2}. {} (needs {} not yet present)",
                        index + 1,
                        planned.stage,
                        missing.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
                    );
                }
            }
        }
    }
}

fn run_stages(config: &PipelineConfig, scheduler: &StageScheduler) -> Result<(), Box<dyn std::error::Error>> {
    let mut logger = StdoutPipelineLogger::default();
    let mut executor =
        ToolkitStageExecutor::kaldi(config).with_logger(Box::new(StdoutPipelineLogger::default()));

    let executed = scheduler.run(&mut executor, &mut logger)?;
    if let Some(summary) = logger.summary_string() {
        println!("{summary}");
    }
    println!("Completed {} stage(s)", executed.len());
    Ok(())
}

fn check_data(config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let use_case = TrainNnetUseCase::new(config.layout(), config.train_settings());
    let mut validator = EpochValidator::new(Box::new(StdoutPipelineLogger::default()));
    let shape = use_case.run(&mut validator)?;
    let report = validator
        .report()
        .ok_or("validation finished without a report")?;
    println!(
        "Network shape: {} inputs ({} features spliced), {} labels",
        shape.input_dim, shape.feature_dim, shape.num_labels
    );
    println!(
        "One epoch: {} batches, {} utterances, {} frames, {} of {} labels used, mean fill {:.2}",
        report.batches,
        report.utterances,
        report.frames,
        report.labels_used,
        shape.num_labels,
        report.mean_fill_ratio
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_labels_parse_as_arguments() {
        let cli = Cli::try_parse_from([
            "hybrid-asr",
            "run",
            "--enable",
            "features(train, gmm)",
            "--enable",
            "train(mono)",
            "--disable",
            "test(nnet)",
        ])
        .unwrap();
        let Command::Run(overrides) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(overrides.enable.len(), 2);
        assert_eq!(overrides.disable, vec![Stage::NnetTest]);
        assert_eq!(cli.config, PathBuf::from("config.json"));
    }

    #[test]
    fn test_unknown_stage_rejected() {
        assert!(Cli::try_parse_from(["hybrid-asr", "plan", "--enable", "train(quad)"]).is_err());
    }
}
