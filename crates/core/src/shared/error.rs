use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Every failure the pipeline can hit. All variants are fatal to a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A binary or text record could not be parsed.
    #[error("format error in {path}: {message}")]
    Format { path: PathBuf, message: String },

    /// Two inputs that must agree do not (speaker, CMVN, alignment, frame count).
    #[error("consistency error: {0}")]
    Consistency(String),

    /// A stage was requested but an artifact it needs is missing.
    #[error("stage {stage} requires {} which does not exist", path.display())]
    Dependency { stage: String, path: PathBuf },

    /// An external toolkit or network invocation failed.
    #[error("external tool {program} failed: {message}")]
    ExternalTool { program: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Wraps any of the above with the stage that was running.
    #[error("stage {stage} failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        match self {
            // Keep the innermost stage name.
            e @ Self::StageFailed { .. } => e,
            e => Self::StageFailed {
                stage: stage.into(),
                source: Box::new(e),
            },
        }
    }

    /// The error with any stage wrapper removed.
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::StageFailed { source, .. } => source.root(),
            e => e,
        }
    }
}
