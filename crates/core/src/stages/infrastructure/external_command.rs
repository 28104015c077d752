use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::shared::error::{PipelineError, Result};

/// A typed invocation of an external program.
///
/// Arguments are passed verbatim (no shell), the working directory is set on
/// the child only, and success requires every expected output to exist
/// afterwards. Relative expected outputs resolve against the working
/// directory.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    expected_outputs: Vec<PathBuf>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            expected_outputs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        let arg = path.to_string_lossy().into_owned();
        self.arg(arg)
    }

    /// Adds `--name value`.
    pub fn option(self, name: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("--{name}")).arg(value.to_string())
    }

    pub fn expects(mut self, output: impl Into<PathBuf>) -> Self {
        self.expected_outputs.push(output.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Runs to completion with inherited stdout/stderr.
    pub fn run(&self) -> Result<()> {
        log::info!("Running {self}");
        let status = self
            .command()
            .status()
            .map_err(|e| self.failure(format!("could not start: {e}")))?;
        if !status.success() {
            return Err(self.failure(format!("exited with {status}")));
        }
        self.check_outputs()
    }

    /// Runs to completion and returns captured stdout.
    pub fn run_captured(&self) -> Result<String> {
        log::debug!("Running {self}");
        let Output { status, stdout, stderr } = self
            .command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.failure(format!("could not start: {e}")))?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(self.failure(format!("exited with {status}: {}", stderr.trim())));
        }
        self.check_outputs()?;
        String::from_utf8(stdout).map_err(|_| self.failure("produced non-UTF-8 output".to_string()))
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).current_dir(&self.working_dir);
        command
    }

    fn check_outputs(&self) -> Result<()> {
        for output in &self.expected_outputs {
            let resolved = self.working_dir.join(output);
            if !resolved.exists() {
                return Err(self.failure(format!(
                    "exited successfully but did not produce {}",
                    resolved.display()
                )));
            }
        }
        Ok(())
    }

    fn failure(&self, message: String) -> PipelineError {
        PipelineError::ExternalTool {
            program: self.program.clone(),
            message,
        }
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        write!(f, " (in {})", self.working_dir.display())
    }
}
