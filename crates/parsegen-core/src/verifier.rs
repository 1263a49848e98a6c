//! Verification boundary.
//!
//! Runs the pre-existing external test command against the freshly written
//! artifact. Only the exit code and the captured output are interpreted;
//! how the test command loads the artifact is its own business.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};

use crate::error::CoreError;

/// Result of one verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The test command exited with status 0.
    Passed,
    /// The test command exited non-zero (or was killed by a signal).
    Failed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The command could not be spawned or timed out.
    Errored(String),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Human-readable feedback threaded into the next prompt.
    pub fn feedback(&self) -> String {
        match self {
            Self::Passed => "All tests passed successfully.".to_owned(),
            Self::Failed { stdout, stderr, .. } => {
                format!("Tests failed.\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}")
            }
            Self::Errored(reason) => {
                format!("An unexpected error occurred while running tests: {reason}")
            }
        }
    }
}

/// Judges the current artifact.
pub trait Verifier: Send + Sync {
    fn verify(&self) -> impl Future<Output = Verdict> + Send;
}

/// Runs a fixed external command with a wall-clock timeout.
///
/// The command is executed directly, without a shell. On timeout the child
/// is killed before the verdict is returned, so nothing is left running.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    timeout: Duration,
}

impl CommandVerifier {
    /// # Errors
    ///
    /// Returns `CoreError::Config` if `command` is empty.
    pub fn new(
        command: &[String],
        cwd: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CoreError::Config("verification command is empty".to_owned()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: cwd.into(),
            timeout,
        })
    }

    /// The command line, for display.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Verifier for CommandVerifier {
    #[instrument(skip(self), fields(command = %self.command_line()))]
    async fn verify(&self) -> Verdict {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(error = %e, "failed to spawn test command");
                return Verdict::Errored(format!("failed to run `{}`: {e}", self.program));
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "test command timed out, killed");
                return Verdict::Errored(format!(
                    "test command timed out after {} seconds",
                    self.timeout.as_secs()
                ));
            }
        };

        if output.status.success() {
            debug!("tests passed");
            return Verdict::Passed;
        }

        warn!(exit_code = ?output.status.code(), "tests failed");
        Verdict::Failed {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}
