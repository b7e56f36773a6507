use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::StreamerError;

/// Placeholder replaced by the chunk duration in whole seconds
pub const DURATION_PLACEHOLDER: &str = "<duration>";

/// Placeholder replaced by the chunk output path
pub const OUT_FILE_PLACEHOLDER: &str = "<outFile>";

/// Time a recording may run past its nominal duration before it is killed
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Recording command as an argument vector with substitution points.
///
/// Placeholders are replaced inside each argument independently, so an
/// argument like `location=<outFile>` works and paths containing spaces stay
/// a single argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(argv: Vec<String>) -> crate::Result<Self> {
        let mut argv = argv.into_iter();
        let program = argv.next().ok_or_else(|| StreamerError::Template {
            message: "the recording command is empty".to_string(),
        })?;
        if program.trim().is_empty() {
            return Err(StreamerError::Template {
                message: "the recording program name is blank".to_string(),
            });
        }

        let args: Vec<String> = argv.collect();
        if !args.iter().any(|arg| arg.contains(OUT_FILE_PLACEHOLDER))
            && !program.contains(OUT_FILE_PLACEHOLDER)
        {
            warn!(
                "Recording command has no {} placeholder; chunks will not land where they are expected",
                OUT_FILE_PLACEHOLDER
            );
        }

        Ok(Self { program, args })
    }

    /// Substitute both placeholders, returning the program and its arguments
    pub fn render(&self, duration_secs: u64, out_file: &Path) -> (String, Vec<String>) {
        let duration = duration_secs.to_string();
        let out_file = out_file.to_string_lossy();
        let substitute = |part: &str| {
            part.replace(DURATION_PLACEHOLDER, &duration)
                .replace(OUT_FILE_PLACEHOLDER, &out_file)
        };

        let program = substitute(&self.program);
        let args = self.args.iter().map(|arg| substitute(arg)).collect();
        (program, args)
    }
}

/// Why a recording invocation did not produce a chunk
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("recorder exited with {0}")]
    Exit(ExitStatus),

    #[error("recorder did not finish within {0:?}")]
    Timeout(Duration),

    #[error("recording cancelled")]
    Cancelled,

    #[error("failed to wait for recorder: {0}")]
    Wait(#[source] std::io::Error),
}

impl RecordError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RecordError::Cancelled)
    }
}

/// Runs one recording command per chunk under a deadline
#[derive(Debug, Clone)]
pub struct RecorderInvoker {
    template: CommandTemplate,
    chunk_duration: Duration,
    grace: Duration,
}

impl RecorderInvoker {
    pub fn new(template: CommandTemplate, chunk_duration: Duration) -> Self {
        Self {
            template,
            chunk_duration,
            grace: DEFAULT_GRACE,
        }
    }

    /// Override the time allowed past the chunk duration
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Deadline for one invocation: chunk duration plus grace
    pub fn deadline(&self) -> Duration {
        self.chunk_duration + self.grace
    }

    /// Record a single chunk into `out_file`.
    ///
    /// Succeeds only when the process exits with status zero before the
    /// deadline. On timeout or cancellation the child is killed. The output
    /// file is not inspected; removing partial output is up to the caller.
    pub async fn record(&self, out_file: &Path, cancel: &CancellationToken) -> Result<(), RecordError> {
        let (program, args) = self.template.render(self.chunk_duration.as_secs(), out_file);
        info!("Executing {} with args={:?}", program, args);

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RecordError::Spawn {
                program: program.clone(),
                source,
            })?;

        debug!("Recorder spawned with PID: {:?}", child.id());

        let deadline = self.deadline();
        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(deadline) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Exited(Ok(status)) if status.success() => Ok(()),
            Outcome::Exited(Ok(status)) => Err(RecordError::Exit(status)),
            Outcome::Exited(Err(e)) => Err(RecordError::Wait(e)),
            Outcome::TimedOut => {
                kill_quietly(&mut child).await;
                Err(RecordError::Timeout(deadline))
            }
            Outcome::Cancelled => {
                kill_quietly(&mut child).await;
                Err(RecordError::Cancelled)
            }
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

async fn kill_quietly(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill recorder process: {}", e);
    }
}
