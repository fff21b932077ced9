use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong below the `CodeSandbox::execute` boundary.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("submission cancelled")]
    Cancelled,
    #[error("workspace I/O failed at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),
    #[error("harness protocol violation: {0}")]
    Protocol(String),
    #[error("execution timed out after {} ms", .0.as_millis())]
    DeadlineExceeded(Duration),
}

impl SandboxError {
    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }
}

/// The only errors a caller of `CodeSandbox::execute` ever sees.
///
/// Every other failure is folded into a sentinel `SubmissionResult`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("submission cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SandboxError>;
