/// Code Sandbox - the single public entry point
///
/// **Responsibility:**
/// Validate a submission, then run prepare → execute → interpret → cleanup
/// strictly in sequence, and fold every failure into a `SubmissionResult`.
///
/// **Error boundary:**
/// This is the only place errors are caught and converted. Callers see
/// `SubmitError::Rejected` (nothing was started) or `SubmitError::Cancelled`
/// (their token fired); everything else arrives as a result, with the
/// sentinel shape for host-side failures.

use crate::config::SandboxConfig;
use crate::engine::{ContainerRequest, ContainerRuntime};
use crate::error::{SandboxError, SubmitError};
use crate::interpreter::{self, Interpretation};
use crate::workspace;
use crucible_common::types::{Driver, Language, Problem, SubmissionResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Verdict plus the stdout the container captured
#[derive(Debug, Clone)]
pub struct Execution {
    pub submission_id: Uuid,
    pub result: SubmissionResult,
    pub stdout: String,
}

/// Shared by every concurrent submission; holds no per-submission state.
#[derive(Clone)]
pub struct CodeSandbox {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
}

impl CodeSandbox {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        Self { runtime, config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Cheap synchronous checks, run before any file or container exists
    pub fn validate<'p>(
        &self,
        user_code: &str,
        language: Language,
        problem: &'p Problem,
    ) -> Result<&'p Driver, SubmitError> {
        if user_code.trim().is_empty() {
            return Err(SubmitError::Rejected("user code is empty".to_string()));
        }
        if user_code.len() > self.config.max_source_bytes {
            return Err(SubmitError::Rejected(format!(
                "user code exceeds maximum size of {} bytes",
                self.config.max_source_bytes
            )));
        }
        let driver = problem.driver_for(language).ok_or_else(|| {
            SubmitError::Rejected(format!("no driver available for language '{}'", language))
        })?;
        if driver.image.trim().is_empty() {
            return Err(SubmitError::Rejected(format!(
                "driver for '{}' has no image",
                language
            )));
        }
        Ok(driver)
    }

    /// Run one submission to completion.
    #[tracing::instrument(
        skip_all,
        fields(user_id = %user_id, language = %language, code_bytes = user_code.len())
    )]
    pub async fn execute(
        &self,
        user_id: &str,
        user_code: &str,
        language: Language,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<Execution, SubmitError> {
        let driver = self.validate(user_code, language, problem)?;

        if cancel.is_cancelled() {
            return Err(SubmitError::Cancelled);
        }

        let submission_id = Uuid::new_v4();
        info!(submission_id = %submission_id, image = %driver.image, "Starting submission");

        let outcome = self
            .run_submission(submission_id, user_code, driver, problem, cancel)
            .await;

        let (result, stdout) = match outcome {
            Ok(Interpretation { result, stdout }) => (result, stdout),
            Err(SandboxError::Cancelled) => {
                warn!(submission_id = %submission_id, "Submission cancelled");
                return Err(SubmitError::Cancelled);
            }
            Err(e @ SandboxError::Protocol(_)) => {
                error!(
                    submission_id = %submission_id,
                    image = %driver.image,
                    error = %e,
                    "Container output violated the result protocol"
                );
                (SubmissionResult::infrastructure_failure(e.to_string()), String::new())
            }
            Err(e @ SandboxError::DeadlineExceeded(_)) => {
                warn!(submission_id = %submission_id, error = %e, "Submission hit the execution deadline");
                (SubmissionResult::infrastructure_failure(e.to_string()), String::new())
            }
            Err(e) => {
                error!(submission_id = %submission_id, error = %e, "Submission failed before producing a result");
                (SubmissionResult::infrastructure_failure(e.to_string()), String::new())
            }
        };

        info!(
            submission_id = %submission_id,
            pass = result.pass,
            test_case_count = result.test_case_count,
            passed = result.passed_test_cases,
            failed = result.failed_test_cases,
            execution_time_ms = result.execution_time_in_ms,
            "Submission finished"
        );

        Ok(Execution {
            submission_id,
            result,
            stdout,
        })
    }

    async fn run_submission(
        &self,
        submission_id: Uuid,
        user_code: &str,
        driver: &Driver,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<Interpretation, SandboxError> {
        // Removed below on every path that returns; Drop covers a dropped future
        let workspace = tokio::select! {
            _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            prepared = workspace::prepare(&self.config.workspace_root, user_code, driver, problem) => prepared?,
        };

        let request = ContainerRequest {
            submission_id,
            image: driver.image.clone(),
            workspace: workspace.path().to_path_buf(),
            deadline: self.config.execution_timeout(),
        };
        let outputs = workspace.outputs();

        let outcome = match self.runtime.run(&request, cancel).await {
            Ok(exit) => tokio::select! {
                _ = cancel.cancelled() => Err(SandboxError::Cancelled),
                interpreted = interpreter::interpret(&outputs, exit, self.config.max_output_bytes) => interpreted,
            },
            Err(e) => Err(e),
        };

        if let Err(e) = workspace.remove().await {
            warn!(submission_id = %submission_id, error = %e, "Workspace cleanup failed");
        }
        outcome
    }
}
