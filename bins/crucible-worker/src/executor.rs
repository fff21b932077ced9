/// Submission Executor - glue between the queue and the sandbox
///
/// **Responsibility:**
/// Run one queued submission through the shared `CodeSandbox` and wrap the
/// outcome into the record the domain service persists.
///
/// This module knows nothing about:
/// - How code executes (the sandbox's job)
/// - Where records go (the worker loop's job)

use chrono::Utc;
use crucible_common::types::{SubmissionJob, SubmissionRecord, SubmissionResult};
use crucible_sandbox::{CodeSandbox, SubmitError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Execute a queued submission.
///
/// Returns `None` when the submission was cancelled (worker shutdown); the
/// caller requeues it. Rejections are
/// recorded as a failed result so the submitter still gets an answer.
pub async fn execute_submission(
    job: &SubmissionJob,
    sandbox: &CodeSandbox,
    cancel: &CancellationToken,
) -> Option<SubmissionRecord> {
    let outcome = sandbox
        .execute(&job.user_id, &job.user_code, job.language, &job.problem, cancel)
        .await;

    let (result, stdout) = match outcome {
        Ok(execution) => (execution.result, execution.stdout),
        Err(SubmitError::Rejected(reason)) => {
            warn!(job_id = %job.id, reason = %reason, "Submission rejected");
            (rejected_result(reason), String::new())
        }
        Err(SubmitError::Cancelled) => {
            warn!(job_id = %job.id, "Submission cancelled before completion");
            return None;
        }
    };

    info!(
        job_id = %job.id,
        pass = result.pass,
        passed = result.passed_test_cases,
        total = result.test_case_count,
        "Submission executed"
    );

    Some(SubmissionRecord {
        submission_id: job.id,
        user_id: job.user_id.clone(),
        language: job.language,
        result,
        stdout,
        completed_at: Utc::now(),
    })
}

/// A rejected submission never ran, so it reports zero tests rather than
/// the infrastructure sentinel.
fn rejected_result(reason: String) -> SubmissionResult {
    SubmissionResult {
        pass: false,
        test_case_count: 0,
        passed_test_cases: 0,
        failed_test_cases: 0,
        error_message: Some(reason),
        execution_time_in_ms: 0.0,
        test_case_results: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crucible_common::types::{Language, Problem};
    use crucible_sandbox::{ContainerExit, ContainerRequest, ContainerRuntime, SandboxConfig, SandboxError};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Writes a fixed passing result, like a harness for a solved problem
    struct PassingRuntime;

    #[async_trait]
    impl ContainerRuntime for PassingRuntime {
        async fn run(
            &self,
            request: &ContainerRequest,
            _cancel: &CancellationToken,
        ) -> Result<ContainerExit, SandboxError> {
            let result = SubmissionResult {
                pass: true,
                test_case_count: 1,
                passed_test_cases: 1,
                failed_test_cases: 0,
                error_message: None,
                execution_time_in_ms: 0.3,
                test_case_results: Vec::new(),
            };
            tokio::fs::write(
                request.workspace.join("results.json"),
                serde_json::to_string(&result).unwrap(),
            )
            .await
            .unwrap();
            Ok(ContainerExit::with_status(0))
        }
    }

    fn sandbox(root: &std::path::Path) -> CodeSandbox {
        let config = SandboxConfig {
            workspace_root: root.to_path_buf(),
            ..Default::default()
        };
        CodeSandbox::new(Arc::new(PassingRuntime), config)
    }

    fn job(language: Language, code: &str) -> SubmissionJob {
        let problem: Problem = serde_json::from_value(json!({
            "input": [1, 2],
            "expectedOutput": [3],
            "drivers": [{ "language": "javascript", "image": "crucible-javascript:latest", "driverCode": "//" }]
        }))
        .unwrap();
        SubmissionJob {
            id: Uuid::new_v4(),
            user_id: "user-7".to_string(),
            language,
            user_code: code.to_string(),
            problem,
        }
    }

    #[tokio::test]
    async fn test_record_carries_result() {
        let root = tempfile::tempdir().unwrap();
        let job = job(Language::JavaScript, "function add(a, b) { return a + b; }");

        let record = execute_submission(&job, &sandbox(root.path()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.submission_id, job.id);
        assert_eq!(record.user_id, "user-7");
        assert!(record.result.pass);
        assert_eq!(record.result.passed_test_cases, 1);
    }

    #[tokio::test]
    async fn test_rejection_is_recorded() {
        let root = tempfile::tempdir().unwrap();
        let job = job(Language::Python, "print(1)");

        let record = execute_submission(&job, &sandbox(root.path()), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!record.result.pass);
        assert_eq!(record.result.test_case_count, 0);
        assert!(record.result.error_message.unwrap().contains("python"));
    }

    #[tokio::test]
    async fn test_cancellation_produces_no_record() {
        let root = tempfile::tempdir().unwrap();
        let job = job(Language::JavaScript, "function add() {}");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let record = execute_submission(&job, &sandbox(root.path()), &cancel).await;
        assert!(record.is_none());
    }
}
