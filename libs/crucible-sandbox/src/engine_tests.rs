/// End-to-end tests against a real Docker daemon
///
/// These need Docker and the JavaScript image:
///     docker build -t crucible-javascript:latest images/javascript
/// Run with `cargo test -p crucible-sandbox -- --ignored`.

#[cfg(test)]
mod docker_tests {
    use crate::config::SandboxConfig;
    use crate::engine::DockerEngine;
    use crate::error::SubmitError;
    use crate::sandbox::CodeSandbox;
    use crucible_common::types::{Language, Problem};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const ADD_PROBLEM: &str = include_str!("../../../problems/add-two-numbers.json");

    fn problem() -> Problem {
        serde_json::from_str(ADD_PROBLEM).expect("Sample problem should parse")
    }

    fn sandbox(root: &std::path::Path) -> CodeSandbox {
        let config = SandboxConfig {
            workspace_root: root.to_path_buf(),
            pull_images: false,
            execution_timeout_ms: 20_000,
            ..Default::default()
        };
        let engine = DockerEngine::connect(&config).expect("Failed to create Docker engine");
        CodeSandbox::new(Arc::new(engine), config)
    }

    /// Test: reference answer passes every case
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_javascript_add_passes() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());

        let execution = sandbox
            .execute(
                "user-1",
                "function add(a, b) { return a + b; }\n",
                Language::JavaScript,
                &problem(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let result = execution.result;
        assert!(result.pass, "unexpected failure: {:?}", result.error_message);
        assert_eq!(result.test_case_count, 2);
        assert_eq!(result.passed_test_cases, 2);
        assert_eq!(result.failed_test_cases, 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    /// Test: wrong answer is a normal result, not a sentinel
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_javascript_wrong_answer() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());

        let result = sandbox
            .execute(
                "user-1",
                "function add(a, b) { return 0; }\n",
                Language::JavaScript,
                &problem(),
                &CancellationToken::new(),
            )
            .await
            .unwrap()
            .result;

        assert!(!result.pass);
        assert_eq!(result.failed_test_cases, 2);
        for case in &result.test_case_results {
            let message = case.error_message.as_deref().unwrap_or_default();
            assert!(message.contains("Expected"), "message was {:?}", message);
            assert!(message.contains("got 0"), "message was {:?}", message);
        }
    }

    /// Test: syntax errors surface through the error stream
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_javascript_syntax_error() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());

        let result = sandbox
            .execute(
                "user-1",
                "function add(a, b) { return a + ; }\n",
                Language::JavaScript,
                &problem(),
                &CancellationToken::new(),
            )
            .await
            .unwrap()
            .result;

        assert!(result.is_infrastructure_failure());
        assert!(result.error_message.unwrap().contains("SyntaxError"));
    }

    /// Test: an image the daemon does not have is an infrastructure failure
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_missing_image() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());
        let mut problem = problem();
        problem.drivers[0].image = "crucible-does-not-exist:never".to_string();

        let result = sandbox
            .execute(
                "user-1",
                "function add(a, b) { return a + b; }\n",
                Language::JavaScript,
                &problem,
                &CancellationToken::new(),
            )
            .await
            .unwrap()
            .result;

        assert_eq!(result.test_case_count, -1);
        assert!(!result.pass);
    }

    /// Test: cancelling mid-run propagates and leaves no workspace behind
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_cancel_infinite_loop() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let outcome = sandbox
            .execute(
                "user-1",
                "function add(a, b) { while (true) {} }\n",
                Language::JavaScript,
                &problem(),
                &cancel,
            )
            .await;

        assert_eq!(outcome.unwrap_err(), SubmitError::Cancelled);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
