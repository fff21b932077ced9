//! Per-submission workspace directories.
//!
//! A [`Workspace`] owns its directory. The normal path removes it with
//! [`Workspace::remove`]; dropping an unremoved workspace deletes it
//! synchronously, which covers futures dropped mid-await. Nothing else ever
//! writes to or deletes it.

use crate::error::{Result, SandboxError};
use crate::harness::{self, OutputPaths};
use crucible_common::types::{Driver, Problem};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create a fresh, uniquely named directory under `root`
    pub async fn create(root: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| SandboxError::workspace(root, e))?;

        let path = root.join(format!("submission-{}", Uuid::new_v4()));
        // create_dir (not create_dir_all) so a name collision is an error
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| SandboxError::workspace(&path, e))?;

        let workspace = Self {
            path,
            removed: false,
        };
        workspace.open_permissions().await?;
        Ok(workspace)
    }

    /// The image decides its process user, so the mount must be writable by anyone.
    #[cfg(unix)]
    async fn open_permissions(&self) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o777))
            .await
            .map_err(|e| SandboxError::workspace(&self.path, e))
    }

    #[cfg(not(unix))]
    async fn open_permissions(&self) -> Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn outputs(&self) -> OutputPaths {
        OutputPaths::in_workspace(&self.path)
    }

    /// Delete the directory without blocking the runtime
    pub async fn remove(mut self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!(workspace = %self.path.display(), "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            // Drop retries synchronously
            Err(e) => return Err(SandboxError::workspace(&self.path, e)),
        }
        self.removed = true;
        Ok(())
    }

    async fn write(&self, name: &str, contents: &str) -> Result<()> {
        let target = self.path.join(name);
        tokio::fs::write(&target, contents.as_bytes())
            .await
            .map_err(|e| SandboxError::workspace(&target, e))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(workspace = %self.path.display(), "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                workspace = %self.path.display(),
                error = %e,
                "Failed to remove workspace"
            ),
        }
    }
}

/// Materialize the four host-produced files for one submission.
///
/// Either every file is written and the workspace is returned, or the
/// partially written directory is removed and the I/O error is returned.
pub async fn prepare(
    root: &Path,
    user_code: &str,
    driver: &Driver,
    problem: &Problem,
) -> Result<Workspace> {
    let workspace = Workspace::create(root).await?;

    workspace.write(harness::USER_CODE_FILE, user_code).await?;
    workspace
        .write(harness::DRIVER_CODE_FILE, &driver.driver_code)
        .await?;
    workspace
        .write(harness::INPUT_FILE, &harness::encode_fixture(&problem.input))
        .await?;
    workspace
        .write(
            harness::EXPECTED_OUTPUT_FILE,
            &harness::encode_fixture(&problem.expected_output),
        )
        .await?;

    debug!(workspace = %workspace.path().display(), "Workspace prepared");
    Ok(workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_common::types::Language;
    use serde_json::json;

    fn sample_problem() -> (Driver, Problem) {
        let driver = Driver {
            language: Language::JavaScript,
            image: "crucible-javascript:latest".to_string(),
            driver_code: "const run = require('./solution');".to_string(),
            ui_template: None,
            answer: None,
        };
        let problem = Problem {
            id: Some("add-two".to_string()),
            input: json!([5, 1, 6, 4]),
            expected_output: json!([6, 10]),
            drivers: vec![driver.clone()],
        };
        (driver, problem)
    }

    #[tokio::test]
    async fn test_prepare_writes_exactly_four_files() {
        let root = tempfile::tempdir().unwrap();
        let (driver, problem) = sample_problem();

        let workspace = prepare(root.path(), "function add(a, b) { return a + b; }", &driver, &problem)
            .await
            .unwrap();

        let mut names: Vec<String> = std::fs::read_dir(workspace.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        let mut expected: Vec<String> = harness::HOST_INPUT_FILES.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(names, expected);

        let input = std::fs::read_to_string(workspace.path().join(harness::INPUT_FILE)).unwrap();
        assert_eq!(input, "[5,1,6,4]");
        let expected_output =
            std::fs::read_to_string(workspace.path().join(harness::EXPECTED_OUTPUT_FILE)).unwrap();
        assert_eq!(expected_output, "[6,10]");
        let code = std::fs::read_to_string(workspace.path().join(harness::USER_CODE_FILE)).unwrap();
        assert!(code.contains("return a + b"));
    }

    #[tokio::test]
    async fn test_workspaces_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let first = Workspace::create(root.path()).await.unwrap();
        let second = Workspace::create(root.path()).await.unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let (driver, problem) = sample_problem();
        let workspace = prepare(root.path(), "code", &driver, &problem).await.unwrap();
        let path = workspace.path().to_path_buf();
        std::fs::write(path.join(harness::RESULTS_FILE), "{}").unwrap();

        drop(workspace);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_remove_deletes_directory() {
        let root = tempfile::tempdir().unwrap();
        let (driver, problem) = sample_problem();
        let workspace = prepare(root.path(), "code", &driver, &problem).await.unwrap();
        let path = workspace.path().to_path_buf();
        std::fs::write(path.join(harness::STDOUT_FILE), "out").unwrap();

        workspace.remove().await.unwrap();
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_root_is_workspace_error() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let locked = root.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        // root ignores permission bits; only assert when the check is enforceable
        if std::fs::write(locked.join("write-check"), "x").is_ok() {
            return;
        }

        let (driver, problem) = sample_problem();
        let result = prepare(&locked, "code", &driver, &problem).await;
        assert!(matches!(result, Err(SandboxError::Workspace { .. })));
        assert_eq!(std::fs::read_dir(&locked).unwrap().count(), 0);
    }
}
