/// Result Interpreter - turns what the container left behind into a verdict
///
/// **Outcomes, checked in order:**
/// 1. Non-empty `error.txt`: toolchain or harness failure. Sentinel result
///    whose message is stderr followed by stdout (some compilers report on
///    stdout).
/// 2. No `results.json`: the harness died before writing. Sentinel result
///    with a fixed message.
/// 3. `results.json` present: parsed with case-insensitive keys and
///    returned verbatim. A parse failure is a protocol violation and is
///    returned as an error, never papered over here.
///
/// **Untrusted files:**
/// Everything in the workspace was writable by the submission. Output files
/// are opened without following symlinks, must be regular files, and are
/// read up to `max_bytes` only.
///
/// The interpreter never looks inside individual test cases.

use crate::engine::ContainerExit;
use crate::error::{Result, SandboxError};
use crate::harness::{self, OutputPaths};
use crucible_common::types::SubmissionResult;
use serde_json::{Map, Value};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Interpreted outcome plus the raw stdout handed back to the caller
#[derive(Debug, Clone)]
pub struct Interpretation {
    pub result: SubmissionResult,
    pub stdout: String,
}

/// Contents of one container-produced file, capped at the read limit
#[derive(Debug)]
struct Captured {
    text: String,
    truncated: bool,
}

impl Captured {
    /// Text with a visible marker when the file was cut short
    fn into_marked(self, max_bytes: u64) -> String {
        let mut text = self.text;
        if self.truncated {
            if !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[output truncated at {} bytes]", max_bytes));
        }
        text
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(unix)]
async fn open_untrusted(path: &Path) -> std::io::Result<tokio::fs::File> {
    // O_NONBLOCK keeps a planted FIFO from blocking the open
    tokio::fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK)
        .open(path)
        .await
}

#[cfg(not(unix))]
async fn open_untrusted(path: &Path) -> std::io::Result<tokio::fs::File> {
    let metadata = tokio::fs::symlink_metadata(path).await?;
    if metadata.file_type().is_symlink() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "refusing to follow symlink",
        ));
    }
    tokio::fs::File::open(path).await
}

#[cfg(unix)]
fn is_symlink_refusal(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::ELOOP)
}

#[cfg(not(unix))]
fn is_symlink_refusal(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::InvalidData
}

/// Read a container-produced file; absence means `None`.
///
/// Symlinks and anything other than a regular file are protocol violations.
async fn read_capped(path: &Path, max_bytes: u64) -> Result<Option<Captured>> {
    let file = match open_untrusted(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) if is_symlink_refusal(&e) => {
            return Err(SandboxError::Protocol(format!(
                "{} is a symbolic link",
                file_name(path)
            )))
        }
        Err(e) => return Err(SandboxError::workspace(path, e)),
    };

    let metadata = file
        .metadata()
        .await
        .map_err(|e| SandboxError::workspace(path, e))?;
    if !metadata.is_file() {
        return Err(SandboxError::Protocol(format!(
            "{} is not a regular file",
            file_name(path)
        )));
    }

    let mut bytes = Vec::new();
    file.take(max_bytes.saturating_add(1))
        .read_to_end(&mut bytes)
        .await
        .map_err(|e| SandboxError::workspace(path, e))?;

    let truncated = bytes.len() as u64 > max_bytes;
    if truncated {
        bytes.truncate(max_bytes as usize);
    }

    Ok(Some(Captured {
        text: String::from_utf8_lossy(&bytes).into_owned(),
        truncated,
    }))
}

fn with_exit_note(mut message: String, exit: ContainerExit) -> String {
    if let Some(note) = exit.status_code.and_then(harness::exit_status_note) {
        if !message.is_empty() && !message.ends_with('\n') {
            message.push('\n');
        }
        message.push_str(note);
    }
    message
}

/// Interpret the workspace outputs, reading at most `max_bytes` per file
pub async fn interpret(
    outputs: &OutputPaths,
    exit: ContainerExit,
    max_bytes: u64,
) -> Result<Interpretation> {
    let stdout = read_capped(&outputs.stdout, max_bytes)
        .await?
        .map(|captured| captured.into_marked(max_bytes))
        .unwrap_or_default();
    let stderr = read_capped(&outputs.stderr, max_bytes)
        .await?
        .map(|captured| captured.into_marked(max_bytes))
        .unwrap_or_default();

    if !stderr.trim().is_empty() {
        debug!(
            status_code = ?exit.status_code,
            stderr_bytes = stderr.len(),
            "Container reported errors"
        );
        let message = with_exit_note(format!("{}{}", stderr, stdout), exit);
        return Ok(Interpretation {
            result: SubmissionResult::infrastructure_failure(message),
            stdout,
        });
    }

    let Some(raw) = read_capped(&outputs.results, max_bytes).await? else {
        warn!(
            status_code = ?exit.status_code,
            "Harness exited without writing a results file"
        );
        let mut message = harness::MISSING_RESULTS_MESSAGE.to_string();
        if let Some(code) = exit.status_code.filter(|code| *code != 0) {
            message.push_str(&format!(" (harness exited with status {})", code));
        }
        return Ok(Interpretation {
            result: SubmissionResult::infrastructure_failure(with_exit_note(message, exit)),
            stdout,
        });
    };

    if raw.truncated {
        return Err(SandboxError::Protocol(format!(
            "results file exceeds {} bytes",
            max_bytes
        )));
    }

    let result = parse_results(&raw.text)?;
    if !result.counts_consistent() {
        warn!(
            test_case_count = result.test_case_count,
            passed = result.passed_test_cases,
            failed = result.failed_test_cases,
            "Harness reported inconsistent test counts"
        );
    }

    Ok(Interpretation { result, stdout })
}

/// Parse a harness result document, matching field names case-insensitively
pub fn parse_results(raw: &str) -> Result<SubmissionResult> {
    let mut value: Value = serde_json::from_str(raw)
        .map_err(|e| SandboxError::Protocol(format!("results file is not valid JSON: {}", e)))?;

    let Value::Object(fields) = &mut value else {
        return Err(SandboxError::Protocol(
            "results file must contain a JSON object".to_string(),
        ));
    };
    canonicalize_keys(fields);

    // Test case payloads (input/expected/actual) are opaque and keep their keys
    if let Some(Value::Array(cases)) = fields.get_mut("testCaseResults") {
        for case in cases.iter_mut() {
            if let Value::Object(case_fields) = case {
                canonicalize_keys(case_fields);
            }
        }
    }

    serde_json::from_value(value)
        .map_err(|e| SandboxError::Protocol(format!("results file does not match the result shape: {}", e)))
}

/// Rename known result fields to their camelCase spelling, one level deep
fn canonicalize_keys(fields: &mut Map<String, Value>) {
    let original = std::mem::take(fields);
    for (key, value) in original {
        let canonical = harness::RESULT_FIELDS
            .iter()
            .find(|name| name.eq_ignore_ascii_case(&key))
            .map(|name| name.to_string())
            .unwrap_or(key);
        fields.insert(canonical, value);
    }
}
