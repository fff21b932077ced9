/// Driver Harness Protocol - the host/container contract
///
/// **The contract every image honours:**
/// 1. The workspace is mounted read-write at [`CONTAINER_WORKSPACE`].
/// 2. The image entrypoint compiles/links `DriverCode.txt` with `UserCode.txt`
///    and runs the harness with exactly three positional arguments:
///    input path, expected-output path, result path.
/// 3. The harness times only the user's function, compares structurally, and
///    writes one camelCase `SubmissionResult` JSON object to the result path,
///    even on internal failure (then with `errorMessage` and a non-zero exit).
/// 4. The entrypoint may capture the toolchain's stdout/stderr into
///    `output.txt` / `error.txt`.
///
/// Nothing on the host branches on language: any image that follows these
/// rules is a valid backend.

use serde_json::Value;
use std::path::{Path, PathBuf};

/// Mount point of the workspace inside the container
pub const CONTAINER_WORKSPACE: &str = "/sandbox";

pub const USER_CODE_FILE: &str = "UserCode.txt";
pub const DRIVER_CODE_FILE: &str = "DriverCode.txt";
pub const INPUT_FILE: &str = "input.json";
pub const EXPECTED_OUTPUT_FILE: &str = "expectedOutput.json";
pub const RESULTS_FILE: &str = "results.json";
pub const STDOUT_FILE: &str = "output.txt";
pub const STDERR_FILE: &str = "error.txt";

/// The four files the host writes before a container may be created
pub const HOST_INPUT_FILES: [&str; 4] = [
    USER_CODE_FILE,
    DRIVER_CODE_FILE,
    INPUT_FILE,
    EXPECTED_OUTPUT_FILE,
];

/// Message used when the harness left no result file behind
pub const MISSING_RESULTS_MESSAGE: &str = "Failed to deserialize results";

/// Canonical JSON encoding shared by host and harness
pub fn encode_fixture(value: &Value) -> String {
    // Serializing a `Value` cannot fail: keys are always strings.
    value.to_string()
}

/// Positional arguments handed to the image entrypoint
pub fn harness_args() -> Vec<String> {
    [INPUT_FILE, EXPECTED_OUTPUT_FILE, RESULTS_FILE]
        .iter()
        .map(|file| format!("{}/{}", CONTAINER_WORKSPACE, file))
        .collect()
}

/// Bind string for mounting `host_dir` read-write at the well-known path
pub fn workspace_bind(host_dir: &Path) -> String {
    format!("{}:{}:rw", host_dir.display(), CONTAINER_WORKSPACE)
}

/// Host-side view of the files the container produces
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub results: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl OutputPaths {
    pub fn in_workspace(dir: &Path) -> Self {
        Self {
            results: dir.join(RESULTS_FILE),
            stdout: dir.join(STDOUT_FILE),
            stderr: dir.join(STDERR_FILE),
        }
    }
}

/// Field names of the result object, used to match keys case-insensitively
pub(crate) const RESULT_FIELDS: &[&str] = &[
    "pass",
    "testCaseCount",
    "passedTestCases",
    "failedTestCases",
    "errorMessage",
    "executionTimeInMs",
    "testCaseResults",
    "index",
    "input",
    "expectedOutput",
    "actualOutput",
    "isHidden",
];

/// Human-readable note for well-known container exit statuses
pub fn exit_status_note(status_code: i64) -> Option<&'static str> {
    match status_code {
        137 => Some("[Container killed: likely OOM or exceeded memory limit]"),
        139 => Some("[Container killed: segmentation fault]"),
        _ => None,
    }
}
