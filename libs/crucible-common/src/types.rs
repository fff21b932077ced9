use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Languages a problem can ship a driver for.
///
/// The sandbox itself never branches on this: all language-specific
/// behaviour lives in the driver's image and harness source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    CSharp,
    JavaScript,
    TypeScript,
    Rust,
    Python,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::CSharp,
        Language::JavaScript,
        Language::TypeScript,
        Language::Rust,
        Language::Python,
    ];
}

/// Parses a language name, accepting the usual short aliases
impl FromStr for Language {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "csharp" | "c#" | "cs" => Ok(Language::CSharp),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "typescript" | "ts" => Ok(Language::TypeScript),
            "rust" | "rs" => Ok(Language::Rust),
            "python" | "py" => Ok(Language::Python),
            _ => Err(format!("unsupported language: {}", value.trim())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::CSharp => "csharp",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Rust => "rust",
            Language::Python => "python",
        };
        f.write_str(name)
    }
}

/// Per-language execution strategy attached to a problem.
///
/// `ui_template` and `answer` travel with the record but are never read by
/// the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub language: Language,
    pub image: String,
    pub driver_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Immutable test fixture owned by the calling service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(default)]
    pub id: Option<String>,
    pub input: Value,
    pub expected_output: Value,
    #[serde(default)]
    pub drivers: Vec<Driver>,
}

impl Problem {
    pub fn driver_for(&self, language: Language) -> Option<&Driver> {
        self.drivers.iter().find(|d| d.language == language)
    }
}

/// Outcome of one test case, produced by the in-container harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub index: i32,
    pub pass: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub execution_time_in_ms: f64,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub expected_output: Value,
    #[serde(default)]
    pub actual_output: Value,
    #[serde(default)]
    pub is_hidden: bool,
}

/// Aggregate verdict for one submission.
///
/// Counts of `-1` with `pass == false` mark an infrastructure failure; see
/// [`SubmissionResult::infrastructure_failure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub pass: bool,
    pub test_case_count: i32,
    pub passed_test_cases: i32,
    pub failed_test_cases: i32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub execution_time_in_ms: f64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub test_case_results: Vec<TestCaseResult>,
}

impl SubmissionResult {
    pub const SENTINEL_COUNT: i32 = -1;

    /// Build the sentinel shape used for every host-side failure
    pub fn infrastructure_failure(message: impl Into<String>) -> Self {
        Self {
            pass: false,
            test_case_count: Self::SENTINEL_COUNT,
            passed_test_cases: Self::SENTINEL_COUNT,
            failed_test_cases: Self::SENTINEL_COUNT,
            error_message: Some(message.into()),
            execution_time_in_ms: 0.0,
            test_case_results: Vec::new(),
        }
    }

    pub fn is_infrastructure_failure(&self) -> bool {
        !self.pass && self.test_case_count == Self::SENTINEL_COUNT
    }

    /// `testCaseCount == passed + failed` for every non-sentinel result
    pub fn counts_consistent(&self) -> bool {
        self.test_case_count < 0
            || self.test_case_count == self.passed_test_cases + self.failed_test_cases
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A queued submission, as handed from the domain service to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionJob {
    pub id: Uuid,
    pub user_id: String,
    pub language: Language,
    pub user_code: String,
    pub problem: Problem,
}

/// What the worker stores back for the domain service to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: Uuid,
    pub user_id: String,
    pub language: Language,
    pub result: SubmissionResult,
    pub stdout: String,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_language_parsing() {
        assert_eq!("JavaScript".parse::<Language>(), Ok(Language::JavaScript));
        assert_eq!("c#".parse::<Language>(), Ok(Language::CSharp));
        assert_eq!(" ts ".parse::<Language>(), Ok(Language::TypeScript));
        assert_eq!(
            "cobol".parse::<Language>(),
            Err("unsupported language: cobol".to_string())
        );
        for language in Language::ALL {
            assert_eq!(language.to_string().parse::<Language>(), Ok(language));
        }
    }

    #[test]
    fn test_problem_driver_lookup() {
        let problem: Problem = serde_json::from_value(json!({
            "input": [5, 1, 6, 4],
            "expectedOutput": [6, 10],
            "drivers": [
                { "language": "javascript", "image": "crucible-javascript:latest", "driverCode": "// js" },
                { "language": "rust", "image": "crucible-rust:latest", "driverCode": "// rs" }
            ]
        }))
        .unwrap();

        assert_eq!(problem.driver_for(Language::Rust).unwrap().driver_code, "// rs");
        assert!(problem.driver_for(Language::Python).is_none());
    }

    #[test]
    fn test_sentinel_shape() {
        let result = SubmissionResult::infrastructure_failure("engine unreachable");
        assert!(!result.pass);
        assert_eq!(result.test_case_count, -1);
        assert_eq!(result.passed_test_cases, -1);
        assert_eq!(result.failed_test_cases, -1);
        assert!(result.is_infrastructure_failure());
        assert!(result.counts_consistent());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = SubmissionResult {
            pass: true,
            test_case_count: 0,
            passed_test_cases: 0,
            failed_test_cases: 0,
            error_message: None,
            execution_time_in_ms: 0.5,
            test_case_results: Vec::new(),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["testCaseCount"], 0);
        assert_eq!(value["executionTimeInMs"], 0.5);
        assert_eq!(value["testCaseResults"], json!([]));
    }

    #[test]
    fn test_zero_test_run_keeps_empty_list() {
        let parsed: SubmissionResult = serde_json::from_value(json!({
            "pass": true,
            "testCaseCount": 0,
            "passedTestCases": 0,
            "failedTestCases": 0,
            "executionTimeInMs": 0,
            "testCaseResults": null
        }))
        .unwrap();
        assert!(parsed.test_case_results.is_empty());

        let again: SubmissionResult =
            serde_json::from_str(&serde_json::to_string(&parsed).unwrap()).unwrap();
        assert_eq!(again, parsed);
    }

    #[test]
    fn test_counts_consistency() {
        let mut result = SubmissionResult {
            pass: false,
            test_case_count: 2,
            passed_test_cases: 1,
            failed_test_cases: 1,
            error_message: None,
            execution_time_in_ms: 1.0,
            test_case_results: Vec::new(),
        };
        assert!(result.counts_consistent());
        result.failed_test_cases = 2;
        assert!(!result.counts_consistent());
    }
}
