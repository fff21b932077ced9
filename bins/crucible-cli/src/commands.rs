// CLI commands for running and inspecting submissions
use anyhow::{anyhow, bail, Context, Result};
use crucible_common::redis;
use crucible_common::types::{Language, Problem, SubmissionJob};
use crucible_sandbox::{CodeSandbox, DockerEngine, SandboxConfig, SubmitError};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Load a problem definition
pub fn load_problem(path: &Path) -> Result<Problem> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read problem file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse problem file {}", path.display()))
}

pub fn parse_language(name: &str) -> Result<Language> {
    name.parse::<Language>().map_err(|_| {
        let known: Vec<String> = Language::ALL.iter().map(|l| l.to_string()).collect();
        anyhow!("Unknown language '{}'. Valid options: {}", name, known.join(", "))
    })
}

async fn redis_connection() -> Result<::redis::aio::ConnectionManager> {
    let redis_url = std::env::var("REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let client = ::redis::Client::open(redis_url.as_str())
        .context("Failed to create Redis client")?;
    ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", redis_url))
}

/// Execute a submission in-process and print the result as JSON.
/// Ctrl+C cancels the run.
pub async fn run_submission(
    problem_path: &Path,
    language: &str,
    code_path: &Path,
    show_stdout: bool,
) -> Result<()> {
    let problem = load_problem(problem_path)?;
    let language = parse_language(language)?;
    let user_code = fs::read_to_string(code_path)
        .with_context(|| format!("Failed to read code file {}", code_path.display()))?;

    let config = SandboxConfig::load_default()?;
    let engine = DockerEngine::connect(&config)?;
    let sandbox = CodeSandbox::new(Arc::new(engine), config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("⚠ Cancelling...");
            trigger.cancel();
        }
    });

    println!("→ Running {} submission against {}", language, problem_path.display());

    let execution = match sandbox
        .execute("cli", &user_code, language, &problem, &cancel)
        .await
    {
        Ok(execution) => execution,
        Err(SubmitError::Rejected(reason)) => bail!("Submission rejected: {}", reason),
        Err(SubmitError::Cancelled) => bail!("Submission cancelled"),
    };

    let result = &execution.result;
    if result.is_infrastructure_failure() {
        println!("✗ Infrastructure failure");
    } else {
        println!(
            "{} {}/{} test cases passed",
            if result.pass { "✓" } else { "✗" },
            result.passed_test_cases,
            result.test_case_count
        );
    }

    println!("{}", serde_json::to_string_pretty(result)?);

    if show_stdout && !execution.stdout.is_empty() {
        println!("--- stdout ---");
        print!("{}", execution.stdout);
    }

    Ok(())
}

/// Queue a submission for the worker and print its ID
pub async fn submit(problem_path: &Path, language: &str, code_path: &Path, user: &str) -> Result<()> {
    let problem = load_problem(problem_path)?;
    let language = parse_language(language)?;
    let user_code = fs::read_to_string(code_path)
        .with_context(|| format!("Failed to read code file {}", code_path.display()))?;

    if problem.driver_for(language).is_none() {
        bail!("Problem has no driver for language '{}'", language);
    }

    let job = SubmissionJob {
        id: Uuid::new_v4(),
        user_id: user.to_string(),
        language,
        user_code,
        problem,
    };

    let mut conn = redis_connection().await?;
    redis::push_job(&mut conn, &job)
        .await
        .context("Failed to queue submission")?;

    println!("✓ Queued submission {}", job.id);
    Ok(())
}

/// Print the stored record for a submission, or report that it is pending
pub async fn fetch_result(id: &str) -> Result<()> {
    let submission_id = Uuid::parse_str(id).context("Invalid submission ID format")?;

    let mut conn = redis_connection().await?;
    match redis::get_record(&mut conn, &submission_id).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("… Submission {} is queued or still executing", submission_id),
    }
    Ok(())
}

/// Check Docker connectivity and every driver image referenced by `problems`
pub async fn check(problems: &[std::path::PathBuf]) -> Result<()> {
    let config = SandboxConfig::load_default()?;
    println!("✓ Sandbox config valid (workspace root: {})", config.workspace_root.display());

    let engine = DockerEngine::connect(&config)?;
    engine.ping().await.context("Docker daemon is not reachable")?;
    println!("✓ Docker daemon reachable");

    let mut missing = 0;
    for path in problems {
        let problem = load_problem(path)?;
        for driver in &problem.drivers {
            if engine.image_exists(&driver.image).await? {
                println!("✓ {} [{}] {}", path.display(), driver.language, driver.image);
            } else {
                println!("✗ {} [{}] {} (not present)", path.display(), driver.language, driver.image);
                missing += 1;
            }
        }
    }

    if missing > 0 {
        bail!("{} driver image(s) missing", missing);
    }
    Ok(())
}
