mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crucible-cli")]
#[command(about = "Crucible CLI - Run submissions in the sandbox and inspect the queue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a submission locally against a problem file
    Run {
        /// Problem JSON (input, expectedOutput, drivers)
        #[arg(short, long)]
        problem: PathBuf,

        /// Language of the submission (e.g., javascript, rust, csharp)
        #[arg(short, long)]
        language: String,

        /// File containing the user's code
        #[arg(short, long)]
        code: PathBuf,

        /// Print the captured stdout after the result
        #[arg(long, default_value = "false")]
        show_stdout: bool,
    },

    /// Push a submission onto the worker queue
    Submit {
        #[arg(short, long)]
        problem: PathBuf,

        #[arg(short, long)]
        language: String,

        #[arg(short, long)]
        code: PathBuf,

        /// Submitting user
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Fetch the stored record for a submission
    Result {
        /// Submission ID returned by `submit`
        id: String,
    },

    /// Verify the Docker connection and that each driver image is present
    Check {
        /// Problem files whose driver images should be checked
        problems: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            problem,
            language,
            code,
            show_stdout,
        } => {
            commands::run_submission(&problem, &language, &code, show_stdout).await?;
        }
        Commands::Submit {
            problem,
            language,
            code,
            user,
        } => {
            commands::submit(&problem, &language, &code, &user).await?;
        }
        Commands::Result { id } => {
            commands::fetch_result(&id).await?;
        }
        Commands::Check { problems } => {
            commands::check(&problems).await?;
        }
    }

    Ok(())
}
