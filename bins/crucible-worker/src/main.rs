mod executor;

use crucible_common::redis;
use crucible_sandbox::{CodeSandbox, DockerEngine, SandboxConfig};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_MAX_CONCURRENT: usize = 4;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("CRUCIBLE_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Crucible Worker booting...");

    let config = SandboxConfig::load_default().map_err(|e| {
        error!("Failed to load sandbox configuration: {:#}", e);
        e
    })?;

    info!(
        workspace_root = %config.workspace_root.display(),
        memory_limit_mb = config.memory_limit_mb,
        cpu_shares = config.cpu_shares,
        pids_limit = config.pids_limit,
        execution_timeout_ms = config.execution_timeout_ms,
        "Sandbox policy loaded"
    );

    let engine = DockerEngine::connect(&config)?;
    engine.ping().await.map_err(|e| {
        error!("Docker daemon is not reachable: {}", e);
        e
    })?;
    info!("Connected to Docker");

    let sandbox = CodeSandbox::new(Arc::new(engine), config);

    let max_concurrent = std::env::var("CRUCIBLE_MAX_CONCURRENT")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_CONCURRENT);

    // Connect to Redis
    let redis_url = std::env::var("REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let client = ::redis::Client::open(redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client).await?;

    info!("Connected to Redis: {}", redis_url);
    info!(max_concurrent, "Ready to accept submissions");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install CTRL+C handler: {}", e);
            return;
        }
        warn!("Received shutdown signal, cancelling in-flight submissions...");
        trigger.cancel();
    });

    worker_loop(redis_conn, sandbox, max_concurrent, shutdown).await;

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all, fields(max_concurrent = max_concurrent))]
async fn worker_loop(
    mut redis_conn: ::redis::aio::ConnectionManager,
    sandbox: CodeSandbox,
    max_concurrent: usize,
    shutdown: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));
    let mut in_flight = JoinSet::new();

    loop {
        // Reap finished tasks so the set does not grow unbounded
        while in_flight.try_join_next().is_some() {}

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        // BLPOP with 5 second timeout so shutdown is noticed promptly.
        // Not raced against shutdown: a dropped BLPOP can lose a popped job.
        let popped = redis::pop_job(&mut redis_conn, 5.0).await;

        if shutdown.is_cancelled() {
            if let Ok(Some(job)) = popped {
                match redis::push_job(&mut redis_conn, &job).await {
                    Ok(()) => info!(job_id = %job.id, "Requeued submission on shutdown"),
                    Err(e) => error!(job_id = %job.id, error = %e, "Failed to requeue submission"),
                }
            }
            break;
        }

        match popped {
            Ok(Some(job)) => {
                info!(
                    job_id = %job.id,
                    user_id = %job.user_id,
                    language = %job.language,
                    source_size = job.user_code.len(),
                    "Received submission"
                );

                let sandbox = sandbox.clone();
                let mut conn = redis_conn.clone();
                let cancel = shutdown.child_token();

                in_flight.spawn(async move {
                    let _permit = permit;
                    let start = std::time::Instant::now();

                    let Some(record) = executor::execute_submission(&job, &sandbox, &cancel).await else {
                        if let Err(e) = redis::push_job(&mut conn, &job).await {
                            error!(job_id = %job.id, error = %e, "Failed to requeue cancelled submission");
                        }
                        return;
                    };

                    debug!(
                        job_id = %job.id,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Submission round trip"
                    );

                    match redis::store_record(&mut conn, &record).await {
                        Ok(()) => info!(job_id = %job.id, "Result persisted to Redis"),
                        // Non-fatal - worker continues
                        Err(e) => error!(job_id = %job.id, error = %e, "Failed to persist result"),
                    }
                });
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }

    info!(in_flight = in_flight.len(), "Draining in-flight submissions");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Submission task panicked");
        }
    }
}
