/// Execution Orchestrator - one bounded container run per submission
///
/// **Core Responsibility:**
/// Turn a prepared workspace into exactly one container run and report how
/// it exited. The orchestrator never reads the workspace; interpreting what
/// the harness left behind is the interpreter's job.
///
/// **Container policy (fixed, never per request):**
/// - Workspace bind-mounted read-write at `/sandbox`, which is also the workdir
/// - Memory and memory+swap capped to the same value
/// - CPU shares and PID count capped
/// - Networking disabled
/// - Auto-removed on exit, never reused
///
/// **Runtime contract:**
/// The request's deadline bounds the wait for exit only; image pulls and
/// container creation are not charged to the submission. Dropping a `run`
/// future before it resolves must not leave a container behind.

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::harness;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything the runtime needs to launch one submission
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    pub submission_id: Uuid,
    pub image: String,
    /// Host path of the prepared workspace
    pub workspace: PathBuf,
    /// Limit on the wait for exit, measured from container start
    pub deadline: Duration,
}

/// How the container ended. `status_code` is `None` when the engine had
/// already reaped the container before its status could be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerExit {
    pub status_code: Option<i64>,
}

impl ContainerExit {
    pub fn with_status(status_code: i64) -> Self {
        Self {
            status_code: Some(status_code),
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status_code, Some(0) | None)
    }
}

/// Any engine that can create, start and wait on a one-shot container.
///
/// Implementations bound the wait (and only the wait) by `request.deadline`,
/// returning `SandboxError::DeadlineExceeded` on expiry.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn run(
        &self,
        request: &ContainerRequest,
        cancel: &CancellationToken,
    ) -> Result<ContainerExit>;
}

/// Bound a container wait by `deadline`
pub async fn wait_within<F>(deadline: Duration, wait: F) -> Result<ContainerExit>
where
    F: Future<Output = Result<ContainerExit>>,
{
    tokio::time::timeout(deadline, wait)
        .await
        .map_err(|_| SandboxError::DeadlineExceeded(deadline))?
}

/// Force-removes the container if the run is abandoned before it exits.
///
/// Auto-remove already reaps the container once it stops; this covers the
/// window where it is still running when the caller walks away.
struct ContainerGuard {
    docker: Docker,
    container_id: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: &Docker, container_id: String) -> Self {
        Self {
            docker: docker.clone(),
            container_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(container_id = %self.container_id, "No runtime available to remove abandoned container");
            return;
        };

        let docker = self.docker.clone();
        let container_id = self.container_id.clone();
        handle.spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            match docker.remove_container(&container_id, Some(options)).await {
                Ok(()) => debug!(container_id = %container_id, "Abandoned container removed"),
                // Auto-remove got there first
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
                Err(e) => warn!(container_id = %container_id, error = %e, "Failed to remove abandoned container"),
            }
        });
    }
}

/// Docker-backed runtime. One instance is shared by every concurrent
/// submission; the underlying client is cheap to clone and thread-safe.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
    config: SandboxConfig,
}

impl DockerEngine {
    /// Connect to the local Docker daemon (socket or DOCKER_HOST)
    pub fn connect(config: &SandboxConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self::with_client(docker, config))
    }

    pub fn with_client(docker: Docker, config: &SandboxConfig) -> Self {
        Self {
            docker,
            config: config.clone(),
        }
    }

    /// Round-trip to the daemon, for health checks
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    /// Whether `image` is present in the local image cache
    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Pull `image` when it is not cached
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_exists(image).await? {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    /// Container configuration for one submission
    pub(crate) fn container_config(&self, request: &ContainerRequest) -> Config<String> {
        let memory = self.config.memory_limit_bytes();

        Config {
            image: Some(request.image.clone()),
            cmd: Some(harness::harness_args()),
            working_dir: Some(harness::CONTAINER_WORKSPACE.to_string()),
            network_disabled: Some(true),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            labels: Some(HashMap::from([(
                "crucible.submission".to_string(),
                request.submission_id.to_string(),
            )])),
            host_config: Some(HostConfig {
                binds: Some(vec![harness::workspace_bind(&request.workspace)]),
                memory: Some(memory),
                memory_swap: Some(memory),
                cpu_shares: Some(self.config.cpu_shares as i64),
                pids_limit: Some(self.config.pids_limit as i64),
                network_mode: Some("none".to_string()),
                auto_remove: Some(true),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Block until the container stops, returning its exit status
    async fn wait_for_exit(&self, container_id: &str) -> Result<ContainerExit> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(container_id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(ContainerExit::with_status(response.status_code)),
            // bollard reports a non-zero exit status as an error
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                Ok(ContainerExit::with_status(code))
            }
            // Exited and auto-removed before the wait was registered
            Some(Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }))
            | None => Ok(ContainerExit { status_code: None }),
            Some(Err(e)) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(submission_id = %request.submission_id, image = %request.image)
    )]
    async fn run(
        &self,
        request: &ContainerRequest,
        cancel: &CancellationToken,
    ) -> Result<ContainerExit> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        if self.config.pull_images {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
                pulled = self.ensure_image(&request.image) => pulled?,
            }
        }

        let create_options = CreateContainerOptions {
            name: format!("crucible-{}", request.submission_id),
            platform: None,
        };
        let config = self.container_config(request);

        let container = tokio::select! {
            _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            created = self.docker.create_container(Some(create_options), config) => created?,
        };
        let container_id = container.id;

        // From here on nothing may return without the guard in scope
        let mut guard = ContainerGuard::new(&self.docker, container_id.clone());

        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        let start_time = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await?;

        debug!(container_id = %container_id, "Container started");

        let exit = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(container_id = %container_id, "Cancelled while waiting for container");
                return Err(SandboxError::Cancelled);
            }
            exit = wait_within(request.deadline, self.wait_for_exit(&container_id)) => exit,
        };

        let exit = match exit {
            Ok(exit) => exit,
            Err(e @ SandboxError::DeadlineExceeded(_)) => {
                warn!(container_id = %container_id, "Container exceeded its deadline, removing");
                return Err(e);
            }
            Err(e) => {
                error!(container_id = %container_id, error = %e, "Failed waiting for container");
                return Err(e);
            }
        };

        // Stopped containers are reaped by auto-remove
        guard.disarm();

        info!(
            container_id = %container_id,
            status_code = ?exit.status_code,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Container exited"
        );

        Ok(exit)
    }
}
