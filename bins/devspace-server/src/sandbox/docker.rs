//! Docker-backed sandbox runtime
//!
//! **Environment Rules:**
//! 1. One long-lived container per (user, language), named deterministically
//! 2. An existing container with that name is adopted (started if stopped)
//! 3. Image pulled on first use if not cached
//! 4. User workspace bind-mounted at /workspace, network disabled,
//!    memory/CPU limits from languages.json
//! 5. Commands run through `docker exec`, output captured from the attached
//!    stream in arrival order
//!
//! Teardown is never triggered from here on its own; see `remove`.

use super::runtime::{EnvironmentSpec, ExecOutcome, RuntimeError, SandboxRuntime, MOUNT_PATH};
use anyhow::Context;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self { docker })
    }

    /// Verify the daemon answers, used at startup
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(map_err)?;
        Ok(())
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| RuntimeError::Failed(format!("pull {}: {}", image, e)))?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    /// Returns the id of a container named `name` after making sure it runs,
    /// or `None` if no such container exists.
    async fn adopt_existing(&self, name: &str) -> Result<Option<String>, RuntimeError> {
        let inspect = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(map_err(e)),
        };

        let id = inspect.id.unwrap_or_else(|| name.to_string());
        let running = inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false);

        if !running {
            info!(container = %name, "Starting stopped environment");
            self.docker
                .start_container(&id, None::<StartContainerOptions<String>>)
                .await
                .map_err(map_err)?;
        } else {
            debug!(container = %name, "Adopting running environment");
        }
        Ok(Some(id))
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<String, RuntimeError> {
        if let Some(id) = self.adopt_existing(&spec.name).await? {
            return Ok(id);
        }

        self.ensure_image(&spec.image).await?;

        let config = Config {
            image: Some(spec.image.clone()),
            // keep the container alive; work happens through exec
            entrypoint: Some(vec!["sleep".to_string()]),
            cmd: Some(vec!["infinity".to_string()]),
            working_dir: Some(MOUNT_PATH.to_string()),
            labels: Some(spec.labels.clone()),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![format!("{}:{}", spec.host_dir.display(), MOUNT_PATH)]),
                memory: Some(spec.memory_limit_bytes),
                nano_cpus: Some(spec.nano_cpus),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(map_err)?;

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            // leave nothing half-made behind for the retry
            let _ = self.remove(&container.id).await;
            return Err(map_err(e));
        }

        info!(
            container = %spec.name,
            id = %container.id,
            image = %spec.image,
            "Environment container started"
        );
        Ok(container.id)
    }

    async fn exec(&self, handle: &str, argv: &[String]) -> Result<ExecOutcome, RuntimeError> {
        let exec_config = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(MOUNT_PATH.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(handle, exec_config)
            .await
            .map_err(map_err)?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let mut output = String::new();
        match self
            .docker
            .start_exec(&exec.id, Some(start_config))
            .await
            .map_err(map_err)?
        {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message })
                        | Ok(LogOutput::StdErr { message })
                        | Ok(LogOutput::Console { message }) => {
                            output.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdIn { .. }) => {}
                        Err(e) => {
                            output.push_str(&format!("\n[output stream error: {}]", e));
                            break;
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(RuntimeError::Failed("exec started detached".to_string()));
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await.map_err(map_err)?;
        Ok(ExecOutcome {
            output,
            exit_code: inspect.exit_code,
        })
    }

    async fn remove(&self, handle: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(handle, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    fn name(&self) -> &str {
        "docker"
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code: 404, .. }
    )
}

fn map_err(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        // 409 on exec: the container exists but is not running
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError { message, .. } => RuntimeError::Failed(message),
        BollardError::IOError { err } => RuntimeError::Unavailable(err.to_string()),
        other => RuntimeError::Failed(other.to_string()),
    }
}
