//! Sandbox Lifecycle Controller
//!
//! **Core Responsibility:**
//! Keep at most one execution environment per (user, language) and run
//! commands against it.
//!
//! **Provisioning:**
//! Each key owns a slot. The first caller for an absent (or failed) key
//! spawns one provisioning task and parks a shared future in the slot;
//! every later caller awaits that same future, so N concurrent requests
//! cause one creation and all observe the same handle or the same error.
//! The map lock is only held to read or swap a slot, never across
//! provisioning or execution, so unrelated keys proceed in parallel.
//!
//! **State machine per key:**
//! `Absent -> Creating -> {Ready, Failed}`, `Failed -> Creating` on the next
//! request, `Ready -> Absent` only through `teardown` or when the runtime
//! reports the environment gone.

pub mod commands;
pub mod docker;
pub mod runtime;

#[cfg(test)]
pub mod fake;

use crate::config::LanguageConfigManager;
use crate::error::{Result, WorkspaceError};
use crate::metrics;
use crate::workspace::{
    create_dir_inside, normalize_relative, to_container_path, write_new_file, WorkspaceStore,
    SCRATCH_DIR,
};
use chrono::{DateTime, Utc};
use commands::{CommandSpec, TIMEOUT_EXIT_CODE};
use devspace_common::types::{EnvironmentKey, ExecutionOutput, Language, RunRequest};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use runtime::{EnvironmentSpec, RuntimeError, SandboxRuntime};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Slack on top of the in-environment timeout before the controller stops
/// waiting on its own
const DEFAULT_DEADLINE_GRACE: Duration = Duration::from_millis(500);

type Provisioning = Shared<BoxFuture<'static, Result<String>>>;
type Slots = Arc<Mutex<HashMap<EnvironmentKey, Slot>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentState {
    Creating,
    Ready,
    Failed,
}

/// A Ready environment
#[derive(Debug, Clone)]
pub struct ExecutionEnvironment {
    pub handle: String,
    pub language: Language,
    pub mount_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

enum Slot {
    Creating {
        generation: u64,
        provisioning: Provisioning,
    },
    Ready(ExecutionEnvironment),
    Failed {
        error: WorkspaceError,
        at: DateTime<Utc>,
    },
}

impl Slot {
    fn state(&self) -> EnvironmentState {
        match self {
            Slot::Creating { .. } => EnvironmentState::Creating,
            Slot::Ready(_) => EnvironmentState::Ready,
            Slot::Failed { .. } => EnvironmentState::Failed,
        }
    }
}

/// Listing entry for the admin endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub user_id: String,
    pub language: Language,
    pub state: EnvironmentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SandboxController {
    runtime: Arc<dyn SandboxRuntime>,
    store: WorkspaceStore,
    languages: LanguageConfigManager,
    run_timeout: Duration,
    deadline_grace: Duration,
    slots: Slots,
    next_generation: AtomicU64,
}

impl SandboxController {
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        store: WorkspaceStore,
        languages: LanguageConfigManager,
        run_timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            store,
            languages,
            run_timeout,
            deadline_grace: DEFAULT_DEADLINE_GRACE,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn with_deadline_grace(mut self, grace: Duration) -> Self {
        self.deadline_grace = grace;
        self
    }

    pub fn run_timeout(&self) -> Duration {
        self.run_timeout
    }

    /// Return the Ready handle for `key`, provisioning it if needed.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn ensure_environment(&self, key: &EnvironmentKey) -> Result<String> {
        let provisioning = {
            let mut slots = self.slots.lock().await;
            match slots.get(key) {
                Some(Slot::Ready(env)) => return Ok(env.handle.clone()),
                Some(Slot::Creating { provisioning, .. }) => {
                    debug!("Waiting on in-flight provisioning");
                    provisioning.clone()
                }
                Some(Slot::Failed { .. }) | None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let provisioning = self.start_provisioning(key.clone(), generation)?;
                    slots.insert(
                        key.clone(),
                        Slot::Creating {
                            generation,
                            provisioning: provisioning.clone(),
                        },
                    );
                    provisioning
                }
            }
        };
        provisioning.await
    }

    /// Spawn the provisioning task for `key`. Must be called with the slot
    /// map locked so the task cannot settle before its Creating slot exists.
    fn start_provisioning(&self, key: EnvironmentKey, generation: u64) -> Result<Provisioning> {
        let spec = self.environment_spec(&key)?;
        let runtime = Arc::clone(&self.runtime);
        let store = self.store.clone();
        let slots = Arc::clone(&self.slots);

        info!(key = %key, image = %spec.image, runtime = runtime.name(), "Provisioning environment");

        let task_key = key.clone();
        let task_slots = Arc::clone(&slots);
        let task = tokio::spawn(async move {
            let result = provision(runtime.as_ref(), &store, &task_key, spec).await;
            settle(&task_slots, &task_key, generation, &result).await;
            result.map(|env| env.handle)
        });

        let provisioning = async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    let err = WorkspaceError::EnvironmentCreationFailed {
                        language: key.language.to_string(),
                        message: format!("provisioning task failed: {}", join_error),
                    };
                    settle(&slots, &key, generation, &Err(err.clone())).await;
                    Err(err)
                }
            }
        };
        Ok(provisioning.boxed().shared())
    }

    fn environment_spec(&self, key: &EnvironmentKey) -> Result<EnvironmentSpec> {
        let host_dir = self.store.user_dir(&key.user_id)?;
        let mut labels = HashMap::new();
        labels.insert("devspace.user".to_string(), key.user_id.clone());
        labels.insert("devspace.language".to_string(), key.language.to_string());

        Ok(EnvironmentSpec {
            name: container_name(key),
            language: key.language,
            image: self.languages.get_image(key.language),
            host_dir,
            memory_limit_bytes: self.languages.get_memory_limit_bytes(key.language),
            nano_cpus: self.languages.get_nano_cpus(key.language),
            labels,
        })
    }

    /// Run the request's entry file in the user's environment for its language.
    ///
    /// A non-zero exit is returned as output; only failures to provision or
    /// to start the command, and timeouts, are errors.
    #[tracing::instrument(
        skip_all,
        fields(user_id = %user_id, language = %request.language, entry = %request.entry_file)
    )]
    pub async fn run(&self, user_id: &str, request: &RunRequest) -> Result<ExecutionOutput> {
        let language: Language = request
            .language
            .parse()
            .map_err(|_| WorkspaceError::UnsupportedLanguage(request.language.clone()))?;

        let started = Instant::now();
        let result = self.run_validated(user_id, language, request).await;
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(output) if output.exit_code == Some(0) => "ok",
            Ok(_) => "nonzero_exit",
            Err(e) => e.kind(),
        };
        metrics::RUNS_TOTAL
            .with_label_values(&[language.as_str(), outcome])
            .inc();
        metrics::RUN_DURATION
            .with_label_values(&[language.as_str()])
            .observe(elapsed.as_secs_f64());

        match &result {
            Ok(output) => info!(
                exit_code = ?output.exit_code,
                output_bytes = output.text.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Run finished"
            ),
            Err(e) => warn!(error = %e, elapsed_ms = elapsed.as_millis() as u64, "Run failed"),
        }
        result
    }

    async fn run_validated(
        &self,
        user_id: &str,
        language: Language,
        request: &RunRequest,
    ) -> Result<ExecutionOutput> {
        let workspace_dir = self.store.user_dir(user_id)?;
        let entry = to_container_path(&normalize_relative(&request.entry_file)?);
        let run_id = Uuid::new_v4().simple().to_string();
        let stdin_name = format!("stdin-{}.txt", run_id);
        let stdin_rel = format!("{}/{}", SCRATCH_DIR, stdin_name);

        let argv = commands::build_argv(&CommandSpec {
            language,
            entry: &entry,
            stdin: &stdin_rel,
            run_id: &run_id,
            timeout: self.run_timeout,
        })?;

        let key = EnvironmentKey::new(user_id, language);
        let input = request.input.as_deref().unwrap_or("");

        // one retry when the environment disappeared under us
        let mut attempt = 0;
        loop {
            attempt += 1;
            let handle = self.ensure_environment(&key).await?;

            let stdin_path = write_scratch(&workspace_dir, &stdin_name, input).await?;
            let result = self.exec_bounded(&handle, &argv).await;
            if let Err(e) = tokio::fs::remove_file(&stdin_path).await {
                debug!(path = %stdin_path.display(), error = %e, "Scratch cleanup failed");
            }

            match result {
                Err(RuntimeError::NotFound(message)) if attempt == 1 => {
                    warn!(handle = %handle, message = %message, "Environment vanished, re-provisioning");
                    self.evict(&key, &handle).await;
                }
                Err(e) => return Err(WorkspaceError::ExecFailed(e.to_string())),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(output)) => return Ok(output),
            }
        }
    }

    /// Outer `Result` carries runtime failures, inner one the run verdict.
    async fn exec_bounded(
        &self,
        handle: &str,
        argv: &[String],
    ) -> std::result::Result<Result<ExecutionOutput>, RuntimeError> {
        let deadline = self.run_timeout + self.deadline_grace;
        let timeout_ms = self.run_timeout.as_millis() as u64;

        match tokio::time::timeout(deadline, self.runtime.exec(handle, argv)).await {
            Err(_) => Ok(Err(WorkspaceError::ExecutionTimeout { timeout_ms })),
            Ok(Err(e)) => Err(e),
            Ok(Ok(outcome)) if outcome.exit_code == Some(TIMEOUT_EXIT_CODE) => {
                Ok(Err(WorkspaceError::ExecutionTimeout { timeout_ms }))
            }
            Ok(Ok(outcome)) => Ok(Ok(ExecutionOutput {
                text: outcome.output,
                exit_code: outcome.exit_code,
            })),
        }
    }

    /// Forget a Ready entry whose container is gone, if it is still `handle`.
    async fn evict(&self, key: &EnvironmentKey, handle: &str) {
        let mut slots = self.slots.lock().await;
        if matches!(slots.get(key), Some(Slot::Ready(env)) if env.handle == handle) {
            slots.remove(key);
        }
    }

    /// External teardown hook: remove the environment and return the key to
    /// Absent. Returns false if nothing was tracked for the key.
    pub async fn teardown(&self, key: &EnvironmentKey) -> Result<bool> {
        let removed = {
            let mut slots = self.slots.lock().await;
            match slots.get(key) {
                None => return Ok(false),
                Some(Slot::Creating { .. }) => {
                    return Err(WorkspaceError::EnvironmentBusy(key.to_string()))
                }
                Some(_) => slots.remove(key),
            }
        };

        if let Some(Slot::Ready(env)) = removed {
            self.runtime
                .remove(&env.handle)
                .await
                .map_err(|e| WorkspaceError::ExecFailed(e.to_string()))?;
            info!(key = %key, handle = %env.handle, "Environment torn down");
        }
        Ok(true)
    }

    pub async fn state(&self, key: &EnvironmentKey) -> Option<EnvironmentState> {
        self.slots.lock().await.get(key).map(Slot::state)
    }

    pub async fn environment(&self, key: &EnvironmentKey) -> Option<ExecutionEnvironment> {
        match self.slots.lock().await.get(key) {
            Some(Slot::Ready(env)) => Some(env.clone()),
            _ => None,
        }
    }

    pub async fn snapshot(&self) -> Vec<EnvironmentInfo> {
        let slots = self.slots.lock().await;
        let mut list: Vec<EnvironmentInfo> = slots
            .iter()
            .map(|(key, slot)| {
                let (handle, created_at, error) = match slot {
                    Slot::Ready(env) => (Some(env.handle.clone()), Some(env.created_at), None),
                    Slot::Failed { error, at } => (None, Some(*at), Some(error.to_string())),
                    Slot::Creating { .. } => (None, None, None),
                };
                EnvironmentInfo {
                    user_id: key.user_id.clone(),
                    language: key.language,
                    state: slot.state(),
                    handle,
                    created_at,
                    error,
                }
            })
            .collect();
        list.sort_by(|a, b| {
            (a.user_id.as_str(), a.language.as_str()).cmp(&(b.user_id.as_str(), b.language.as_str()))
        });
        list
    }
}

/// Deterministic container name; user ids are already restricted to
/// characters Docker accepts.
pub fn container_name(key: &EnvironmentKey) -> String {
    format!("workspace_{}_{}", key.user_id, key.language)
}

async fn provision(
    runtime: &dyn SandboxRuntime,
    store: &WorkspaceStore,
    key: &EnvironmentKey,
    spec: EnvironmentSpec,
) -> Result<ExecutionEnvironment> {
    let started = Instant::now();
    let failed = |message: String| WorkspaceError::EnvironmentCreationFailed {
        language: key.language.to_string(),
        message,
    };

    let result = async {
        let mount_path = store
            .ensure_user_dir(&key.user_id)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let handle = runtime
            .provision(&spec)
            .await
            .map_err(|e| failed(e.to_string()))?;
        Ok::<_, WorkspaceError>(ExecutionEnvironment {
            handle,
            language: key.language,
            mount_path,
            created_at: Utc::now(),
        })
    }
    .await;

    let outcome = if result.is_ok() { "ok" } else { "failed" };
    metrics::ENVIRONMENTS_PROVISIONED
        .with_label_values(&[key.language.as_str(), outcome])
        .inc();

    match &result {
        Ok(env) => info!(
            key = %key,
            handle = %env.handle,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Environment ready"
        ),
        Err(e) => error!(key = %key, error = %e, "Environment provisioning failed"),
    }
    result
}

/// Move the slot out of Creating, unless a newer generation replaced it.
async fn settle(
    slots: &Mutex<HashMap<EnvironmentKey, Slot>>,
    key: &EnvironmentKey,
    generation: u64,
    result: &Result<ExecutionEnvironment>,
) {
    let mut slots = slots.lock().await;
    let current = matches!(
        slots.get(key),
        Some(Slot::Creating { generation: g, .. }) if *g == generation
    );
    if !current {
        return;
    }
    let slot = match result {
        Ok(env) => Slot::Ready(env.clone()),
        Err(error) => Slot::Failed {
            error: error.clone(),
            at: Utc::now(),
        },
    };
    slots.insert(key.clone(), slot);
}

/// Write a run's stdin under the scratch dir without following links.
///
/// The scratch dir is writable by user code, so a symlink or plain file
/// squatting on its name is removed and replaced by a real directory.
async fn write_scratch(workspace_dir: &Path, file_name: &str, input: &str) -> Result<PathBuf> {
    let scratch = workspace_dir.join(SCRATCH_DIR);
    if let Ok(metadata) = tokio::fs::symlink_metadata(&scratch).await {
        if !metadata.is_dir() {
            warn!(path = %scratch.display(), "Replacing non-directory scratch entry");
            tokio::fs::remove_file(&scratch).await?;
        }
    }
    let dir = create_dir_inside(workspace_dir, Path::new(SCRATCH_DIR)).await?;
    let path = dir.join(file_name);
    write_new_file(&path, input).await?;
    Ok(path)
}

#[cfg(test)]
mod tests;
