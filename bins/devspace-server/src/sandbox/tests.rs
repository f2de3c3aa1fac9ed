/// Lifecycle tests for the sandbox controller against the in-memory runtime
///
/// Covered:
/// 1. Single-flight provisioning per (user, language)
/// 2. Shared failure and recovery on the next request
/// 3. Validation before any provisioning
/// 4. Timeouts leave the environment usable
/// 5. Teardown and vanished environments
use super::fake::{interpret, FakeExec, FakeRuntime};
use super::runtime::{ExecOutcome, RuntimeError};
use super::*;
use std::collections::HashSet;

struct Harness {
    _root: tempfile::TempDir,
    store: WorkspaceStore,
    fake: Arc<FakeRuntime>,
    controller: Arc<SandboxController>,
}

async fn harness(fake: FakeRuntime, run_timeout: Duration) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let store = WorkspaceStore::open(root.path()).await.unwrap();
    let fake = fake.into_arc();
    let controller = SandboxController::new(
        fake.clone(),
        store.clone(),
        LanguageConfigManager::builtin(),
        run_timeout,
    )
    .with_deadline_grace(Duration::from_millis(100));
    Harness {
        _root: root,
        store,
        fake,
        controller: Arc::new(controller),
    }
}

fn python_run(entry: &str, input: Option<&str>) -> RunRequest {
    RunRequest {
        language: "python".to_string(),
        entry_file: entry.to_string(),
        input: input.map(str::to_string),
    }
}

async fn write(store: &WorkspaceStore, user: &str, relative: &str, content: &str) {
    let path = store.resolve(user, relative).unwrap();
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(path, content).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_provision_once() {
    let h = harness(
        FakeRuntime::new().with_provision_delay(Duration::from_millis(200)),
        Duration::from_secs(5),
    )
    .await;
    let key = EnvironmentKey::new("u1", Language::Cpp);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let controller = h.controller.clone();
        let key = key.clone();
        tasks.push(tokio::spawn(async move { controller.ensure_environment(&key).await }));
    }

    let mut handles = HashSet::new();
    for task in tasks {
        handles.insert(task.await.unwrap().unwrap());
    }

    assert_eq!(h.fake.provisions(), 1);
    assert_eq!(handles.len(), 1);
    assert_eq!(h.controller.state(&key).await, Some(EnvironmentState::Ready));
}

#[tokio::test]
async fn test_ready_environment_is_reused() {
    let h = harness(FakeRuntime::new(), Duration::from_secs(5)).await;
    let key = EnvironmentKey::new("u1", Language::Python);

    let first = h.controller.ensure_environment(&key).await.unwrap();
    let second = h.controller.ensure_environment(&key).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.fake.provisions(), 1);

    let env = h.controller.environment(&key).await.unwrap();
    assert_eq!(env.handle, first);
    assert_eq!(env.mount_path, h.store.user_dir("u1").unwrap());
}

#[tokio::test]
async fn test_failure_is_shared_then_retried() {
    let h = harness(
        FakeRuntime::new()
            .with_provision_delay(Duration::from_millis(100))
            .failing_provisions(1),
        Duration::from_secs(5),
    )
    .await;
    let key = EnvironmentKey::new("u1", Language::Java);

    let (a, b) = tokio::join!(
        h.controller.ensure_environment(&key),
        h.controller.ensure_environment(&key)
    );
    let a = a.unwrap_err();
    assert!(matches!(a, WorkspaceError::EnvironmentCreationFailed { .. }));
    assert_eq!(Some(a), b.err());
    assert_eq!(h.fake.provisions(), 1);
    assert_eq!(h.controller.state(&key).await, Some(EnvironmentState::Failed));

    // a later request starts a fresh attempt
    h.controller.ensure_environment(&key).await.unwrap();
    assert_eq!(h.fake.provisions(), 2);
    assert_eq!(h.controller.state(&key).await, Some(EnvironmentState::Ready));
}

#[tokio::test]
async fn test_unrelated_keys_provision_in_parallel() {
    let h = harness(
        FakeRuntime::new().with_provision_delay(Duration::from_millis(300)),
        Duration::from_secs(5),
    )
    .await;
    let py = EnvironmentKey::new("u1", Language::Python);
    let go = EnvironmentKey::new("u2", Language::Go);

    let started = Instant::now();
    let (a, b) = tokio::join!(
        h.controller.ensure_environment(&py),
        h.controller.ensure_environment(&go)
    );
    assert_ne!(a.unwrap(), b.unwrap());
    assert_eq!(h.fake.provisions(), 2);
    assert!(started.elapsed() < Duration::from_millis(550));
}

#[tokio::test]
async fn test_run_returns_program_output() {
    let h = harness(FakeRuntime::new(), Duration::from_secs(5)).await;
    write(&h.store, "u1", "main.py", "print(1)").await;

    let output = h.controller.run("u1", &python_run("main.py", None)).await.unwrap();
    assert_eq!(output.text, "1\n");
    assert_eq!(output.exit_code, Some(0));
}

#[tokio::test]
async fn test_run_feeds_input_and_cleans_scratch() {
    let h = harness(FakeRuntime::new(), Duration::from_secs(5)).await;
    write(&h.store, "u1", "src/echo.py", "print(input())").await;

    let output = h
        .controller
        .run("u1", &python_run("src/echo.py", Some("hello\n")))
        .await
        .unwrap();
    assert_eq!(output.text, "hello\n");

    let scratch = h.store.user_dir("u1").unwrap().join(SCRATCH_DIR);
    let mut entries = tokio::fs::read_dir(&scratch).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlinked_scratch_dir_is_replaced() {
    let h = harness(FakeRuntime::new(), Duration::from_secs(5)).await;
    write(&h.store, "u1", "echo.py", "print(input())").await;
    let outside = tempfile::tempdir().unwrap();
    let scratch = h.store.user_dir("u1").unwrap().join(SCRATCH_DIR);
    std::os::unix::fs::symlink(outside.path(), &scratch).unwrap();

    let output = h
        .controller
        .run("u1", &python_run("echo.py", Some("pwned\n")))
        .await
        .unwrap();
    assert_eq!(output.text, "pwned\n");

    let mut entries = tokio::fs::read_dir(outside.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
    let metadata = tokio::fs::symlink_metadata(&scratch).await.unwrap();
    assert!(metadata.is_dir() && !metadata.file_type().is_symlink());
}

#[tokio::test]
async fn test_nonzero_exit_is_output_not_error() {
    let h = harness(FakeRuntime::new(), Duration::from_secs(5)).await;
    write(&h.store, "u1", "main.py", "print(oops)\nexit(3)").await;

    let output = h.controller.run("u1", &python_run("main.py", None)).await.unwrap();
    assert_eq!(output.text, "oops\n");
    assert_eq!(output.exit_code, Some(3));
}

#[tokio::test]
async fn test_unsupported_language_never_provisions() {
    let h = harness(FakeRuntime::new(), Duration::from_secs(5)).await;
    let request = RunRequest {
        language: "cobol".to_string(),
        entry_file: "main.cbl".to_string(),
        input: None,
    };

    let err = h.controller.run("u1", &request).await.unwrap_err();
    assert_eq!(err, WorkspaceError::UnsupportedLanguage("cobol".to_string()));
    assert_eq!(h.fake.provisions(), 0);
    assert!(h.controller.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_traversal_entry_never_provisions() {
    let h = harness(FakeRuntime::new(), Duration::from_secs(5)).await;
    let err = h
        .controller
        .run("u1", &python_run("../../etc/passwd", None))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::InvalidPath(_)));

    let err = h.controller.run("", &python_run("main.py", None)).await.unwrap_err();
    assert!(matches!(err, WorkspaceError::InvalidUser(_)));
    assert_eq!(h.fake.provisions(), 0);
}

#[tokio::test]
async fn test_hung_program_times_out_and_environment_survives() {
    let fake = FakeRuntime::new().with_responder(|call| {
        let hang = call
            .entry_source
            .as_deref()
            .map_or(false, |s| s.contains("while True"));
        FakeExec {
            delay: if hang { Duration::from_secs(5) } else { Duration::ZERO },
            result: Ok(interpret(call)),
        }
    });
    let h = harness(fake, Duration::from_millis(200)).await;
    write(&h.store, "u1", "spin.py", "while True: pass").await;
    write(&h.store, "u1", "main.py", "print(ok)").await;

    let started = Instant::now();
    let err = h.controller.run("u1", &python_run("spin.py", None)).await.unwrap_err();
    assert_eq!(err, WorkspaceError::ExecutionTimeout { timeout_ms: 200 });
    assert!(started.elapsed() < Duration::from_secs(2));

    let key = EnvironmentKey::new("u1", Language::Python);
    assert_eq!(h.controller.state(&key).await, Some(EnvironmentState::Ready));

    let output = h.controller.run("u1", &python_run("main.py", None)).await.unwrap();
    assert_eq!(output.text, "ok\n");
    assert_eq!(h.fake.provisions(), 1);
}

#[tokio::test]
async fn test_timeout_exit_status_is_reported_as_timeout() {
    let fake = FakeRuntime::new().with_responder(|_| FakeExec {
        delay: Duration::ZERO,
        result: Ok(ExecOutcome {
            output: String::new(),
            exit_code: Some(124),
        }),
    });
    let h = harness(fake, Duration::from_millis(1500)).await;

    let err = h.controller.run("u1", &python_run("main.py", None)).await.unwrap_err();
    assert_eq!(err, WorkspaceError::ExecutionTimeout { timeout_ms: 1500 });
}

#[tokio::test]
async fn test_vanished_environment_is_reprovisioned() {
    let h = harness(FakeRuntime::new(), Duration::from_secs(5)).await;
    write(&h.store, "u1", "main.py", "print(1)").await;
    let key = EnvironmentKey::new("u1", Language::Python);

    let first = h.controller.ensure_environment(&key).await.unwrap();
    h.fake.forget(&first);

    let output = h.controller.run("u1", &python_run("main.py", None)).await.unwrap();
    assert_eq!(output.text, "1\n");
    assert_eq!(h.fake.provisions(), 2);
    assert_ne!(h.controller.environment(&key).await.unwrap().handle, first);
}

#[tokio::test]
async fn test_runtime_exec_failure_is_exec_error() {
    let fake = FakeRuntime::new().with_responder(|_| FakeExec {
        delay: Duration::ZERO,
        result: Err(RuntimeError::Unavailable("daemon went away".to_string())),
    });
    let h = harness(fake, Duration::from_secs(5)).await;

    let err = h.controller.run("u1", &python_run("main.py", None)).await.unwrap_err();
    assert!(matches!(err, WorkspaceError::ExecFailed(_)));
}

#[tokio::test]
async fn test_teardown_returns_key_to_absent() {
    let h = harness(FakeRuntime::new(), Duration::from_secs(5)).await;
    let key = EnvironmentKey::new("u1", Language::Go);

    assert!(!h.controller.teardown(&key).await.unwrap());

    let handle = h.controller.ensure_environment(&key).await.unwrap();
    assert!(h.controller.teardown(&key).await.unwrap());
    assert_eq!(h.controller.state(&key).await, None);
    assert_eq!(h.fake.removed(), vec![handle]);

    h.controller.ensure_environment(&key).await.unwrap();
    assert_eq!(h.fake.provisions(), 2);
}

#[tokio::test]
async fn test_teardown_while_creating_is_busy() {
    let h = harness(
        FakeRuntime::new().with_provision_delay(Duration::from_millis(300)),
        Duration::from_secs(5),
    )
    .await;
    let key = EnvironmentKey::new("u1", Language::Python);

    let controller = h.controller.clone();
    let pending_key = key.clone();
    let pending = tokio::spawn(async move { controller.ensure_environment(&pending_key).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = h.controller.teardown(&key).await.unwrap_err();
    assert_eq!(err, WorkspaceError::EnvironmentBusy(key.to_string()));
    assert_eq!(err.kind(), "busy");

    pending.await.unwrap().unwrap();
    assert!(h.controller.teardown(&key).await.unwrap());
}

#[tokio::test]
async fn test_snapshot_lists_environments_sorted() {
    let h = harness(FakeRuntime::new(), Duration::from_secs(5)).await;
    h.controller
        .ensure_environment(&EnvironmentKey::new("u2", Language::Python))
        .await
        .unwrap();
    h.controller
        .ensure_environment(&EnvironmentKey::new("u1", Language::Java))
        .await
        .unwrap();

    let list = h.controller.snapshot().await;
    let keys: Vec<(&str, Language)> = list.iter().map(|e| (e.user_id.as_str(), e.language)).collect();
    assert_eq!(keys, vec![("u1", Language::Java), ("u2", Language::Python)]);
    assert!(list.iter().all(|e| e.state == EnvironmentState::Ready && e.handle.is_some()));
}

#[test]
fn test_container_name_is_deterministic() {
    let key = EnvironmentKey::new("u1", Language::Javascript);
    assert_eq!(container_name(&key), "workspace_u1_javascript");
}
