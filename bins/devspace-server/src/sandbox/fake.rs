// In-memory runtime for tests: counts provisions and answers exec calls
// from a scripted responder instead of a container.
use super::runtime::{EnvironmentSpec, ExecOutcome, RuntimeError, SandboxRuntime};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the fake sees of one exec call
#[derive(Debug, Clone)]
pub struct ExecCall {
    pub handle: String,
    pub argv: Vec<String>,
    /// Entry file contents read from the host workspace at exec time
    pub entry_source: Option<String>,
    pub stdin: Option<String>,
}

pub struct FakeExec {
    pub delay: Duration,
    pub result: Result<ExecOutcome, RuntimeError>,
}

type Responder = dyn Fn(&ExecCall) -> FakeExec + Send + Sync;

pub struct FakeRuntime {
    provisions: AtomicUsize,
    provision_delay: Duration,
    failures_left: AtomicUsize,
    responder: Box<Responder>,
    host_dirs: Mutex<HashMap<String, PathBuf>>,
    removed: Mutex<Vec<String>>,
    calls: Mutex<Vec<ExecCall>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            provisions: AtomicUsize::new(0),
            provision_delay: Duration::from_millis(50),
            failures_left: AtomicUsize::new(0),
            responder: Box::new(|call| FakeExec {
                delay: Duration::ZERO,
                result: Ok(interpret(call)),
            }),
            host_dirs: Mutex::new(HashMap::new()),
            removed: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_provision_delay(mut self, delay: Duration) -> Self {
        self.provision_delay = delay;
        self
    }

    /// Make the next `n` provisions fail
    pub fn failing_provisions(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&ExecCall) -> FakeExec + Send + Sync + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<ExecCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Simulate the container disappearing behind the controller's back
    pub fn forget(&self, handle: &str) {
        self.host_dirs.lock().unwrap().remove(handle);
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<String, RuntimeError> {
        let n = self.provisions.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.provision_delay).await;

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            return Err(RuntimeError::Failed(format!("image {} not available", spec.image)));
        }

        let handle = format!("{}-{}", spec.name, n);
        self.host_dirs
            .lock()
            .unwrap()
            .insert(handle.clone(), spec.host_dir.clone());
        Ok(handle)
    }

    async fn exec(&self, handle: &str, argv: &[String]) -> Result<ExecOutcome, RuntimeError> {
        let host_dir = self
            .host_dirs
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {}", handle)))?;

        // argv layout: timeout -k N T sh -c SCRIPT NAME ENTRY STDIN BUILD [CLASS]
        let read = |arg: Option<&String>| {
            arg.and_then(|p| std::fs::read_to_string(host_dir.join(p.trim_start_matches("./"))).ok())
        };
        let call = ExecCall {
            handle: handle.to_string(),
            argv: argv.to_vec(),
            entry_source: read(argv.get(8)),
            stdin: read(argv.get(9)),
        };
        self.calls.lock().unwrap().push(call.clone());

        let FakeExec { delay, result } = (self.responder)(&call);
        tokio::time::sleep(delay).await;
        result
    }

    async fn remove(&self, handle: &str) -> Result<(), RuntimeError> {
        self.host_dirs.lock().unwrap().remove(handle);
        self.removed.lock().unwrap().push(handle.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Just enough of Python to drive tests: `print(<literal>)`,
/// `print(input())` and `exit(<code>)`, one statement per line.
pub fn interpret(call: &ExecCall) -> ExecOutcome {
    let source = call.entry_source.clone().unwrap_or_default();
    let mut stdin_lines = call.stdin.as_deref().unwrap_or("").lines();
    let mut output = String::new();

    for line in source.lines().map(str::trim) {
        if let Some(arg) = line.strip_prefix("print(").and_then(|r| r.strip_suffix(')')) {
            if arg == "input()" {
                output.push_str(stdin_lines.next().unwrap_or(""));
            } else {
                output.push_str(arg.trim_matches(|c| c == '"' || c == '\''));
            }
            output.push('\n');
        } else if let Some(code) = line.strip_prefix("exit(").and_then(|r| r.strip_suffix(')')) {
            return ExecOutcome {
                output,
                exit_code: code.parse().ok(),
            };
        }
    }

    if call.entry_source.is_none() {
        return ExecOutcome {
            output: "No such file or directory\n".to_string(),
            exit_code: Some(2),
        };
    }
    ExecOutcome {
        output,
        exit_code: Some(0),
    }
}
