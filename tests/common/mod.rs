//! Shared fakes for integration tests
//!
//! `MemoryRuntime` keeps each sandbox's files in a map and understands the
//! transfer helper scripts, so the real `Sandbox` and `Dispatcher` code runs
//! unchanged on top of it. `ScriptedBackend` replays canned replies.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sandfix::reasoning::{BackendError, ReasoningBackend, ReasoningRequest};
use sandfix::sandbox::transfer::{self, APPEND_SCRIPT, LIST_SCRIPT, READ_SCRIPT, WRITE_SCRIPT};
use sandfix::sandbox::{ContainerRuntime, ExecOutput, RuntimeError, Sandbox, SandboxSpec};
use sandfix::task::TaskSpec;

pub type Files = BTreeMap<String, Vec<u8>>;

/// Runs a shell command against a sandbox's files
pub type CommandHandler = Arc<dyn Fn(&str, &Files) -> ExecOutput + Send + Sync>;

/// Output of the cart test: passes once `calculate_price` multiplies
pub fn cart_test(_command: &str, files: &Files) -> ExecOutput {
    let utils = files
        .get("/app/utils.py")
        .map(|b| String::from_utf8_lossy(b).to_string())
        .unwrap_or_default();
    let fixed = utils.contains("price * quantity") || utils.contains("p*q") || utils.contains("p * q");
    if fixed {
        ExecOutput {
            stdout: "SUCCESS: Cart total is correct.\n".to_string(),
            exit_code: 0,
            ..Default::default()
        }
    } else {
        ExecOutput {
            stdout: "FAIL: Expected 20, got 8\n".to_string(),
            exit_code: 1,
            ..Default::default()
        }
    }
}

/// In-memory `ContainerRuntime`
pub struct MemoryRuntime {
    sandboxes: Mutex<HashMap<String, Files>>,
    handler: CommandHandler,
    next_id: AtomicUsize,
    pub creates: AtomicUsize,
    pub destroys: AtomicUsize,
    pub execs: AtomicUsize,
    /// Commands run through `sh -c <cmd>`, in order
    pub commands: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    fail_destroy: AtomicBool,
    gone: AtomicBool,
    commands_gone: AtomicBool,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::with_handler(Arc::new(cart_test))
    }

    pub fn with_handler(handler: CommandHandler) -> Self {
        Self {
            sandboxes: Mutex::new(HashMap::new()),
            handler,
            next_id: AtomicUsize::new(1),
            creates: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            execs: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            fail_destroy: AtomicBool::new(false),
            gone: AtomicBool::new(false),
            commands_gone: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `create` fail
    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Make every `destroy` fail (the call is still counted)
    pub fn fail_destroy(&self) {
        self.fail_destroy.store(true, Ordering::SeqCst);
    }

    /// Let the transfer helpers through but report plain commands as gone
    pub fn lose_commands(&self) {
        self.commands_gone.store(true, Ordering::SeqCst);
    }

    /// Make every subsequent `exec` report the container as gone
    pub fn disappear(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }

    /// Snapshot of a sandbox's files
    pub fn files(&self, id: &str) -> Option<Files> {
        self.sandboxes.lock().unwrap().get(id).cloned()
    }

    pub fn file(&self, id: &str, path: &str) -> Option<String> {
        self.files(id)
            .and_then(|f| f.get(path).cloned())
            .map(|b| String::from_utf8_lossy(&b).to_string())
    }

    pub fn live(&self) -> usize {
        self.sandboxes.lock().unwrap().len()
    }

    pub fn exec_count(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    fn run(&self, files: &mut Files, argv: &[String]) -> ExecOutput {
        match argv {
            [sh, c, script, name, params @ ..] if sh == "sh" && c == "-c" && name == transfer::HELPER_NAME => {
                run_helper(files, script, params)
            }
            [sh, c, command] if sh == "sh" && c == "-c" => {
                self.commands.lock().unwrap().push(command.clone());
                (self.handler)(command, files)
            }
            other => ExecOutput {
                stderr: format!("unsupported argv: {:?}", other),
                exit_code: 127,
                ..Default::default()
            },
        }
    }
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn run_helper(files: &mut Files, script: &str, params: &[String]) -> ExecOutput {
    let ok = |stdout: String| ExecOutput {
        stdout,
        exit_code: 0,
        ..Default::default()
    };
    let missing = || ExecOutput {
        exit_code: transfer::MISSING_PATH_EXIT,
        ..Default::default()
    };

    match (script, params) {
        (s, [path, payload]) if s == WRITE_SCRIPT || s == APPEND_SCRIPT => {
            let bytes = match transfer::decode_chunk(payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    return ExecOutput {
                        stderr: format!("base64: {}", e),
                        exit_code: 1,
                        ..Default::default()
                    }
                }
            };
            let entry = files.entry(path.clone()).or_default();
            if s == WRITE_SCRIPT {
                *entry = bytes;
            } else {
                entry.extend_from_slice(&bytes);
            }
            ok(String::new())
        }
        (s, [path]) if s == READ_SCRIPT => match files.get(path) {
            Some(bytes) => ok(String::from_utf8_lossy(bytes).to_string()),
            None => missing(),
        },
        (s, [path]) if s == LIST_SCRIPT => {
            let prefix = if path == "." || path == "/" {
                String::new()
            } else {
                format!("{}/", path.trim_end_matches('/'))
            };
            let listed: Vec<&str> = files
                .keys()
                .filter(|k| k.starts_with(&prefix) || *k == path)
                .map(String::as_str)
                .collect();
            if listed.is_empty() {
                missing()
            } else {
                ok(listed.join("\n") + "\n")
            }
        }
        _ => ExecOutput {
            stderr: "unknown helper".to_string(),
            exit_code: 2,
            ..Default::default()
        },
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, _spec: &SandboxSpec) -> Result<String, RuntimeError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("daemon not reachable".to_string()));
        }
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sandboxes.lock().unwrap().insert(id.clone(), Files::new());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        let plain_command = argv.len() == 3;
        if self.gone.load(Ordering::SeqCst) || (plain_command && self.commands_gone.load(Ordering::SeqCst)) {
            return Err(RuntimeError::ContainerGone(id.to_string()));
        }
        let mut sandboxes = self.sandboxes.lock().unwrap();
        let files = sandboxes
            .get_mut(id)
            .ok_or_else(|| RuntimeError::ContainerGone(id.to_string()))?;
        Ok(self.run(files, argv))
    }

    async fn destroy(&self, id: &str) -> Result<(), RuntimeError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("daemon not reachable".to_string()));
        }
        self.sandboxes.lock().unwrap().remove(id);
        Ok(())
    }
}

/// One canned backend reply
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Simulated transport failure
    Fail(String),
}

/// Backend that replays a script, then repeats `fallback` forever
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    delay: Option<Duration>,
    pub requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: Reply::Text(r#"{"kind": "run_test"}"#.to_string()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script made only of text replies
    pub fn texts(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Reply::Text(r.to_string())).collect())
    }

    pub fn with_fallback(mut self, fallback: Reply) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ReasoningRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ReasoningRequest) -> Result<String, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(reason) => Err(BackendError::Unavailable(reason)),
        }
    }
}

/// Provision a sandbox on `runtime` and seed it with the task's files
pub async fn seeded_sandbox(runtime: Arc<MemoryRuntime>, task: &TaskSpec) -> Sandbox {
    let spec = SandboxSpec::new("python:3.10-slim", "tail -f /dev/null").with_workdir("/app");
    let sandbox = Sandbox::create(runtime, &spec, Duration::from_secs(5))
        .await
        .expect("memory runtime always provisions");
    for file in &task.files {
        sandbox.write_file(&file.path, &file.content).await.expect("seed write");
    }
    sandbox
}

pub const FIX_UTILS: &str = r#"{"kind": "write_file", "path": "/app/utils.py", "content": "def calculate_price(p,q): return p*q"}"#;
pub const RUN_TEST: &str = r#"{"kind": "run_test"}"#;
