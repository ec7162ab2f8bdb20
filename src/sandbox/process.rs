//! Local process runtime
//!
//! Runs every sandbox in its own scratch directory on the host using plain
//! child processes. The scratch directory stands in for the filesystem
//! root: absolute paths given to the transfer helpers are placed under it,
//! and absolute paths in shell commands are rewritten when their first
//! component exists there (`/app/main.py` becomes `<root>/app/main.py`,
//! `/usr/bin/env` is left alone). Output has the scratch prefix mapped back
//! to `/`. There is no further isolation; a command can still reach host
//! paths outside the scratch directory. Image and keep-alive command are
//! ignored. Intended for tests and hosts without Docker.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::runtime::{ContainerRuntime, ExecOutput, RuntimeError, SandboxSpec};
use super::transfer;

/// Exit status reported when the program cannot be spawned (shell convention)
const SPAWN_FAILED_EXIT: i32 = 127;

#[derive(Debug, Clone)]
struct Scratch {
    root: PathBuf,
    workdir: PathBuf,
}

/// Runtime that maps each sandbox onto a scratch directory
pub struct ProcessRuntime {
    base_dir: PathBuf,
    sandboxes: Mutex<HashMap<String, Scratch>>,
}

impl ProcessRuntime {
    /// Create a runtime whose sandboxes live under `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            sandboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Runtime rooted in the system temporary directory
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("sandfix"))
    }

    /// Scratch directory of a live sandbox
    pub async fn root_of(&self, id: &str) -> Option<PathBuf> {
        self.sandboxes.lock().await.get(id).map(|s| s.root.clone())
    }
}

#[async_trait]
impl ContainerRuntime for ProcessRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<String, RuntimeError> {
        let id = format!("local-{}", Uuid::now_v7());
        let unavailable =
            |path: &Path, e: std::io::Error| RuntimeError::Unavailable(format!("{}: {}", path.display(), e));

        let root = self.base_dir.join(&id);
        tokio::fs::create_dir_all(&root).await.map_err(|e| unavailable(root.as_path(), e))?;
        // Rewritten paths must not depend on the current directory
        let root = tokio::fs::canonicalize(&root).await.map_err(|e| unavailable(root.as_path(), e))?;

        let workdir = PathBuf::from(rebase_path(&root, &spec.workdir));
        tokio::fs::create_dir_all(&workdir).await.map_err(|e| unavailable(workdir.as_path(), e))?;

        debug!(sandbox = %id, root = %root.display(), image = %spec.image, "Scratch sandbox created");
        self.sandboxes.lock().await.insert(id.clone(), Scratch { root, workdir });
        Ok(id)
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        let scratch = self
            .sandboxes
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::ContainerGone(id.to_string()))?;

        let argv = rebase_argv(&scratch.root, &top_level_entries(&scratch.root).await, argv);
        let (program, args) = argv.split_first().ok_or_else(|| RuntimeError::Api {
            status: 400,
            message: "empty command".to_string(),
        })?;

        let mut out = run_in(&scratch.workdir, program, args).await?;
        let root = scratch.root.to_string_lossy();
        out.stdout = unmap_root(&out.stdout, &root);
        out.stderr = unmap_root(&out.stderr, &root);
        Ok(out)
    }

    async fn destroy(&self, id: &str) -> Result<(), RuntimeError> {
        let scratch = self.sandboxes.lock().await.remove(id);
        if let Some(Scratch { root, .. }) = scratch {
            match tokio::fs::remove_dir_all(&root).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RuntimeError::Io(e)),
            }
            debug!(sandbox = id, "Scratch sandbox removed");
        }
        Ok(())
    }
}

/// Place an absolute sandbox path under `root`; relative paths stay relative
fn rebase_path(root: &Path, path: &str) -> String {
    match path.strip_prefix('/') {
        Some(rel) => root.join(rel.trim_start_matches('/')).to_string_lossy().into_owned(),
        None => path.to_string(),
    }
}

/// Rewrite the paths an argv refers to so they land inside the scratch root
fn rebase_argv(root: &Path, entries: &HashSet<String>, argv: &[String]) -> Vec<String> {
    match argv {
        [sh, c, script, name, path, rest @ ..] if sh == "sh" && c == "-c" && name == transfer::HELPER_NAME => {
            let mut rebased = vec![sh.clone(), c.clone(), script.clone(), name.clone(), rebase_path(root, path)];
            rebased.extend(rest.iter().cloned());
            rebased
        }
        [sh, c, command] if sh == "sh" && c == "-c" => {
            vec![sh.clone(), c.clone(), rebase_command(command, &root.to_string_lossy(), entries)]
        }
        other => other.to_vec(),
    }
}

/// Prefix absolute paths in a shell command whose first component is one of `entries`
fn rebase_command(command: &str, root: &str, entries: &HashSet<String>) -> String {
    let mut out = String::with_capacity(command.len());
    let mut prev: Option<char> = None;

    for (i, c) in command.char_indices() {
        if c == '/' && prev.map_or(true, is_word_boundary) {
            let first = command[i + 1..]
                .split(|ch: char| ch == '/' || is_word_boundary(ch))
                .next()
                .unwrap_or_default();
            if !first.is_empty() && entries.contains(first) {
                out.push_str(root);
            }
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

fn is_word_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '\'' | '"' | '=' | '(' | ':' | ';' | '<' | '>' | '|' | '&' | '`')
}

/// Map the scratch prefix in command output back to `/`
fn unmap_root(text: &str, root: &str) -> String {
    if !text.contains(root) {
        return text.to_string();
    }
    text.replace(&format!("{}/", root), "/").replace(root, "/")
}

async fn top_level_entries(root: &Path) -> HashSet<String> {
    let mut entries = HashSet::new();
    if let Ok(mut dir) = tokio::fs::read_dir(root).await {
        while let Ok(Some(entry)) = dir.next_entry().await {
            entries.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    entries
}

async fn run_in(dir: &Path, program: &str, args: &[String]) -> Result<ExecOutput, RuntimeError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match cmd.output().await {
        Ok(output) => Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration_ms: 0.0,
            timed_out: false,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ExecOutput {
            stderr: format!("{}: command not found", program),
            exit_code: SPAWN_FAILED_EXIT,
            ..Default::default()
        }),
        Err(e) => Err(RuntimeError::Io(e)),
    }
}
