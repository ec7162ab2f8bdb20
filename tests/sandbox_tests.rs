//! Integration tests for the sandbox and its file transfer
//!
//! The process runtime tests use the host's `sh` and `base64`, so content
//! really goes through the shell. Docker tests are marked #[ignore].

mod common;

use std::sync::Arc;
use std::time::Duration;

use sandfix::sandbox::transfer::{self, CHUNK_RAW_BYTES, WRITE_SCRIPT};
use sandfix::sandbox::{ContainerRuntime, DockerRuntime, ProcessRuntime, Sandbox, SandboxError, SandboxSpec};

const TRICKY: &str = "print(\"He said 'hi'\")\n\
x = `whoami` $(echo pwned) ${HOME} \\n \\\\\n\
\ttabbed\r\n\
emoji: ✓ 🚀\n\
'''triple''' \"\"\"quotes\"\"\"\n\
EOF\n";

async fn process_sandbox(base: &std::path::Path, timeout: Duration) -> (Arc<ProcessRuntime>, Sandbox) {
    let runtime = Arc::new(ProcessRuntime::new(base));
    let spec = SandboxSpec::new("ignored", "ignored");
    let sandbox = Sandbox::create(runtime.clone(), &spec, timeout).await.unwrap();
    (runtime, sandbox)
}

/// Test that content with quotes, backticks and newlines survives a round trip
#[tokio::test]
async fn test_write_read_round_trip_is_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, mut sandbox) = process_sandbox(dir.path(), Duration::from_secs(10)).await;

    sandbox.write_file("pkg/tricky.py", TRICKY).await.unwrap();
    let read_back = sandbox.read_file("pkg/tricky.py").await.unwrap();
    assert_eq!(read_back, TRICKY);

    // Nothing in the payload was executed
    let root = runtime.root_of(sandbox.id()).await.unwrap();
    assert_eq!(std::fs::read_to_string(root.join("pkg/tricky.py")).unwrap(), TRICKY);

    sandbox.destroy().await.unwrap();
}

/// Test that content larger than one chunk is reassembled in order
#[tokio::test]
async fn test_multi_chunk_write() {
    let dir = tempfile::tempdir().unwrap();
    let (_runtime, mut sandbox) = process_sandbox(dir.path(), Duration::from_secs(10)).await;

    let content: String = (0..(CHUNK_RAW_BYTES * 2 + 100) / 10)
        .map(|i| format!("{:09}\n", i))
        .collect();
    assert!(transfer::write_commands("big.txt", content.as_bytes()).len() >= 3);

    sandbox.write_file("big.txt", &content).await.unwrap();
    assert_eq!(sandbox.read_file("big.txt").await.unwrap(), content);

    sandbox.destroy().await.unwrap();
}

/// Test that writing empty content creates an empty file
#[tokio::test]
async fn test_empty_write_creates_file() {
    let dir = tempfile::tempdir().unwrap();
    let (_runtime, mut sandbox) = process_sandbox(dir.path(), Duration::from_secs(10)).await;

    sandbox.write_file("empty.txt", "").await.unwrap();
    assert_eq!(sandbox.read_file("empty.txt").await.unwrap(), "");

    sandbox.destroy().await.unwrap();
}

/// Test that missing paths are reported as NotFound
#[tokio::test]
async fn test_missing_paths_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (_runtime, mut sandbox) = process_sandbox(dir.path(), Duration::from_secs(10)).await;

    assert!(matches!(
        sandbox.read_file("nope.py").await,
        Err(SandboxError::NotFound { path }) if path == "nope.py"
    ));
    assert!(matches!(
        sandbox.list_files("no_dir").await,
        Err(SandboxError::NotFound { .. })
    ));

    sandbox.destroy().await.unwrap();
}

/// Test that listing shows written files
#[tokio::test]
async fn test_list_files() {
    let dir = tempfile::tempdir().unwrap();
    let (_runtime, mut sandbox) = process_sandbox(dir.path(), Duration::from_secs(10)).await;

    sandbox.write_file("src/utils.py", "x = 1\n").await.unwrap();
    let listing = sandbox.list_files(".").await.unwrap();
    assert!(listing.contains("utils.py"));
    assert!(listing.contains("src"));

    sandbox.destroy().await.unwrap();
}

/// Test that command failures are outputs, not errors
#[tokio::test]
async fn test_execute_reports_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let (_runtime, mut sandbox) = process_sandbox(dir.path(), Duration::from_secs(10)).await;

    let out = sandbox.execute("echo out; echo err >&2; exit 3").await.unwrap();
    assert_eq!(out.exit_code, 3);
    assert_eq!(out.stdout, "out\n");
    assert_eq!(out.stderr, "err\n");
    assert!(!out.timed_out);
    assert!(out.combined().contains("err"));

    let missing = sandbox.execute("definitely-not-a-command-xyz").await.unwrap();
    assert_eq!(missing.exit_code, 127);

    sandbox.destroy().await.unwrap();
}

/// Test that a slow command is cut off and marked as timed out
#[tokio::test]
async fn test_execute_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let (_runtime, mut sandbox) = process_sandbox(dir.path(), Duration::from_secs(1)).await;

    let out = sandbox.execute("sleep 5").await.unwrap();
    assert!(out.timed_out);
    assert_eq!(out.exit_code, -1);
    assert!(!out.success());

    sandbox.destroy().await.unwrap();
}

/// Test that destroy is idempotent and the sandbox is unusable afterwards
#[tokio::test]
async fn test_destroy_twice() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, mut sandbox) = process_sandbox(dir.path(), Duration::from_secs(10)).await;
    let root = runtime.root_of(sandbox.id()).await.unwrap();
    assert!(root.exists());

    sandbox.destroy().await.unwrap();
    sandbox.destroy().await.unwrap();

    assert!(sandbox.is_destroyed());
    assert!(!root.exists());
    assert!(matches!(
        sandbox.execute("true").await,
        Err(SandboxError::Execution(_))
    ));
}

/// Test that absolute paths land in the scratch directory and go away with it
#[tokio::test]
async fn test_absolute_paths_stay_inside_scratch_dir() {
    let dir = tempfile::tempdir().unwrap();
    let host = tempfile::tempdir().unwrap();
    let (runtime, mut sandbox) = process_sandbox(dir.path(), Duration::from_secs(10)).await;
    let root = runtime.root_of(sandbox.id()).await.unwrap();

    let outside = host.path().join("app").join("main.py");
    let outside_str = outside.to_string_lossy().to_string();
    sandbox.write_file(&outside_str, "print('SUCCESS')\n").await.unwrap();
    sandbox.write_file("/app/utils.py", "X = 1\n").await.unwrap();

    assert!(!outside.exists());
    assert!(root.join("app/utils.py").exists());
    assert_eq!(sandbox.read_file(&outside_str).await.unwrap(), "print('SUCCESS')\n");
    assert_eq!(sandbox.read_file("/app/utils.py").await.unwrap(), "X = 1\n");

    let out = sandbox.execute("cat /app/utils.py && ls /app").await.unwrap();
    assert_eq!(out.exit_code, 0);
    assert!(out.stdout.contains("X = 1"));
    assert!(out.stdout.contains("utils.py"));
    assert!(!out.stdout.contains(&*root.to_string_lossy()));

    sandbox.destroy().await.unwrap();
    assert!(!root.exists());
    assert!(!outside.exists());
    assert!(!host.path().join("app").exists());
}

/// Test that writes never interpolate content into the script
#[tokio::test]
async fn test_write_keeps_payload_out_of_script() {
    let runtime = Arc::new(common::MemoryRuntime::new());
    let spec = SandboxSpec::new("python:3.10-slim", "tail -f /dev/null");
    let mut sandbox = Sandbox::create(runtime.clone(), &spec, Duration::from_secs(5)).await.unwrap();

    sandbox.write_file("/app/a.py", TRICKY).await.unwrap();
    assert_eq!(runtime.file(sandbox.id(), "/app/a.py").as_deref(), Some(TRICKY));

    for argv in transfer::write_commands("/app/a.py", TRICKY.as_bytes()) {
        assert_eq!(argv[2], WRITE_SCRIPT);
        assert_eq!(argv[4], "/app/a.py");
        assert!(!argv[5].contains("whoami"));
    }

    sandbox.destroy().await.unwrap();
    assert_eq!(runtime.destroy_count(), 1);
}

/// Test the Docker runtime end to end
///
/// Needs a Docker daemon and pulls python:3.10-slim on first use.
#[tokio::test]
#[ignore = "Requires Docker daemon"]
async fn test_docker_round_trip() {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new("/var/run/docker.sock"));
    let spec = SandboxSpec::new("python:3.10-slim", "tail -f /dev/null").with_workdir("/app");
    let mut sandbox = Sandbox::create(runtime, &spec, Duration::from_secs(60)).await.unwrap();

    sandbox.write_file("/app/tricky.py", TRICKY).await.unwrap();
    assert_eq!(sandbox.read_file("/app/tricky.py").await.unwrap(), TRICKY);

    let out = sandbox.execute("python3 -c 'print(6 * 7)'").await.unwrap();
    assert_eq!(out.stdout.trim(), "42");

    sandbox.destroy().await.unwrap();
    sandbox.destroy().await.unwrap();
}
