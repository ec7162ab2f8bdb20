//! Docker Engine API runtime
//!
//! Talks to the Docker daemon over its Unix domain socket. Each sandbox is
//! one container kept alive by a long-running command; agent commands run
//! through the exec API.
//!
//! ```text
//! create   POST   /containers/create       -> Id
//!          POST   /containers/{id}/start
//! exec     POST   /containers/{id}/exec    -> exec Id
//!          POST   /exec/{exec}/start       -> multiplexed stdout/stderr
//!          GET    /exec/{exec}/json        -> ExitCode
//! destroy  DELETE /containers/{id}?force=true&v=true
//! ```

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, StatusCode};
use hyper_util::client::legacy::Client;
use hyperlocal::UnixConnector;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::runtime::{ContainerRuntime, ExecOutput, RuntimeError, SandboxSpec};

type HyperClient = Client<UnixConnector, Full<Bytes>>;

/// Default location of the Docker daemon socket
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

#[derive(Deserialize)]
struct IdResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Deserialize)]
struct ExecInspect {
    #[serde(rename = "ExitCode")]
    exit_code: Option<i64>,
}

/// Client for the Docker Engine API
pub struct DockerRuntime {
    client: HyperClient,
    socket_path: String,
    pull_missing: bool,
}

impl DockerRuntime {
    /// Create a new Docker runtime client
    ///
    /// # Arguments
    /// * `socket_path` - Path to the Docker daemon Unix socket
    pub fn new(socket_path: impl Into<String>) -> Self {
        let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(UnixConnector);

        Self {
            client,
            socket_path: socket_path.into(),
            pull_missing: true,
        }
    }

    /// Whether a missing image is pulled before giving up
    pub fn with_pull_missing(mut self, pull_missing: bool) -> Self {
        self.pull_missing = pull_missing;
        self
    }

    /// Send a request to the Docker API and collect the whole response body
    async fn send_request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, Bytes), RuntimeError> {
        let uri: hyper::Uri = hyperlocal::Uri::new(&self.socket_path, endpoint).into();
        let payload = match body {
            Some(value) => Bytes::from(value.to_string()),
            None => Bytes::new(),
        };

        let req = hyper::Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Full::new(payload))
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        let res = self
            .client
            .request(req)
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("{}: {}", self.socket_path, e)))?;
        let status = res.status();
        let body_bytes = res
            .into_body()
            .collect()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?
            .to_bytes();

        Ok((status, body_bytes))
    }

    async fn create_container(&self, spec: &SandboxSpec, name: &str) -> Result<(StatusCode, Bytes), RuntimeError> {
        let mut host_config = json!({});
        if let Some(memory) = spec.memory_bytes {
            host_config["Memory"] = json!(memory);
        }
        if let Some(cores) = spec.cpu_cores {
            host_config["NanoCpus"] = json!((cores * 1_000_000_000.0) as u64);
        }
        let mut labels = json!({ "sandfix": "true" });
        if let Some(trace_id) = &spec.trace_id {
            labels["sandfix.trace_id"] = json!(trace_id);
        }

        let body = json!({
            "Image": spec.image,
            "Cmd": spec.keep_alive,
            "WorkingDir": spec.workdir,
            "Tty": false,
            "Labels": labels,
            "HostConfig": host_config,
        });
        self.send_request(
            Method::POST,
            &format!("/containers/create?name={}", name),
            Some(body),
        )
        .await
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let (repo, tag) = split_image_reference(image);
        info!(image, "Pulling missing image");
        let (status, body) = self
            .send_request(
                Method::POST,
                &format!("/images/create?fromImage={}&tag={}", repo, tag),
                None,
            )
            .await?;
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(RuntimeError::ImageNotFound(image.to_string())),
            s => Err(api_error(s, &body)),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self, spec: &SandboxSpec) -> Result<String, RuntimeError> {
        let name = format!("sandfix-{}", Uuid::now_v7());

        let (mut status, mut body) = self.create_container(spec, &name).await?;
        if status == StatusCode::NOT_FOUND {
            if !self.pull_missing {
                return Err(RuntimeError::ImageNotFound(spec.image.clone()));
            }
            self.pull_image(&spec.image).await?;
            (status, body) = self.create_container(spec, &name).await?;
        }
        match status {
            StatusCode::CREATED => {}
            StatusCode::NOT_FOUND => return Err(RuntimeError::ImageNotFound(spec.image.clone())),
            s => return Err(api_error(s, &body)),
        }
        let created: IdResponse = serde_json::from_slice(&body).map_err(|e| RuntimeError::Api {
            status: status.as_u16(),
            message: format!("unreadable create response: {}", e),
        })?;

        let (status, body) = self
            .send_request(Method::POST, &format!("/containers/{}/start", created.id), None)
            .await?;
        if !(status.is_success() || status == StatusCode::NOT_MODIFIED) {
            // Best effort: do not leave a created-but-never-started container behind
            let _ = self.destroy(&created.id).await;
            return Err(api_error(status, &body));
        }

        debug!(container = %created.id, name, "Container started");
        Ok(created.id)
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        let (status, body) = self
            .send_request(
                Method::POST,
                &format!("/containers/{}/exec", id),
                Some(json!({
                    "AttachStdout": true,
                    "AttachStderr": true,
                    "Tty": false,
                    "Cmd": argv,
                })),
            )
            .await?;
        match status {
            StatusCode::CREATED => {}
            StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
                return Err(RuntimeError::ContainerGone(id.to_string()))
            }
            s => return Err(api_error(s, &body)),
        }
        let exec: IdResponse = serde_json::from_slice(&body).map_err(|e| RuntimeError::Api {
            status: status.as_u16(),
            message: format!("unreadable exec response: {}", e),
        })?;

        let (status, raw) = self
            .send_request(
                Method::POST,
                &format!("/exec/{}/start", exec.id),
                Some(json!({ "Detach": false, "Tty": false })),
            )
            .await?;
        if !status.is_success() {
            return Err(api_error(status, &raw));
        }
        let (stdout, stderr) = demux_stream(&raw);

        let (status, body) = self
            .send_request(Method::GET, &format!("/exec/{}/json", exec.id), None)
            .await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        let inspect: ExecInspect = serde_json::from_slice(&body).map_err(|e| RuntimeError::Api {
            status: status.as_u16(),
            message: format!("unreadable exec inspect response: {}", e),
        })?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: inspect.exit_code.unwrap_or(-1) as i32,
            duration_ms: 0.0,
            timed_out: false,
        })
    }

    async fn destroy(&self, id: &str) -> Result<(), RuntimeError> {
        let (status, body) = self
            .send_request(Method::DELETE, &format!("/containers/{}?force=true&v=true", id), None)
            .await?;
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(container = id, "Container already removed");
                Ok(())
            }
            s => Err(api_error(s, &body)),
        }
    }
}

/// Split Docker's multiplexed attach stream into (stdout, stderr)
///
/// Each frame is `[stream, 0, 0, 0, len_be_u32]` followed by `len` bytes.
/// Stream 1 is stdout, 2 is stderr; anything else is ignored. A truncated
/// final frame contributes whatever bytes arrived.
pub fn demux_stream(raw: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut rest = raw;

    while rest.len() >= 8 {
        let stream = rest[0];
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (8 + len).min(rest.len());
        let payload = &rest[8..end];
        match stream {
            1 => stdout.extend_from_slice(payload),
            2 => stderr.extend_from_slice(payload),
            _ => {}
        }
        rest = &rest[end..];
    }

    (stdout, stderr)
}

/// Split "repo:tag" into its parts; the tag defaults to "latest"
///
/// A colon inside a registry host ("localhost:5000/img") is not a tag.
fn split_image_reference(image: &str) -> (&str, &str) {
    match image.rfind(':') {
        Some(idx) if !image[idx + 1..].contains('/') => (&image[..idx], &image[idx + 1..]),
        _ => (image, "latest"),
    }
}

fn api_error(status: StatusCode, body: &[u8]) -> RuntimeError {
    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    RuntimeError::Api {
        status: status.as_u16(),
        message,
    }
}
