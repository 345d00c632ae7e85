//! Docker backend for the sandbox
//!
//! Talks to the local Docker daemon through bollard. Files are uploaded as
//! tar archives so the backend also works in Docker-in-Docker setups where
//! bind mounts fail.

use super::errors::RuntimeError;
use super::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, ExecRequest};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::network::DisconnectNetworkOptions;
use bollard::Docker;
use futures::StreamExt;
use std::path::Path;

/// Per-stream cap on captured exec output
pub const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

const TRUNCATION_MARKER: &str = "\n[output truncated]\n";

/// Container runtime backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Client for the local Docker daemon. Does not contact it.
    pub fn local() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(Self { docker })
    }

    /// Connect to the local Docker daemon and verify it answers
    pub async fn connect() -> Result<Self, RuntimeError> {
        let runtime = Self::local()?;
        runtime.ping().await?;
        Ok(runtime)
    }

    /// Get Docker version info
    pub async fn version(&self) -> Result<String, RuntimeError> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| classify("version", e))?;

        Ok(format!(
            "Docker {} (API {})",
            version.version.unwrap_or_default(),
            version.api_version.unwrap_or_default()
        ))
    }

    async fn kill(&self, container_id: &str) {
        let options = KillContainerOptions { signal: "SIGKILL" };
        if let Err(e) = self.docker.kill_container(container_id, Some(options)).await {
            tracing::warn!(container_id = %container_id, error = %e, "Failed to kill timed out sandbox");
        }
    }
}

/// Map a bollard error onto the runtime taxonomy
fn classify(subject: &str, err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(format!("{}: {}", subject, message)),
        BollardError::IOError { .. }
        | BollardError::HyperResponseError { .. }
        | BollardError::RequestTimeoutError => RuntimeError::Unavailable(err.to_string()),
        other => RuntimeError::Request(format!("{}: {}", subject, other)),
    }
}

/// Append an output chunk, keeping `buf` within [`MAX_CAPTURED_BYTES`].
/// The first chunk that does not fit is cut on a char boundary and followed
/// by a marker. Later chunks are dropped.
fn append_capped(buf: &mut String, chunk: &[u8]) {
    if buf.len() >= MAX_CAPTURED_BYTES {
        return;
    }
    let text = String::from_utf8_lossy(chunk);
    let room = MAX_CAPTURED_BYTES - buf.len();
    if text.len() < room {
        buf.push_str(&text);
        return;
    }

    let mut cut = room;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    buf.push_str(&text[..cut]);
    buf.push_str(TRUNCATION_MARKER);
}

/// Build a single-file tar archive named after the last path segment
fn tar_single_file(dest_path: &str, content: &[u8]) -> Result<Vec<u8>, RuntimeError> {
    let filename = Path::new(dest_path)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RuntimeError::Request(format!("invalid destination path: {}", dest_path)))?;

    let mut tar_buffer = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_buffer);

        let mut header = tar::Header::new_gnu();
        header
            .set_path(filename)
            .map_err(|e| RuntimeError::Request(format!("Failed to set tar path: {}", e)))?;
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
        header.set_cksum();

        builder
            .append(&header, content)
            .map_err(|e| RuntimeError::Request(format!("Failed to append to tar: {}", e)))?;
        builder
            .finish()
            .map_err(|e| RuntimeError::Request(format!("Failed to finish tar: {}", e)))?;
    }

    Ok(tar_buffer)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(format!("Failed to ping Docker: {}", e)))
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match classify(image, e) {
                RuntimeError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let host_config = bollard::service::HostConfig {
            memory: Some(spec.memory_limit),
            memory_swap: Some(spec.memory_limit),
            cpu_period: Some(spec.cpu_period),
            cpu_quota: Some(spec.cpu_quota),
            pids_limit: Some(256),
            network_mode: if spec.network_enabled {
                None
            } else {
                Some("none".to_string())
            },
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            cap_drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            user: spec.user.clone(),
            working_dir: Some(spec.working_dir.clone()),
            host_config: Some(host_config),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            // Keep the container idle until commands are exec'd into it
            cmd: Some(vec!["tail".to_string(), "-f".to_string(), "/dev/null".to_string()]),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| match classify(&spec.image, e) {
                RuntimeError::NotFound(msg) => RuntimeError::ImageNotFound(msg),
                other => other,
            })?;

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self.stop(&response.id).await;
            return Err(classify(&spec.name, e));
        }

        Ok(response.id)
    }

    async fn write_file(
        &self,
        container_id: &str,
        path: &str,
        content: &[u8],
    ) -> Result<(), RuntimeError> {
        let archive = tar_single_file(path, content)?;

        let dir_path = Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| "/".to_string());

        let options = UploadToContainerOptions {
            path: dir_path,
            ..Default::default()
        };

        self.docker
            .upload_to_container(container_id, Some(options), archive.into())
            .await
            .map_err(|e| classify(container_id, e))
    }

    async fn exec(
        &self,
        container_id: &str,
        request: &ExecRequest,
    ) -> Result<ExecOutput, RuntimeError> {
        let exec_config = CreateExecOptions {
            cmd: Some(request.cmd.clone()),
            env: Some(request.env.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(request.working_dir.clone()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| classify(container_id, e))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| classify(container_id, e))?;

        let deadline = tokio::time::Instant::now() + request.timeout;
        let mut output = ExecOutput::default();

        if let StartExecResults::Attached { output: mut stream, .. } = started {
            loop {
                match tokio::time::timeout_at(deadline, stream.next()).await {
                    Ok(Some(Ok(LogOutput::StdOut { message }))) => {
                        append_capped(&mut output.stdout, &message);
                    }
                    Ok(Some(Ok(LogOutput::StdErr { message }))) => {
                        append_capped(&mut output.stderr, &message);
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        tracing::warn!(container_id = %container_id, error = %e, "Error reading exec output");
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        output.timed_out = true;
                        break;
                    }
                }
            }
        }

        if output.timed_out {
            tracing::warn!(
                container_id = %container_id,
                timeout_secs = request.timeout.as_secs_f64(),
                "Exec deadline expired, killing sandbox"
            );
            self.kill(container_id).await;
            return Ok(output);
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| classify(container_id, e))?;
        output.exit_code = inspect.exit_code;

        Ok(output)
    }

    async fn isolate_network(&self, container_id: &str) -> Result<(), RuntimeError> {
        let info = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| classify(container_id, e))?;

        let networks = info
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default();

        for name in networks.keys().filter(|name| name.as_str() != "none") {
            let options = DisconnectNetworkOptions {
                container: container_id.to_string(),
                force: true,
            };
            self.docker
                .disconnect_network(name, options)
                .await
                .map_err(|e| classify(name, e))?;
        }

        Ok(())
    }

    async fn stop(&self, container_id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) => match classify(container_id, e) {
                RuntimeError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tar_single_file_uses_basename() {
        let archive = tar_single_file("/sandbox/snippet.py", b"print('hi')\n").unwrap();
        let mut reader = tar::Archive::new(archive.as_slice());
        let entries: Vec<_> = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["snippet.py".to_string()]);
    }

    #[test]
    fn test_tar_rejects_directory_path() {
        assert!(tar_single_file("/", b"").is_err());
    }

    #[test]
    fn test_output_capture_is_capped() {
        let mut buf = String::new();
        append_capped(&mut buf, b"test_a (m.T.test_a) ... ok\n");
        assert_eq!(buf, "test_a (m.T.test_a) ... ok\n");

        let flood = vec![b'x'; MAX_CAPTURED_BYTES];
        append_capped(&mut buf, &flood);
        assert!(buf.starts_with("test_a"));
        assert!(buf.ends_with(TRUNCATION_MARKER));
        assert!(buf.len() <= MAX_CAPTURED_BYTES + TRUNCATION_MARKER.len());

        let len = buf.len();
        append_capped(&mut buf, b"more");
        assert_eq!(buf.len(), len);
    }

    #[test]
    fn test_output_cap_respects_char_boundaries() {
        let mut buf = "x".repeat(MAX_CAPTURED_BYTES - 1);
        append_capped(&mut buf, "\u{e9}\u{e9}".as_bytes());
        assert_eq!(buf.len(), MAX_CAPTURED_BYTES - 1 + TRUNCATION_MARKER.len());
        assert!(buf.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_classify_not_found() {
        let err = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        assert!(matches!(classify("abc", err), RuntimeError::NotFound(_)));

        let err = BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        assert!(matches!(classify("abc", err), RuntimeError::Request(_)));
    }
}
