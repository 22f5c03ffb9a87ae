//! Local container-per-task sandbox provider.
//!
//! Each task gets its own container, started from a pinned runtime image
//! (`runtime_tag`) with the instruction text mounted in as a file and the
//! project checked out at `project_path`. The provider shells out to the
//! `docker` CLI the same way [`crate::gitworkspace`] shells out to `git`:
//! `tokio::process::Command`, one `Arc<Mutex<()>>` per provider instance to
//! serialize mutating calls against a single daemon, explicit timeouts on
//! every wait.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::mission::types::FileRecord;

use super::{truncate_output, ExitCode, OpenParams, SandboxError, SandboxProvider};

const OUTPUT_TRUNCATION_BYTES: usize = 10_000;

#[derive(Debug, Clone)]
struct RunningSandbox {
    container_id: String,
    task_id: String,
    project_path: String,
}

/// Spawns one Docker container per task. `docker_bin` is overridable for
/// tests that stub out the executable.
pub struct LocalSandboxProvider {
    docker_bin: String,
    running: Arc<Mutex<HashMap<String, RunningSandbox>>>,
}

impl LocalSandboxProvider {
    pub fn new() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[cfg(test)]
    pub fn with_docker_bin(docker_bin: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for LocalSandboxProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn open(&self, params: OpenParams) -> Result<String, SandboxError> {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(["run", "-d", "--rm"])
            .arg("--memory")
            .arg(format!("{}m", params.memory_mb))
            .arg("--cpus")
            .arg(format!("{:.2}", params.cpu_millis as f64 / 1000.0))
            .arg("-v")
            .arg(format!("{}:/workspace", params.project_path))
            .arg("-e")
            .arg(format!("GATOR_TASK_ID={}", params.task_id))
            .arg("-e")
            .arg(format!("GATOR_AGENT_ROLE={}", params.agent))
            .arg("-e")
            .arg(format!("GATOR_INSTRUCTION={}", params.instruction_text));

        for (key, value) in &params.env {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }

        if let Some(remote) = &params.git_remote_url {
            cmd.arg("-e").arg(format!("GATOR_GIT_REMOTE_URL={remote}"));
        }

        cmd.arg(&params.runtime_tag);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .map_err(|e| SandboxError::OpenFailed(format!("failed to spawn docker run: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::OpenFailed(format!("docker run failed: {stderr}")));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let mut running = self.running.lock().await;
        running.insert(
            container_id.clone(),
            RunningSandbox {
                container_id: container_id.clone(),
                task_id: params.task_id,
                project_path: params.project_path,
            },
        );

        Ok(container_id)
    }

    async fn wait_for_completion(&self, sandbox_id: &str, timeout_seconds: u64) -> Result<ExitCode, SandboxError> {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(["wait", sandbox_id]).stdout(Stdio::piped()).stderr(Stdio::piped());

        let result = tokio::time::timeout(Duration::from_secs(timeout_seconds), cmd.output()).await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(SandboxError::WaitFailed(format!("failed to run docker wait: {e}"))),
            Err(_) => return Ok(ExitCode::TIMEOUT),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::WaitFailed(format!("docker wait failed: {stderr}")));
        }

        let code_str = String::from_utf8_lossy(&output.stdout);
        let code: i32 = code_str
            .trim()
            .parse()
            .map_err(|_| SandboxError::WaitFailed(format!("unparseable exit code: {code_str}")))?;

        Ok(ExitCode(code))
    }

    async fn capture_output(&self, sandbox_id: &str) -> Result<String, SandboxError> {
        let output = Command::new(&self.docker_bin)
            .args(["logs", sandbox_id])
            .output()
            .await
            .map_err(|e| SandboxError::CaptureFailed(format!("failed to run docker logs: {e}")))?;

        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        Ok(truncate_output(&combined, OUTPUT_TRUNCATION_BYTES))
    }

    async fn detect_changes(&self, _task_id: &str, project_path: &str) -> Result<Vec<FileRecord>, SandboxError> {
        crate::gitworkspace::diff_stat_file_records(project_path)
            .map_err(|e| SandboxError::CaptureFailed(format!("failed to read git diff stat: {e}")))
    }

    async fn teardown(&self, sandbox_id: &str) -> Result<(), SandboxError> {
        // Best-effort: a container that already stopped (e.g. after a
        // `docker run --rm` container naturally exits) is not an error.
        let output = Command::new(&self.docker_bin)
            .args(["rm", "-f", sandbox_id])
            .output()
            .await
            .map_err(|e| SandboxError::TeardownFailed(format!("failed to run docker rm: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("No such container") {
                return Err(SandboxError::TeardownFailed(stderr.to_string()));
            }
        }

        self.running.lock().await.remove(sandbox_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_constructs_with_default_docker_bin() {
        let provider = LocalSandboxProvider::new();
        assert_eq!(provider.docker_bin, "docker");
    }

    #[test]
    fn provider_accepts_overridden_binary_for_tests() {
        let provider = LocalSandboxProvider::with_docker_bin("/usr/bin/true");
        assert_eq!(provider.docker_bin, "/usr/bin/true");
    }
}
