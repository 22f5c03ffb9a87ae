//! Remote fleet-worker sandbox provider.
//!
//! Instead of spawning a container locally, each call is an HTTP request
//! against one of a configured fleet of pre-deployed worker apps. Workers
//! are addressed round-robin; every request carries a scoped worker token
//! minted from [`crate::token`] so a worker can only ever touch the one
//! task/attempt it was dispatched for.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::mission::types::FileRecord;
use crate::token::{generate_token, TokenConfig};

use super::{ExitCode, OpenParams, SandboxError, SandboxProvider};

#[derive(Serialize)]
struct RunRequest<'a> {
    task_id: &'a str,
    agent: String,
    instruction_text: &'a str,
    project_path: &'a str,
    env: &'a [(String, String)],
    memory_mb: u32,
    cpu_millis: u32,
    git_remote_url: Option<&'a str>,
    runtime_tag: &'a str,
    iteration: u32,
}

#[derive(Deserialize)]
struct RunResponse {
    sandbox_id: String,
}

#[derive(Deserialize)]
struct WaitResponse {
    exit_code: i32,
    timed_out: bool,
}

#[derive(Deserialize)]
struct OutputResponse {
    output: String,
}

#[derive(Deserialize)]
struct ChangesResponse {
    files: Vec<FileRecord>,
}

/// Talks to a fleet of pre-deployed worker apps over HTTP, picking a worker
/// round-robin for each `open` call. The same worker that opened a sandbox
/// must service its later `wait`/`capture`/`detect`/`teardown` calls, so the
/// chosen worker's base URL is encoded as a prefix on the returned sandbox
/// id: `<worker_index>|<remote_sandbox_id>`.
pub struct RemoteSandboxProvider {
    client: Client,
    worker_base_urls: Vec<String>,
    next_worker: AtomicUsize,
    token_config: TokenConfig,
}

impl RemoteSandboxProvider {
    pub fn new(worker_base_urls: Vec<String>, token_config: TokenConfig) -> Self {
        Self {
            client: Client::new(),
            worker_base_urls,
            next_worker: AtomicUsize::new(0),
            token_config,
        }
    }

    fn pick_worker(&self) -> Result<(usize, &str), SandboxError> {
        if self.worker_base_urls.is_empty() {
            return Err(SandboxError::OpenFailed("no worker base URLs configured".to_string()));
        }
        let idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.worker_base_urls.len();
        Ok((idx, &self.worker_base_urls[idx]))
    }

    fn encode_sandbox_id(worker_index: usize, remote_id: &str) -> String {
        format!("{worker_index}|{remote_id}")
    }

    fn decode_sandbox_id<'a>(&self, sandbox_id: &'a str) -> Result<(&'a str, &'a str), SandboxError> {
        sandbox_id
            .split_once('|')
            .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))
            .map(|(idx, remote_id)| {
                let _ = idx;
                (idx, remote_id)
            })
    }

    fn worker_url_for(&self, sandbox_id: &str) -> Result<(&str, &str), SandboxError> {
        let (idx_str, remote_id) = self.decode_sandbox_id(sandbox_id)?;
        let idx: usize = idx_str
            .parse()
            .map_err(|_| SandboxError::NotFound(sandbox_id.to_string()))?;
        let base = self
            .worker_base_urls
            .get(idx)
            .ok_or_else(|| SandboxError::NotFound(sandbox_id.to_string()))?;
        Ok((base.as_str(), remote_id))
    }
}

#[async_trait]
impl SandboxProvider for RemoteSandboxProvider {
    async fn open(&self, params: OpenParams) -> Result<String, SandboxError> {
        let (worker_index, base) = self.pick_worker()?;

        let token = generate_token(&self.token_config, &params.task_id, params.iteration);

        let body = RunRequest {
            task_id: &params.task_id,
            agent: params.agent.to_string(),
            instruction_text: &params.instruction_text,
            project_path: &params.project_path,
            env: &params.env,
            memory_mb: params.memory_mb,
            cpu_millis: params.cpu_millis,
            git_remote_url: params.git_remote_url.as_deref(),
            runtime_tag: &params.runtime_tag,
            iteration: params.iteration,
        };

        let response = self
            .client
            .post(format!("{base}/v1/sandboxes"))
            .header("x-gator-worker-token", token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SandboxError::OpenFailed(format!("worker request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SandboxError::OpenFailed(format!("worker returned {status}: {text}")));
        }

        let parsed: RunResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::OpenFailed(format!("invalid worker response: {e}")))?;

        Ok(Self::encode_sandbox_id(worker_index, &parsed.sandbox_id))
    }

    async fn wait_for_completion(&self, sandbox_id: &str, timeout_seconds: u64) -> Result<ExitCode, SandboxError> {
        let (base, remote_id) = self.worker_url_for(sandbox_id)?;

        let response = self
            .client
            .get(format!("{base}/v1/sandboxes/{remote_id}/wait"))
            .query(&[("timeout_seconds", timeout_seconds.to_string())])
            .send()
            .await
            .map_err(|e| SandboxError::WaitFailed(format!("worker request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(SandboxError::WaitFailed(format!("worker returned {status}")));
        }

        let parsed: WaitResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::WaitFailed(format!("invalid worker response: {e}")))?;

        if parsed.timed_out {
            return Ok(ExitCode::TIMEOUT);
        }

        Ok(ExitCode(parsed.exit_code))
    }

    async fn capture_output(&self, sandbox_id: &str) -> Result<String, SandboxError> {
        let (base, remote_id) = self.worker_url_for(sandbox_id)?;

        let response = self
            .client
            .get(format!("{base}/v1/sandboxes/{remote_id}/output"))
            .send()
            .await
            .map_err(|e| SandboxError::CaptureFailed(format!("worker request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(SandboxError::CaptureFailed(format!("worker returned {status}")));
        }

        let parsed: OutputResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::CaptureFailed(format!("invalid worker response: {e}")))?;

        Ok(parsed.output)
    }

    async fn detect_changes(&self, _task_id: &str, sandbox_id: &str) -> Result<Vec<FileRecord>, SandboxError> {
        let (base, remote_id) = self.worker_url_for(sandbox_id)?;

        let response = self
            .client
            .get(format!("{base}/v1/sandboxes/{remote_id}/changes"))
            .send()
            .await
            .map_err(|e| SandboxError::CaptureFailed(format!("worker request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(SandboxError::CaptureFailed(format!("worker returned {status}")));
        }

        let parsed: ChangesResponse = response
            .json()
            .await
            .map_err(|e| SandboxError::CaptureFailed(format!("invalid worker response: {e}")))?;

        Ok(parsed.files)
    }

    async fn teardown(&self, sandbox_id: &str) -> Result<(), SandboxError> {
        let (base, remote_id) = self.worker_url_for(sandbox_id)?;

        let response = self
            .client
            .delete(format!("{base}/v1/sandboxes/{remote_id}"))
            .send()
            .await
            .map_err(|e| SandboxError::TeardownFailed(format!("worker request failed: {e}")))?;

        if !response.status().is_success() && response.status().as_u16() != 404 {
            let status = response.status();
            return Err(SandboxError::TeardownFailed(format!("worker returned {status}")));
        }

        Ok(())
    }
}
