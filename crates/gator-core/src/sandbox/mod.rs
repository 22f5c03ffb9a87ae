//! The sandbox capability interface: "open a worker that executes one
//! instruction against a git branch, return exit + output + file-change
//! list." The engine only ever sees these five operations; `local` and
//! `remote` are the two concrete variants behind them.

pub mod local;
pub mod remote;

use async_trait::async_trait;

use crate::mission::types::{AgentRole, FileRecord};

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox failed to open: {0}")]
    OpenFailed(String),

    #[error("sandbox wait failed: {0}")]
    WaitFailed(String),

    #[error("sandbox output capture failed: {0}")]
    CaptureFailed(String),

    #[error("sandbox teardown failed: {0}")]
    TeardownFailed(String),

    #[error("sandbox {0} not found")]
    NotFound(String),
}

/// Parameters for opening one task's sandbox (spec §4.4.2).
#[derive(Debug, Clone)]
pub struct OpenParams {
    pub agent: AgentRole,
    pub task_id: String,
    pub project_path: String,
    pub instruction_text: String,
    pub env: Vec<(String, String)>,
    pub memory_mb: u32,
    pub cpu_millis: u32,
    pub git_remote_url: Option<String>,
    pub runtime_tag: String,
    pub iteration: u32,
}

/// `waitForCompletion` returns an integer exit code: 0 success, >0 explicit
/// failure, <0 timeout/interrupt (spec §4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const TIMEOUT: ExitCode = ExitCode(-1);
    pub const INTERRUPTED: ExitCode = ExitCode(-2);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn is_timeout_or_interrupt(self) -> bool {
        self.0 < 0
    }
}

/// The capability interface a mission-engine node sees; both the
/// container-per-task local provider and the remote fleet-worker HTTP
/// client implement exactly this.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn open(&self, params: OpenParams) -> Result<String, SandboxError>;
    async fn wait_for_completion(&self, sandbox_id: &str, timeout_seconds: u64) -> Result<ExitCode, SandboxError>;
    async fn capture_output(&self, sandbox_id: &str) -> Result<String, SandboxError>;
    async fn detect_changes(&self, task_id: &str, project_path: &str) -> Result<Vec<FileRecord>, SandboxError>;
    async fn teardown(&self, sandbox_id: &str) -> Result<(), SandboxError>;
}

/// ≈10 KB output truncation preserving head and tail with an explicit
/// middle elision marker (spec §4.4, "Output truncation").
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }

    let half = max_bytes / 2;
    let head = take_valid_prefix(output, half);
    let tail = take_valid_suffix(output, half);
    let elided = output.len() - head.len() - tail.len();

    format!("{head}\n\n... [{elided} bytes elided] ...\n\n{tail}")
}

fn take_valid_prefix(s: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn take_valid_suffix(s: &str, max_bytes: usize) -> &str {
    let mut start = s.len().saturating_sub(max_bytes);
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
