//! Access guards for the internal worker transport.
//!
//! The REST surface has two trust zones: the operator-facing mission API
//! (`/missions/...`), open to whoever can reach the server, and the
//! internal worker transport (`/internal/instructions/{key}`,
//! `/internal/output/{key}`), which a remote sandbox worker must present a
//! valid scoped token for.

use super::{TokenClaims, TokenConfig, TokenError, validate_token};

/// Header name carrying the worker's scoped token.
pub const WORKER_TOKEN_HEADER: &str = "x-gator-worker-token";

/// Errors from internal transport guard checks.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("missing worker token")]
    MissingToken,

    #[error("invalid worker token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("token scoped to task {token_task} does not match requested key for task {key_task}")]
    TaskMismatch {
        token_task: String,
        key_task: String,
    },
}

/// Validate a worker token and confirm it is scoped to `expected_task_id`.
///
/// Used by the `/internal/*` handlers to ensure a worker can only read the
/// instructions for, and publish output to, the exact task/attempt it was
/// dispatched for.
pub fn require_worker_scope(
    config: &TokenConfig,
    token: Option<&str>,
    expected_task_id: &str,
) -> Result<TokenClaims, GuardError> {
    let token = token.ok_or(GuardError::MissingToken)?;
    let claims = validate_token(config, token)?;
    if claims.task_id != expected_task_id {
        return Err(GuardError::TaskMismatch {
            token_task: claims.task_id,
            key_task: expected_task_id.to_string(),
        });
    }
    Ok(claims)
}
