//! Scoped token generation and validation for the internal worker transport.
//!
//! Remote sandbox workers never see the mission's database credentials;
//! instead each dispatch mints a token scoped to a single `(task_id,
//! attempt)` pair and handed to the worker as `GATOR_WORKER_TOKEN`. The
//! worker presents it back when polling `/internal/instructions/{key}` and
//! publishing to `/internal/output/{key}`, so a leaked token only grants
//! access to that one attempt's data.
//!
//! Tokens are HMAC-SHA256 based. Format: `gator_wt_<task_id>_<attempt>_<hmac_hex>`.

pub mod guard;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Token prefix used to identify gator worker tokens.
const TOKEN_PREFIX: &str = "gator_wt_";

/// Errors that can occur during token operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    #[error("invalid attempt number in token: {0}")]
    InvalidAttempt(String),

    #[error("token HMAC verification failed")]
    HmacMismatch,

    #[error("missing token secret")]
    MissingSecret,
}

/// Configuration for token generation and validation.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// The HMAC secret key bytes.
    pub secret: Vec<u8>,
}

impl TokenConfig {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Create a TokenConfig from the `GATOR_TOKEN_SECRET` environment variable.
    ///
    /// The value must be a hex-encoded string (as written by `gator init`
    /// and forwarded by the mission engine). Returns an error if the
    /// variable is missing or contains invalid hex.
    pub fn from_env() -> Result<Self, TokenError> {
        let secret_hex =
            std::env::var("GATOR_TOKEN_SECRET").map_err(|_| TokenError::MissingSecret)?;
        let secret = hex::decode(&secret_hex).map_err(|e| {
            TokenError::InvalidFormat(format!("GATOR_TOKEN_SECRET is not valid hex: {e}"))
        })?;
        Ok(Self::new(secret))
    }
}

/// Claims extracted from a validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// The task id this token is scoped to (e.g. `TASK-001`).
    pub task_id: String,
    /// The attempt number this token is scoped to.
    pub attempt: u32,
}

/// Generate a scoped worker token for a given task and attempt.
///
/// The HMAC-SHA256 is computed over `<task_id>:<attempt>`. Task ids never
/// contain an underscore (the planner only emits `TASK-NNN`-shaped ids,
/// validated at materialization time), so the token can be split back into
/// its three fields by taking the *last* two underscore-separated pieces
/// as attempt and hmac and treating everything before them as the task id.
pub fn generate_token(config: &TokenConfig, task_id: &str, attempt: u32) -> String {
    let message = format!("{task_id}:{attempt}");
    let mac = compute_hmac(&config.secret, message.as_bytes());
    let hmac_hex = hex::encode(mac);
    format!("{TOKEN_PREFIX}{task_id}_{attempt}_{hmac_hex}")
}

/// Validate a scoped worker token and extract its claims.
pub fn validate_token(config: &TokenConfig, token: &str) -> Result<TokenClaims, TokenError> {
    let rest = token.strip_prefix(TOKEN_PREFIX).ok_or_else(|| {
        TokenError::InvalidFormat("token must start with 'gator_wt_'".to_string())
    })?;

    let mut parts = rest.rsplitn(3, '_');
    let hmac_hex = parts
        .next()
        .ok_or_else(|| TokenError::InvalidFormat("token missing hmac segment".to_string()))?;
    let attempt_str = parts
        .next()
        .ok_or_else(|| TokenError::InvalidFormat("token missing attempt segment".to_string()))?;
    let task_id = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TokenError::InvalidFormat("token missing task id segment".to_string()))?;

    let attempt: u32 = attempt_str
        .parse()
        .map_err(|e: std::num::ParseIntError| TokenError::InvalidAttempt(e.to_string()))?;

    let provided_mac = hex::decode(hmac_hex)
        .map_err(|e| TokenError::InvalidFormat(format!("invalid hex in hmac: {e}")))?;

    let message = format!("{task_id}:{attempt}");
    verify_hmac_constant_time(&config.secret, message.as_bytes(), &provided_mac)?;

    Ok(TokenClaims {
        task_id: task_id.to_string(),
        attempt,
    })
}

fn compute_hmac(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

fn verify_hmac_constant_time(
    key: &[u8],
    message: &[u8],
    expected_mac: &[u8],
) -> Result<(), TokenError> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.verify_slice(expected_mac)
        .map_err(|_| TokenError::HmacMismatch)
}
