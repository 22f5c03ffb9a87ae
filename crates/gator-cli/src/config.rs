//! Configuration file management for gator.
//!
//! Provides a TOML-based config file at `~/.config/gator/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use gator_core::planner::{AnthropicOracleConfig, DeployerDefaults};
use gator_core::token::TokenConfig;
use gator_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub auth: AuthSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub deployer: DeployerSection,
    #[serde(default)]
    pub oracle: OracleSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded token secret (64 hex chars = 32 bytes).
    pub token_secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineSection {
    pub branch_prefix: String,
    pub max_parallel: u32,
    pub wave_cooldown_seconds: u64,
    pub timeout_seconds: u64,
    pub merge_retry_count: u32,
    pub merge_retry_backoff_ms: u64,
    pub file_tree_max: usize,
    pub dependency_max: usize,
    pub output_bytes_max: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            branch_prefix: "gator".to_string(),
            max_parallel: 1,
            wave_cooldown_seconds: 0,
            timeout_seconds: 3600,
            merge_retry_count: 2,
            merge_retry_backoff_ms: 500,
            file_tree_max: 200,
            dependency_max: 50,
            output_bytes_max: 10_000,
        }
    }
}

/// `local` runs agents as subprocesses on this host; `remote` dispatches to
/// an HTTP fleet of workers (`sandbox.worker_urls`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxProviderKind {
    Local,
    Remote,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SandboxSection {
    pub provider: SandboxProviderKind,
    #[serde(default)]
    pub worker_urls: Vec<String>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            provider: SandboxProviderKind::Local,
            worker_urls: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployerSection {
    pub memory_mb: u32,
    pub instances: u32,
    pub buildpack: String,
    pub health_check_path: String,
    pub timeout_seconds: u64,
    pub jre_version: Option<String>,
    #[serde(default)]
    pub service_bindings: Vec<String>,
}

impl Default for DeployerSection {
    fn default() -> Self {
        let d = DeployerDefaults::default();
        Self {
            memory_mb: d.memory_mb,
            instances: d.instances,
            buildpack: d.buildpack,
            health_check_path: d.health_check_path,
            timeout_seconds: d.timeout_seconds,
            jre_version: d.jre_version,
            service_bindings: d.service_bindings,
        }
    }
}

impl From<DeployerSection> for DeployerDefaults {
    fn from(s: DeployerSection) -> Self {
        Self {
            memory_mb: s.memory_mb,
            instances: s.instances,
            buildpack: s.buildpack,
            health_check_path: s.health_check_path,
            timeout_seconds: s.timeout_seconds,
            jre_version: s.jre_version,
            service_bindings: s.service_bindings,
        }
    }
}

/// Planning-oracle configuration. `api_key` is normally left blank and
/// supplied via `ANTHROPIC_API_KEY` instead, so it never has to sit in a
/// config file on disk next to the rest of these settings.
#[derive(Debug, Serialize, Deserialize)]
pub struct OracleSection {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_oracle_base_url")]
    pub base_url: String,
    #[serde(default = "default_oracle_model")]
    pub model: String,
    #[serde(default = "default_oracle_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_oracle_base_url() -> String {
    AnthropicOracleConfig::default().base_url
}

fn default_oracle_model() -> String {
    AnthropicOracleConfig::default().model
}

fn default_oracle_timeout_seconds() -> u64 {
    AnthropicOracleConfig::default().timeout_seconds
}

impl Default for OracleSection {
    fn default() -> Self {
        let d = AnthropicOracleConfig::default();
        Self {
            api_key: d.api_key,
            base_url: d.base_url,
            model: d.model,
            timeout_seconds: d.timeout_seconds,
        }
    }
}

impl From<OracleSection> for AnthropicOracleConfig {
    fn from(s: OracleSection) -> Self {
        Self {
            api_key: s.api_key,
            base_url: s.base_url,
            model: s.model,
            api_version: AnthropicOracleConfig::default().api_version,
            max_tokens: AnthropicOracleConfig::default().max_tokens,
            timeout_seconds: s.timeout_seconds,
        }
        .with_env_fallback()
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the gator config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/gator` or `~/.config/gator`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("gator");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("gator")
}

/// Return the path to the gator config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    // Set permissions to 0600 (owner read/write only) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Token secret generation
// -----------------------------------------------------------------------

/// Generate a random token secret: 32 random bytes, hex-encoded (64 chars).
pub fn generate_token_secret() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct GatorConfig {
    pub db_config: DbConfig,
    pub token_config: TokenConfig,
    pub branch_prefix: String,
    pub sandbox_provider: SandboxProviderKind,
    pub worker_urls: Vec<String>,
    pub max_parallel: u32,
    pub wave_cooldown_seconds: u64,
    pub timeout_seconds: u64,
    pub merge_retry_count: u32,
    pub merge_retry_backoff_ms: u64,
    pub file_tree_max: usize,
    pub dependency_max: usize,
    pub output_bytes_max: usize,
    pub deployer_defaults: DeployerDefaults,
    pub oracle_config: AnthropicOracleConfig,
}

impl GatorConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `GATOR_DATABASE_URL` env > `config_file.database.url` > `DbConfig::DEFAULT_URL`
    /// - Token secret: `GATOR_TOKEN_SECRET` env > `config_file.auth.token_secret` (hex-decoded) > error
    /// - Branch prefix: `GATOR_BRANCH_PREFIX` env > `config_file.engine.branch_prefix` > `"gator"`
    /// - Sandbox provider: `GATOR_SANDBOX_PROVIDER` env (`local`|`remote`) > `config_file.sandbox.provider` > `local`
    /// - Everything else (wave/merge/deployer tuning) comes from the config file's
    ///   `[engine]`/`[deployer]` sections, falling back to their `Default` impls.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        // DB URL resolution.
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("GATOR_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };
        let db_config = DbConfig::new(db_url);

        // Token secret resolution.
        let token_config = if let Ok(secret_hex) = std::env::var("GATOR_TOKEN_SECRET") {
            let bytes = hex::decode(&secret_hex)
                .context("GATOR_TOKEN_SECRET env var is not valid hex")?;
            TokenConfig::new(bytes)
        } else if let Some(ref cfg) = file_config {
            let bytes = hex::decode(&cfg.auth.token_secret)
                .context("invalid hex in config file token_secret")?;
            TokenConfig::new(bytes)
        } else {
            bail!(
                "token secret not found; set GATOR_TOKEN_SECRET or run `gator init` to create a config file"
            );
        };

        let engine = file_config.as_ref().map(|c| &c.engine);
        let sandbox = file_config.as_ref().map(|c| &c.sandbox);
        let deployer = file_config
            .as_ref()
            .map(|c| DeployerDefaults::from(clone_deployer_section(&c.deployer)))
            .unwrap_or_default();
        let oracle_config = file_config
            .as_ref()
            .map(|c| AnthropicOracleConfig::from(clone_oracle_section(&c.oracle)))
            .unwrap_or_else(|| AnthropicOracleConfig::default().with_env_fallback());

        let branch_prefix = std::env::var("GATOR_BRANCH_PREFIX")
            .ok()
            .or_else(|| engine.map(|e| e.branch_prefix.clone()))
            .unwrap_or_else(|| EngineSection::default().branch_prefix);

        let sandbox_provider = match std::env::var("GATOR_SANDBOX_PROVIDER").ok().as_deref() {
            Some("local") => SandboxProviderKind::Local,
            Some("remote") => SandboxProviderKind::Remote,
            Some(other) => bail!("GATOR_SANDBOX_PROVIDER must be 'local' or 'remote', got '{other}'"),
            None => sandbox.map(|s| s.provider).unwrap_or(SandboxProviderKind::Local),
        };
        let worker_urls = sandbox.map(|s| s.worker_urls.clone()).unwrap_or_default();

        let engine_defaults = EngineSection::default();
        let e = |f: fn(&EngineSection) -> u32| engine.map(f).unwrap_or_else(|| f(&engine_defaults));
        let e64 = |f: fn(&EngineSection) -> u64| engine.map(f).unwrap_or_else(|| f(&engine_defaults));
        let esz = |f: fn(&EngineSection) -> usize| engine.map(f).unwrap_or_else(|| f(&engine_defaults));

        Ok(Self {
            db_config,
            token_config,
            branch_prefix,
            sandbox_provider,
            worker_urls,
            max_parallel: e(|x| x.max_parallel),
            wave_cooldown_seconds: e64(|x| x.wave_cooldown_seconds),
            timeout_seconds: e64(|x| x.timeout_seconds),
            merge_retry_count: e(|x| x.merge_retry_count),
            merge_retry_backoff_ms: e64(|x| x.merge_retry_backoff_ms),
            file_tree_max: esz(|x| x.file_tree_max),
            dependency_max: esz(|x| x.dependency_max),
            output_bytes_max: esz(|x| x.output_bytes_max),
            deployer_defaults: deployer,
            oracle_config,
        })
    }
}

fn clone_deployer_section(s: &DeployerSection) -> DeployerSection {
    DeployerSection {
        memory_mb: s.memory_mb,
        instances: s.instances,
        buildpack: s.buildpack.clone(),
        health_check_path: s.health_check_path.clone(),
        timeout_seconds: s.timeout_seconds,
        jre_version: s.jre_version.clone(),
        service_bindings: s.service_bindings.clone(),
    }
}

fn clone_oracle_section(s: &OracleSection) -> OracleSection {
    OracleSection {
        api_key: s.api_key.clone(),
        base_url: s.base_url.clone(),
        model: s.model.clone(),
        timeout_seconds: s.timeout_seconds,
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
