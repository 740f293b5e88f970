// ABOUTME: Configuration for the fleet supervisor.
// ABOUTME: Loaded from a TOML file with environment variable expansion and sensible defaults.

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Starter configuration written by `fleet init`.
pub const TEMPLATE: &str = r#"# fleet supervisor configuration

[source]
# "http" polls a remote endpoint, "file" re-reads a local TOML file each tick.
kind = "http"
url = "http://localhost:8080"
method = "GET"
path = "/api/agents/active"
# Expanded from the environment when the config is loaded.
token = "${FLEET_SOURCE_TOKEN}"
timeout_secs = 10

[worker]
# Program started once per desired identity.
program = "fleet-worker"
args = []
identity_var = "AGENT_ID"
param_prefix = ""
# Parent variables the worker must not inherit; it resolves its own credential.
clear_env = ["BOT_TOKEN"]
# Seconds to wait after SIGTERM before killing; 0 never escalates.
stop_timeout_secs = 10

[reconcile]
interval_secs = 30
# Crash-loop backoff, disabled while backoff_initial_secs is 0.
backoff_initial_secs = 0
backoff_max_secs = 300
backoff_reset_secs = 300

[liveness]
bind = "0.0.0.0"
# Leave unset (or 0) for an ephemeral port.
# port = 8081
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the desired worker set comes from
    pub source: SourceConfig,

    /// How worker processes are launched
    pub worker: WorkerConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Http(HttpSourceConfig),
    File(FileSourceConfig),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Base URL of the remote source (e.g., "https://api.example.com")
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default = "default_source_path")]
    pub path: String,

    /// Bearer token sent with every fetch
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl fmt::Debug for HttpSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSourceConfig")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl HttpSourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            path: default_source_path(),
            token: None,
            timeout_secs: default_source_timeout(),
        }
    }

    /// Full request URL (base url joined with path)
    pub fn endpoint(&self) -> String {
        let base = self.url.trim_end_matches('/');
        if self.path.is_empty() {
            base.to_string()
        } else if self.path.starts_with('/') {
            format!("{}{}", base, self.path)
        } else {
            format!("{}/{}", base, self.path)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Token, treating an empty string (unset env var) as absent
    pub fn bearer_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSourceConfig {
    /// TOML file with `[[workers]]` tables
    pub path: String,
}

impl FileSourceConfig {
    pub fn path_expanded(&self) -> PathBuf {
        shellexpand::tilde(&self.path).into_owned().into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker executable
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    /// Variable carrying the worker identity
    #[serde(default = "default_identity_var")]
    pub identity_var: String,

    /// Prefix for variables derived from launch params
    #[serde(default)]
    pub param_prefix: String,

    /// Inherited variables removed before the worker starts
    #[serde(default = "default_clear_env")]
    pub clear_env: Vec<String>,

    /// Grace period between SIGTERM and a forced kill (0 = never force)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

impl WorkerConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            identity_var: default_identity_var(),
            param_prefix: String::new(),
            clear_env: default_clear_env(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }

    pub fn program_expanded(&self) -> PathBuf {
        shellexpand::tilde(&self.program).into_owned().into()
    }

    pub fn working_dir_expanded(&self) -> Option<PathBuf> {
        self.working_dir
            .as_ref()
            .map(|dir| shellexpand::tilde(dir).into_owned().into())
    }

    /// None when stops never escalate to a kill
    pub fn stop_timeout(&self) -> Option<Duration> {
        (self.stop_timeout_secs > 0).then(|| Duration::from_secs(self.stop_timeout_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default)]
    pub backoff_initial_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,

    #[serde(default = "default_backoff_reset")]
    pub backoff_reset_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            backoff_initial_secs: 0,
            backoff_max_secs: default_backoff_max(),
            backoff_reset_secs: default_backoff_reset(),
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on; unset or 0 picks an ephemeral port
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: None,
        }
    }
}

impl LivenessConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port.unwrap_or(0))
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_source_path() -> String {
    "/api/agents/active".to_string()
}

fn default_source_timeout() -> u64 {
    10
}

fn default_identity_var() -> String {
    "AGENT_ID".to_string()
}

fn default_clear_env() -> Vec<String> {
    vec!["BOT_TOKEN".to_string()]
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_interval() -> u64 {
    30
}

fn default_backoff_max() -> u64 {
    300
}

fn default_backoff_reset() -> u64 {
    300
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// Parse config text, expanding `${VAR}` references first
    pub fn parse(content: &str) -> Result<Self> {
        let content = expand_env(content);
        let config: Config = toml::from_str(&content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        write_config(path, &content)
    }

    /// Write the commented starter config
    pub fn write_template(path: &Path) -> Result<()> {
        write_config(path, TEMPLATE)
    }

    /// Get the default config file path (~/.config/fleet/fleet.toml)
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .context("Could not determine home directory")
            })?
            .join("fleet");
        Ok(config_dir.join("fleet.toml"))
    }

    /// Reject configs the supervisor cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.worker.program.trim().is_empty(),
            "worker.program is required"
        );
        ensure!(
            !self.worker.identity_var.trim().is_empty(),
            "worker.identity_var must not be empty"
        );
        ensure!(
            self.reconcile.interval_secs > 0,
            "reconcile.interval_secs must be greater than zero"
        );
        ensure!(
            self.reconcile.backoff_initial_secs <= self.reconcile.backoff_max_secs,
            "reconcile.backoff_initial_secs must not exceed backoff_max_secs"
        );

        match &self.source {
            SourceConfig::Http(http) => {
                if http.url.trim().is_empty() {
                    bail!("source.url is required for an http source");
                }
                if !(http.url.starts_with("http://") || http.url.starts_with("https://")) {
                    bail!("source.url must start with http:// or https://");
                }
                ensure!(http.timeout_secs > 0, "source.timeout_secs must be greater than zero");
            }
            SourceConfig::File(file) => {
                ensure!(!file.path.trim().is_empty(), "source.path is required for a file source");
            }
        }

        Ok(())
    }
}

fn write_config(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create config directory {}", parent.display())
        })?;
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    Ok(())
}

/// Expand environment variables, warning on undefined vars.
fn expand_env(content: &str) -> String {
    shellexpand::env_with_context_no_errors(content, |var: &str| match std::env::var(var) {
        Ok(val) => Some(val),
        Err(_) => {
            tracing::warn!(
                variable = %var,
                "Environment variable not defined, using empty string"
            );
            Some(String::new())
        }
    })
    .into_owned()
}
