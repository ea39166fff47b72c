//! Configuration for tend, read from `.tend/tend.toml`.
//!
//! Values are layered file → environment → CLI. Every section is optional
//! and falls back to the engine's built-in defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! node_timeout_secs = 120
//! interrupt_before_gate = true
//!
//! [policy]
//! safety_threshold = 8
//! empathy_threshold = 8
//! max_iterations = 3
//!
//! [agent]
//! command = "claude"
//! args = ["--print"]
//!
//! [storage]
//! db_path = "tend.db"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! log_dir = "logs"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::blackboard::MAX_SCORE;
use crate::capability::command::{CommandConfig, DEFAULT_AGENT_CMD};
use crate::engine::{DEFAULT_NODE_TIMEOUT_SECS, EngineConfig};
use crate::logging::{LogFormat, LogSettings};
use crate::supervisor::{EMPATHY_THRESHOLD, MAX_ITERATIONS, SAFETY_THRESHOLD, SupervisorPolicy};

pub const TEND_DIR: &str = ".tend";
pub const CONFIG_FILE: &str = "tend.toml";
pub const DEFAULT_DB_FILE: &str = "tend.db";
pub const DEFAULT_PORT: u16 = 3141;

pub const ENV_AGENT_CMD: &str = "TEND_AGENT_CMD";
pub const ENV_DB_PATH: &str = "TEND_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "TEND_LOG_LEVEL";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Path of the tend directory for a project.
pub fn tend_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(TEND_DIR)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub interrupt_before_gate: bool,
}

fn default_node_timeout_secs() -> u64 {
    DEFAULT_NODE_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            node_timeout_secs: default_node_timeout_secs(),
            interrupt_before_gate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySection {
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold: u8,
    #[serde(default = "default_empathy_threshold")]
    pub empathy_threshold: u8,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_safety_threshold() -> u8 {
    SAFETY_THRESHOLD
}

fn default_empathy_threshold() -> u8 {
    EMPATHY_THRESHOLD
}

fn default_max_iterations() -> u32 {
    MAX_ITERATIONS
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            safety_threshold: SAFETY_THRESHOLD,
            empathy_threshold: EMPATHY_THRESHOLD,
            max_iterations: MAX_ITERATIONS,
        }
    }
}

/// External command used for drafting and reviewing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_cmd")]
    pub command: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
}

fn default_agent_cmd() -> String {
    DEFAULT_AGENT_CMD.to_string()
}

fn default_agent_args() -> Vec<String> {
    CommandConfig::default().args
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: default_agent_cmd(),
            args: default_agent_args(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    /// SQLite file; relative paths resolve against `.tend/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for daily-rolling JSON logs; relative paths resolve against `.tend/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
        }
    }
}

/// Contents of `tend.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TendToml {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TendToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tend.toml")
    }

    /// Load `tend.toml` from `tend_dir`, or defaults if there is none.
    pub fn load_or_default(tend_dir: &Path) -> Result<Self> {
        let config_path = tend_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize tend.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `TEND_*` overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(cmd) = lookup(ENV_AGENT_CMD).filter(|v| !v.trim().is_empty()) {
            self.agent.command = cmd;
        }
        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.trim().is_empty()) {
            self.storage.db_path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.engine.node_timeout_secs == 0 {
            warnings.push("engine.node_timeout_secs must be positive".to_string());
        }
        for (name, value) in [
            ("safety_threshold", self.policy.safety_threshold),
            ("empathy_threshold", self.policy.empathy_threshold),
        ] {
            if value > MAX_SCORE {
                warnings.push(format!(
                    "policy.{} = {} is above the maximum score {}",
                    name, value, MAX_SCORE
                ));
            }
        }
        if self.policy.max_iterations == 0 {
            warnings.push("policy.max_iterations must be at least 1".to_string());
        }
        if self.agent.command.trim().is_empty() {
            warnings.push("agent.command is empty".to_string());
        }
        if self.server.port == 0 {
            warnings.push("server.port must not be 0".to_string());
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            warnings.push(format!(
                "Invalid logging.level '{}'. Valid values: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        warnings
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            node_timeout: Duration::from_secs(self.engine.node_timeout_secs),
            interrupt_before_gate: self.engine.interrupt_before_gate,
        }
    }

    pub fn policy(&self) -> SupervisorPolicy {
        SupervisorPolicy {
            safety_threshold: self.policy.safety_threshold,
            empathy_threshold: self.policy.empathy_threshold,
            max_iterations: self.policy.max_iterations,
        }
    }
}

/// Template written by `tend config init`.
pub fn default_config_template() -> String {
    format!(
        r#"# tend configuration

[engine]
# Seconds a drafter or reviewer call may take before the node fails.
node_timeout_secs = {timeout}
# Pause for a human decision once the supervisor accepts a draft.
interrupt_before_gate = true

[policy]
safety_threshold = {safety}
empathy_threshold = {empathy}
max_iterations = {max}

[agent]
command = "{cmd}"
args = ["--print"]

[storage]
# Relative to .tend/
# db_path = "{db}"

[server]
host = "127.0.0.1"
port = {port}

[logging]
level = "info"
# "pretty" or "json"
format = "pretty"
# log_dir = "logs"
"#,
        timeout = DEFAULT_NODE_TIMEOUT_SECS,
        safety = SAFETY_THRESHOLD,
        empathy = EMPATHY_THRESHOLD,
        max = MAX_ITERATIONS,
        cmd = DEFAULT_AGENT_CMD,
        db = DEFAULT_DB_FILE,
        port = DEFAULT_PORT,
    )
}

/// Resolved configuration for a project directory.
#[derive(Debug, Clone)]
pub struct TendConfig {
    pub project_dir: PathBuf,
    pub tend_dir: PathBuf,
    pub toml: TendToml,
}

impl TendConfig {
    /// Load `.tend/tend.toml` under `project_dir` and apply environment overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let tend_dir = tend_dir(&project_dir);
        let mut toml = TendToml::load_or_default(&tend_dir)?;
        toml.apply_env(|key| std::env::var(key).ok());

        Ok(Self {
            project_dir,
            tend_dir,
            toml,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.tend_dir.join(CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        let path = self
            .toml
            .storage
            .db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE));
        self.resolve(path)
    }

    pub fn command_config(&self) -> CommandConfig {
        CommandConfig::default()
            .with_command(&self.toml.agent.command)
            .with_args(self.toml.agent.args.clone())
            .with_working_dir(self.project_dir.clone())
    }

    /// Logging settings, with `format` overriding the file when given.
    pub fn log_settings(&self, format: Option<LogFormat>, verbose: bool) -> LogSettings {
        let level = if verbose {
            "debug".to_string()
        } else {
            self.toml.logging.level.clone()
        };
        LogSettings {
            level,
            format: format.unwrap_or(self.toml.logging.format),
            log_dir: self.toml.logging.log_dir.clone().map(|dir| self.resolve(dir)),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    fn resolve(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.tend_dir.join(path)
        }
    }
}
