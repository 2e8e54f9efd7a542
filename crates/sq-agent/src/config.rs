//! Service configuration, loadable from TOML and overridable by environment.

use std::path::PathBuf;

use serde::Deserialize;
use sq_log_tools::ParserConfig;
use sq_table::{MaterializeOptions, RelationOptions};

use crate::agent::AgentSettings;
use crate::llm::OllamaConfig;

/// Top-level configuration for `sshq`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub data: DataConfig,
    /// Ollama settings.
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Where the log and the materialized table live.
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Raw SSH auth log.
    #[serde(default = "default_log_path")]
    pub log_path: String,
    /// Materialized SQLite artifact.
    #[serde(default = "default_table_path")]
    pub table_path: PathBuf,
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Year for BSD timestamps. Defaults to the current year.
    #[serde(default)]
    pub default_year: Option<i32>,
}

fn default_log_path() -> String {
    "data/ssh-audit.log".into()
}
fn default_table_path() -> PathBuf {
    PathBuf::from("data/ssh-audit.sqlite")
}
fn default_table_name() -> String {
    "ssh".into()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            table_path: default_table_path(),
            table_name: default_table_name(),
            default_year: None,
        }
    }
}

/// Agent loop and SQL execution settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(flatten)]
    pub limits: AgentSettings,
    /// Maximum rows returned to the model per query.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Reject anything but a single SELECT before it reaches the engine.
    #[serde(default = "default_strict_sql")]
    pub strict_sql: bool,
    /// Optional file whose contents replace the built-in instructions.
    #[serde(default)]
    pub system_prompt_path: Option<PathBuf>,
}

fn default_max_rows() -> usize {
    200
}
fn default_strict_sql() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            limits: AgentSettings::default(),
            max_rows: default_max_rows(),
            strict_sql: default_strict_sql(),
            system_prompt_path: None,
        }
    }
}

impl ServiceConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Apply `SSHQ_LOG_PATH`, `SSHQ_TABLE_PATH`, `OLLAMA_HOST` and
    /// `OLLAMA_MODEL` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("SSHQ_LOG_PATH") {
            self.data.log_path = v;
        }
        if let Some(v) = get("SSHQ_TABLE_PATH") {
            self.data.table_path = PathBuf::from(v);
        }
        if let Some(v) = get("OLLAMA_HOST") {
            self.ollama.host = normalize_host(&v);
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            self.ollama.model = v;
        }
    }

    pub fn materialize_options(&self) -> MaterializeOptions {
        MaterializeOptions {
            table_name: self.data.table_name.clone(),
            parser: self
                .data
                .default_year
                .map(ParserConfig::with_year)
                .unwrap_or_default(),
        }
    }

    pub fn relation_options(&self) -> RelationOptions {
        RelationOptions {
            strict: self.agent.strict_sql,
            max_rows: self.agent.max_rows,
            query_timeout_secs: self.agent.limits.query_timeout_secs,
        }
    }
}

/// `OLLAMA_HOST` is often given as `host:port` without a scheme.
fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}
