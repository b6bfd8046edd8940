//! Server configuration: an optional TOML file, environment overrides and
//! command-line flags, applied in that order.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

use docchat_retrieval::RetrievalConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

/// Environment variable overriding `server.bind`.
pub const BIND_ENV: &str = "DOCCHAT_BIND";

#[derive(Debug, Parser)]
#[command(name = "docchat-server", version, about = "Document chat HTTP API")]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8000
    #[arg(long)]
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: usize,
    /// Lower-case file extensions accepted for upload.
    pub allowed_extensions: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: vec!["pdf".to_string(), "txt".to_string()],
        }
    }
}

impl ServerConfig {
    /// Whether `filename` has an accepted extension.
    pub fn accepts(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.allowed_extensions.iter().any(|a| *a == ext))
    }
}

impl Config {
    /// Build the configuration from command-line flags and the process
    /// environment.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        if let Some(bind) = &cli.bind {
            config.server.bind.clone_from(bind);
        }
        config
            .retrieval
            .validate()
            .context("invalid retrieval configuration")?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("invalid config")
    }

    /// Apply environment overrides. API keys are read by the backends
    /// themselves when the file does not set them.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = var(BIND_ENV).filter(|b| !b.is_empty()) {
            self.server.bind = bind;
        }
    }
}
