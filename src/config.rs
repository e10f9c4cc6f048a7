//! Server configuration, from command line arguments or a TOML file.

use crate::session::SessionConfig;
use anyhow::Context;
use clap::{Args, Parser};
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where the server waits for clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Listen {
    /// `host:port`
    Tcp(String),
    /// `unix:/path/to/socket`
    Unix(PathBuf),
    /// A single session over stdin/stdout.
    Stdio,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ListenParseError {
    #[error("listen address is empty")]
    Empty,
    #[error("unix socket path is empty")]
    EmptySocketPath,
    #[error("invalid listen address '{0}', expected host:port, unix:/path or stdio")]
    Invalid(String),
}

impl FromStr for Listen {
    type Err = ListenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ListenParseError::Empty);
        }
        if s == "stdio" || s == "-" {
            return Ok(Listen::Stdio);
        }
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ListenParseError::EmptySocketPath);
            }
            return Ok(Listen::Unix(PathBuf::from(path)));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Listen::Tcp(s.to_string()))
            }
            _ => Err(ListenParseError::Invalid(s.to_string())),
        }
    }
}

impl TryFrom<String> for Listen {
    type Error = ListenParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for Listen {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Listen::Tcp(addr) => f.write_str(addr),
            Listen::Unix(path) => write!(f, "unix:{}", path.display()),
            Listen::Stdio => f.write_str("stdio"),
        }
    }
}

impl Default for Listen {
    fn default() -> Self {
        Listen::Tcp("127.0.0.1:4711".to_string())
    }
}

#[derive(Args, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on: host:port, unix:/path or stdio
    #[clap(long, default_value = "127.0.0.1:4711")]
    pub listen: Listen,

    /// Exit after the first debug session ends (single-client mode)
    #[clap(long)]
    pub oneshot: bool,

    /// Optional log file for adapter diagnostics
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Trace DAP traffic into the log file, requires --log-file
    #[clap(long)]
    pub trace_dap: bool,

    /// How long to wait for a debuggee thread to answer, in milliseconds
    #[clap(long, default_value_t = 1000)]
    pub eval_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: Listen::default(),
            oneshot: false,
            log_file: None,
            trace_dap: false,
            eval_timeout_ms: 1000,
        }
    }
}

impl ServerConfig {
    pub fn eval_timeout(&self) -> Duration {
        Duration::from_millis(self.eval_timeout_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            eval_timeout: self.eval_timeout(),
        }
    }

    /// Load configuration from a TOML file, missing keys take default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("parse config file {}", path.display()))
    }

    pub fn from_toml(data: &str) -> anyhow::Result<Self> {
        Ok(toml::de::from_str(data)?)
    }
}

/// Command line of a DAP server host.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
    #[command(flatten)]
    pub server: ServerConfig,

    /// Read configuration from a TOML file instead of the flags above
    #[clap(long, env = "BS_DAP_CONFIG")]
    pub config: Option<PathBuf>,
}

impl ServerArgs {
    /// Final configuration: the file wins over the flags when given.
    pub fn resolve(self) -> anyhow::Result<ServerConfig> {
        match self.config {
            Some(path) => ServerConfig::load(&path),
            None => Ok(self.server),
        }
    }
}
