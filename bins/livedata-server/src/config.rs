use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use livedata_engine::broker::DEFAULT_RETENTION;
use livedata_engine::{EventStart, ListenerConfig};

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "livedata-server", about = "Live acquisition data broker and listener")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the broker (TCP protocol + HTTP API)
    Serve(ServeArgs),
    /// Follow an instrument's streams and log what is extracted
    Listen(ListenArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the broker TOML config; defaults apply if it does not exist
    #[arg(long, default_value = "broker.toml", env = "LIVEDATA_BROKER_CONFIG")]
    pub config: String,
}

#[derive(Args, Clone, Debug)]
pub struct ListenArgs {
    /// Path to a listener TOML config
    #[arg(long, env = "LIVEDATA_LISTENER_CONFIG")]
    pub config: Option<String>,

    /// Broker address, host:port
    #[arg(long)]
    pub address: Option<String>,

    /// Instrument name (topic prefix)
    #[arg(long)]
    pub instrument: Option<String>,

    /// Listener kind: event | histo
    #[arg(long)]
    pub kind: Option<String>,

    /// Read the data stream from its earliest retained message
    #[arg(long)]
    pub from_start: bool,

    /// Milliseconds between extractions
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,
}

impl ListenArgs {
    /// File config (or defaults) overridden by command-line flags.
    pub fn listener_config(&self) -> Result<ListenerConfig, ServerError> {
        let mut cfg = match &self.config {
            Some(path) => ListenerConfig::load(path).map_err(|e| ServerError::Config {
                context: "listener",
                detail: e.to_string(),
            })?,
            None => ListenerConfig::default(),
        };
        if let Some(address) = &self.address {
            cfg.address = address.clone();
        }
        if let Some(instrument) = &self.instrument {
            cfg.instrument = instrument.clone();
        }
        if let Some(kind) = &self.kind {
            cfg.kind = kind.clone();
        }
        if self.from_start {
            cfg.start = EventStart::Earliest;
        }
        if cfg.instrument.is_empty() {
            return Err(ServerError::Config {
                context: "listener",
                detail: "instrument is required (--instrument or `instrument` in config)".into(),
            });
        }
        Ok(cfg)
    }
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Partitions for topics created at startup.
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    /// Messages kept per partition.
    #[serde(default = "default_retention")]
    pub retention: usize,
    /// Instruments whose standard topics are created at startup.
    #[serde(default)]
    pub instruments: Vec<String>,
    /// Extra topics created at startup.
    #[serde(default)]
    pub topics: Vec<String>,
}

fn default_broker_port() -> u16 {
    9092
}
fn default_api_port() -> u16 {
    9200
}
fn default_partitions() -> i32 {
    1
}
fn default_retention() -> usize {
    DEFAULT_RETENTION
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_port: default_broker_port(),
            api_port: default_api_port(),
            partitions: default_partitions(),
            retention: default_retention(),
            instruments: Vec::new(),
            topics: Vec::new(),
        }
    }
}

impl BrokerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| ServerError::Config {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        Self::parse(&content).map_err(|e| match e {
            ServerError::Config { context, detail } => ServerError::Config {
                context,
                detail: format!("'{path}': {detail}"),
            },
            other => other,
        })
    }

    /// Defaults when `path` does not exist.
    pub fn load_or_default(path: &str) -> Result<Self, ServerError> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            tracing::info!(config = %path, "no broker config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn parse(toml_str: &str) -> Result<Self, ServerError> {
        let cfg: Self = toml::from_str(toml_str).map_err(|e| ServerError::Config {
            context: "parse",
            detail: e.to_string(),
        })?;
        if cfg.partitions < 1 {
            return Err(ServerError::Config {
                context: "parse",
                detail: format!("partitions must be at least 1, got {}", cfg.partitions),
            });
        }
        Ok(cfg)
    }
}
