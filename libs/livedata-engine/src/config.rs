use std::time::Duration;

use serde::Deserialize;

use livedata_api::{LiveDataError, SubscribePosition};

/// Listener configuration, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Broker address, `host:port`.
    #[serde(default = "default_address")]
    pub address: String,

    /// Instrument name; topic names are derived from it.
    #[serde(default)]
    pub instrument: String,

    /// Registered listener kind: `"event"` or `"histo"`.
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Where the data stream subscription starts.
    #[serde(default)]
    pub start: EventStart,

    /// Also follow `<instrument>_sampleEnv` when the topic exists.
    #[serde(default = "default_sample_env")]
    pub sample_env: bool,

    /// Sleep between capture loop iterations.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on a single blocking consume.
    #[serde(default = "default_consume_timeout_ms")]
    pub consume_timeout_ms: u64,

    /// How long bootstrap waits for the mapping and run-info messages.
    #[serde(default = "default_bootstrap_timeout_ms")]
    pub bootstrap_timeout_ms: u64,

    /// How long `extract_data` keeps retrying while bootstrap is unfinished.
    #[serde(default = "default_extract_wait_ms")]
    pub extract_wait_ms: u64,

    /// Expected events per spectrum between extracts.
    #[serde(default = "default_buffer_size_hint")]
    pub buffer_size_hint: usize,
}

fn default_address() -> String {
    "localhost:9092".into()
}
fn default_kind() -> String {
    "event".into()
}
fn default_sample_env() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    10
}
fn default_consume_timeout_ms() -> u64 {
    100
}
fn default_bootstrap_timeout_ms() -> u64 {
    10_000
}
fn default_extract_wait_ms() -> u64 {
    5_000
}
fn default_buffer_size_hint() -> usize {
    500
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            instrument: String::new(),
            kind: default_kind(),
            start: EventStart::default(),
            sample_env: default_sample_env(),
            poll_interval_ms: default_poll_interval_ms(),
            consume_timeout_ms: default_consume_timeout_ms(),
            bootstrap_timeout_ms: default_bootstrap_timeout_ms(),
            extract_wait_ms: default_extract_wait_ms(),
            buffer_size_hint: default_buffer_size_hint(),
        }
    }
}

impl ListenerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, LiveDataError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LiveDataError::from(e).with_context(path))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, LiveDataError> {
        toml::from_str(toml_str).map_err(|e| LiveDataError::Config(e.to_string()))
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            consume_timeout: Duration::from_millis(self.consume_timeout_ms),
            bootstrap_timeout: Duration::from_millis(self.bootstrap_timeout_ms),
            buffer_size_hint: self.buffer_size_hint,
        }
    }

    pub fn extract_wait(&self) -> Duration {
        Duration::from_millis(self.extract_wait_ms)
    }
}

/// Start of the data stream subscription.
///
/// TOML: `start = "latest"`, `start = "earliest"` or
/// `start = { timestamp = 1700000000000 }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStart {
    #[default]
    Latest,
    Earliest,
    /// ms since the Unix epoch.
    Timestamp(i64),
}

impl EventStart {
    pub fn position(self) -> SubscribePosition {
        match self {
            EventStart::Latest => SubscribePosition::Latest,
            EventStart::Earliest => SubscribePosition::EARLIEST,
            EventStart::Timestamp(ms) => SubscribePosition::AtTimestamp(ms),
        }
    }
}

/// Timing knobs for a stream decoder.
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    pub poll_interval: Duration,
    pub consume_timeout: Duration,
    pub bootstrap_timeout: Duration,
    pub buffer_size_hint: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        ListenerConfig::default().decoder_config()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = ListenerConfig::parse("").unwrap();
        assert_eq!(cfg.address, "localhost:9092");
        assert_eq!(cfg.kind, "event");
        assert_eq!(cfg.start, EventStart::Latest);
        assert_eq!(cfg.extract_wait(), Duration::from_secs(5));
    }

    #[test]
    fn start_variants_parse() {
        let cfg = ListenerConfig::parse("start = \"earliest\"").unwrap();
        assert_eq!(cfg.start.position(), SubscribePosition::Offset(0));

        let cfg = ListenerConfig::parse("start = { timestamp = 1700000000000 }").unwrap();
        assert_eq!(
            cfg.start.position(),
            SubscribePosition::AtTimestamp(1_700_000_000_000)
        );
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "address = \"broker:9000\"\ninstrument = \"MARI\"\nkind = \"histo\"\npoll_interval_ms = 1"
        )
        .unwrap();

        let cfg = ListenerConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.address, "broker:9000");
        assert_eq!(cfg.instrument, "MARI");
        assert_eq!(cfg.kind, "histo");
        assert_eq!(cfg.decoder_config().poll_interval, Duration::from_millis(1));
    }

    #[test]
    fn bad_document_is_config_error() {
        let err = ListenerConfig::parse("poll_interval_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, LiveDataError::Config(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ListenerConfig::load("/nonexistent/listener.toml").unwrap_err();
        assert!(matches!(err, LiveDataError::Io(m) if m.contains("/nonexistent/listener.toml")));
    }
}
