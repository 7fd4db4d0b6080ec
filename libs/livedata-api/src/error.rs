use std::fmt;

/// Error returned by brokers, subscribers, decoders and listeners.
///
/// `Clone` so that a failure recorded by a capture thread can be handed
/// back on every later `extract_data` call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiveDataError {
    /// Broker unreachable, or a requested topic is absent from its metadata.
    #[error("connection error: {0}")]
    Connection(String),

    /// Mapping or run-info message missing, malformed or inconsistent.
    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    /// Broker reported an error other than timeout / end of partition.
    #[error("transport error: {0}")]
    Transport(String),

    /// Buffers are not allocated yet. Recoverable: poll again later.
    #[error("data not yet available: {0}")]
    NotYetAvailable(String),

    /// Broker rejected an explicit seek.
    #[error("seek error: {0}")]
    Seek(String),

    /// Start position resolved before the first message of a partition.
    #[error("no data: {0}")]
    NoData(String),

    /// Payload bytes could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("not connected: {0}")]
    NotConnected(String),

    /// Local I/O outside the broker connection, e.g. reading a config file.
    #[error("io error: {0}")]
    Io(String),
}

impl LiveDataError {
    /// Errors the caller may retry without reconstructing anything.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LiveDataError::NotYetAvailable(_) | LiveDataError::Seek(_))
    }

    /// Add context to the error, keeping its kind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        match self {
            LiveDataError::Connection(m) => LiveDataError::Connection(format!("{ctx}: {m}")),
            LiveDataError::Bootstrap(m) => LiveDataError::Bootstrap(format!("{ctx}: {m}")),
            LiveDataError::Transport(m) => LiveDataError::Transport(format!("{ctx}: {m}")),
            LiveDataError::NotYetAvailable(m) => {
                LiveDataError::NotYetAvailable(format!("{ctx}: {m}"))
            }
            LiveDataError::Seek(m) => LiveDataError::Seek(format!("{ctx}: {m}")),
            LiveDataError::NoData(m) => LiveDataError::NoData(format!("{ctx}: {m}")),
            LiveDataError::Decode(m) => LiveDataError::Decode(format!("{ctx}: {m}")),
            LiveDataError::Config(m) => LiveDataError::Config(format!("{ctx}: {m}")),
            LiveDataError::NotConnected(m) => LiveDataError::NotConnected(format!("{ctx}: {m}")),
            LiveDataError::Io(m) => LiveDataError::Io(format!("{ctx}: {m}")),
        }
    }
}

// ---------------------------------------------------------------------------
// From impls: standard error types → LiveDataError with matching kind
// ---------------------------------------------------------------------------

impl From<serde_json::Error> for LiveDataError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<std::io::Error> for LiveDataError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for LiveDataError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::Decode(e.to_string())
    }
}
