//! Request/response protocol between a network broker client and server.
//!
//! Each request and response is one JSON document inside a
//! [`LengthPrefixed`](crate::framing::LengthPrefixed) frame. Payload bytes
//! are base64 encoded.

use serde::{Deserialize, Serialize};

use crate::error::LiveDataError;
use crate::message::{Message, base64_payload};

/// Longest a server will hold a fetch open, whatever the client asks for.
pub const MAX_FETCH_WAIT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub partition: i32,
    pub low: i64,
    pub high: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub name: String,
    pub partitions: Vec<PartitionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListTopics,
    CreateTopic {
        topic: String,
        partitions: i32,
    },
    PartitionCount {
        topic: String,
    },
    Watermarks {
        topic: String,
        partition: i32,
    },
    OffsetForTime {
        topic: String,
        partition: i32,
        timestamp_ms: i64,
    },
    /// Long poll: first available message at any of `positions`.
    Fetch {
        positions: Vec<FetchPosition>,
        max_wait_ms: u64,
    },
    Produce {
        topic: String,
        partition: Option<i32>,
        timestamp_ms: i64,
        #[serde(with = "base64_payload")]
        payload: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Topics { topics: Vec<TopicInfo> },
    Created { created: bool },
    PartitionCount { partitions: Option<i32> },
    Watermarks { low: i64, high: i64 },
    Offset { offset: Option<i64> },
    Fetched { message: Option<Message> },
    Produced { partition: i32, offset: i64 },
    Error { kind: String, message: String },
}

impl Response {
    pub fn error(err: &LiveDataError) -> Self {
        let (kind, message) = match err {
            LiveDataError::Connection(m) => ("connection", m),
            LiveDataError::Bootstrap(m) => ("bootstrap", m),
            LiveDataError::Transport(m) => ("transport", m),
            LiveDataError::NotYetAvailable(m) => ("not_yet_available", m),
            LiveDataError::Seek(m) => ("seek", m),
            LiveDataError::NoData(m) => ("no_data", m),
            LiveDataError::Decode(m) => ("decode", m),
            LiveDataError::Config(m) => ("config", m),
            LiveDataError::NotConnected(m) => ("not_connected", m),
            LiveDataError::Io(m) => ("io", m),
        };
        Response::Error {
            kind: kind.to_string(),
            message: message.clone(),
        }
    }

    /// Rebuild the error carried by an `Error` response.
    ///
    /// Unrecognised kinds come back as `Transport`.
    pub fn into_error(kind: &str, message: String) -> LiveDataError {
        match kind {
            "connection" => LiveDataError::Connection(message),
            "bootstrap" => LiveDataError::Bootstrap(message),
            "not_yet_available" => LiveDataError::NotYetAvailable(message),
            "seek" => LiveDataError::Seek(message),
            "no_data" => LiveDataError::NoData(message),
            "decode" => LiveDataError::Decode(message),
            "config" => LiveDataError::Config(message),
            "not_connected" => LiveDataError::NotConnected(message),
            "io" => LiveDataError::Io(message),
            _ => LiveDataError::Transport(message),
        }
    }
}

impl Request {
    pub fn to_bytes(&self) -> Result<Vec<u8>, LiveDataError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LiveDataError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Response {
    pub fn to_bytes(&self) -> Result<Vec<u8>, LiveDataError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LiveDataError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
