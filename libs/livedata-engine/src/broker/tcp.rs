use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use livedata_api::framing::LengthPrefixed;
use livedata_api::wire::{FetchPosition, MAX_FETCH_WAIT_MS, Request, Response, TopicInfo};
use livedata_api::{
    Broker, BrokerConnector, LiveDataError, Message, SubscribePosition, TopicSubscriber,
};

use super::log::{LogSubscriber, PartitionLog};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Slack on top of a fetch's own wait before a read is declared dead.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

// ═══════════════════════════════════════════════════════════════
//  TcpConnection
// ═══════════════════════════════════════════════════════════════

/// One blocking request/response connection to a broker server.
pub struct TcpConnection {
    address: String,
    stream: Mutex<TcpStream>,
    framing: LengthPrefixed,
}

impl TcpConnection {
    pub fn open(address: &str) -> Result<Self, LiveDataError> {
        let addrs = address
            .to_socket_addrs()
            .map_err(|e| LiveDataError::Connection(format!("resolve {address}: {e}")))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(addr = %address, error = %e, "set_nodelay failed");
                    }
                    tracing::info!(addr = %address, "connected to broker");
                    return Ok(Self {
                        address: address.to_string(),
                        stream: Mutex::new(stream),
                        framing: LengthPrefixed::default(),
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(LiveDataError::Connection(match last_err {
            Some(e) => format!("TCP connect to {address}: {e}"),
            None => format!("TCP connect to {address}: no addresses resolved"),
        }))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn lock_stream(&self) -> MutexGuard<'_, TcpStream> {
        match self.stream.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(addr = %self.address, "connection lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Send one request and wait for its response. `Error` responses come
    /// back as the error they carry.
    pub fn request(&self, req: &Request, wait: Duration) -> Result<Response, LiveDataError> {
        let body = req.to_bytes()?;
        let mut stream = self.lock_stream();
        stream
            .set_read_timeout(Some(wait + IO_TIMEOUT))
            .map_err(|e| LiveDataError::Transport(format!("{}: {e}", self.address)))?;
        self.framing
            .write_frame(&mut *stream, &body)
            .map_err(|e| e.with_context(&self.address))?;
        let reply = self
            .framing
            .read_frame(&mut *stream)
            .map_err(|e| e.with_context(&self.address))?;
        drop(stream);

        match Response::from_bytes(&reply)? {
            Response::Error { kind, message } => Err(Response::into_error(&kind, message)),
            other => Ok(other),
        }
    }

    pub fn list_topics(&self) -> Result<Vec<TopicInfo>, LiveDataError> {
        match self.request(&Request::ListTopics, Duration::ZERO)? {
            Response::Topics { topics } => Ok(topics),
            other => Err(unexpected("list_topics", &other)),
        }
    }
}

fn unexpected(op: &str, resp: &Response) -> LiveDataError {
    LiveDataError::Transport(format!("unexpected response to {op}: {resp:?}"))
}

impl PartitionLog for TcpConnection {
    fn describe(&self) -> String {
        self.address.clone()
    }

    fn partition_count(&self, topic: &str) -> Result<Option<i32>, LiveDataError> {
        let req = Request::PartitionCount {
            topic: topic.to_string(),
        };
        match self.request(&req, Duration::ZERO)? {
            Response::PartitionCount { partitions } => Ok(partitions),
            other => Err(unexpected("partition_count", &other)),
        }
    }

    fn watermarks(&self, topic: &str, partition: i32) -> Result<(i64, i64), LiveDataError> {
        let req = Request::Watermarks {
            topic: topic.to_string(),
            partition,
        };
        match self.request(&req, Duration::ZERO)? {
            Response::Watermarks { low, high } => Ok((low, high)),
            other => Err(unexpected("watermarks", &other)),
        }
    }

    fn offset_for_time(
        &self,
        topic: &str,
        partition: i32,
        timestamp_ms: i64,
    ) -> Result<Option<i64>, LiveDataError> {
        let req = Request::OffsetForTime {
            topic: topic.to_string(),
            partition,
            timestamp_ms,
        };
        match self.request(&req, Duration::ZERO)? {
            Response::Offset { offset } => Ok(offset),
            other => Err(unexpected("offset_for_time", &other)),
        }
    }

    fn fetch(
        &self,
        positions: &[FetchPosition],
        max_wait: Duration,
    ) -> Result<Option<Message>, LiveDataError> {
        let max_wait_ms = (max_wait.as_millis() as u64).min(MAX_FETCH_WAIT_MS);
        let req = Request::Fetch {
            positions: positions.to_vec(),
            max_wait_ms,
        };
        match self.request(&req, Duration::from_millis(max_wait_ms))? {
            Response::Fetched { message } => Ok(message),
            other => Err(unexpected("fetch", &other)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  TcpBroker
// ═══════════════════════════════════════════════════════════════

/// Network broker. Holds only the address; each subscriber opens its own
/// connection.
#[derive(Debug, Clone)]
pub struct TcpBroker {
    address: String,
}

impl TcpBroker {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Broker for TcpBroker {
    fn address(&self) -> &str {
        &self.address
    }

    fn subscribe(
        &self,
        topics: &[String],
        position: SubscribePosition,
    ) -> Result<Box<dyn TopicSubscriber>, LiveDataError> {
        let conn = TcpConnection::open(&self.address)?;
        Ok(Box::new(LogSubscriber::subscribe(conn, topics, position)?))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl BrokerConnector for TcpConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn Broker>, LiveDataError> {
        if address.trim().is_empty() {
            return Err(LiveDataError::Connection("empty broker address".into()));
        }
        Ok(Arc::new(TcpBroker::new(address)))
    }
}

// ═══════════════════════════════════════════════════════════════
//  TcpProducer
// ═══════════════════════════════════════════════════════════════

/// Write side of the network broker.
pub struct TcpProducer {
    conn: TcpConnection,
}

impl TcpProducer {
    pub fn connect(address: &str) -> Result<Self, LiveDataError> {
        Ok(Self {
            conn: TcpConnection::open(address)?,
        })
    }

    /// `false` if the topic already existed.
    pub fn create_topic(&self, topic: &str, partitions: i32) -> Result<bool, LiveDataError> {
        let req = Request::CreateTopic {
            topic: topic.to_string(),
            partitions,
        };
        match self.conn.request(&req, Duration::ZERO)? {
            Response::Created { created } => Ok(created),
            other => Err(unexpected("create_topic", &other)),
        }
    }

    /// Returns `(partition, offset)` of the stored message.
    pub fn produce(
        &self,
        topic: &str,
        partition: Option<i32>,
        payload: Vec<u8>,
        timestamp_ms: i64,
    ) -> Result<(i32, i64), LiveDataError> {
        let req = Request::Produce {
            topic: topic.to_string(),
            partition,
            timestamp_ms,
            payload,
        };
        match self.conn.request(&req, Duration::ZERO)? {
            Response::Produced { partition, offset } => Ok((partition, offset)),
            other => Err(unexpected("produce", &other)),
        }
    }

    pub fn list_topics(&self) -> Result<Vec<TopicInfo>, LiveDataError> {
        self.conn.list_topics()
    }
}
