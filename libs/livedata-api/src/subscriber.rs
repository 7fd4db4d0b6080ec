use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LiveDataError;
use crate::message::Message;

/// Where a new subscription starts reading, per partition.
///
/// Resolution against the partition watermarks `[low, high)`:
///
/// | position        | resolved offset                      | failure                   |
/// |-----------------|--------------------------------------|---------------------------|
/// | `Latest`        | `high`                               | -                         |
/// | `Offset(n)`     | `n` clamped into `[low, high]`       | `NoData` if `n < 0`       |
/// | `SecondToLast`  | `high - 2`, or `low` if that is < 0  | -                         |
/// | `LastOnly`      | `high - 1`                           | `NoData` if partition empty |
/// | `AtTimestamp(t)`| first offset with timestamp >= `t`   | falls back to `high`      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribePosition {
    Latest,
    Offset(i64),
    SecondToLast,
    LastOnly,
    /// Milliseconds since the Unix epoch.
    AtTimestamp(i64),
}

impl SubscribePosition {
    /// Offset zero, i.e. everything still retained.
    pub const EARLIEST: SubscribePosition = SubscribePosition::Offset(0);
}

/// A consumer assigned to concrete `(topic, partition, offset)` tuples.
///
/// Owned by exactly one reader; not shared across threads.
pub trait TopicSubscriber: Send {
    /// Topics this subscriber is assigned to.
    fn topics(&self) -> &[String];

    /// Blocking pull of the next message across all assigned partitions.
    ///
    /// `Ok(None)` on timeout or end of partition. Both are normal: the
    /// producer may resume later.
    fn consume(&mut self, timeout: Duration) -> Result<Option<Message>, LiveDataError>;

    /// Reposition a single assigned partition.
    fn seek(&mut self, topic: &str, partition: i32, offset: i64) -> Result<(), LiveDataError>;

    /// Next offset to be read, per topic, ordered by partition.
    fn current_offsets(&self) -> HashMap<String, Vec<i64>>;

    /// Per topic, per partition: first offset with timestamp >= `timestamp_ms`.
    fn offsets_for_timestamp(
        &self,
        timestamp_ms: i64,
    ) -> Result<HashMap<String, Vec<i64>>, LiveDataError>;
}

/// Factory for subscribers. Holds nothing beyond its address.
pub trait Broker: Send + Sync {
    fn address(&self) -> &str;

    fn subscribe(
        &self,
        topics: &[String],
        position: SubscribePosition,
    ) -> Result<Box<dyn TopicSubscriber>, LiveDataError>;

    /// Convenience for the common single-topic case.
    fn subscribe_one(
        &self,
        topic: &str,
        position: SubscribePosition,
    ) -> Result<Box<dyn TopicSubscriber>, LiveDataError> {
        self.subscribe(&[topic.to_string()], position)
    }
}

/// Turns an address string into a [`Broker`].
pub trait BrokerConnector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Arc<dyn Broker>, LiveDataError>;
}
