use std::collections::HashMap;
use std::time::Duration;

use livedata_api::wire::FetchPosition;
use livedata_api::{LiveDataError, Message, SubscribePosition, TopicSubscriber};

/// Read side of a partitioned, offset-addressed message log.
pub trait PartitionLog: Send + Sync {
    /// Where the log lives, for messages.
    fn describe(&self) -> String;

    /// `None` if the topic does not exist.
    fn partition_count(&self, topic: &str) -> Result<Option<i32>, LiveDataError>;

    /// `(low, high)`: first retained offset and next offset to be written.
    fn watermarks(&self, topic: &str, partition: i32) -> Result<(i64, i64), LiveDataError>;

    /// First offset with timestamp >= `timestamp_ms`; `None` if there is none.
    fn offset_for_time(
        &self,
        topic: &str,
        partition: i32,
        timestamp_ms: i64,
    ) -> Result<Option<i64>, LiveDataError>;

    /// First message available at any of `positions`, tried in order.
    /// Waits up to `max_wait` for one to arrive.
    fn fetch(
        &self,
        positions: &[FetchPosition],
        max_wait: Duration,
    ) -> Result<Option<Message>, LiveDataError>;
}

/// [`TopicSubscriber`] over any [`PartitionLog`].
///
/// Every partition of every requested topic is assigned. Partitions are
/// polled round-robin so a busy one cannot starve the rest.
pub struct LogSubscriber<L> {
    log: L,
    topics: Vec<String>,
    assigned: Vec<FetchPosition>,
}

impl<L: PartitionLog> LogSubscriber<L> {
    pub fn subscribe(
        log: L,
        topics: &[String],
        position: SubscribePosition,
    ) -> Result<Self, LiveDataError> {
        let mut assigned = Vec::new();
        for topic in topics {
            let partitions = log.partition_count(topic)?.ok_or_else(|| {
                LiveDataError::Connection(format!(
                    "topic '{topic}' not found on broker {}",
                    log.describe()
                ))
            })?;
            for partition in 0..partitions {
                let offset = resolve_offset(&log, topic, partition, position)?;
                tracing::info!(
                    topic = %topic,
                    partition,
                    offset,
                    position = ?position,
                    "assigned partition"
                );
                assigned.push(FetchPosition {
                    topic: topic.clone(),
                    partition,
                    offset,
                });
            }
        }
        Ok(Self {
            log,
            topics: topics.to_vec(),
            assigned,
        })
    }

    /// One value per assigned partition, grouped by topic, partition order.
    fn grouped(
        &self,
        mut value: impl FnMut(&FetchPosition) -> Result<i64, LiveDataError>,
    ) -> Result<HashMap<String, Vec<i64>>, LiveDataError> {
        let mut sorted: Vec<&FetchPosition> = self.assigned.iter().collect();
        sorted.sort_by(|a, b| a.topic.cmp(&b.topic).then(a.partition.cmp(&b.partition)));

        let mut out: HashMap<String, Vec<i64>> =
            self.topics.iter().map(|t| (t.clone(), Vec::new())).collect();
        for pos in sorted {
            let v = value(pos)?;
            out.entry(pos.topic.clone()).or_default().push(v);
        }
        Ok(out)
    }
}

/// Concrete offset for one partition.
fn resolve_offset<L: PartitionLog>(
    log: &L,
    topic: &str,
    partition: i32,
    position: SubscribePosition,
) -> Result<i64, LiveDataError> {
    let (low, high) = log.watermarks(topic, partition)?;
    let offset = match position {
        SubscribePosition::Latest => high,
        SubscribePosition::Offset(n) => {
            if n < 0 {
                return Err(LiveDataError::NoData(format!(
                    "{topic}[{partition}]: requested offset {n} is negative"
                )));
            }
            n.clamp(low, high)
        }
        SubscribePosition::SecondToLast => (high - 2).max(0).max(low),
        SubscribePosition::LastOnly => {
            if high - 1 < low {
                return Err(LiveDataError::NoData(format!(
                    "{topic}[{partition}]: no messages yet (watermarks {low}..{high})"
                )));
            }
            high - 1
        }
        SubscribePosition::AtTimestamp(ts) => {
            log.offset_for_time(topic, partition, ts)?.unwrap_or(high)
        }
    };
    Ok(offset)
}

impl<L: PartitionLog> TopicSubscriber for LogSubscriber<L> {
    fn topics(&self) -> &[String] {
        &self.topics
    }

    fn consume(&mut self, timeout: Duration) -> Result<Option<Message>, LiveDataError> {
        if self.assigned.is_empty() {
            std::thread::sleep(timeout);
            return Ok(None);
        }

        let message = self.log.fetch(&self.assigned, timeout).map_err(|e| match e {
            LiveDataError::Transport(_) => e,
            other => LiveDataError::Transport(other.to_string()),
        })?;

        let Some(message) = message else {
            return Ok(None);
        };
        let Some(slot) = self
            .assigned
            .iter()
            .position(|p| p.topic == message.topic && p.partition == message.partition)
        else {
            return Err(LiveDataError::Transport(format!(
                "broker returned a message for unassigned {}[{}]",
                message.topic, message.partition
            )));
        };
        self.assigned[slot].offset = message.offset + 1;
        // Next fetch starts after the partition that just delivered.
        self.assigned.rotate_left(slot + 1);
        Ok(Some(message))
    }

    fn seek(&mut self, topic: &str, partition: i32, offset: i64) -> Result<(), LiveDataError> {
        let (low, high) = self
            .log
            .watermarks(topic, partition)
            .map_err(|e| LiveDataError::Seek(e.to_string()))?;
        let slot = self
            .assigned
            .iter_mut()
            .find(|p| p.topic == topic && p.partition == partition)
            .ok_or_else(|| {
                LiveDataError::Seek(format!("{topic}[{partition}] is not assigned to this subscriber"))
            })?;
        if offset < low || offset > high {
            return Err(LiveDataError::Seek(format!(
                "{topic}[{partition}]: offset {offset} outside {low}..={high}"
            )));
        }
        slot.offset = offset;
        tracing::info!(topic = %topic, partition, offset, "seek");
        Ok(())
    }

    fn current_offsets(&self) -> HashMap<String, Vec<i64>> {
        self.grouped(|p| Ok(p.offset)).unwrap_or_default()
    }

    fn offsets_for_timestamp(
        &self,
        timestamp_ms: i64,
    ) -> Result<HashMap<String, Vec<i64>>, LiveDataError> {
        self.grouped(|p| {
            let found = self.log.offset_for_time(&p.topic, p.partition, timestamp_ms)?;
            match found {
                Some(offset) => Ok(offset),
                None => Ok(self.log.watermarks(&p.topic, p.partition)?.1),
            }
        })
    }
}
