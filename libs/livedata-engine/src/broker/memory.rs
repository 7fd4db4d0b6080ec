use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use livedata_api::wire::{FetchPosition, PartitionInfo, TopicInfo};
use livedata_api::{
    Broker, BrokerConnector, LiveDataError, Message, SubscribePosition, TopicSubscriber,
};

use super::log::{LogSubscriber, PartitionLog};

/// Messages kept per partition before the oldest are dropped.
pub const DEFAULT_RETENTION: usize = 100_000;

// ═══════════════════════════════════════════════════════════════
//  Storage
// ═══════════════════════════════════════════════════════════════

struct StoredRecord {
    timestamp_ms: i64,
    payload: Vec<u8>,
}

/// Append-only log with a moving low watermark.
#[derive(Default)]
struct PartitionData {
    low: i64,
    records: VecDeque<StoredRecord>,
}

impl PartitionData {
    fn high(&self) -> i64 {
        self.low + self.records.len() as i64
    }

    fn get(&self, offset: i64) -> Option<&StoredRecord> {
        if offset < self.low {
            return None;
        }
        self.records.get((offset - self.low) as usize)
    }
}

struct TopicLog {
    partitions: Vec<PartitionData>,
    next_partition: usize,
}

struct Inner {
    topics: Mutex<HashMap<String, TopicLog>>,
    arrived: Condvar,
    retention: usize,
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// In-process partitioned broker.
///
/// Cheap to clone; clones share the same topics. Its address is
/// `memory://<name>`.
#[derive(Clone)]
pub struct MemoryBroker {
    address: String,
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker").field("address", &self.address).finish()
    }
}

impl MemoryBroker {
    pub fn new(name: &str) -> Self {
        Self::with_retention(name, DEFAULT_RETENTION)
    }

    pub fn with_retention(name: &str, retention: usize) -> Self {
        Self {
            address: format!("memory://{name}"),
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                arrived: Condvar::new(),
                retention: retention.max(1),
            }),
        }
    }

    fn lock_topics(&self) -> MutexGuard<'_, HashMap<String, TopicLog>> {
        match self.inner.topics.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory broker lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// `false` if the topic already exists; its partitions are left as is.
    pub fn create_topic(&self, topic: &str, partitions: i32) -> bool {
        let mut topics = self.lock_topics();
        if topics.contains_key(topic) {
            return false;
        }
        let count = partitions.max(1) as usize;
        topics.insert(
            topic.to_string(),
            TopicLog {
                partitions: (0..count).map(|_| PartitionData::default()).collect(),
                next_partition: 0,
            },
        );
        tracing::info!(topic = %topic, partitions = count, "created topic");
        true
    }

    /// Append round-robin across partitions. Returns `(partition, offset)`.
    pub fn produce(
        &self,
        topic: &str,
        payload: Vec<u8>,
        timestamp_ms: i64,
    ) -> Result<(i32, i64), LiveDataError> {
        let partition = {
            let mut topics = self.lock_topics();
            let log = topics.get_mut(topic).ok_or_else(|| unknown_topic(topic))?;
            let p = log.next_partition % log.partitions.len();
            log.next_partition = log.next_partition.wrapping_add(1);
            p as i32
        };
        let offset = self.produce_to(topic, partition, payload, timestamp_ms)?;
        Ok((partition, offset))
    }

    pub fn produce_to(
        &self,
        topic: &str,
        partition: i32,
        payload: Vec<u8>,
        timestamp_ms: i64,
    ) -> Result<i64, LiveDataError> {
        let offset = {
            let mut topics = self.lock_topics();
            let log = topics.get_mut(topic).ok_or_else(|| unknown_topic(topic))?;
            let data = partition_mut(log, topic, partition)?;
            if data.records.len() >= self.inner.retention {
                data.records.pop_front();
                data.low += 1;
            }
            let offset = data.high();
            data.records.push_back(StoredRecord {
                timestamp_ms,
                payload,
            });
            offset
        };
        self.inner.arrived.notify_all();
        Ok(offset)
    }

    /// All topics with their watermarks, sorted by name.
    pub fn topics(&self) -> Vec<TopicInfo> {
        let topics = self.lock_topics();
        let mut out: Vec<TopicInfo> = topics
            .iter()
            .map(|(name, log)| TopicInfo {
                name: name.clone(),
                partitions: log
                    .partitions
                    .iter()
                    .enumerate()
                    .map(|(i, p)| PartitionInfo {
                        partition: i as i32,
                        low: p.low,
                        high: p.high(),
                    })
                    .collect(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn topic(&self, name: &str) -> Option<TopicInfo> {
        self.topics().into_iter().find(|t| t.name == name)
    }
}

fn unknown_topic(topic: &str) -> LiveDataError {
    LiveDataError::Connection(format!("topic '{topic}' not found"))
}

fn partition_ref<'a>(
    log: &'a TopicLog,
    topic: &str,
    partition: i32,
) -> Result<&'a PartitionData, LiveDataError> {
    usize::try_from(partition)
        .ok()
        .and_then(|p| log.partitions.get(p))
        .ok_or_else(|| LiveDataError::Transport(format!("unknown partition {topic}[{partition}]")))
}

fn partition_mut<'a>(
    log: &'a mut TopicLog,
    topic: &str,
    partition: i32,
) -> Result<&'a mut PartitionData, LiveDataError> {
    usize::try_from(partition)
        .ok()
        .and_then(|p| log.partitions.get_mut(p))
        .ok_or_else(|| LiveDataError::Transport(format!("unknown partition {topic}[{partition}]")))
}

// ---------------------------------------------------------------------------
// PartitionLog implementation
// ---------------------------------------------------------------------------

impl PartitionLog for MemoryBroker {
    fn describe(&self) -> String {
        self.address.clone()
    }

    fn partition_count(&self, topic: &str) -> Result<Option<i32>, LiveDataError> {
        Ok(self
            .lock_topics()
            .get(topic)
            .map(|log| log.partitions.len() as i32))
    }

    fn watermarks(&self, topic: &str, partition: i32) -> Result<(i64, i64), LiveDataError> {
        let topics = self.lock_topics();
        let log = topics.get(topic).ok_or_else(|| unknown_topic(topic))?;
        let data = partition_ref(log, topic, partition)?;
        Ok((data.low, data.high()))
    }

    fn offset_for_time(
        &self,
        topic: &str,
        partition: i32,
        timestamp_ms: i64,
    ) -> Result<Option<i64>, LiveDataError> {
        let topics = self.lock_topics();
        let log = topics.get(topic).ok_or_else(|| unknown_topic(topic))?;
        let data = partition_ref(log, topic, partition)?;
        Ok(data
            .records
            .iter()
            .position(|r| r.timestamp_ms >= timestamp_ms)
            .map(|i| data.low + i as i64))
    }

    fn fetch(
        &self,
        positions: &[FetchPosition],
        max_wait: Duration,
    ) -> Result<Option<Message>, LiveDataError> {
        let deadline = Instant::now() + max_wait;
        let mut topics = self.lock_topics();
        loop {
            for pos in positions {
                let log = topics
                    .get(&pos.topic)
                    .ok_or_else(|| LiveDataError::Transport(format!("topic '{}' was removed", pos.topic)))?;
                let data = partition_ref(log, &pos.topic, pos.partition)?;
                if pos.offset < data.low || pos.offset > data.high() {
                    return Err(LiveDataError::Transport(format!(
                        "{}[{}]: offset {} out of range {}..={}",
                        pos.topic,
                        pos.partition,
                        pos.offset,
                        data.low,
                        data.high()
                    )));
                }
                if let Some(record) = data.get(pos.offset) {
                    return Ok(Some(Message {
                        topic: pos.topic.clone(),
                        partition: pos.partition,
                        offset: pos.offset,
                        timestamp_ms: record.timestamp_ms,
                        payload: record.payload.clone(),
                    }));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            topics = match self.inner.arrived.wait_timeout(topics, deadline - now) {
                Ok((g, _)) => g,
                Err(poisoned) => {
                    tracing::warn!("memory broker lock was poisoned while waiting, recovering");
                    poisoned.into_inner().0
                }
            };
        }
    }
}

// ---------------------------------------------------------------------------
// Broker / BrokerConnector
// ---------------------------------------------------------------------------

impl Broker for MemoryBroker {
    fn address(&self) -> &str {
        &self.address
    }

    fn subscribe(
        &self,
        topics: &[String],
        position: SubscribePosition,
    ) -> Result<Box<dyn TopicSubscriber>, LiveDataError> {
        Ok(Box::new(LogSubscriber::subscribe(self.clone(), topics, position)?))
    }
}

/// Resolves only this broker's own address.
impl BrokerConnector for MemoryBroker {
    fn connect(&self, address: &str) -> Result<Arc<dyn Broker>, LiveDataError> {
        if address != self.address {
            return Err(LiveDataError::Connection(format!(
                "no broker at '{address}' (in-process broker is '{}')",
                self.address
            )));
        }
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_with(topic: &str, n: usize) -> MemoryBroker {
        let broker = MemoryBroker::new("test");
        broker.create_topic(topic, 1);
        for i in 0..n {
            broker
                .produce_to(topic, 0, vec![i as u8], 1_000 + i as i64 * 10)
                .unwrap();
        }
        broker
    }

    fn subscribe(broker: &MemoryBroker, topic: &str, pos: SubscribePosition) -> Box<dyn TopicSubscriber> {
        broker.subscribe_one(topic, pos).unwrap()
    }

    fn next_offset(sub: &mut Box<dyn TopicSubscriber>) -> Option<i64> {
        sub.consume(Duration::from_millis(10)).unwrap().map(|m| m.offset)
    }

    #[test]
    fn latest_sees_only_new_messages() {
        let broker = broker_with("t", 3);
        let mut sub = subscribe(&broker, "t", SubscribePosition::Latest);
        assert_eq!(next_offset(&mut sub), None);
        broker.produce_to("t", 0, vec![9], 2_000).unwrap();
        assert_eq!(next_offset(&mut sub), Some(3));
    }

    #[test]
    fn last_only_and_second_to_last() {
        let broker = broker_with("t", 3);
        let mut sub = subscribe(&broker, "t", SubscribePosition::LastOnly);
        assert_eq!(next_offset(&mut sub), Some(2));

        let mut sub = subscribe(&broker, "t", SubscribePosition::SecondToLast);
        assert_eq!(next_offset(&mut sub), Some(1));
        assert_eq!(next_offset(&mut sub), Some(2));
    }

    #[test]
    fn second_to_last_with_one_message_starts_at_zero() {
        let broker = broker_with("t", 1);
        let mut sub = subscribe(&broker, "t", SubscribePosition::SecondToLast);
        assert_eq!(next_offset(&mut sub), Some(0));
    }

    #[test]
    fn last_only_on_empty_topic_is_no_data() {
        let broker = broker_with("t", 0);
        let err = broker.subscribe_one("t", SubscribePosition::LastOnly).err().unwrap();
        assert!(matches!(err, LiveDataError::NoData(_)));
    }

    #[test]
    fn negative_explicit_offset_is_no_data() {
        let broker = broker_with("t", 2);
        let err = broker.subscribe_one("t", SubscribePosition::Offset(-1)).err().unwrap();
        assert!(matches!(err, LiveDataError::NoData(_)));
    }

    #[test]
    fn missing_topic_is_connection_error() {
        let broker = broker_with("t", 0);
        let err = broker
            .subscribe(&["t".to_string(), "absent".to_string()], SubscribePosition::Latest)
            .err()
            .unwrap();
        assert!(matches!(err, LiveDataError::Connection(m) if m.contains("absent")));
    }

    #[test]
    fn at_timestamp_picks_first_not_older() {
        let broker = broker_with("t", 5);
        let mut sub = subscribe(&broker, "t", SubscribePosition::AtTimestamp(1_025));
        assert_eq!(next_offset(&mut sub), Some(3));

        let sub = subscribe(&broker, "t", SubscribePosition::AtTimestamp(9_999));
        assert_eq!(sub.current_offsets()["t"], vec![5]);
        assert_eq!(sub.offsets_for_timestamp(1_000).unwrap()["t"], vec![0]);
    }

    #[test]
    fn seek_within_and_outside_watermarks() {
        let broker = broker_with("t", 4);
        let mut sub = subscribe(&broker, "t", SubscribePosition::Latest);
        sub.seek("t", 0, 1).unwrap();
        assert_eq!(next_offset(&mut sub), Some(1));

        assert!(matches!(sub.seek("t", 0, 10), Err(LiveDataError::Seek(_))));
        assert!(matches!(sub.seek("t", 3, 0), Err(LiveDataError::Seek(_))));
        assert_eq!(sub.current_offsets()["t"], vec![2]);
    }

    #[test]
    fn retention_moves_low_watermark() {
        let broker = MemoryBroker::with_retention("small", 2);
        broker.create_topic("t", 1);
        for i in 0..5u8 {
            broker.produce_to("t", 0, vec![i], 0).unwrap();
        }
        assert_eq!(broker.watermarks("t", 0).unwrap(), (3, 5));

        let mut sub = subscribe(&broker, "t", SubscribePosition::EARLIEST);
        let msg = sub.consume(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!((msg.offset, msg.payload), (3, vec![3]));
    }

    #[test]
    fn evicted_position_is_transport_error() {
        let broker = MemoryBroker::with_retention("small", 2);
        broker.create_topic("t", 1);
        broker.produce_to("t", 0, vec![0], 0).unwrap();
        let mut sub = subscribe(&broker, "t", SubscribePosition::EARLIEST);
        for i in 1..4u8 {
            broker.produce_to("t", 0, vec![i], 0).unwrap();
        }
        assert!(matches!(
            sub.consume(Duration::from_millis(10)),
            Err(LiveDataError::Transport(_))
        ));
    }

    #[test]
    fn partitions_are_polled_round_robin() {
        let broker = MemoryBroker::new("rr");
        broker.create_topic("t", 2);
        for i in 0..4u8 {
            broker.produce("t", vec![i], 0).unwrap();
        }
        let mut sub = subscribe(&broker, "t", SubscribePosition::EARLIEST);
        let mut seen = Vec::new();
        while let Some(msg) = sub.consume(Duration::from_millis(10)).unwrap() {
            seen.push((msg.partition, msg.payload[0]));
        }
        assert_eq!(seen, vec![(0, 0), (1, 1), (0, 2), (1, 3)]);
        assert_eq!(sub.current_offsets()["t"], vec![2, 2]);
    }

    #[test]
    fn consume_wakes_on_produce() {
        let broker = broker_with("t", 0);
        let mut sub = subscribe(&broker, "t", SubscribePosition::Latest);
        let producer = broker.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.produce_to("t", 0, vec![1], 0).unwrap();
        });
        let msg = sub.consume(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(msg.map(|m| m.offset), Some(0));
    }

    #[test]
    fn connector_checks_address() {
        let broker = MemoryBroker::new("a");
        assert!(broker.connect("memory://a").is_ok());
        assert!(matches!(
            broker.connect("memory://b").err().unwrap(),
            LiveDataError::Connection(_)
        ));
    }
}
