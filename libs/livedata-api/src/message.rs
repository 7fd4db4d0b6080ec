use serde::{Deserialize, Serialize};

/// One record delivered by a subscriber.
///
/// `offset` is monotonic within `(topic, partition)`. The payload is opaque
/// at this level; see [`crate::schema`] for the recognised kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Producer timestamp, ms since the Unix epoch.
    pub timestamp_ms: i64,
    #[serde(with = "base64_payload")]
    pub payload: Vec<u8>,
}

impl Message {
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Payload bytes travel as base64 inside JSON frames.
pub(crate) mod base64_payload {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_base64_in_json() {
        let msg = Message {
            topic: "MARI_events".into(),
            partition: 0,
            offset: 7,
            timestamp_ms: 1_700_000_000_000,
            payload: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"payload\":\"3q2+7w==\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
