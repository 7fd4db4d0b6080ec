use std::io::{Read, Write};

use crate::error::LiveDataError;

/// Default cap on a single frame: 64 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// 4-byte big-endian length prefix followed by the payload.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixed {
    /// 0 = no limit.
    max_payload: usize,
}

impl Default for LengthPrefixed {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl LengthPrefixed {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Try to cut one frame off the front of `buf`.
    ///
    /// `Ok(None)` while the frame is incomplete; otherwise the payload and
    /// the number of bytes consumed.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, LiveDataError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if self.max_payload > 0 && len > self.max_payload {
            return Err(LiveDataError::Transport(format!(
                "frame too large: {len} bytes (max {})",
                self.max_payload
            )));
        }

        let total = HEADER_LEN + len;
        if buf.len() < total {
            return Ok(None);
        }
        Ok(Some((buf[HEADER_LEN..total].to_vec(), total)))
    }

    pub fn encode(&self, data: &[u8], buf: &mut Vec<u8>) -> Result<(), LiveDataError> {
        let len = data.len();
        if len > u32::MAX as usize || (self.max_payload > 0 && len > self.max_payload) {
            return Err(LiveDataError::Transport(format!("frame too large: {len} bytes")));
        }
        buf.extend_from_slice(&(len as u32).to_be_bytes());
        buf.extend_from_slice(data);
        Ok(())
    }

    /// Blocking write of one frame.
    pub fn write_frame(&self, w: &mut impl Write, data: &[u8]) -> Result<(), LiveDataError> {
        let mut buf = Vec::with_capacity(HEADER_LEN + data.len());
        self.encode(data, &mut buf)?;
        w.write_all(&buf)
            .and_then(|_| w.flush())
            .map_err(|e| LiveDataError::Transport(format!("write frame: {e}")))
    }

    /// Blocking read of one frame.
    pub fn read_frame(&self, r: &mut impl Read) -> Result<Vec<u8>, LiveDataError> {
        let mut header = [0u8; HEADER_LEN];
        r.read_exact(&mut header)
            .map_err(|e| LiveDataError::Transport(format!("read frame header: {e}")))?;
        let len = u32::from_be_bytes(header) as usize;
        if self.max_payload > 0 && len > self.max_payload {
            return Err(LiveDataError::Transport(format!(
                "frame too large: {len} bytes (max {})",
                self.max_payload
            )));
        }
        let mut payload = vec![0u8; len];
        r.read_exact(&mut payload)
            .map_err(|e| LiveDataError::Transport(format!("read frame body: {e}")))?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_waits_for_full_frame() {
        let framing = LengthPrefixed::default();
        let mut buf = Vec::new();
        framing.encode(b"hello", &mut buf).unwrap();

        assert_eq!(framing.decode(&buf[..3]).unwrap(), None);
        assert_eq!(framing.decode(&buf[..7]).unwrap(), None);
        assert_eq!(framing.decode(&buf).unwrap(), Some((b"hello".to_vec(), 9)));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let framing = LengthPrefixed::new(4);
        let buf = [0u8, 0, 0, 5, 1, 2, 3, 4, 5];
        assert!(matches!(framing.decode(&buf), Err(LiveDataError::Transport(_))));
    }

    #[test]
    fn blocking_io_uses_same_layout() {
        let framing = LengthPrefixed::default();
        let mut wire = Vec::new();
        framing.write_frame(&mut wire, b"abc").unwrap();
        framing.write_frame(&mut wire, b"").unwrap();

        let mut cursor = std::io::Cursor::new(wire);
        assert_eq!(framing.read_frame(&mut cursor).unwrap(), b"abc");
        assert_eq!(framing.read_frame(&mut cursor).unwrap(), b"");
        assert!(framing.read_frame(&mut cursor).is_err());
    }
}
