//! Binary payload kinds carried on live-data topics.
//!
//! Every payload starts with a 4-byte ASCII type tag followed by a
//! little-endian body. Strings and arrays are prefixed with a `u32` length.
//! Tags that are not listed here decode to [`Payload::Unknown`] so readers
//! can skip them.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::LiveDataError;

pub const FRAME_PART_TAG: [u8; 4] = *b"ev42";
pub const RUN_START_TAG: [u8; 4] = *b"pl72";
pub const RUN_STOP_TAG: [u8; 4] = *b"6s4t";
pub const SPECTRA_DETECTOR_TAG: [u8; 4] = *b"df12";
pub const SAMPLE_ENV_TAG: [u8; 4] = *b"f142";
pub const HISTOGRAM_TAG: [u8; 4] = *b"hs00";

// ═══════════════════════════════════════════════════════════════
//  Payload kinds
// ═══════════════════════════════════════════════════════════════

/// Events from one source frame.
///
/// `time_of_flight[i]` and `spectrum[i]` describe the same event.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePart {
    pub message_id: u64,
    /// Seconds since run start.
    pub pulse_offset_s: f64,
    pub proton_charge: f64,
    pub period: u32,
    /// Microseconds.
    pub time_of_flight: Vec<f64>,
    pub spectrum: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunStart {
    pub run_number: i32,
    /// ms since the Unix epoch.
    pub start_time_ms: i64,
    pub instrument: String,
    pub n_periods: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunStop {
    pub run_number: i32,
    pub stop_time_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunInfo {
    Start(RunStart),
    Stop(RunStop),
}

/// Paired arrays: `detectors[i]` belongs to `spectra[i]`.
///
/// The arrays are not checked against each other here; the reader that
/// builds a lookup from them decides what a mismatch means.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectraDetectorMapping {
    pub n_spectra: i32,
    pub spectra: Vec<i32>,
    pub detectors: Vec<i32>,
}

/// A single sample-environment reading.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEnvLog {
    pub name: String,
    pub timestamp_ms: i64,
    pub value: f64,
}

/// Cumulative counts for one period, row-major by spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramFrame {
    pub period: u32,
    pub bin_edges: Vec<f64>,
    pub spectra: Vec<i32>,
    pub counts: Vec<f64>,
}

impl HistogramFrame {
    pub fn bins(&self) -> usize {
        self.bin_edges.len().saturating_sub(1)
    }

    /// Counts row for the `row`-th spectrum.
    pub fn row(&self, row: usize) -> &[f64] {
        let bins = self.bins();
        &self.counts[row * bins..(row + 1) * bins]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    FramePart(FramePart),
    RunInfo(RunInfo),
    SpectraDetectorMapping(SpectraDetectorMapping),
    SampleEnvironment(SampleEnvLog),
    Histogram(HistogramFrame),
    Unknown([u8; 4]),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::FramePart(_) => "frame_part",
            Payload::RunInfo(RunInfo::Start(_)) => "run_start",
            Payload::RunInfo(RunInfo::Stop(_)) => "run_stop",
            Payload::SpectraDetectorMapping(_) => "spectra_detector_mapping",
            Payload::SampleEnvironment(_) => "sample_environment",
            Payload::Histogram(_) => "histogram",
            Payload::Unknown(_) => "unknown",
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Payload, LiveDataError> {
        if buf.len() < 4 {
            return Err(LiveDataError::Decode(format!(
                "payload too short for a type tag: {} bytes",
                buf.len()
            )));
        }
        let tag = [buf[0], buf[1], buf[2], buf[3]];
        let mut r = Reader { buf: &buf[4..] };

        let payload = match tag {
            FRAME_PART_TAG => {
                let message_id = r.u64("message_id")?;
                let pulse_offset_s = r.f64("pulse_offset")?;
                let proton_charge = r.f64("proton_charge")?;
                let period = r.u32("period")?;
                let time_of_flight = r.f64s("time_of_flight")?;
                let spectrum = r.i32s("spectrum")?;
                if time_of_flight.len() != spectrum.len() {
                    return Err(LiveDataError::Decode(format!(
                        "frame {message_id}: {} time-of-flight values but {} spectrum numbers",
                        time_of_flight.len(),
                        spectrum.len()
                    )));
                }
                Payload::FramePart(FramePart {
                    message_id,
                    pulse_offset_s,
                    proton_charge,
                    period,
                    time_of_flight,
                    spectrum,
                })
            }
            RUN_START_TAG => Payload::RunInfo(RunInfo::Start(RunStart {
                run_number: r.i32("run_number")?,
                start_time_ms: r.i64("start_time")?,
                instrument: r.string("instrument")?,
                n_periods: r.u32("n_periods")?,
            })),
            RUN_STOP_TAG => Payload::RunInfo(RunInfo::Stop(RunStop {
                run_number: r.i32("run_number")?,
                stop_time_ms: r.i64("stop_time")?,
            })),
            SPECTRA_DETECTOR_TAG => Payload::SpectraDetectorMapping(SpectraDetectorMapping {
                n_spectra: r.i32("n_spectra")?,
                spectra: r.i32s("spectra")?,
                detectors: r.i32s("detectors")?,
            }),
            SAMPLE_ENV_TAG => Payload::SampleEnvironment(SampleEnvLog {
                name: r.string("name")?,
                timestamp_ms: r.i64("timestamp")?,
                value: r.f64("value")?,
            }),
            HISTOGRAM_TAG => {
                let period = r.u32("period")?;
                let bin_edges = r.f64s("bin_edges")?;
                let spectra = r.i32s("spectra")?;
                let counts = r.f64s("counts")?;
                let expected = spectra.len() * bin_edges.len().saturating_sub(1);
                if counts.len() != expected {
                    return Err(LiveDataError::Decode(format!(
                        "histogram: {} counts, expected {expected} ({} spectra x {} bins)",
                        counts.len(),
                        spectra.len(),
                        bin_edges.len().saturating_sub(1)
                    )));
                }
                Payload::Histogram(HistogramFrame {
                    period,
                    bin_edges,
                    spectra,
                    counts,
                })
            }
            other => Payload::Unknown(other),
        };
        Ok(payload)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(64);
        match self {
            Payload::FramePart(f) => {
                buf.put_slice(&FRAME_PART_TAG);
                buf.put_u64_le(f.message_id);
                buf.put_f64_le(f.pulse_offset_s);
                buf.put_f64_le(f.proton_charge);
                buf.put_u32_le(f.period);
                put_f64s(&mut buf, &f.time_of_flight);
                put_i32s(&mut buf, &f.spectrum);
            }
            Payload::RunInfo(RunInfo::Start(s)) => {
                buf.put_slice(&RUN_START_TAG);
                buf.put_i32_le(s.run_number);
                buf.put_i64_le(s.start_time_ms);
                put_string(&mut buf, &s.instrument);
                buf.put_u32_le(s.n_periods);
            }
            Payload::RunInfo(RunInfo::Stop(s)) => {
                buf.put_slice(&RUN_STOP_TAG);
                buf.put_i32_le(s.run_number);
                buf.put_i64_le(s.stop_time_ms);
            }
            Payload::SpectraDetectorMapping(m) => {
                buf.put_slice(&SPECTRA_DETECTOR_TAG);
                buf.put_i32_le(m.n_spectra);
                put_i32s(&mut buf, &m.spectra);
                put_i32s(&mut buf, &m.detectors);
            }
            Payload::SampleEnvironment(l) => {
                buf.put_slice(&SAMPLE_ENV_TAG);
                put_string(&mut buf, &l.name);
                buf.put_i64_le(l.timestamp_ms);
                buf.put_f64_le(l.value);
            }
            Payload::Histogram(h) => {
                buf.put_slice(&HISTOGRAM_TAG);
                buf.put_u32_le(h.period);
                put_f64s(&mut buf, &h.bin_edges);
                put_i32s(&mut buf, &h.spectra);
                put_f64s(&mut buf, &h.counts);
            }
            Payload::Unknown(tag) => buf.put_slice(tag),
        }
        buf.to_vec()
    }
}

impl From<FramePart> for Payload {
    fn from(f: FramePart) -> Self {
        Payload::FramePart(f)
    }
}

impl From<RunStart> for Payload {
    fn from(s: RunStart) -> Self {
        Payload::RunInfo(RunInfo::Start(s))
    }
}

impl From<RunStop> for Payload {
    fn from(s: RunStop) -> Self {
        Payload::RunInfo(RunInfo::Stop(s))
    }
}

impl From<SpectraDetectorMapping> for Payload {
    fn from(m: SpectraDetectorMapping) -> Self {
        Payload::SpectraDetectorMapping(m)
    }
}

impl From<SampleEnvLog> for Payload {
    fn from(l: SampleEnvLog) -> Self {
        Payload::SampleEnvironment(l)
    }
}

impl From<HistogramFrame> for Payload {
    fn from(h: HistogramFrame) -> Self {
        Payload::Histogram(h)
    }
}

// ---------------------------------------------------------------------------
// Body reader / writer helpers
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn need(&self, n: usize, field: &str) -> Result<(), LiveDataError> {
        if self.buf.remaining() < n {
            return Err(LiveDataError::Decode(format!(
                "truncated payload reading '{field}': need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u32(&mut self, field: &str) -> Result<u32, LiveDataError> {
        self.need(4, field)?;
        Ok(self.buf.get_u32_le())
    }

    fn i32(&mut self, field: &str) -> Result<i32, LiveDataError> {
        self.need(4, field)?;
        Ok(self.buf.get_i32_le())
    }

    fn u64(&mut self, field: &str) -> Result<u64, LiveDataError> {
        self.need(8, field)?;
        Ok(self.buf.get_u64_le())
    }

    fn i64(&mut self, field: &str) -> Result<i64, LiveDataError> {
        self.need(8, field)?;
        Ok(self.buf.get_i64_le())
    }

    fn f64(&mut self, field: &str) -> Result<f64, LiveDataError> {
        self.need(8, field)?;
        Ok(self.buf.get_f64_le())
    }

    /// Element count, checked against the bytes left so a corrupt length
    /// cannot trigger a huge allocation.
    fn count(&mut self, elem_size: usize, field: &str) -> Result<usize, LiveDataError> {
        let n = self.u32(field)? as usize;
        self.need(n.saturating_mul(elem_size), field)?;
        Ok(n)
    }

    fn string(&mut self, field: &str) -> Result<String, LiveDataError> {
        let n = self.count(1, field)?;
        let raw = self.buf[..n].to_vec();
        self.buf.advance(n);
        Ok(String::from_utf8(raw)?)
    }

    fn i32s(&mut self, field: &str) -> Result<Vec<i32>, LiveDataError> {
        let n = self.count(4, field)?;
        Ok((0..n).map(|_| self.buf.get_i32_le()).collect())
    }

    fn f64s(&mut self, field: &str) -> Result<Vec<f64>, LiveDataError> {
        let n = self.count(8, field)?;
        Ok((0..n).map(|_| self.buf.get_f64_le()).collect())
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_i32s(buf: &mut BytesMut, values: &[i32]) {
    buf.put_u32_le(values.len() as u32);
    for v in values {
        buf.put_i32_le(*v);
    }
}

fn put_f64s(buf: &mut BytesMut, values: &[f64]) {
    buf.put_u32_le(values.len() as u32);
    for v in values {
        buf.put_f64_le(*v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_part_survives_encoding() {
        let frame = FramePart {
            message_id: 3,
            pulse_offset_s: 5.0,
            proton_charge: 0.25,
            period: 0,
            time_of_flight: vec![1000.0, 2000.0],
            spectrum: vec![11, 10],
        };
        let bytes = Payload::from(frame.clone()).encode();
        assert_eq!(&bytes[..4], b"ev42");
        assert_eq!(Payload::decode(&bytes).unwrap(), Payload::FramePart(frame));
    }

    #[test]
    fn mapping_keeps_unpaired_arrays() {
        let mapping = SpectraDetectorMapping {
            n_spectra: 3,
            spectra: vec![10, 11, 12],
            detectors: vec![100, 101],
        };
        let bytes = Payload::from(mapping.clone()).encode();
        assert_eq!(
            Payload::decode(&bytes).unwrap(),
            Payload::SpectraDetectorMapping(mapping)
        );
    }

    #[test]
    fn unknown_tag_is_not_an_error() {
        let payload = Payload::decode(b"zz99 trailing body").unwrap();
        assert_eq!(payload, Payload::Unknown(*b"zz99"));
        assert_eq!(payload.kind(), "unknown");
    }

    #[test]
    fn truncated_body_is_rejected() {
        let mut bytes = Payload::from(RunStart {
            run_number: 555,
            start_time_ms: 1_000,
            instrument: "MARI".into(),
            n_periods: 1,
        })
        .encode();
        bytes.truncate(bytes.len() - 2);
        let err = Payload::decode(&bytes).unwrap_err();
        assert!(matches!(err, LiveDataError::Decode(m) if m.contains("n_periods")));
    }

    #[test]
    fn oversized_count_does_not_allocate() {
        let mut bytes = FRAME_PART_TAG.to_vec();
        bytes.extend_from_slice(&[0u8; 28]);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(Payload::decode(&bytes), Err(LiveDataError::Decode(_))));
    }

    #[test]
    fn frame_with_mismatched_arrays_is_rejected() {
        let bytes = Payload::from(FramePart {
            message_id: 9,
            pulse_offset_s: 0.0,
            proton_charge: 0.0,
            period: 0,
            time_of_flight: vec![1.0, 2.0],
            spectrum: vec![1],
        })
        .encode();
        assert!(matches!(Payload::decode(&bytes), Err(LiveDataError::Decode(_))));
    }

    #[test]
    fn histogram_rows() {
        let h = HistogramFrame {
            period: 0,
            bin_edges: vec![0.0, 10.0, 20.0],
            spectra: vec![1, 2],
            counts: vec![1.0, 2.0, 3.0, 4.0],
        };
        assert_eq!(h.bins(), 2);
        assert_eq!(h.row(1), &[3.0, 4.0]);
        let bytes = Payload::from(h.clone()).encode();
        assert_eq!(Payload::decode(&bytes).unwrap(), Payload::Histogram(h));
    }
}
