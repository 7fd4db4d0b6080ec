use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use livedata_api::LiveDataError;
use livedata_api::schema::{HistogramFrame, RunStart};

use crate::mapping::DetectorSpectrumMap;

/// Name of the per-frame charge log.
pub const PROTON_CHARGE_LOG: &str = "proton_charge";

// ═══════════════════════════════════════════════════════════════
//  Run metadata
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub run_number: i32,
    pub start_time: DateTime<Utc>,
    pub instrument: String,
    pub n_periods: u32,
}

impl RunMetadata {
    pub fn from_run_start(msg: &RunStart) -> Result<Self, LiveDataError> {
        let start_time = DateTime::from_timestamp_millis(msg.start_time_ms).ok_or_else(|| {
            LiveDataError::Bootstrap(format!(
                "run {}: start time {} ms is out of range",
                msg.run_number, msg.start_time_ms
            ))
        })?;
        Ok(Self {
            run_number: msg.run_number,
            start_time,
            instrument: msg.instrument.clone(),
            n_periods: msg.n_periods,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Event buffer
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TofEvent {
    /// Microseconds.
    pub tof: f64,
    pub pulse_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumEvents {
    pub spectrum: i32,
    pub detectors: Vec<i32>,
    pub events: Vec<TofEvent>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    entries: Vec<(DateTime<Utc>, f64)>,
}

impl TimeSeries {
    pub fn push(&mut self, time: DateTime<Utc>, value: f64) {
        self.entries.push((time, value));
    }

    pub fn entries(&self) -> &[(DateTime<Utc>, f64)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<(DateTime<Utc>, f64)> {
        self.entries.last().copied()
    }
}

/// Events and logs accumulated for one acquisition period.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBuffer {
    period: u32,
    spectra: Vec<SpectrumEvents>,
    logs: BTreeMap<String, TimeSeries>,
    run: Option<RunMetadata>,
    instrument: Option<String>,
    size_hint: usize,
}

impl EventBuffer {
    /// `spectrum_count` empty spectra numbered from 1, no detectors.
    pub fn new(spectrum_count: usize, size_hint: usize) -> Self {
        let spectra = (0..spectrum_count)
            .map(|i| SpectrumEvents {
                spectrum: i as i32 + 1,
                detectors: Vec::new(),
                events: Vec::new(),
            })
            .collect();
        Self {
            period: 0,
            spectra,
            logs: BTreeMap::new(),
            run: None,
            instrument: None,
            size_hint,
        }
    }

    /// Label spectra by buffer index from the mapping.
    pub fn label_spectra(&mut self, map: &DetectorSpectrumMap) {
        for (slot, &spectrum) in self.spectra.iter_mut().zip(map.spectra()) {
            slot.spectrum = spectrum;
            slot.detectors = map.detectors_of(spectrum).to_vec();
        }
    }

    /// Same shape and metadata, no events, no log entries.
    pub fn clone_empty(&self) -> Self {
        Self {
            period: self.period,
            spectra: self
                .spectra
                .iter()
                .map(|s| SpectrumEvents {
                    spectrum: s.spectrum,
                    detectors: s.detectors.clone(),
                    events: Vec::new(),
                })
                .collect(),
            logs: self
                .logs
                .keys()
                .map(|name| (name.clone(), TimeSeries::default()))
                .collect(),
            run: self.run.clone(),
            instrument: self.instrument.clone(),
            size_hint: self.size_hint,
        }
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn set_period(&mut self, period: u32) {
        self.period = period;
    }

    pub fn spectrum_count(&self) -> usize {
        self.spectra.len()
    }

    pub fn spectra(&self) -> &[SpectrumEvents] {
        &self.spectra
    }

    pub fn spectrum(&self, index: usize) -> Option<&SpectrumEvents> {
        self.spectra.get(index)
    }

    pub fn find_spectrum(&self, spectrum: i32) -> Option<&SpectrumEvents> {
        self.spectra.iter().find(|s| s.spectrum == spectrum)
    }

    /// Append to the spectrum at `index`. `false` if out of range.
    pub fn add_event(&mut self, index: usize, event: TofEvent) -> bool {
        match self.spectra.get_mut(index) {
            Some(slot) => {
                if slot.events.capacity() == 0 {
                    slot.events.reserve(self.size_hint);
                }
                slot.events.push(event);
                true
            }
            None => false,
        }
    }

    pub fn total_events(&self) -> usize {
        self.spectra.iter().map(|s| s.events.len()).sum()
    }

    pub fn add_log_value(&mut self, name: &str, time: DateTime<Utc>, value: f64) {
        self.logs.entry(name.to_string()).or_default().push(time, value);
    }

    pub fn log(&self, name: &str) -> Option<&TimeSeries> {
        self.logs.get(name)
    }

    pub fn log_names(&self) -> impl Iterator<Item = &str> {
        self.logs.keys().map(String::as_str)
    }

    pub fn run(&self) -> Option<&RunMetadata> {
        self.run.as_ref()
    }

    pub fn set_run(&mut self, run: RunMetadata) {
        self.run = Some(run);
    }

    pub fn instrument(&self) -> Option<&str> {
        self.instrument.as_deref()
    }

    pub fn set_instrument(&mut self, name: &str) {
        self.instrument = Some(name.to_string());
    }
}

// ═══════════════════════════════════════════════════════════════
//  Histogram buffer
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumCounts {
    pub spectrum: i32,
    pub detectors: Vec<i32>,
    pub counts: Vec<f64>,
}

/// Snapshot of cumulative counts for one period.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBuffer {
    pub period: u32,
    pub bin_edges: Vec<f64>,
    pub spectra: Vec<SpectrumCounts>,
    pub run: Option<RunMetadata>,
}

impl HistogramBuffer {
    /// Rows for every mapped spectrum; spectra absent from the frame are zero.
    pub fn from_frame(
        frame: &HistogramFrame,
        map: &DetectorSpectrumMap,
        run: Option<RunMetadata>,
    ) -> Self {
        let rows: std::collections::HashMap<i32, usize> =
            frame.spectra.iter().enumerate().map(|(row, &s)| (s, row)).collect();
        let spectra = map
            .spectra()
            .iter()
            .map(|&spectrum| SpectrumCounts {
                spectrum,
                detectors: map.detectors_of(spectrum).to_vec(),
                counts: rows
                    .get(&spectrum)
                    .map(|&row| frame.row(row).to_vec())
                    .unwrap_or_else(|| vec![0.0; frame.bins()]),
            })
            .collect();
        Self {
            period: frame.period,
            bin_edges: frame.bin_edges.clone(),
            spectra,
            run,
        }
    }

    /// Period that has not seen a histogram yet.
    pub fn empty(period: u32, map: &DetectorSpectrumMap, run: Option<RunMetadata>) -> Self {
        Self {
            period,
            bin_edges: Vec::new(),
            spectra: map
                .spectra()
                .iter()
                .map(|&spectrum| SpectrumCounts {
                    spectrum,
                    detectors: map.detectors_of(spectrum).to_vec(),
                    counts: Vec::new(),
                })
                .collect(),
            run,
        }
    }

    pub fn total_counts(&self) -> f64 {
        self.spectra.iter().flat_map(|s| s.counts.iter()).sum()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Collaborators
// ═══════════════════════════════════════════════════════════════

/// Allocates period buffers.
pub trait WorkspaceFactory: Send + Sync {
    fn create(&self, spectrum_count: usize, size_hint: usize) -> EventBuffer;

    /// Structural clone without events.
    fn clone_empty(&self, buffer: &EventBuffer) -> EventBuffer {
        buffer.clone_empty()
    }
}

#[derive(Debug, Default)]
pub struct DefaultWorkspaceFactory;

impl WorkspaceFactory for DefaultWorkspaceFactory {
    fn create(&self, spectrum_count: usize, size_hint: usize) -> EventBuffer {
        EventBuffer::new(spectrum_count, size_hint)
    }
}

/// Attaches instrument geometry to a buffer.
///
/// Called once per run; a failure is logged and capture carries on.
pub trait InstrumentLoader: Send + Sync {
    fn load(&self, instrument: &str, target: &mut EventBuffer) -> Result<(), LiveDataError>;
}

/// Records the instrument name only.
#[derive(Debug, Default)]
pub struct NameOnlyInstrumentLoader;

impl InstrumentLoader for NameOnlyInstrumentLoader {
    fn load(&self, instrument: &str, target: &mut EventBuffer) -> Result<(), LiveDataError> {
        target.set_instrument(instrument);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use livedata_api::schema::SpectraDetectorMapping;

    use super::*;

    fn map() -> DetectorSpectrumMap {
        DetectorSpectrumMap::from_message(&SpectraDetectorMapping {
            n_spectra: 3,
            spectra: vec![10, 11, 12],
            detectors: vec![100, 101, 102],
        })
        .unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn labelled_buffer() {
        let mut buf = DefaultWorkspaceFactory.create(3, 8);
        buf.label_spectra(&map());
        assert_eq!(buf.spectrum(0).unwrap().spectrum, 10);
        assert_eq!(buf.find_spectrum(12).unwrap().detectors, vec![102]);
    }

    #[test]
    fn clone_empty_drops_events_and_log_entries() {
        let mut buf = EventBuffer::new(2, 4);
        buf.set_period(1);
        buf.set_instrument("MARI");
        assert!(buf.add_event(0, TofEvent { tof: 10.0, pulse_time: t(1) }));
        assert!(!buf.add_event(5, TofEvent { tof: 10.0, pulse_time: t(1) }));
        buf.add_log_value(PROTON_CHARGE_LOG, t(1), 0.5);

        let fresh = buf.clone_empty();
        assert_eq!(fresh.total_events(), 0);
        assert_eq!(fresh.period(), 1);
        assert_eq!(fresh.instrument(), Some("MARI"));
        assert!(fresh.log(PROTON_CHARGE_LOG).unwrap().is_empty());
        assert_eq!(buf.total_events(), 1);
    }

    #[test]
    fn histogram_rows_follow_mapping_order() {
        let frame = HistogramFrame {
            period: 0,
            bin_edges: vec![0.0, 1.0, 2.0],
            spectra: vec![12, 10],
            counts: vec![1.0, 2.0, 3.0, 4.0],
        };
        let h = HistogramBuffer::from_frame(&frame, &map(), None);
        assert_eq!(h.spectra[0].counts, vec![3.0, 4.0]);
        assert_eq!(h.spectra[1].counts, vec![0.0, 0.0]);
        assert_eq!(h.spectra[2].counts, vec![1.0, 2.0]);
        assert_eq!(h.total_counts(), 10.0);
    }

    #[test]
    fn run_start_time_is_converted() {
        let run = RunMetadata::from_run_start(&RunStart {
            run_number: 555,
            start_time_ms: 1_500,
            instrument: "MARI".into(),
            n_periods: 1,
        })
        .unwrap();
        assert_eq!(run.start_time.timestamp_millis(), 1_500);
    }
}
