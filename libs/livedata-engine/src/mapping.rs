use std::collections::HashMap;

use livedata_api::LiveDataError;
use livedata_api::schema::SpectraDetectorMapping;

/// Spectrum number ↔ detector ids, with a dense buffer index per spectrum.
///
/// Spectra keep the order in which they first appear in the mapping message;
/// that order defines the buffer-local index.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSpectrumMap {
    spectra: Vec<i32>,
    detectors: Vec<Vec<i32>>,
    index: HashMap<i32, usize>,
    by_detector: HashMap<i32, i32>,
}

impl DetectorSpectrumMap {
    /// Build from a mapping message.
    ///
    /// Fails with `Bootstrap` when the paired arrays differ in length or the
    /// number of distinct spectra is not the declared count.
    pub fn from_message(msg: &SpectraDetectorMapping) -> Result<Self, LiveDataError> {
        if msg.spectra.len() != msg.detectors.len() {
            return Err(LiveDataError::Bootstrap(format!(
                "spectra-detector mapping has {} spectrum entries but {} detector entries",
                msg.spectra.len(),
                msg.detectors.len()
            )));
        }

        let mut map = DetectorSpectrumMap {
            spectra: Vec::new(),
            detectors: Vec::new(),
            index: HashMap::new(),
            by_detector: HashMap::with_capacity(msg.detectors.len()),
        };
        for (&spectrum, &detector) in msg.spectra.iter().zip(&msg.detectors) {
            let slot = *map.index.entry(spectrum).or_insert_with(|| {
                map.spectra.push(spectrum);
                map.detectors.push(Vec::new());
                map.spectra.len() - 1
            });
            map.detectors[slot].push(detector);
            map.by_detector.insert(detector, spectrum);
        }

        if i64::from(msg.n_spectra) != map.spectra.len() as i64 {
            return Err(LiveDataError::Bootstrap(format!(
                "spectra-detector mapping declares {} spectra but contains {} distinct spectrum numbers",
                msg.n_spectra,
                map.spectra.len()
            )));
        }
        Ok(map)
    }

    pub fn spectrum_count(&self) -> usize {
        self.spectra.len()
    }

    /// Spectrum numbers in buffer-index order.
    pub fn spectra(&self) -> &[i32] {
        &self.spectra
    }

    pub fn index_of(&self, spectrum: i32) -> Option<usize> {
        self.index.get(&spectrum).copied()
    }

    pub fn detectors_of(&self, spectrum: i32) -> &[i32] {
        self.index_of(spectrum)
            .map(|i| self.detectors[i].as_slice())
            .unwrap_or(&[])
    }

    pub fn spectrum_of_detector(&self, detector: i32) -> Option<i32> {
        self.by_detector.get(&detector).copied()
    }
}
