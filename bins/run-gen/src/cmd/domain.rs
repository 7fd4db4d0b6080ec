use livedata_api::schema::{
    FramePart, HistogramFrame, RunStart, RunStop, SampleEnvLog, SpectraDetectorMapping,
};

use super::config::Effective;

/// Time-of-flight bins in the generated histograms.
const HISTOGRAM_BINS: usize = 10;

pub const SAMPLE_LOG_NAME: &str = "temperature";

// ═══════════════════════════════════════════════════════════════
//  Acquisition
// ═══════════════════════════════════════════════════════════════

/// One synthetic run: the mapping, run-info messages, and frames with
/// uniformly scattered events. Keeps cumulative per-period histograms of
/// everything it has emitted.
pub struct Acquisition {
    instrument: String,
    run_number: i32,
    start_ms: i64,
    spectra: Vec<i32>,
    detectors: Vec<i32>,
    periods: u32,
    events_per_frame: usize,
    max_tof: f64,
    next_message_id: u64,
    temperature: f64,
    /// Per period, row-major `spectra × HISTOGRAM_BINS`.
    counts: Vec<Vec<f64>>,
}

impl Acquisition {
    pub fn new(eff: &Effective, start_ms: i64) -> Self {
        let n = eff.spectra as usize;
        Self {
            instrument: eff.instrument.clone(),
            run_number: eff.run_number,
            start_ms,
            spectra: (0..eff.spectra).map(|i| eff.first_spectrum + i).collect(),
            detectors: (0..eff.spectra).map(|i| eff.first_detector + i).collect(),
            periods: eff.periods,
            events_per_frame: eff.events_per_frame,
            max_tof: eff.max_tof.max(1.0),
            next_message_id: 0,
            temperature: 4.2,
            counts: vec![vec![0.0; n * HISTOGRAM_BINS]; eff.periods as usize],
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.next_message_id
    }

    pub fn mapping(&self) -> SpectraDetectorMapping {
        SpectraDetectorMapping {
            n_spectra: self.spectra.len() as i32,
            spectra: self.spectra.clone(),
            detectors: self.detectors.clone(),
        }
    }

    pub fn run_start(&self) -> RunStart {
        RunStart {
            run_number: self.run_number,
            start_time_ms: self.start_ms,
            instrument: self.instrument.clone(),
            n_periods: self.periods,
        }
    }

    pub fn run_stop(&self, now_ms: i64) -> RunStop {
        RunStop {
            run_number: self.run_number,
            stop_time_ms: now_ms,
        }
    }

    /// Next frame; periods are visited in turn.
    pub fn next_frame(&mut self, rng: &mut Rng, now_ms: i64) -> FramePart {
        let message_id = self.next_message_id;
        self.next_message_id += 1;
        let period = (message_id % self.periods as u64) as u32;

        let mut time_of_flight = Vec::with_capacity(self.events_per_frame);
        let mut spectrum = Vec::with_capacity(self.events_per_frame);
        let bin_width = self.max_tof / HISTOGRAM_BINS as f64;
        for _ in 0..self.events_per_frame {
            let index = rng.below(self.spectra.len() as u64) as usize;
            let tof = rng.next_f64() * self.max_tof;
            let bin = ((tof / bin_width) as usize).min(HISTOGRAM_BINS - 1);
            if let Some(row) = self.counts.get_mut(period as usize) {
                row[index * HISTOGRAM_BINS + bin] += 1.0;
            }
            time_of_flight.push(tof);
            spectrum.push(self.spectra[index]);
        }

        FramePart {
            message_id,
            pulse_offset_s: (now_ms - self.start_ms).max(0) as f64 / 1000.0,
            proton_charge: 0.0028 + rng.next_f64() * 0.0004,
            period,
            time_of_flight,
            spectrum,
        }
    }

    /// Temperature random walk around 4.2 K.
    pub fn sample_log(&mut self, rng: &mut Rng, now_ms: i64) -> SampleEnvLog {
        self.temperature += (rng.next_f64() * 2.0 - 1.0) * 0.01;
        self.temperature = self.temperature.clamp(4.0, 4.4);
        SampleEnvLog {
            name: SAMPLE_LOG_NAME.to_string(),
            timestamp_ms: now_ms,
            value: self.temperature,
        }
    }

    /// Cumulative counts so far, one histogram per period.
    pub fn histograms(&self) -> Vec<HistogramFrame> {
        let bin_width = self.max_tof / HISTOGRAM_BINS as f64;
        let bin_edges: Vec<f64> = (0..=HISTOGRAM_BINS).map(|i| i as f64 * bin_width).collect();
        self.counts
            .iter()
            .enumerate()
            .map(|(period, counts)| HistogramFrame {
                period: period as u32,
                bin_edges: bin_edges.clone(),
                spectra: self.spectra.clone(),
                counts: counts.clone(),
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Rng — xorshift64
// ═══════════════════════════════════════════════════════════════

pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: i64) -> Self {
        let state = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1 // ensure non-zero
        } else {
            seed as u64
        };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Returns f64 in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / ((1u64 << 53) as f64)
    }

    /// Uniform in `0..n`; `n` must be non-zero.
    pub fn below(&mut self, n: u64) -> u64 {
        self.next_u64() % n
    }
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effective() -> Effective {
        Effective {
            address: "localhost:9092".into(),
            instrument: "EMU".into(),
            run_number: 42,
            spectra: 4,
            first_spectrum: 1,
            first_detector: 100,
            periods: 2,
            rate: 10.0,
            frames: 0,
            events_per_frame: 50,
            max_tof: 1000.0,
            sample_every: 0,
            histogram_every: 0,
            partitions: 1,
            seed: 7,
        }
    }

    #[test]
    fn mapping_pairs_spectra_with_detectors() {
        let acq = Acquisition::new(&effective(), 0);
        let m = acq.mapping();
        assert_eq!(m.n_spectra, 4);
        assert_eq!(m.spectra, vec![1, 2, 3, 4]);
        assert_eq!(m.detectors, vec![100, 101, 102, 103]);
        assert_eq!(acq.run_start().n_periods, 2);
    }

    #[test]
    fn frames_alternate_periods_and_fill_histograms() {
        let mut rng = Rng::new(7);
        let mut acq = Acquisition::new(&effective(), 1_000);

        let f0 = acq.next_frame(&mut rng, 1_500);
        let f1 = acq.next_frame(&mut rng, 2_000);
        assert_eq!((f0.period, f1.period), (0, 1));
        assert_eq!(f0.pulse_offset_s, 0.5);
        assert_eq!(f0.time_of_flight.len(), 50);
        assert!(f0.spectrum.iter().all(|s| (1..=4).contains(s)));
        assert!(f0.time_of_flight.iter().all(|t| (0.0..1000.0).contains(t)));
        assert_eq!(acq.frames_sent(), 2);

        let hist = acq.histograms();
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].bin_edges.len(), HISTOGRAM_BINS + 1);
        assert_eq!(hist[0].counts.iter().sum::<f64>(), 50.0);
        assert_eq!(hist[1].counts.iter().sum::<f64>(), 50.0);
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        let mut a = Rng::new(99);
        let mut b = Rng::new(99);
        for _ in 0..10 {
            assert_eq!(a.next_f64(), b.next_f64());
        }
        assert!(a.below(5) < 5);
    }
}
