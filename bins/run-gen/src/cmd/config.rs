use clap::Args;
use serde::Deserialize;

use super::error::RunGenError;

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub address: Option<String>,
    pub instrument: Option<String>,
    pub run_number: Option<i32>,
    pub spectra: Option<i32>,
    pub first_spectrum: Option<i32>,
    pub first_detector: Option<i32>,
    pub periods: Option<u32>,
    pub rate: Option<f64>,
    pub frames: Option<u64>,
    pub events_per_frame: Option<usize>,
    pub max_tof: Option<f64>,
    pub sample_every: Option<u64>,
    pub histogram_every: Option<u64>,
    pub partitions: Option<i32>,
    pub seed: Option<i64>,
}

pub fn load_config(path: &str) -> Result<Config, RunGenError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RunGenError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| RunGenError::Config(format!("bad config {path}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct GenArgs {
    /// Path to run-gen.toml
    #[arg(long, default_value = "run-gen.toml", env = "RUN_GEN_CONFIG")]
    pub config: String,

    /// Broker address, host:port
    #[arg(long)]
    pub address: Option<String>,

    /// Instrument name (topic prefix)
    #[arg(long)]
    pub instrument: Option<String>,

    /// Run number announced in the run start
    #[arg(long)]
    pub run_number: Option<i32>,

    /// Number of spectra in the mapping
    #[arg(long)]
    pub spectra: Option<i32>,

    /// Number of acquisition periods
    #[arg(long)]
    pub periods: Option<u32>,

    /// Frames per second
    #[arg(long)]
    pub rate: Option<f64>,

    /// Frames to send before stopping the run (0 = until Ctrl+C)
    #[arg(long)]
    pub frames: Option<u64>,

    /// Events per frame
    #[arg(long)]
    pub events_per_frame: Option<usize>,

    /// PRNG seed (0 = current time)
    #[arg(long)]
    pub seed: Option<i64>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective — merged config
// ═══════════════════════════════════════════════════════════════

/// Final settings: config file < env/CLI.
#[derive(Debug)]
pub struct Effective {
    pub address: String,
    pub instrument: String,
    pub run_number: i32,
    pub spectra: i32,
    pub first_spectrum: i32,
    pub first_detector: i32,
    pub periods: u32,
    pub rate: f64,
    pub frames: u64,
    pub events_per_frame: usize,
    pub max_tof: f64,
    /// One sample-environment reading every N frames (0 = never).
    pub sample_every: u64,
    /// One histogram per period every N frames (0 = never).
    pub histogram_every: u64,
    pub partitions: i32,
    pub seed: i64,
}

impl Effective {
    pub fn new(args: &GenArgs) -> Result<Self, RunGenError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };
        Self::merge(args, cfg)
    }

    fn merge(args: &GenArgs, cfg: Config) -> Result<Self, RunGenError> {
        let eff = Self {
            address: args
                .address
                .clone()
                .or(cfg.address)
                .unwrap_or_else(|| "localhost:9092".into()),
            instrument: args
                .instrument
                .clone()
                .or(cfg.instrument)
                .unwrap_or_else(|| "EMU".into()),
            run_number: args.run_number.or(cfg.run_number).unwrap_or(1),
            spectra: args.spectra.or(cfg.spectra).unwrap_or(64),
            first_spectrum: cfg.first_spectrum.unwrap_or(1),
            first_detector: cfg.first_detector.unwrap_or(1000),
            periods: args.periods.or(cfg.periods).unwrap_or(1),
            rate: args.rate.or(cfg.rate).unwrap_or(10.0),
            frames: args.frames.or(cfg.frames).unwrap_or(0),
            events_per_frame: args.events_per_frame.or(cfg.events_per_frame).unwrap_or(200),
            max_tof: cfg.max_tof.unwrap_or(20_000.0),
            sample_every: cfg.sample_every.unwrap_or(10),
            histogram_every: cfg.histogram_every.unwrap_or(0),
            partitions: cfg.partitions.unwrap_or(1),
            seed: args.seed.or(cfg.seed).unwrap_or(0),
        };

        if eff.spectra < 1 {
            return Err(RunGenError::Config("spectra must be at least 1".into()));
        }
        if eff.periods < 1 {
            return Err(RunGenError::Config("periods must be at least 1".into()));
        }
        if eff.rate <= 0.0 {
            return Err(RunGenError::Config("rate must be positive".into()));
        }
        Ok(eff)
    }
}
