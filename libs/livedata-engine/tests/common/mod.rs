#![allow(dead_code)]

use std::time::Duration;

use chrono::{DateTime, Utc};
use livedata_api::schema::{
    FramePart, HistogramFrame, Payload, RunStart, RunStop, SampleEnvLog, SpectraDetectorMapping,
};
use livedata_api::{Broker, SubscribePosition, TopicRole};
use livedata_engine::{DecoderConfig, DecoderDeps, EventStreamDecoder, EventSubscribers, MemoryBroker};

pub const INSTRUMENT: &str = "EMU";
/// 2024-03-01T00:00:00Z
pub const T0_MS: i64 = 1_709_251_200_000;

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(T0_MS).unwrap()
}

pub fn topic(role: TopicRole) -> String {
    role.topic_name(INSTRUMENT)
}

/// Broker with every instrument topic created, one partition each.
pub fn broker() -> MemoryBroker {
    let broker = MemoryBroker::new("test");
    for role in TopicRole::ALL {
        broker.create_topic(&topic(role), 1);
    }
    broker
}

pub fn publish(broker: &MemoryBroker, role: TopicRole, payload: impl Into<Payload>) {
    broker
        .produce(&topic(role), payload.into().encode(), T0_MS)
        .unwrap();
}

pub fn mapping() -> SpectraDetectorMapping {
    SpectraDetectorMapping {
        n_spectra: 3,
        spectra: vec![10, 11, 12],
        detectors: vec![100, 101, 102],
    }
}

pub fn run_start(run_number: i32, n_periods: u32) -> RunStart {
    RunStart {
        run_number,
        start_time_ms: T0_MS,
        instrument: INSTRUMENT.to_string(),
        n_periods,
    }
}

pub fn run_stop(run_number: i32) -> RunStop {
    RunStop {
        run_number,
        stop_time_ms: T0_MS + 60_000,
    }
}

pub fn frame(message_id: u64, period: u32, pulse_offset_s: f64, events: &[(f64, i32)]) -> FramePart {
    FramePart {
        message_id,
        pulse_offset_s,
        proton_charge: 1.5,
        period,
        time_of_flight: events.iter().map(|e| e.0).collect(),
        spectrum: events.iter().map(|e| e.1).collect(),
    }
}

pub fn sample_log(name: &str, offset_ms: i64, value: f64) -> SampleEnvLog {
    SampleEnvLog {
        name: name.to_string(),
        timestamp_ms: T0_MS + offset_ms,
        value,
    }
}

pub fn histogram(period: u32, spectra: Vec<i32>, counts: Vec<f64>) -> HistogramFrame {
    HistogramFrame {
        period,
        bin_edges: vec![0.0, 1000.0, 2000.0],
        spectra,
        counts,
    }
}

/// Mapping and run start for run 555 with `n_periods` periods.
pub fn seed_run(broker: &MemoryBroker, n_periods: u32) {
    publish(broker, TopicRole::DetSpecMap, mapping());
    publish(broker, TopicRole::RunInfo, run_start(555, n_periods));
}

pub fn fast_config() -> DecoderConfig {
    DecoderConfig {
        poll_interval: Duration::from_millis(1),
        consume_timeout: Duration::from_millis(20),
        bootstrap_timeout: Duration::from_secs(2),
        buffer_size_hint: 16,
    }
}

/// Event decoder reading every topic from its earliest retained message.
pub fn event_decoder(broker: &MemoryBroker, config: DecoderConfig) -> EventStreamDecoder {
    event_decoder_with(broker, config, DecoderDeps::default())
}

pub fn event_decoder_with(
    broker: &MemoryBroker,
    config: DecoderConfig,
    deps: DecoderDeps,
) -> EventStreamDecoder {
    let sub = |role| {
        broker
            .subscribe_one(&topic(role), SubscribePosition::EARLIEST)
            .unwrap()
    };
    EventStreamDecoder::new(
        EventSubscribers {
            events: sub(TopicRole::Events),
            run_info: sub(TopicRole::RunInfo),
            mapping: sub(TopicRole::DetSpecMap),
            sample_env: Some(sub(TopicRole::SampleEnv)),
        },
        deps,
        config,
    )
}

/// Poll `check` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
