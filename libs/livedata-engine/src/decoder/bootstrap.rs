use std::sync::Arc;
use std::time::{Duration, Instant};

use livedata_api::schema::{Payload, RunInfo, RunStart};
use livedata_api::{LiveDataError, Message, TopicSubscriber};

use crate::config::DecoderConfig;
use crate::mapping::DetectorSpectrumMap;
use crate::workspace::{EventBuffer, RunMetadata};

use super::DecoderDeps;
use super::capture::CaptureControl;

/// Outcome of the mapping + run-info handshake.
pub(crate) struct Bootstrapped {
    pub map: Arc<DetectorSpectrumMap>,
    pub run: RunMetadata,
    /// Labelled, instrument attached, no events. Period 0.
    pub template: EventBuffer,
}

/// Read the mapping and run-info messages and build the first buffer.
///
/// `Ok(None)` if a stop was requested while waiting.
pub(crate) fn bootstrap(
    ctl: &CaptureControl,
    mapping: &mut dyn TopicSubscriber,
    run_info: &mut dyn TopicSubscriber,
    deps: &DecoderDeps,
    config: &DecoderConfig,
) -> Result<Option<Bootstrapped>, LiveDataError> {
    // 1. spectrum ↔ detector mapping
    let Some(msg) = next_message(ctl, mapping, config)? else {
        return Ok(None);
    };
    let map = match decode_bootstrap(&msg)? {
        Payload::SpectraDetectorMapping(m) => DetectorSpectrumMap::from_message(&m)?,
        other => {
            return Err(LiveDataError::Bootstrap(format!(
                "expected a spectra-detector mapping on '{}', got {}",
                msg.topic,
                other.kind()
            )));
        }
    };
    tracing::info!(
        topic = %msg.topic,
        offset = msg.offset,
        spectra = map.spectrum_count(),
        "read spectra-detector mapping"
    );

    // 2. first buffer, labelled from the mapping
    let mut template = deps
        .factory
        .create(map.spectrum_count(), config.buffer_size_hint);
    template.label_spectra(&map);

    // 3. run start
    let Some(msg) = next_message(ctl, run_info, config)? else {
        return Ok(None);
    };
    let start = match decode_bootstrap(&msg)? {
        Payload::RunInfo(RunInfo::Start(start)) => start,
        Payload::RunInfo(RunInfo::Stop(stop)) => {
            return Err(LiveDataError::Bootstrap(format!(
                "no run in progress: last message on '{}' stops run {}",
                msg.topic, stop.run_number
            )));
        }
        other => {
            return Err(LiveDataError::Bootstrap(format!(
                "expected run info on '{}', got {}",
                msg.topic,
                other.kind()
            )));
        }
    };
    let run = run_metadata(&start)?;
    load_instrument(deps, &run.instrument, &mut template);
    template.set_run(run.clone());
    tracing::info!(
        run_number = run.run_number,
        instrument = %run.instrument,
        periods = run.n_periods,
        start = %run.start_time,
        "read run start"
    );

    Ok(Some(Bootstrapped {
        map: Arc::new(map),
        run,
        template,
    }))
}

/// Upper bound on the period count accepted from a run start.
pub const MAX_PERIODS: u32 = 4096;

/// Validated metadata for a run start; zero periods is fatal.
pub(crate) fn run_metadata(start: &RunStart) -> Result<RunMetadata, LiveDataError> {
    if start.n_periods == 0 {
        return Err(LiveDataError::Bootstrap(format!(
            "run {} declares zero periods",
            start.run_number
        )));
    }
    if start.n_periods > MAX_PERIODS {
        return Err(LiveDataError::Bootstrap(format!(
            "run {} declares {} periods, limit is {MAX_PERIODS}",
            start.run_number, start.n_periods
        )));
    }
    RunMetadata::from_run_start(start)
}

/// Best effort: a failed load is logged and capture continues.
pub(crate) fn load_instrument(deps: &DecoderDeps, instrument: &str, target: &mut EventBuffer) {
    if instrument.is_empty() {
        return;
    }
    if let Err(e) = deps.loader.load(instrument, target) {
        tracing::warn!(instrument = %instrument, error = %e, "instrument load failed, continuing without geometry");
    }
}

/// `n` buffers: the template as period 0, structural clones after it.
pub(crate) fn allocate_periods(deps: &DecoderDeps, template: EventBuffer, n: u32) -> Vec<EventBuffer> {
    let mut first = template;
    first.set_period(0);
    let mut periods = Vec::with_capacity(n as usize);
    for period in 1..n {
        let mut buffer = deps.factory.clone_empty(&first);
        buffer.set_period(period);
        periods.push(buffer);
    }
    periods.insert(0, first);
    periods
}

/// Non-blocking poll of the run-info topic. Other payload kinds are skipped.
pub(crate) fn poll_run_info(
    run_info: &mut dyn TopicSubscriber,
) -> Result<Option<RunInfo>, LiveDataError> {
    let Some(msg) = run_info.consume(Duration::ZERO)? else {
        return Ok(None);
    };
    if msg.is_empty() {
        return Ok(None);
    }
    match Payload::decode(&msg.payload)? {
        Payload::RunInfo(info) => Ok(Some(info)),
        other => {
            tracing::debug!(topic = %msg.topic, kind = other.kind(), "ignoring payload on run-info topic");
            Ok(None)
        }
    }
}

fn decode_bootstrap(msg: &Message) -> Result<Payload, LiveDataError> {
    if msg.is_empty() {
        return Err(LiveDataError::Bootstrap(format!(
            "empty message on '{}' at offset {}",
            msg.topic, msg.offset
        )));
    }
    Payload::decode(&msg.payload).map_err(|e| {
        LiveDataError::Bootstrap(format!("'{}' offset {}: {e}", msg.topic, msg.offset))
    })
}

/// Consume one message within the bootstrap timeout, checking the interrupt
/// between polls.
fn next_message(
    ctl: &CaptureControl,
    sub: &mut dyn TopicSubscriber,
    config: &DecoderConfig,
) -> Result<Option<Message>, LiveDataError> {
    let deadline = Instant::now() + config.bootstrap_timeout;
    loop {
        if ctl.interrupted() {
            return Ok(None);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(msg) = sub.consume(config.consume_timeout.min(remaining))? {
            return Ok(Some(msg));
        }
        if Instant::now() >= deadline {
            return Err(LiveDataError::Bootstrap(format!(
                "no message on '{}' within {:?}",
                sub.topics().join(","),
                config.bootstrap_timeout
            )));
        }
    }
}
