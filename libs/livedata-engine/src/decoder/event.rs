use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use livedata_api::schema::{FramePart, Payload, RunInfo, RunStart, RunStop};
use livedata_api::{LiveDataError, Message, TopicSubscriber};

use crate::config::DecoderConfig;
use crate::mapping::DetectorSpectrumMap;
use crate::workspace::{EventBuffer, PROTON_CHARGE_LOG, RunMetadata, TofEvent};

use super::bootstrap::{self, allocate_periods, load_instrument, poll_run_info, run_metadata};
use super::capture::{CaptureControl, CaptureThread};
use super::{DecoderDeps, DecoderState, LiveData, RunStatus, lock_or_recover};

/// Sample-environment messages drained per loop iteration.
const SAMPLE_ENV_BATCH: usize = 16;

/// Subscribers owned by an [`EventStreamDecoder`], one per topic role.
pub struct EventSubscribers {
    pub events: Box<dyn TopicSubscriber>,
    pub run_info: Box<dyn TopicSubscriber>,
    pub mapping: Box<dyn TopicSubscriber>,
    pub sample_env: Option<Box<dyn TopicSubscriber>>,
}

/// Everything behind the buffer lock.
#[derive(Default)]
struct EventState {
    periods: Vec<EventBuffer>,
    /// Buffers of runs that ended while capturing, oldest first.
    finished: VecDeque<Vec<EventBuffer>>,
    map: Option<Arc<DetectorSpectrumMap>>,
    run: Option<RunMetadata>,
    run_status: Option<RunStatus>,
    skipped_events: u64,
}

// ═══════════════════════════════════════════════════════════════
//  EventStreamDecoder
// ═══════════════════════════════════════════════════════════════

/// Decodes event frames into per-period [`EventBuffer`]s on a background
/// thread.
pub struct EventStreamDecoder {
    state: Arc<Mutex<EventState>>,
    capture: CaptureThread,
    subscribers: Mutex<Option<EventSubscribers>>,
    deps: DecoderDeps,
    config: DecoderConfig,
}

impl EventStreamDecoder {
    pub fn new(subscribers: EventSubscribers, deps: DecoderDeps, config: DecoderConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(EventState::default())),
            capture: CaptureThread::new("event"),
            subscribers: Mutex::new(Some(subscribers)),
            deps,
            config,
        }
    }

    /// Spawn the capture thread. Bootstrap runs on that thread; its errors
    /// surface through `extract_data` and [`last_error`](Self::last_error).
    pub fn start(&self) -> Result<(), LiveDataError> {
        let subs = lock_or_recover(&self.subscribers, "event subscribers")
            .take()
            .ok_or_else(|| LiveDataError::Config("event decoder already started".into()))?;
        let worker = EventWorker {
            subs,
            state: Arc::clone(&self.state),
            deps: self.deps.clone(),
            config: self.config,
        };
        self.capture.spawn(move |ctl| worker.run(ctl))
    }

    /// Interrupt the capture loop and wait for the thread to exit.
    pub fn stop_capture(&self) {
        self.capture.stop(self.config.poll_interval.max(Duration::from_millis(1)));
    }

    /// Swap out the filled buffers for empty clones.
    ///
    /// Buffers of a run that ended during capture are returned first. A
    /// stored capture failure is returned on every call.
    pub fn extract_data(&self) -> Result<LiveData, LiveDataError> {
        if let Some(err) = self.capture.error() {
            return Err(err);
        }
        let mut state = lock_or_recover(&self.state, "event buffers");
        if let Some(finished) = state.finished.pop_front() {
            return Ok(LiveData::from_periods(finished));
        }
        if state.periods.is_empty() {
            return Err(LiveDataError::NotYetAvailable(
                "buffers are allocated once bootstrap completes".into(),
            ));
        }
        let fresh: Vec<EventBuffer> = state
            .periods
            .iter()
            .map(|b| self.deps.factory.clone_empty(b))
            .collect();
        let filled = std::mem::replace(&mut state.periods, fresh);
        Ok(LiveData::from_periods(filled))
    }

    /// Buffers exist, whether or not any event has arrived.
    pub fn has_data(&self) -> bool {
        !lock_or_recover(&self.state, "event buffers").periods.is_empty()
    }

    pub fn state(&self) -> DecoderState {
        self.capture.state()
    }

    pub fn last_error(&self) -> Option<LiveDataError> {
        self.capture.error()
    }

    /// Capture thread alive.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_running()
    }

    pub fn run_status(&self) -> RunStatus {
        lock_or_recover(&self.state, "event buffers")
            .run_status
            .unwrap_or(RunStatus::NoRun)
    }

    pub fn run_number(&self) -> Option<i32> {
        lock_or_recover(&self.state, "event buffers")
            .run
            .as_ref()
            .map(|r| r.run_number)
    }

    /// Events merged since the last extraction, all periods.
    pub fn buffered_events(&self) -> usize {
        lock_or_recover(&self.state, "event buffers")
            .periods
            .iter()
            .map(EventBuffer::total_events)
            .sum()
    }

    /// Events dropped because their spectrum was not in the mapping.
    pub fn skipped_events(&self) -> u64 {
        lock_or_recover(&self.state, "event buffers").skipped_events
    }

    /// Wait until bootstrap has either finished or failed.
    pub fn wait_until_settled(&self, timeout: Duration) -> DecoderState {
        self.capture
            .wait_until_settled(timeout, self.config.poll_interval.max(Duration::from_millis(1)))
    }
}

impl Drop for EventStreamDecoder {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Capture thread body
// ═══════════════════════════════════════════════════════════════

struct EventWorker {
    subs: EventSubscribers,
    state: Arc<Mutex<EventState>>,
    deps: DecoderDeps,
    config: DecoderConfig,
}

impl EventWorker {
    fn run(mut self, ctl: &CaptureControl) -> Result<(), LiveDataError> {
        let Some(boot) = bootstrap::bootstrap(
            ctl,
            self.subs.mapping.as_mut(),
            self.subs.run_info.as_mut(),
            &self.deps,
            &self.config,
        )?
        else {
            return Ok(());
        };

        let periods = allocate_periods(&self.deps, boot.template, boot.run.n_periods);
        {
            let mut state = lock_or_recover(&self.state, "event buffers");
            state.periods = periods;
            state.map = Some(boot.map);
            state.run = Some(boot.run);
            state.run_status = Some(RunStatus::Running);
        }
        ctl.set_state(DecoderState::Capturing);
        tracing::info!("event capture started");

        while !ctl.interrupted() {
            std::thread::sleep(self.config.poll_interval);

            if let Some(msg) = self.subs.events.consume(self.config.consume_timeout)? {
                self.handle_event_message(&msg)?;
            }
            match poll_run_info(self.subs.run_info.as_mut())? {
                Some(RunInfo::Start(start)) => self.handle_run_start(&start)?,
                Some(RunInfo::Stop(stop)) => self.handle_run_stop(&stop),
                None => {}
            }
            self.poll_sample_env()?;
        }
        tracing::info!("event capture interrupted");
        Ok(())
    }

    fn handle_event_message(&self, msg: &Message) -> Result<(), LiveDataError> {
        if msg.is_empty() {
            return Ok(());
        }
        match Payload::decode(&msg.payload).map_err(|e| e.with_context(format!("{}@{}", msg.topic, msg.offset)))? {
            Payload::FramePart(frame) => self.merge_frame(&frame),
            Payload::Unknown(tag) => {
                tracing::debug!(
                    topic = %msg.topic,
                    tag = %String::from_utf8_lossy(&tag),
                    "ignoring unrecognised payload"
                );
            }
            other => {
                tracing::debug!(topic = %msg.topic, kind = other.kind(), "ignoring payload on event topic");
            }
        }
        Ok(())
    }

    /// Apply one frame under a single hold of the buffer lock.
    fn merge_frame(&self, frame: &FramePart) {
        let mut guard = lock_or_recover(&self.state, "event buffers");
        let state = &mut *guard;
        let (Some(run), Some(map)) = (state.run.as_ref(), state.map.as_ref()) else {
            return;
        };
        let Some(pulse_time) = pulse_time(run.start_time, frame.pulse_offset_s) else {
            tracing::warn!(
                message_id = frame.message_id,
                pulse_offset_s = frame.pulse_offset_s,
                "pulse time out of range, skipping frame"
            );
            return;
        };

        let Some(buffer) = state.periods.get_mut(frame.period as usize) else {
            tracing::warn!(
                period = frame.period,
                periods = state.periods.len(),
                message_id = frame.message_id,
                "frame for unknown period, skipping"
            );
            return;
        };

        buffer.add_log_value(PROTON_CHARGE_LOG, pulse_time, frame.proton_charge);
        let mut skipped = 0u64;
        for (&tof, &spectrum) in frame.time_of_flight.iter().zip(&frame.spectrum) {
            match map.index_of(spectrum) {
                Some(index) => {
                    buffer.add_event(index, TofEvent { tof, pulse_time });
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            state.skipped_events += skipped;
            tracing::debug!(
                message_id = frame.message_id,
                skipped,
                "events for unmapped spectra dropped"
            );
        }
    }

    fn handle_run_stop(&self, stop: &RunStop) {
        let mut state = lock_or_recover(&self.state, "event buffers");
        match state.run.as_ref() {
            Some(run) if run.run_number == stop.run_number => {
                state.run_status = Some(RunStatus::EndRun);
                tracing::info!(run_number = stop.run_number, "run stopped");
            }
            _ => {
                tracing::warn!(run_number = stop.run_number, "run stop for a run not being captured");
            }
        }
    }

    /// A different run number starts a new run: the current buffers are
    /// parked for extraction and fresh ones allocated.
    fn handle_run_start(&self, start: &RunStart) -> Result<(), LiveDataError> {
        let template = {
            let state = lock_or_recover(&self.state, "event buffers");
            if state.run.as_ref().is_some_and(|r| r.run_number == start.run_number) {
                tracing::debug!(run_number = start.run_number, "repeated run start ignored");
                return Ok(());
            }
            state.periods.first().map(|b| self.deps.factory.clone_empty(b))
        };
        let Some(mut template) = template else {
            return Ok(());
        };

        let run = run_metadata(start)?;
        if template.instrument() != Some(run.instrument.as_str()) {
            load_instrument(&self.deps, &run.instrument, &mut template);
        }
        template.set_run(run.clone());
        let periods = allocate_periods(&self.deps, template, run.n_periods);

        let mut state = lock_or_recover(&self.state, "event buffers");
        let previous = std::mem::replace(&mut state.periods, periods);
        state.finished.push_back(previous);
        tracing::info!(
            run_number = run.run_number,
            periods = run.n_periods,
            "new run started, previous run parked"
        );
        state.run = Some(run);
        state.run_status = Some(RunStatus::Running);
        Ok(())
    }

    fn poll_sample_env(&mut self) -> Result<(), LiveDataError> {
        let Some(sub) = self.subs.sample_env.as_mut() else {
            return Ok(());
        };
        for _ in 0..SAMPLE_ENV_BATCH {
            let Some(msg) = sub.consume(Duration::ZERO)? else {
                break;
            };
            if msg.is_empty() {
                continue;
            }
            let Payload::SampleEnvironment(log) = Payload::decode(&msg.payload)? else {
                continue;
            };
            let Some(time) = DateTime::from_timestamp_millis(log.timestamp_ms) else {
                tracing::warn!(name = %log.name, ts = log.timestamp_ms, "sample log timestamp out of range");
                continue;
            };
            let mut state = lock_or_recover(&self.state, "event buffers");
            for buffer in state.periods.iter_mut() {
                buffer.add_log_value(&log.name, time, log.value);
            }
        }
        Ok(())
    }
}

/// `None` if the offset is not finite or lands outside the representable range.
fn pulse_time(run_start: DateTime<Utc>, offset_s: f64) -> Option<DateTime<Utc>> {
    let nanos = (offset_s * 1e9).round();
    if !nanos.is_finite() || nanos.abs() >= i64::MAX as f64 {
        return None;
    }
    run_start.checked_add_signed(TimeDelta::nanoseconds(nanos as i64))
}
