use std::sync::{Arc, Mutex};
use std::time::Duration;

use livedata_api::schema::{HistogramFrame, Payload, RunInfo};
use livedata_api::{LiveDataError, TopicSubscriber};

use crate::config::DecoderConfig;
use crate::mapping::DetectorSpectrumMap;
use crate::workspace::{HistogramBuffer, RunMetadata};

use super::bootstrap::{self, poll_run_info, run_metadata};
use super::capture::{CaptureControl, CaptureThread};
use super::{DecoderDeps, DecoderState, LiveData, RunStatus, lock_or_recover};

pub struct HistoSubscribers {
    pub histograms: Box<dyn TopicSubscriber>,
    pub run_info: Box<dyn TopicSubscriber>,
    pub mapping: Box<dyn TopicSubscriber>,
}

#[derive(Default)]
struct HistoState {
    map: Option<Arc<DetectorSpectrumMap>>,
    run: Option<RunMetadata>,
    run_status: Option<RunStatus>,
    /// Latest histogram per period.
    latest: Vec<Option<HistogramFrame>>,
}

/// Keeps the most recent cumulative histogram per period.
///
/// Unlike the event decoder, extraction does not reset anything: each
/// histogram message already carries the full counts so far.
pub struct HistoStreamDecoder {
    state: Arc<Mutex<HistoState>>,
    capture: CaptureThread,
    subscribers: Mutex<Option<HistoSubscribers>>,
    deps: DecoderDeps,
    config: DecoderConfig,
}

impl HistoStreamDecoder {
    pub fn new(subscribers: HistoSubscribers, deps: DecoderDeps, config: DecoderConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(HistoState::default())),
            capture: CaptureThread::new("histo"),
            subscribers: Mutex::new(Some(subscribers)),
            deps,
            config,
        }
    }

    pub fn start(&self) -> Result<(), LiveDataError> {
        let subs = lock_or_recover(&self.subscribers, "histo subscribers")
            .take()
            .ok_or_else(|| LiveDataError::Config("histogram decoder already started".into()))?;
        let worker = HistoWorker {
            subs,
            state: Arc::clone(&self.state),
            deps: self.deps.clone(),
            config: self.config,
        };
        self.capture.spawn(move |ctl| worker.run(ctl))
    }

    pub fn stop_capture(&self) {
        self.capture.stop(self.config.poll_interval.max(Duration::from_millis(1)));
    }

    pub fn extract_data(&self) -> Result<LiveData, LiveDataError> {
        if let Some(err) = self.capture.error() {
            return Err(err);
        }
        let state = lock_or_recover(&self.state, "histograms");
        let Some(map) = state.map.as_ref() else {
            return Err(LiveDataError::NotYetAvailable(
                "histogram decoder is still bootstrapping".into(),
            ));
        };
        if state.latest.iter().all(Option::is_none) {
            return Err(LiveDataError::NotYetAvailable("no histogram received yet".into()));
        }
        let periods = state
            .latest
            .iter()
            .enumerate()
            .map(|(period, frame)| match frame {
                Some(frame) => HistogramBuffer::from_frame(frame, map, state.run.clone()),
                None => HistogramBuffer::empty(period as u32, map, state.run.clone()),
            })
            .collect();
        Ok(LiveData::from_histograms(periods))
    }

    pub fn has_data(&self) -> bool {
        lock_or_recover(&self.state, "histograms").map.is_some()
    }

    pub fn state(&self) -> DecoderState {
        self.capture.state()
    }

    pub fn last_error(&self) -> Option<LiveDataError> {
        self.capture.error()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_running()
    }

    pub fn run_status(&self) -> RunStatus {
        lock_or_recover(&self.state, "histograms")
            .run_status
            .unwrap_or(RunStatus::NoRun)
    }

    pub fn run_number(&self) -> Option<i32> {
        lock_or_recover(&self.state, "histograms")
            .run
            .as_ref()
            .map(|r| r.run_number)
    }

    pub fn wait_until_settled(&self, timeout: Duration) -> DecoderState {
        self.capture
            .wait_until_settled(timeout, self.config.poll_interval.max(Duration::from_millis(1)))
    }
}

impl Drop for HistoStreamDecoder {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

struct HistoWorker {
    subs: HistoSubscribers,
    state: Arc<Mutex<HistoState>>,
    deps: DecoderDeps,
    config: DecoderConfig,
}

impl HistoWorker {
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
        {
            let mut state = lock_or_recover(&self.state, "histograms");
            state.latest = vec![None; boot.run.n_periods as usize];
            state.map = Some(boot.map);
            state.run = Some(boot.run);
            state.run_status = Some(RunStatus::Running);
        }
        ctl.set_state(DecoderState::Capturing);
        tracing::info!("histogram capture started");

        while !ctl.interrupted() {
            std::thread::sleep(self.config.poll_interval);

            if let Some(msg) = self.subs.histograms.consume(self.config.consume_timeout)? {
                if !msg.is_empty() {
                    match Payload::decode(&msg.payload)? {
                        Payload::Histogram(frame) => self.store(frame),
                        other => {
                            tracing::debug!(topic = %msg.topic, kind = other.kind(), "ignoring payload on histogram topic");
                        }
                    }
                }
            }

            match poll_run_info(self.subs.run_info.as_mut())? {
                Some(RunInfo::Start(start)) => {
                    let mut state = lock_or_recover(&self.state, "histograms");
                    if state.run.as_ref().is_some_and(|r| r.run_number == start.run_number) {
                        continue;
                    }
                    let run = run_metadata(&start)?;
                    tracing::info!(run_number = run.run_number, periods = run.n_periods, "new run started");
                    state.latest = vec![None; run.n_periods as usize];
                    state.run = Some(run);
                    state.run_status = Some(RunStatus::Running);
                }
                Some(RunInfo::Stop(stop)) => {
                    let mut state = lock_or_recover(&self.state, "histograms");
                    if state.run.as_ref().is_some_and(|r| r.run_number == stop.run_number) {
                        state.run_status = Some(RunStatus::EndRun);
                        tracing::info!(run_number = stop.run_number, "run stopped");
                    }
                }
                None => {}
            }
        }
        tracing::info!("histogram capture interrupted");
        Ok(())
    }

    fn store(&self, frame: HistogramFrame) {
        let mut state = lock_or_recover(&self.state, "histograms");
        let periods = state.latest.len();
        match state.latest.get_mut(frame.period as usize) {
            Some(slot) => *slot = Some(frame),
            None => {
                tracing::warn!(period = frame.period, periods, "histogram for unknown period, skipping");
            }
        }
    }
}
