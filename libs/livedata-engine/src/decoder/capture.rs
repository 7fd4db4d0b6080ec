use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use livedata_api::LiveDataError;

use super::{DecoderState, lock_or_recover};

#[derive(Debug)]
struct CaptureStatus {
    state: DecoderState,
    error: Option<LiveDataError>,
}

/// Handle given to the capture body: interrupt flag plus forward state
/// transitions.
#[derive(Clone)]
pub(crate) struct CaptureControl {
    interrupt: Arc<AtomicBool>,
    status: Arc<Mutex<CaptureStatus>>,
}

impl CaptureControl {
    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    /// A pending stop request wins over `Capturing`.
    pub fn set_state(&self, state: DecoderState) {
        let mut status = lock_or_recover(&self.status, "capture status");
        if status.state == DecoderState::Stopping && state == DecoderState::Capturing {
            return;
        }
        status.state = state;
    }

    fn finish(&self, name: &str, result: Result<(), LiveDataError>) {
        let mut status = lock_or_recover(&self.status, "capture status");
        match result {
            Ok(()) => {
                status.state = DecoderState::Stopped;
                tracing::info!(decoder = name, "capture thread stopped");
            }
            Err(e) => {
                tracing::error!(decoder = name, error = %e, "capture thread failed");
                status.error = Some(e);
                status.state = DecoderState::Failed;
            }
        }
    }
}

/// The single background thread owned by a decoder.
pub(crate) struct CaptureThread {
    name: String,
    control: CaptureControl,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureThread {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            control: CaptureControl {
                interrupt: Arc::new(AtomicBool::new(false)),
                status: Arc::new(Mutex::new(CaptureStatus {
                    state: DecoderState::Idle,
                    error: None,
                })),
            },
            handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> DecoderState {
        lock_or_recover(&self.control.status, "capture status").state
    }

    pub fn error(&self) -> Option<LiveDataError> {
        lock_or_recover(&self.control.status, "capture status").error.clone()
    }

    /// Thread spawned and not yet exited.
    pub fn is_running(&self) -> bool {
        lock_or_recover(&self.handle, "capture handle")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Spawn the capture thread. Only valid from `Idle`.
    pub fn spawn<F>(&self, body: F) -> Result<(), LiveDataError>
    where
        F: FnOnce(&CaptureControl) -> Result<(), LiveDataError> + Send + 'static,
    {
        {
            let mut status = lock_or_recover(&self.control.status, "capture status");
            if status.state != DecoderState::Idle {
                return Err(LiveDataError::Config(format!(
                    "decoder '{}' cannot start from state {}",
                    self.name, status.state
                )));
            }
            status.state = DecoderState::Bootstrapping;
        }

        let control = self.control.clone();
        let name = self.name.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("capture-{}", self.name))
            .spawn(move || {
                let result = match panic::catch_unwind(AssertUnwindSafe(|| body(&control))) {
                    Ok(result) => result,
                    Err(payload) => Err(LiveDataError::Transport(format!(
                        "capture thread panicked: {}",
                        panic_message(payload.as_ref())
                    ))),
                };
                control.finish(&name, result);
            });

        match spawned {
            Ok(handle) => {
                *lock_or_recover(&self.handle, "capture handle") = Some(handle);
                tracing::info!(decoder = %self.name, "capture thread started");
                Ok(())
            }
            Err(e) => {
                let err = LiveDataError::Transport(format!("spawn capture thread: {e}"));
                self.control.finish(&self.name, Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Request a stop and block until the thread has exited.
    ///
    /// Idempotent; from `Idle` it only marks the decoder `Stopped`.
    pub fn stop(&self, poll: Duration) {
        {
            let mut status = lock_or_recover(&self.control.status, "capture status");
            match status.state {
                DecoderState::Idle => {
                    status.state = DecoderState::Stopped;
                    return;
                }
                DecoderState::Bootstrapping | DecoderState::Capturing => {
                    status.state = DecoderState::Stopping;
                }
                DecoderState::Stopping | DecoderState::Stopped | DecoderState::Failed => {}
            }
        }
        self.control.interrupt.store(true, Ordering::Release);

        let started = Instant::now();
        while !self.state().is_terminal() {
            if !self.is_running() {
                break;
            }
            std::thread::sleep(poll);
        }

        let handle = lock_or_recover(&self.handle, "capture handle").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                self.control.finish(
                    &self.name,
                    Err(LiveDataError::Transport("capture thread panicked".into())),
                );
            }
            tracing::debug!(
                decoder = %self.name,
                waited_ms = started.elapsed().as_millis() as u64,
                "capture thread joined"
            );
        }
    }

    /// Block until the state leaves `Idle`/`Bootstrapping`, or `timeout`.
    pub fn wait_until_settled(&self, timeout: Duration, poll: Duration) -> DecoderState {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.state();
            if !matches!(state, DecoderState::Idle | DecoderState::Bootstrapping)
                || Instant::now() >= deadline
            {
                return state;
            }
            std::thread::sleep(poll);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL: Duration = Duration::from_millis(1);

    #[test]
    fn stop_from_idle_marks_stopped() {
        let capture = CaptureThread::new("t");
        capture.stop(POLL);
        capture.stop(POLL);
        assert_eq!(capture.state(), DecoderState::Stopped);
        assert!(capture.spawn(|_| Ok(())).is_err());
    }

    #[test]
    fn interrupt_ends_loop_in_stopped() {
        let capture = CaptureThread::new("t");
        capture
            .spawn(|ctl| {
                ctl.set_state(DecoderState::Capturing);
                while !ctl.interrupted() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(
            capture.wait_until_settled(Duration::from_secs(5), POLL),
            DecoderState::Capturing
        );
        assert!(capture.is_running());

        capture.stop(POLL);
        assert_eq!(capture.state(), DecoderState::Stopped);
        assert!(!capture.is_running());
        capture.stop(POLL);
        assert_eq!(capture.state(), DecoderState::Stopped);
    }

    #[test]
    fn error_is_recorded() {
        let capture = CaptureThread::new("t");
        capture
            .spawn(|_| Err(LiveDataError::Bootstrap("empty mapping".into())))
            .unwrap();
        assert_eq!(
            capture.wait_until_settled(Duration::from_secs(5), POLL),
            DecoderState::Failed
        );
        assert_eq!(
            capture.error(),
            Some(LiveDataError::Bootstrap("empty mapping".into()))
        );
        capture.stop(POLL);
        assert_eq!(capture.state(), DecoderState::Failed);
    }

    #[test]
    fn panic_is_reported_as_failure() {
        let capture = CaptureThread::new("t");
        capture.spawn(|_| panic!("boom")).unwrap();
        capture.stop(POLL);
        assert_eq!(capture.state(), DecoderState::Failed);
        assert!(capture.error().is_some());
    }

    #[test]
    fn panic_fails_decoder_without_stop() {
        let capture = CaptureThread::new("t");
        capture
            .spawn(|ctl| {
                ctl.set_state(DecoderState::Capturing);
                panic!("pulse time out of range");
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while capture.state() != DecoderState::Failed && Instant::now() < deadline {
            std::thread::sleep(POLL);
        }
        assert_eq!(capture.state(), DecoderState::Failed);
        match capture.error() {
            Some(LiveDataError::Transport(msg)) => {
                assert!(msg.contains("pulse time out of range"), "{msg}");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
