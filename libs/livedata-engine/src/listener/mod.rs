//! Listener facade polled by an external driver: connect, start, then
//! `extract_data` on an interval.

mod event;
mod histo;
mod registry;

use std::sync::Arc;
use std::time::{Duration, Instant};

pub use event::EventListener;
pub use histo::HistoListener;
pub use registry::{ListenerConstructor, ListenerRegistry, registry};

pub use crate::decoder::RunStatus;

use livedata_api::{BrokerConnector, LiveDataError};

use crate::broker::TcpConnector;
use crate::config::ListenerConfig;
use crate::decoder::{DecoderDeps, LiveData};
use crate::workspace::{InstrumentLoader, WorkspaceFactory};

/// Interval between `extract_data` retries while bootstrap is unfinished.
const EXTRACT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

pub trait LiveListener: Send {
    /// Registry key of this listener kind.
    fn kind(&self) -> &'static str;

    /// Subscribe to the instrument's topics and build a decoder.
    ///
    /// `false` on failure (logged); the caller may retry.
    fn connect(&mut self, address: &str, instrument: &str) -> bool;

    fn start(&mut self) -> Result<(), LiveDataError>;

    /// Waits up to the configured extract wait while data is not yet
    /// available.
    fn extract_data(&mut self) -> Result<LiveData, LiveDataError>;

    /// Capture thread alive. Says nothing about data availability.
    fn is_connected(&self) -> bool;

    fn run_status(&self) -> RunStatus;

    fn run_number(&self) -> Option<i32>;

    /// Stop capturing. Safe to call repeatedly.
    fn stop(&mut self);
}

/// Configuration plus the collaborators a listener needs.
#[derive(Clone)]
pub struct ListenerContext {
    pub config: ListenerConfig,
    pub connector: Arc<dyn BrokerConnector>,
    pub deps: DecoderDeps,
}

impl ListenerContext {
    /// Network broker, default buffer factory and instrument loader.
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            connector: Arc::new(TcpConnector),
            deps: DecoderDeps::default(),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn BrokerConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn InstrumentLoader>) -> Self {
        self.deps.loader = loader;
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn WorkspaceFactory>) -> Self {
        self.deps.factory = factory;
        self
    }
}

/// Retry `extract` while it reports `NotYetAvailable`, up to `wait`.
pub(crate) fn extract_with_retry(
    wait: Duration,
    mut extract: impl FnMut() -> Result<LiveData, LiveDataError>,
) -> Result<LiveData, LiveDataError> {
    let deadline = Instant::now() + wait;
    loop {
        match extract() {
            Err(LiveDataError::NotYetAvailable(reason)) if Instant::now() < deadline => {
                tracing::debug!(reason = %reason, "data not yet available, retrying");
                std::thread::sleep(EXTRACT_RETRY_INTERVAL);
            }
            other => return other,
        }
    }
}
