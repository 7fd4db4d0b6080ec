//! Stream decoders: a background capture thread per decoder that bootstraps
//! from the mapping and run-info topics, then merges data messages into
//! period buffers handed out by `extract_data`.

mod bootstrap;
mod capture;
mod event;
mod histo;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub use bootstrap::MAX_PERIODS;
pub use event::{EventStreamDecoder, EventSubscribers};
pub use histo::{HistoStreamDecoder, HistoSubscribers};

use crate::workspace::{
    DefaultWorkspaceFactory, EventBuffer, HistogramBuffer, InstrumentLoader,
    NameOnlyInstrumentLoader, WorkspaceFactory,
};

// ═══════════════════════════════════════════════════════════════
//  State
// ═══════════════════════════════════════════════════════════════

/// Lifecycle of a decoder.
///
/// `Idle → Bootstrapping → Capturing → Stopping → Stopped`; any error in
/// bootstrap or capture ends in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    Bootstrapping,
    Capturing,
    Stopping,
    Stopped,
    Failed,
}

impl DecoderState {
    /// No capture thread will run again.
    pub fn is_terminal(self) -> bool {
        matches!(self, DecoderState::Stopped | DecoderState::Failed)
    }
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecoderState::Idle => "idle",
            DecoderState::Bootstrapping => "bootstrapping",
            DecoderState::Capturing => "capturing",
            DecoderState::Stopping => "stopping",
            DecoderState::Stopped => "stopped",
            DecoderState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    EndRun,
    NoRun,
}

// ═══════════════════════════════════════════════════════════════
//  Extracted data
// ═══════════════════════════════════════════════════════════════

/// Detached snapshot returned by `extract_data`.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveData {
    Single(EventBuffer),
    /// One buffer per period, in period order.
    Group(Vec<EventBuffer>),
    Histogram(HistogramBuffer),
    HistogramGroup(Vec<HistogramBuffer>),
}

impl LiveData {
    pub(crate) fn from_periods(mut periods: Vec<EventBuffer>) -> Self {
        if periods.len() == 1 {
            if let Some(only) = periods.pop() {
                return LiveData::Single(only);
            }
        }
        LiveData::Group(periods)
    }

    pub(crate) fn from_histograms(mut periods: Vec<HistogramBuffer>) -> Self {
        if periods.len() == 1 {
            if let Some(only) = periods.pop() {
                return LiveData::Histogram(only);
            }
        }
        LiveData::HistogramGroup(periods)
    }

    pub fn period_count(&self) -> usize {
        match self {
            LiveData::Single(_) | LiveData::Histogram(_) => 1,
            LiveData::Group(g) => g.len(),
            LiveData::HistogramGroup(g) => g.len(),
        }
    }

    /// Event buffers in period order; empty for histogram data.
    pub fn event_buffers(&self) -> Vec<&EventBuffer> {
        match self {
            LiveData::Single(b) => vec![b],
            LiveData::Group(g) => g.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn total_events(&self) -> usize {
        self.event_buffers().iter().map(|b| b.total_events()).sum()
    }

    pub fn run_number(&self) -> Option<i32> {
        match self {
            LiveData::Single(b) => b.run().map(|r| r.run_number),
            LiveData::Group(g) => g.first().and_then(|b| b.run()).map(|r| r.run_number),
            LiveData::Histogram(h) => h.run.as_ref().map(|r| r.run_number),
            LiveData::HistogramGroup(g) => {
                g.first().and_then(|h| h.run.as_ref()).map(|r| r.run_number)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Collaborators
// ═══════════════════════════════════════════════════════════════

/// Buffer factory and instrument loader shared by decoders.
#[derive(Clone)]
pub struct DecoderDeps {
    pub factory: Arc<dyn WorkspaceFactory>,
    pub loader: Arc<dyn InstrumentLoader>,
}

impl Default for DecoderDeps {
    fn default() -> Self {
        Self {
            factory: Arc::new(DefaultWorkspaceFactory),
            loader: Arc::new(NameOnlyInstrumentLoader),
        }
    }
}

impl fmt::Debug for DecoderDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderDeps").finish_non_exhaustive()
    }
}

pub(crate) fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!(lock = what, "lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
