use std::time::Duration;

use livedata_api::LiveDataError;
use livedata_engine::{ListenerContext, LiveData, RunStatus, registry};

use crate::config::ListenArgs;
use crate::error::ServerError;

/// Pause between connect attempts while the instrument's topics are not
/// ready.
const CONNECT_RETRY: Duration = Duration::from_secs(2);

pub async fn run(args: ListenArgs) -> Result<(), ServerError> {
    let config = args.listener_config()?;
    let address = config.address.clone();
    let instrument = config.instrument.clone();
    tracing::info!(
        address = %address,
        instrument = %instrument,
        kind = %config.kind,
        start = ?config.start,
        "listener starting"
    );

    let kind = config.kind.clone();
    let mut listener = registry().create(&kind, ListenerContext::new(config))?;

    // --- Connect (blocking broker calls) ---
    loop {
        let connected =
            tokio::task::block_in_place(|| listener.connect(&address, &instrument));
        if connected {
            break;
        }
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("interrupted before connecting");
                return Ok(());
            }
            _ = tokio::time::sleep(CONNECT_RETRY) => {}
        }
    }
    listener.start()?;

    // --- Extract on an interval until Ctrl+C ---
    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut last_status = RunStatus::NoRun;
    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    break Err(e.into());
                }
                tracing::info!("shutting down...");
                break Ok(());
            }
            _ = interval.tick() => {
                match tokio::task::block_in_place(|| listener.extract_data()) {
                    Ok(data) => log_extract(&data),
                    Err(LiveDataError::NotYetAvailable(reason)) => {
                        tracing::info!(reason = %reason, "waiting for data");
                    }
                    Err(e) => break Err(e.into()),
                }
                let status = listener.run_status();
                if status != last_status {
                    tracing::info!(run_number = ?listener.run_number(), status = ?status, "run status changed");
                    last_status = status;
                }
            }
        }
    };

    tokio::task::block_in_place(|| listener.stop());
    tracing::info!("listener stopped");
    result
}

fn log_extract(data: &LiveData) {
    match data {
        LiveData::Single(_) | LiveData::Group(_) => {
            let buffers = data.event_buffers();
            let per_period: Vec<usize> = buffers.iter().map(|b| b.total_events()).collect();
            tracing::info!(
                run_number = ?data.run_number(),
                periods = data.period_count(),
                events = data.total_events(),
                per_period = ?per_period,
                "extracted events"
            );
        }
        LiveData::Histogram(h) => {
            tracing::info!(
                run_number = ?data.run_number(),
                period = h.period,
                counts = h.total_counts(),
                "extracted histogram"
            );
        }
        LiveData::HistogramGroup(group) => {
            let counts: Vec<f64> = group.iter().map(|h| h.total_counts()).collect();
            tracing::info!(
                run_number = ?data.run_number(),
                periods = group.len(),
                counts = ?counts,
                "extracted histograms"
            );
        }
    }
}

