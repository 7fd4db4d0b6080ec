use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use livedata_api::TopicRole;
use livedata_engine::MemoryBroker;

use crate::config::{BrokerConfig, ServeArgs};
use crate::error::ServerError;

/// How long tasks get to wind down after Ctrl+C.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("livedata-server starting");

    // --- Load config ---
    let config = BrokerConfig::load_or_default(&args.config)?;
    tracing::info!(
        config = %args.config,
        broker_port = config.broker_port,
        api_port = config.api_port,
        retention = config.retention,
        "loaded config"
    );

    // --- Create topics ---
    let broker = MemoryBroker::with_retention("server", config.retention);
    for instrument in &config.instruments {
        for role in TopicRole::ALL {
            broker.create_topic(&role.topic_name(instrument), config.partitions);
        }
        tracing::info!(instrument = %instrument, "created instrument topics");
    }
    for topic in &config.topics {
        broker.create_topic(topic, config.partitions);
    }

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();
    let mut handles: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    // --- Broker protocol ---
    let broker_task = broker.clone();
    let broker_port = config.broker_port;
    let broker_token = token.clone();
    handles.push((
        "broker",
        tokio::spawn(async move {
            if let Err(e) = livedata_api_server::run_broker(broker_port, broker_task, broker_token.clone()).await {
                tracing::error!(error = %e, "broker server error");
                broker_token.cancel();
            }
        }),
    ));

    // --- HTTP API ---
    let api_broker = broker.clone();
    let api_port = config.api_port;
    let api_token = token.clone();
    handles.push((
        "api",
        tokio::spawn(async move {
            if let Err(e) = livedata_api_server::run_api(api_port, api_broker, api_token.clone()).await {
                tracing::error!(error = %e, "api server error");
                api_token.cancel();
            }
        }),
    ));

    tracing::info!(broker_port, api_port, "server ready");

    // --- Wait for Ctrl+C or a failed server task ---
    let mut failed = false;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
        }
        _ = token.cancelled() => {
            tracing::warn!("a server task failed, shutting down");
            failed = true;
        }
    }
    token.cancel();

    for (name, handle) in handles {
        match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(task = name, error = %e, "task panicked");
                failed = true;
            }
            Err(_) => tracing::warn!(task = name, "task did not stop in time"),
        }
    }

    for topic in broker.topics() {
        let messages: i64 = topic.partitions.iter().map(|p| p.high - p.low).sum();
        tracing::info!(topic = %topic.name, messages, "topic at shutdown");
    }

    tracing::info!("shutdown complete");
    if failed {
        return Err(ServerError::Task("a server task failed".into()));
    }
    Ok(())
}
