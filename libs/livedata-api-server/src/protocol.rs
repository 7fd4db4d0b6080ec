use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use livedata_api::LiveDataError;
use livedata_api::framing::LengthPrefixed;
use livedata_api::wire::{FetchPosition, MAX_FETCH_WAIT_MS, Request, Response};
use livedata_engine::MemoryBroker;
use livedata_engine::broker::PartitionLog;

const READ_CHUNK: usize = 8 * 1024;

/// Accept clients on `listener`, one task per connection.
pub async fn serve_broker(
    listener: TcpListener,
    broker: MemoryBroker,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let local = listener
        .local_addr()
        .map_err(|e| format!("broker local addr: {e}"))?;
    tracing::info!(addr = %local, "broker protocol listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "broker client connected");
                    tokio::spawn(connection(stream, peer, broker.clone(), shutdown.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "broker accept failed");
                }
            },
        }
    }

    tracing::info!(addr = %local, "broker protocol stopped");
    Ok(())
}

async fn connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    broker: MemoryBroker,
    shutdown: CancellationToken,
) {
    let framing = LengthPrefixed::default();
    let mut inbound: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut outbound: Vec<u8> = Vec::new();

    loop {
        let frame = match framing.decode(&inbound) {
            Ok(Some((frame, used))) => {
                inbound.drain(..used);
                frame
            }
            Ok(None) => {
                inbound.reserve(READ_CHUNK);
                let read = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    read = stream.read_buf(&mut inbound) => read,
                };
                match read {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "broker client read failed");
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "bad frame from broker client, closing");
                break;
            }
        };

        let response = match Request::from_bytes(&frame) {
            Ok(req) => dispatch(&broker, req).await,
            Err(e) => Response::error(&e),
        };

        outbound.clear();
        if let Err(e) = response
            .to_bytes()
            .and_then(|body| framing.encode(&body, &mut outbound))
        {
            tracing::warn!(peer = %peer, error = %e, "encode response failed, closing");
            break;
        }
        if let Err(e) = stream.write_all(&outbound).await {
            tracing::debug!(peer = %peer, error = %e, "broker client write failed");
            break;
        }
    }

    tracing::debug!(peer = %peer, "broker client disconnected");
}

/// Execute one request against the broker. Failures become
/// [`Response::Error`].
pub async fn dispatch(broker: &MemoryBroker, req: Request) -> Response {
    let result = match req {
        Request::ListTopics => Ok(Response::Topics {
            topics: broker.topics(),
        }),
        Request::CreateTopic { topic, partitions } => Ok(Response::Created {
            created: broker.create_topic(&topic, partitions),
        }),
        Request::PartitionCount { topic } => broker
            .partition_count(&topic)
            .map(|partitions| Response::PartitionCount { partitions }),
        Request::Watermarks { topic, partition } => broker
            .watermarks(&topic, partition)
            .map(|(low, high)| Response::Watermarks { low, high }),
        Request::OffsetForTime {
            topic,
            partition,
            timestamp_ms,
        } => broker
            .offset_for_time(&topic, partition, timestamp_ms)
            .map(|offset| Response::Offset { offset }),
        Request::Fetch {
            positions,
            max_wait_ms,
        } => fetch(broker.clone(), positions, max_wait_ms).await,
        Request::Produce {
            topic,
            partition: Some(partition),
            timestamp_ms,
            payload,
        } => broker
            .produce_to(&topic, partition, payload, timestamp_ms)
            .map(|offset| Response::Produced { partition, offset }),
        Request::Produce {
            topic,
            partition: None,
            timestamp_ms,
            payload,
        } => broker
            .produce(&topic, payload, timestamp_ms)
            .map(|(partition, offset)| Response::Produced { partition, offset }),
    };
    result.unwrap_or_else(|e| {
        tracing::debug!(error = %e, "broker request failed");
        Response::error(&e)
    })
}

/// Long-poll on the blocking pool; the memory log waits on a condvar.
async fn fetch(
    broker: MemoryBroker,
    positions: Vec<FetchPosition>,
    max_wait_ms: u64,
) -> Result<Response, LiveDataError> {
    let wait = Duration::from_millis(max_wait_ms.min(MAX_FETCH_WAIT_MS));
    let message = tokio::task::spawn_blocking(move || broker.fetch(&positions, wait))
        .await
        .map_err(|e| LiveDataError::Transport(format!("fetch task: {e}")))??;
    Ok(Response::Fetched { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produce_then_fetch() {
        let broker = MemoryBroker::new("dispatch");
        let created = dispatch(
            &broker,
            Request::CreateTopic {
                topic: "EMU_runInfo".into(),
                partitions: 1,
            },
        )
        .await;
        assert_eq!(created, Response::Created { created: true });

        let produced = dispatch(
            &broker,
            Request::Produce {
                topic: "EMU_runInfo".into(),
                partition: None,
                timestamp_ms: 7,
                payload: vec![1, 2, 3],
            },
        )
        .await;
        assert_eq!(
            produced,
            Response::Produced {
                partition: 0,
                offset: 0
            }
        );

        let fetched = dispatch(
            &broker,
            Request::Fetch {
                positions: vec![FetchPosition {
                    topic: "EMU_runInfo".into(),
                    partition: 0,
                    offset: 0,
                }],
                max_wait_ms: 0,
            },
        )
        .await;
        let Response::Fetched { message: Some(msg) } = fetched else {
            panic!("expected a fetched message");
        };
        assert_eq!(msg.payload, vec![1, 2, 3]);
        assert_eq!(msg.timestamp_ms, 7);
    }

    #[tokio::test]
    async fn errors_carry_their_kind() {
        let broker = MemoryBroker::new("dispatch");
        let resp = dispatch(
            &broker,
            Request::Watermarks {
                topic: "missing".into(),
                partition: 0,
            },
        )
        .await;
        assert!(matches!(resp, Response::Error { ref kind, .. } if kind == "connection"));

        let missing = dispatch(
            &broker,
            Request::PartitionCount {
                topic: "missing".into(),
            },
        )
        .await;
        assert_eq!(missing, Response::PartitionCount { partitions: None });
    }
}
