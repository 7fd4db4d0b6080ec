use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use livedata_api::schema::{FramePart, Payload, RunStart, SpectraDetectorMapping};
use livedata_api::{Broker, LiveDataError, SubscribePosition, TopicRole};
use livedata_api_server::{serve_api, serve_broker};
use livedata_engine::{
    EventStart, ListenerConfig, ListenerContext, MemoryBroker, TcpBroker, TcpProducer, registry,
};

async fn start_broker(broker: MemoryBroker, shutdown: CancellationToken) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(serve_broker(listener, broker, shutdown));
    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn producer_and_subscriber_over_tcp() {
    let shutdown = CancellationToken::new();
    let addr = start_broker(MemoryBroker::new("net"), shutdown.clone()).await;

    let result = tokio::task::spawn_blocking(move || -> Result<(), LiveDataError> {
        let producer = TcpProducer::connect(&addr)?;
        assert!(producer.create_topic("EMU_events", 2)?);
        assert!(!producer.create_topic("EMU_events", 2)?);

        for i in 0..4u8 {
            producer.produce("EMU_events", None, vec![i], 1_000 + i as i64)?;
        }
        let topics = producer.list_topics()?;
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].partitions.len(), 2);
        assert_eq!(topics[0].partitions[0].high, 2);

        let broker = TcpBroker::new(addr.clone());
        let mut sub = broker.subscribe_one("EMU_events", SubscribePosition::EARLIEST)?;
        let mut payloads = Vec::new();
        while let Some(msg) = sub.consume(Duration::from_millis(200))? {
            payloads.push(msg.payload[0]);
        }
        payloads.sort_unstable();
        assert_eq!(payloads, vec![0, 1, 2, 3]);
        assert_eq!(sub.current_offsets()["EMU_events"], vec![2, 2]);

        let at = sub.offsets_for_timestamp(1_002)?;
        assert_eq!(at["EMU_events"], vec![1, 1]);

        assert!(matches!(
            sub.seek("EMU_events", 0, 9),
            Err(LiveDataError::Seek(_))
        ));
        assert!(matches!(
            broker.subscribe_one("EMU_missing", SubscribePosition::Latest),
            Err(LiveDataError::Connection(_))
        ));
        Ok(())
    })
    .await
    .unwrap();
    result.unwrap();

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn event_listener_over_tcp() {
    let shutdown = CancellationToken::new();
    let memory = MemoryBroker::new("net");
    for role in TopicRole::ALL {
        memory.create_topic(&role.topic_name("EMU"), 1);
    }
    let addr = start_broker(memory, shutdown.clone()).await;

    let result = tokio::task::spawn_blocking(move || -> Result<usize, LiveDataError> {
        let producer = TcpProducer::connect(&addr)?;
        let send = |role: TopicRole, payload: Payload| {
            producer.produce(&role.topic_name("EMU"), None, payload.encode(), 0)
        };
        send(
            TopicRole::DetSpecMap,
            SpectraDetectorMapping {
                n_spectra: 2,
                spectra: vec![1, 2],
                detectors: vec![11, 12],
            }
            .into(),
        )?;
        send(
            TopicRole::RunInfo,
            RunStart {
                run_number: 7,
                start_time_ms: 1_700_000_000_000,
                instrument: "EMU".into(),
                n_periods: 1,
            }
            .into(),
        )?;
        send(
            TopicRole::Events,
            FramePart {
                message_id: 1,
                pulse_offset_s: 0.5,
                proton_charge: 2.0,
                period: 0,
                time_of_flight: vec![100.0, 200.0, 300.0],
                spectrum: vec![1, 2, 2],
            }
            .into(),
        )?;

        let config = ListenerConfig {
            address: addr.clone(),
            instrument: "EMU".into(),
            start: EventStart::Earliest,
            poll_interval_ms: 1,
            consume_timeout_ms: 50,
            ..ListenerConfig::default()
        };
        let mut listener = registry().create("event", ListenerContext::new(config))?;
        assert!(listener.connect(&addr, "EMU"));
        listener.start()?;

        let mut total = 0;
        for _ in 0..100 {
            total += listener.extract_data()?.total_events();
            if total >= 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(listener.run_number(), Some(7));
        listener.stop();
        Ok(total)
    })
    .await
    .unwrap();
    assert_eq!(result.unwrap(), 3);

    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_lists_topics() {
    let broker = MemoryBroker::new("http");
    broker.create_topic("EMU_events", 3);
    broker.produce("EMU_events", vec![1], 0).unwrap();

    let shutdown = CancellationToken::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_api(listener, broker, shutdown.clone()));

    let get = |path: &'static str| async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        body
    };

    let list = get("/api/topics").await;
    assert!(list.starts_with("HTTP/1.1 200"));
    assert!(list.contains("\"name\":\"EMU_events\""));

    let one = get("/api/topics/EMU_events").await;
    assert!(one.starts_with("HTTP/1.1 200"));
    assert!(one.contains("\"high\":1"));

    let missing = get("/api/topics/EMU_nothing").await;
    assert!(missing.starts_with("HTTP/1.1 404"));

    shutdown.cancel();
}
