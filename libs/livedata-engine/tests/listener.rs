mod common;

use std::sync::Arc;
use std::time::Duration;

use livedata_api::{LiveDataError, TopicRole};
use livedata_engine::{
    EventStart, ListenerConfig, ListenerContext, LiveData, LiveListener, MemoryBroker, RunStatus,
    registry,
};

use common::*;

const ADDRESS: &str = "memory://test";
const SETTLE: Duration = Duration::from_secs(3);

fn context(broker: &MemoryBroker, start: EventStart) -> ListenerContext {
    let config = ListenerConfig {
        address: ADDRESS.to_string(),
        instrument: INSTRUMENT.to_string(),
        start,
        poll_interval_ms: 1,
        consume_timeout_ms: 20,
        bootstrap_timeout_ms: 3_000,
        extract_wait_ms: 2_000,
        ..ListenerConfig::default()
    };
    ListenerContext::new(config).with_connector(Arc::new(broker.clone()))
}

fn listener(kind: &str, broker: &MemoryBroker, start: EventStart) -> Box<dyn LiveListener> {
    registry().create(kind, context(broker, start)).unwrap()
}

#[test]
fn event_listener_lifecycle() {
    let broker = broker();
    seed_run(&broker, 1);

    let mut listener = listener("event", &broker, EventStart::Latest);
    assert_eq!(listener.kind(), "event");
    assert!(!listener.is_connected());
    assert_eq!(listener.run_status(), RunStatus::NoRun);

    assert!(listener.connect(ADDRESS, INSTRUMENT));
    listener.start().unwrap();
    assert!(listener.is_connected());

    publish(&broker, TopicRole::Events, frame(1, 0, 5.0, &[(1000.0, 11), (2000.0, 10)]));

    let mut total = 0;
    assert!(eventually(SETTLE, || {
        total += listener.extract_data().unwrap().total_events();
        total == 2
    }));
    assert_eq!(listener.run_status(), RunStatus::Running);
    assert_eq!(listener.run_number(), Some(555));

    listener.stop();
    listener.stop();
    assert!(!listener.is_connected());
}

#[test]
fn extract_right_after_start_waits_for_bootstrap() {
    let broker = broker();
    seed_run(&broker, 1);

    let mut listener = listener("event", &broker, EventStart::Earliest);
    assert!(listener.connect(ADDRESS, INSTRUMENT));
    listener.start().unwrap();

    let data = listener.extract_data().unwrap();
    assert!(matches!(data, LiveData::Single(_)));
    assert_eq!(data.run_number(), Some(555));
}

#[test]
fn connect_before_any_run_info_fails() {
    let broker = broker();
    publish(&broker, TopicRole::DetSpecMap, mapping());

    let mut listener = listener("event", &broker, EventStart::Latest);
    assert!(!listener.connect(ADDRESS, INSTRUMENT));

    publish(&broker, TopicRole::RunInfo, run_start(555, 1));
    assert!(listener.connect(ADDRESS, INSTRUMENT));
}

#[test]
fn bootstrap_failure_is_reported_by_extract() {
    let broker = broker();
    publish(&broker, TopicRole::DetSpecMap, mapping());
    publish(&broker, TopicRole::RunInfo, run_start(555, 0));

    let mut listener = listener("event", &broker, EventStart::Earliest);
    assert!(listener.connect(ADDRESS, INSTRUMENT));
    listener.start().unwrap();

    assert!(matches!(
        listener.extract_data(),
        Err(LiveDataError::Bootstrap(_))
    ));
    assert!(eventually(SETTLE, || !listener.is_connected()));
}

#[test]
fn connect_to_unknown_address_fails() {
    let broker = broker();
    let mut listener = listener("event", &broker, EventStart::Latest);
    assert!(!listener.connect("memory://elsewhere", INSTRUMENT));
    assert!(!listener.is_connected());
    assert!(matches!(listener.start(), Err(LiveDataError::NotConnected(_))));
    assert!(matches!(
        listener.extract_data(),
        Err(LiveDataError::NotConnected(_))
    ));
    listener.stop();
}

#[test]
fn connect_without_topics_fails() {
    let broker = MemoryBroker::new("test");
    let mut listener = listener("event", &broker, EventStart::Latest);
    assert!(!listener.connect(ADDRESS, INSTRUMENT));
}

#[test]
fn missing_sample_env_topic_is_tolerated() {
    let broker = MemoryBroker::new("test");
    for role in [TopicRole::Events, TopicRole::RunInfo, TopicRole::DetSpecMap] {
        broker.create_topic(&topic(role), 1);
    }
    seed_run(&broker, 1);

    let mut listener = listener("event", &broker, EventStart::Latest);
    assert!(listener.connect(ADDRESS, INSTRUMENT));
    listener.start().unwrap();
    assert!(listener.extract_data().is_ok());
}

#[test]
fn reconnect_replaces_decoder() {
    let broker = broker();
    seed_run(&broker, 1);

    let mut listener = listener("event", &broker, EventStart::Latest);
    assert!(listener.connect(ADDRESS, INSTRUMENT));
    listener.start().unwrap();
    assert!(listener.extract_data().is_ok());

    assert!(listener.connect(ADDRESS, INSTRUMENT));
    assert!(!listener.is_connected());
    listener.start().unwrap();
    assert!(listener.extract_data().is_ok());
    assert!(listener.is_connected());
}

#[test]
fn histogram_listener_keeps_latest_counts() {
    let broker = broker();
    seed_run(&broker, 2);
    publish(
        &broker,
        TopicRole::Histograms,
        histogram(0, vec![10, 12], vec![1.0, 2.0, 3.0, 4.0]),
    );

    let mut listener = listener("histo", &broker, EventStart::Earliest);
    assert_eq!(listener.kind(), "histo");
    assert!(listener.connect(ADDRESS, INSTRUMENT));
    listener.start().unwrap();

    let LiveData::HistogramGroup(periods) = listener.extract_data().unwrap() else {
        panic!("expected one histogram per period");
    };
    assert_eq!(periods.len(), 2);
    let first = &periods[0];
    assert_eq!(first.bin_edges, vec![0.0, 1000.0, 2000.0]);
    assert_eq!(first.spectra[0].spectrum, 10);
    assert_eq!(first.spectra[0].counts, vec![1.0, 2.0]);
    assert_eq!(first.spectra[1].counts, vec![0.0, 0.0]);
    assert_eq!(first.spectra[2].detectors, vec![102]);
    assert_eq!(first.spectra[2].counts, vec![3.0, 4.0]);
    assert!(periods[1].bin_edges.is_empty());
    assert_eq!(periods[1].total_counts(), 0.0);

    // extraction does not reset cumulative counts
    assert_eq!(listener.extract_data().unwrap().period_count(), 2);

    publish(
        &broker,
        TopicRole::Histograms,
        histogram(0, vec![10, 11, 12], vec![5.0, 5.0, 1.0, 1.0, 3.0, 4.0]),
    );
    assert!(eventually(SETTLE, || {
        match listener.extract_data().unwrap() {
            LiveData::HistogramGroup(periods) => periods[0].total_counts() == 19.0,
            _ => false,
        }
    }));
    assert_eq!(listener.run_number(), Some(555));
    listener.stop();
}

#[test]
fn unknown_kind_is_a_config_error() {
    let broker = broker();
    let result = registry().create("mystery", context(&broker, EventStart::Latest));
    assert!(matches!(result, Err(LiveDataError::Config(_))));
}
