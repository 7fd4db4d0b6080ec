use livedata_api::{LiveDataError, SubscribePosition, TopicRole};

use crate::decoder::{EventStreamDecoder, EventSubscribers, LiveData, RunStatus};

use super::{ListenerContext, LiveListener, extract_with_retry};

/// Event-mode listener: one [`EventStreamDecoder`] per connection.
pub struct EventListener {
    ctx: ListenerContext,
    decoder: Option<EventStreamDecoder>,
}

impl EventListener {
    pub const KIND: &'static str = "event";

    pub fn new(ctx: ListenerContext) -> Self {
        Self { ctx, decoder: None }
    }

    pub fn decoder(&self) -> Option<&EventStreamDecoder> {
        self.decoder.as_ref()
    }

    fn open(&self, address: &str, instrument: &str) -> Result<EventStreamDecoder, LiveDataError> {
        let broker = self.ctx.connector.connect(address)?;
        let cfg = &self.ctx.config;

        let events = broker.subscribe_one(
            &TopicRole::Events.topic_name(instrument),
            cfg.start.position(),
        )?;
        let run_info = broker.subscribe_one(
            &TopicRole::RunInfo.topic_name(instrument),
            SubscribePosition::LastOnly,
        )?;
        let mapping = broker.subscribe_one(
            &TopicRole::DetSpecMap.topic_name(instrument),
            SubscribePosition::LastOnly,
        )?;
        let sample_env = if cfg.sample_env {
            let topic = TopicRole::SampleEnv.topic_name(instrument);
            match broker.subscribe_one(&topic, SubscribePosition::Latest) {
                Ok(sub) => Some(sub),
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "sample environment topic unavailable");
                    None
                }
            }
        } else {
            None
        };

        Ok(EventStreamDecoder::new(
            EventSubscribers {
                events,
                run_info,
                mapping,
                sample_env,
            },
            self.ctx.deps.clone(),
            cfg.decoder_config(),
        ))
    }

    fn decoder_or_err(&self) -> Result<&EventStreamDecoder, LiveDataError> {
        self.decoder
            .as_ref()
            .ok_or_else(|| LiveDataError::NotConnected("event listener has no decoder".into()))
    }
}

impl LiveListener for EventListener {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn connect(&mut self, address: &str, instrument: &str) -> bool {
        match self.open(address, instrument) {
            Ok(decoder) => {
                if let Some(previous) = self.decoder.replace(decoder) {
                    previous.stop_capture();
                }
                tracing::info!(address = %address, instrument = %instrument, "event listener connected");
                true
            }
            Err(e) => {
                tracing::error!(address = %address, instrument = %instrument, error = %e, "event listener connect failed");
                false
            }
        }
    }

    fn start(&mut self) -> Result<(), LiveDataError> {
        self.decoder_or_err()?.start()
    }

    fn extract_data(&mut self) -> Result<LiveData, LiveDataError> {
        let decoder = self.decoder_or_err()?;
        extract_with_retry(self.ctx.config.extract_wait(), || decoder.extract_data())
    }

    fn is_connected(&self) -> bool {
        self.decoder.as_ref().is_some_and(|d| d.is_capturing())
    }

    fn run_status(&self) -> RunStatus {
        self.decoder
            .as_ref()
            .map_or(RunStatus::NoRun, |d| d.run_status())
    }

    fn run_number(&self) -> Option<i32> {
        self.decoder.as_ref().and_then(|d| d.run_number())
    }

    fn stop(&mut self) {
        if let Some(decoder) = self.decoder.as_ref() {
            decoder.stop_capture();
        }
    }
}
