use livedata_api::{LiveDataError, SubscribePosition, TopicRole};

use crate::decoder::{HistoStreamDecoder, HistoSubscribers, LiveData, RunStatus};

use super::{ListenerContext, LiveListener, extract_with_retry};

/// Histogram-mode listener over `<instrument>_eventSum`.
pub struct HistoListener {
    ctx: ListenerContext,
    decoder: Option<HistoStreamDecoder>,
}

impl HistoListener {
    pub const KIND: &'static str = "histo";

    pub fn new(ctx: ListenerContext) -> Self {
        Self { ctx, decoder: None }
    }

    fn open(&self, address: &str, instrument: &str) -> Result<HistoStreamDecoder, LiveDataError> {
        let broker = self.ctx.connector.connect(address)?;
        let histograms = broker.subscribe_one(
            &TopicRole::Histograms.topic_name(instrument),
            self.ctx.config.start.position(),
        )?;
        let run_info = broker.subscribe_one(
            &TopicRole::RunInfo.topic_name(instrument),
            SubscribePosition::LastOnly,
        )?;
        let mapping = broker.subscribe_one(
            &TopicRole::DetSpecMap.topic_name(instrument),
            SubscribePosition::LastOnly,
        )?;
        Ok(HistoStreamDecoder::new(
            HistoSubscribers {
                histograms,
                run_info,
                mapping,
            },
            self.ctx.deps.clone(),
            self.ctx.config.decoder_config(),
        ))
    }

    fn decoder_or_err(&self) -> Result<&HistoStreamDecoder, LiveDataError> {
        self.decoder
            .as_ref()
            .ok_or_else(|| LiveDataError::NotConnected("histogram listener has no decoder".into()))
    }
}

impl LiveListener for HistoListener {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn connect(&mut self, address: &str, instrument: &str) -> bool {
        match self.open(address, instrument) {
            Ok(decoder) => {
                if let Some(previous) = self.decoder.replace(decoder) {
                    previous.stop_capture();
                }
                tracing::info!(address = %address, instrument = %instrument, "histogram listener connected");
                true
            }
            Err(e) => {
                tracing::error!(address = %address, instrument = %instrument, error = %e, "histogram listener connect failed");
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
