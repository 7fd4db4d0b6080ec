use livedata_api::LiveDataError;

#[derive(Debug, thiserror::Error)]
pub enum RunGenError {
    #[error("{0}")]
    Config(String),

    #[error("broker: {0}")]
    Broker(#[from] LiveDataError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
