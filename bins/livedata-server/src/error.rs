use livedata_api::LiveDataError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Task(String),

    #[error("listener: {0}")]
    LiveData(#[from] LiveDataError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
