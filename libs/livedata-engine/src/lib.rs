pub mod broker;
pub mod config;
pub mod decoder;
pub mod listener;
pub mod mapping;
pub mod workspace;

pub use broker::{MemoryBroker, TcpBroker, TcpConnector, TcpProducer};
pub use config::{DecoderConfig, EventStart, ListenerConfig};
pub use decoder::{
    DecoderDeps, DecoderState, EventStreamDecoder, EventSubscribers, HistoStreamDecoder,
    HistoSubscribers, LiveData, RunStatus,
};
pub use listener::{EventListener, HistoListener, ListenerContext, LiveListener, registry};
pub use mapping::DetectorSpectrumMap;
pub use workspace::{
    DefaultWorkspaceFactory, EventBuffer, HistogramBuffer, InstrumentLoader,
    NameOnlyInstrumentLoader, RunMetadata, WorkspaceFactory,
};
