//! Broker implementations: an in-process partitioned log and a TCP client
//! for a remote one. Both hand out [`LogSubscriber`]s.

mod log;
mod memory;
mod tcp;

pub use log::{LogSubscriber, PartitionLog};
pub use memory::{DEFAULT_RETENTION, MemoryBroker};
pub use tcp::{TcpBroker, TcpConnection, TcpConnector, TcpProducer};
