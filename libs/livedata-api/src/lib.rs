pub mod error;
pub mod framing;
pub mod message;
pub mod schema;
pub mod subscriber;
pub mod topics;
pub mod wire;

pub use error::LiveDataError;
pub use message::Message;
pub use subscriber::{Broker, BrokerConnector, SubscribePosition, TopicSubscriber};
pub use topics::TopicRole;
