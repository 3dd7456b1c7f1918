pub mod broker;
pub mod connection;

pub use broker::Broker;
pub use connection::{BusConnection, ConnectionInfo, ConnectionSender};
