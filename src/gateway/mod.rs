//! Gateway connection: transport contract and connection lifecycle.

pub mod connection;
pub mod transport;

pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use transport::{
    ConnectOptions, GatewayTransport, ProtocolAdapter, SessionSummary, TransportSignal,
    TransportState,
};
