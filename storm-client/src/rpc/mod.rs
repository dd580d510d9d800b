mod client;
mod connection;
mod errors;
mod hybrid;
mod pool;

pub use client::{NimbusClient, SubmitOutcome, TopologySummary};
pub use connection::{Connection, MockTransport, TcpTransport, Transport, TransportError};
pub use errors::{
    classify, is_already_exists, is_auth_error, is_connection_error, is_invalid, is_not_found,
    Classification,
};
pub use hybrid::{ClientKind, HybridError, HybridFlags, NimbusClientHandle};
pub use pool::{Connector, Pool, PoolConfig, PoolError, PoolStats, TcpConnector};
