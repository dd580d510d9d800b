pub mod fetch;
pub mod rpc;

pub use fetch::{ArtifactFetcher, ExtractionRequest, FetchError, FetchOutcome};
pub use rpc::{
    classify, is_already_exists, is_auth_error, is_connection_error, is_invalid, is_not_found,
    ClientKind, Classification, Connector, HybridError, HybridFlags, NimbusClient,
    NimbusClientHandle, Pool, PoolConfig, PoolError, PoolStats, SubmitOutcome, TcpConnector,
    TopologySummary, Transport, TransportError,
};
