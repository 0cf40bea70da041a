use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for outbound transport operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Error when connection to the upstream fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the outgoing request cannot be built or sent as-is
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Tuning values an outbound transport is constructed from.
///
/// `insecure_skip_verify` comes from the proxy definition; the other three
/// are fixed process-wide when the register is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportParams {
    pub insecure_skip_verify: bool,
    pub flush_interval: Duration,
    pub close_idle_conns_period: Duration,
    pub idle_connections_per_host: usize,
}

/// Transport defines the port (interface) for sending requests upstream
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a fully rewritten request to its upstream and return the response
    async fn round_trip(&self, req: Request<AxumBody>) -> TransportResult<Response<AxumBody>>;

    /// The parameters this transport was constructed with
    fn params(&self) -> TransportParams;
}
