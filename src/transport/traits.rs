//! Transport trait abstraction for pluggable link backends

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A transport stream that can read and write bytes
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {
    /// Human-readable peer address
    fn peer(&self) -> String;
}

/// Type-erased stream handed to a session
pub type BoxedStream = Box<dyn TransportStream>;

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Attempt to connect, returning a stream on success
    async fn connect(&self) -> Result<BoxedStream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
