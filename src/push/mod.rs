//! Delivery: pushers for HTTP(S), RTMP, SRT and Icecast with shared retry,
//! circuit breaking, multi-destination fan-out and bandwidth monitoring.

pub mod bandwidth;
pub mod http;
pub mod multi;
pub mod retry;
pub mod stream;

pub use bandwidth::{BandwidthAlert, BandwidthMonitor, BandwidthThresholds};
#[cfg(feature = "http-push")]
pub use http::ReqwestClient;
pub use http::{HttpClient, HttpMethod, HttpPusher, HttpPusherConfig, HttpResponse};
pub use multi::{AggregatePushResult, FailoverPolicy, MultiDestinationPusher, PushResult};
pub use retry::{CircuitBreaker, RetryPolicy};
pub use stream::{StreamProtocol, StreamPusher, StreamTransport, TransportOptions};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Timeouts, resets, 5xx, 408 and 429: eligible for retry.
    #[error("transient push failure: {reason}")]
    Transient {
        reason: String,
        status: Option<u16>,
    },
    /// Authentication failures and other 4xx: never retried.
    #[error("permanent push failure: {reason}")]
    Permanent {
        reason: String,
        status: Option<u16>,
    },
    /// The destination's circuit breaker is open.
    #[error("circuit breaker is open")]
    CircuitOpen,
}

impl PushError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PushError::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            PushError::Transient { status, .. } | PushError::Permanent { status, .. } => *status,
            PushError::CircuitOpen => None,
        }
    }

    /// Classify an HTTP status per the retry policy: 5xx, 408 and 429 are
    /// transient, every other non-2xx is permanent.
    pub fn from_status(status: u16) -> Option<PushError> {
        match status {
            200..=299 => None,
            408 | 429 => Some(PushError::Transient {
                reason: format!("HTTP {status}"),
                status: Some(status),
            }),
            500..=599 => Some(PushError::Transient {
                reason: format!("HTTP {status}"),
                status: Some(status),
            }),
            _ => Some(PushError::Permanent {
                reason: format!("HTTP {status}"),
                status: Some(status),
            }),
        }
    }
}

/// Counters every pusher maintains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PusherStats {
    pub segments_pushed: u64,
    pub playlists_pushed: u64,
    pub partials_pushed: u64,
    pub bytes_sent: u64,
    pub failures: u64,
    /// Total retry attempts across all operations.
    pub retries: u64,
    /// Retries consumed by the most recent operation.
    pub last_attempts: u32,
    pub last_error: Option<String>,
}

/// One delivery endpoint. Implementations serialize their own operations;
/// concurrency happens across pushers, never within one.
#[async_trait]
pub trait Pusher: Send {
    async fn connect(&mut self) -> Result<(), PushError>;
    async fn disconnect(&mut self) -> Result<(), PushError>;
    async fn push_segment(&mut self, data: &[u8], name: &str) -> Result<(), PushError>;
    async fn push_playlist(&mut self, text: &str, name: &str) -> Result<(), PushError>;
    /// LL-HLS partial upload; defaults to the segment path.
    async fn push_partial(&mut self, data: &[u8], name: &str) -> Result<(), PushError> {
        self.push_segment(data, name).await
    }
    fn stats(&self) -> PusherStats;
}
