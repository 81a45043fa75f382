//! Pushers over injected streaming transports (RTMP, SRT, Icecast).
//!
//! The wire protocols live behind [`StreamTransport`]; this module owns
//! connection state, retry, the circuit breaker and statistics.

use super::retry::CircuitBreaker;
use super::{PushError, Pusher, PusherStats, RetryPolicy};
use async_trait::async_trait;
use log::{debug, info};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    Rtmp,
    Srt,
    Icecast,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::Rtmp => "rtmp",
            StreamProtocol::Srt => "srt",
            StreamProtocol::Icecast => "icecast",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    pub url: String,
    pub stream_key: Option<String>,
    /// Protocol-specific extras (latency, passphrase, mount point).
    pub extra: Vec<(String, String)>,
}

/// Injected wire protocol. Errors are arbitrary transport errors; the
/// pusher treats them all as transient unless the transport is gone.
#[async_trait]
pub trait StreamTransport: Send {
    async fn connect(&mut self, options: &TransportOptions) -> anyhow::Result<()>;
    async fn send(&mut self, payload: &[u8], timestamp_ms: Option<u64>) -> anyhow::Result<()>;
    async fn set_metadata(&mut self, metadata: &[(String, String)]) -> anyhow::Result<()>;
    async fn disconnect(&mut self) -> anyhow::Result<()>;
}

/// A pusher streaming segment payloads over one transport connection.
pub struct StreamPusher<T> {
    protocol: StreamProtocol,
    transport: T,
    options: TransportOptions,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    stats: PusherStats,
    connected: bool,
}

impl<T: StreamTransport> StreamPusher<T> {
    pub fn new(
        protocol: StreamProtocol,
        transport: T,
        options: TransportOptions,
        retry: RetryPolicy,
    ) -> Self {
        let breaker = CircuitBreaker::new(retry.circuit_breaker_threshold, retry.max_delay);
        Self {
            protocol,
            transport,
            options,
            retry,
            breaker,
            stats: PusherStats::default(),
            connected: false,
        }
    }

    pub fn rtmp(transport: T, options: TransportOptions, retry: RetryPolicy) -> Self {
        Self::new(StreamProtocol::Rtmp, transport, options, retry)
    }

    pub fn srt(transport: T, options: TransportOptions, retry: RetryPolicy) -> Self {
        Self::new(StreamProtocol::Srt, transport, options, retry)
    }

    pub fn icecast(transport: T, options: TransportOptions, retry: RetryPolicy) -> Self {
        Self::new(StreamProtocol::Icecast, transport, options, retry)
    }

    pub fn protocol(&self) -> StreamProtocol {
        self.protocol
    }

    /// Send with the retry policy. The loop is open-coded because each
    /// attempt needs a fresh mutable borrow of the transport.
    async fn send_payload(&mut self, data: &[u8], name: &str) -> Result<(), PushError> {
        if !self.connected {
            self.connect().await?;
        }

        if let Err(e) = self.breaker.check(Instant::now()) {
            self.stats.failures += 1;
            self.stats.last_error = Some(e.to_string());
            return Err(e);
        }

        let mut attempts: u32 = 0;
        let result = loop {
            match self.transport.send(data, None).await {
                Ok(()) => {
                    self.breaker.record_success();
                    break Ok(());
                }
                Err(e) if attempts < self.retry.max_retries => {
                    attempts += 1;
                    let delay = self.retry.delay_for(attempts);
                    debug!(
                        "{name}: send failed ({e}), retry {attempts}/{} in {:?}",
                        self.retry.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.breaker.record_failure(Instant::now());
                    break Err(PushError::Transient {
                        reason: e.to_string(),
                        status: None,
                    });
                }
            }
        };

        self.stats.retries += u64::from(attempts);
        self.stats.last_attempts = attempts;
        match &result {
            Ok(()) => self.stats.bytes_sent += data.len() as u64,
            Err(e) => {
                self.stats.failures += 1;
                self.stats.last_error = Some(e.to_string());
            }
        }
        result
    }
}

#[async_trait]
impl<T: StreamTransport> Pusher for StreamPusher<T> {
    async fn connect(&mut self) -> Result<(), PushError> {
        if self.connected {
            return Ok(());
        }
        info!("{} connecting to {}", self.protocol.as_str(), self.options.url);
        self.transport
            .connect(&self.options)
            .await
            .map_err(|e| PushError::Transient {
                reason: e.to_string(),
                status: None,
            })?;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), PushError> {
        if !self.connected {
            return Ok(());
        }
        self.transport
            .disconnect()
            .await
            .map_err(|e| PushError::Transient {
                reason: e.to_string(),
                status: None,
            })?;
        self.connected = false;
        Ok(())
    }

    async fn push_segment(&mut self, data: &[u8], name: &str) -> Result<(), PushError> {
        let result = self.send_payload(data, name).await;
        if result.is_ok() {
            self.stats.segments_pushed += 1;
        }
        result
    }

    /// Streaming protocols carry the media itself; playlists only matter
    /// to Icecast, which surfaces them as metadata updates.
    async fn push_playlist(&mut self, text: &str, name: &str) -> Result<(), PushError> {
        match self.protocol {
            StreamProtocol::Icecast => {
                if !self.connected {
                    self.connect().await?;
                }
                self.transport
                    .set_metadata(&[("playlist".to_string(), text.to_string())])
                    .await
                    .map_err(|e| PushError::Transient {
                        reason: e.to_string(),
                        status: None,
                    })?;
                self.stats.playlists_pushed += 1;
                Ok(())
            }
            StreamProtocol::Rtmp | StreamProtocol::Srt => {
                debug!("{} ignores playlist {}", self.protocol.as_str(), name);
                Ok(())
            }
        }
    }

    fn stats(&self) -> PusherStats {
        self.stats.clone()
    }
}
