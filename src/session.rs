//! One LG client connection.
//!
//! A session moves through a fixed sequence:
//!
//! ```text
//! connect ──► DATA header + payload (× stream count) ──► HANGUP ──► 1-byte ack ──► close
//!    │
//!    └──────► SHUTDOWN ──► close
//! ```
//!
//! `hangup` and `shutdown` take the session by value, so nothing can be sent
//! after either. Every network operation is awaited in order; nothing is read
//! between streams and nothing is retried.

use crate::payload::{PayloadGenerator, DEFAULT_PAGE_SIZE};
use crate::protocol::FrameHeader;
use rand::Rng;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

/// Upper bound on streams per session.
pub const DEFAULT_MAX_STREAMS: usize = 10;

/// Upper bound on a single stream's length (128 KiB).
pub const DEFAULT_MAX_STREAM_LENGTH: u64 = 128 * 1024;

/// Server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12777,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Bounds for randomly drawn stream plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub max_streams: usize,
    pub max_stream_length: u64,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_streams: DEFAULT_MAX_STREAMS,
            max_stream_length: DEFAULT_MAX_STREAM_LENGTH,
        }
    }
}

/// Lengths of the streams a session will send, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPlan {
    lengths: Vec<u64>,
}

impl StreamPlan {
    /// Draw a stream count in `[1, max_streams]`, then each length in
    /// `[1, max_stream_length]`.
    pub fn random<R: Rng>(rng: &mut R, limits: &StreamLimits) -> Self {
        let count = rng.gen_range(1..=limits.max_streams);
        let lengths = (0..count)
            .map(|_| rng.gen_range(1..=limits.max_stream_length))
            .collect();
        Self { lengths }
    }

    #[cfg(test)]
    pub fn from_lengths(lengths: impl Into<Vec<u64>>) -> Self {
        Self {
            lengths: lengths.into(),
        }
    }

    /// A plan with no streams, used by the shutdown session.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }

    pub fn total_bytes(&self) -> u64 {
        self.lengths.iter().sum()
    }
}

/// Per-session tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub page_size: usize,
    /// Bound on the HANGUP acknowledgment wait. `None` waits forever.
    pub ack_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            ack_timeout: None,
        }
    }
}

/// Session failures. Each one ends the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("transmission failed: {0}")]
    Transmit(#[source] io::Error),

    #[error("connection closed before hangup was acknowledged")]
    AckClosed,

    #[error("failed to read hangup acknowledgment: {0}")]
    AckRead(#[source] io::Error),

    #[error("no hangup acknowledgment within {0:?}")]
    AckTimeout(Duration),
}

/// What a completed session sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id_prefix: u64,
    pub streams: usize,
    pub bytes: u64,
    pub local_addr: Option<SocketAddr>,
}

/// A client connection to LG.
pub struct LgSession<S, R> {
    stream: S,
    rng: R,
    id_prefix: u64,
    plan: StreamPlan,
    payload: PayloadGenerator,
    ack_timeout: Option<Duration>,
    local_addr: Option<SocketAddr>,
    streams_sent: usize,
    bytes_sent: u64,
}

impl<R: Rng> LgSession<TcpStream, R> {
    /// Connect to `endpoint` and enable TCP keep-alive.
    pub async fn connect(
        endpoint: &Endpoint,
        id_prefix: u64,
        plan: StreamPlan,
        rng: R,
        options: &SessionOptions,
    ) -> Result<Self, SessionError> {
        let connect_err = |source: io::Error| SessionError::Connect {
            addr: endpoint.to_string(),
            source,
        };

        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(connect_err)?;
        socket2::SockRef::from(&stream)
            .set_keepalive(true)
            .map_err(connect_err)?;

        let local_addr = stream.local_addr().ok();
        info!(
            local_addr = ?local_addr,
            id_prefix,
            streams = plan.len(),
            "Connected to LG"
        );

        let mut session = Self::new(stream, id_prefix, plan, rng, options);
        session.local_addr = local_addr;
        Ok(session)
    }
}

impl<S, R> LgSession<S, R>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: Rng,
{
    /// Wrap an already-connected stream.
    pub fn new(
        stream: S,
        id_prefix: u64,
        plan: StreamPlan,
        rng: R,
        options: &SessionOptions,
    ) -> Self {
        Self {
            stream,
            rng,
            id_prefix,
            plan,
            payload: PayloadGenerator::new(options.page_size),
            ack_timeout: options.ack_timeout,
            local_addr: None,
            streams_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Stream id for local stream `index`.
    pub fn stream_id(&self, index: usize) -> u64 {
        self.id_prefix + index as u64
    }

    /// Send every planned stream, then hang up.
    pub async fn run(mut self) -> Result<SessionSummary, SessionError> {
        for index in 0..self.plan.len() {
            self.send_stream(index).await?;
        }
        self.hangup().await
    }

    /// Send the DATA header for stream `index` followed by its payload.
    ///
    /// Panics if `index` is outside the plan.
    pub async fn send_stream(&mut self, index: usize) -> Result<u64, SessionError> {
        let id = self.stream_id(index);
        let length = self.plan.lengths()[index];

        self.send_header(FrameHeader::data(id, length)).await?;
        self.payload
            .write(&mut self.stream, &mut self.rng, length)
            .await
            .map_err(SessionError::Transmit)?;

        self.streams_sent += 1;
        self.bytes_sent += length;
        debug!(id, length, "Sent stream");
        Ok(length)
    }

    /// Send HANGUP, wait for the one-byte acknowledgment, then close.
    ///
    /// The acknowledgment's value is not checked. A peer that closes without
    /// sending it yields [`SessionError::AckClosed`].
    pub async fn hangup(mut self) -> Result<SessionSummary, SessionError> {
        self.send_header(FrameHeader::hangup()).await?;
        let ack = self.read_ack().await?;
        trace!(ack, id_prefix = self.id_prefix, "Hangup acknowledged");

        self.close().await;
        Ok(SessionSummary {
            id_prefix: self.id_prefix,
            streams: self.streams_sent,
            bytes: self.bytes_sent,
            local_addr: self.local_addr,
        })
    }

    /// Send SHUTDOWN and close without waiting for a response.
    pub async fn shutdown(mut self) -> Result<(), SessionError> {
        if !self.plan.is_empty() {
            debug!(
                id_prefix = self.id_prefix,
                unsent = self.plan.len() - self.streams_sent,
                "Shutting down with planned streams"
            );
        }
        self.send_header(FrameHeader::shutdown()).await?;
        self.close().await;
        Ok(())
    }

    async fn send_header(&mut self, header: FrameHeader) -> Result<(), SessionError> {
        self.stream
            .write_all(&header.to_bytes())
            .await
            .map_err(SessionError::Transmit)
    }

    async fn read_ack(&mut self) -> Result<u8, SessionError> {
        let mut ack = [0u8; 1];
        let read = self.stream.read_exact(&mut ack);

        let result = match self.ack_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| SessionError::AckTimeout(limit))?,
            None => read.await,
        };

        match result {
            Ok(_) => Ok(ack[0]),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(SessionError::AckClosed),
            Err(e) => Err(SessionError::AckRead(e)),
        }
    }

    // The protocol exchange is complete by now; a failed close changes nothing.
    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Close failed");
        }
    }
}
