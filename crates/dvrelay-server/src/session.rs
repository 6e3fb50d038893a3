//! One accepted relay connection.
//!
//! # State machine
//!
//! ```text
//! Unauthenticated ──line──► validate ──fail──► write status, read next line
//!        │                     │                 (bounded attempts)
//!        │                     └─ok──► register channel, write "200"
//!        ▼                                          │
//!      Closed ◄── EOF / error / idle / stop ── Authenticated(channel)
//!                                                   │ read ≤ 1460 bytes
//!                                                   ▼
//!                                          consumer.deliver(record)
//! ```
//!
//! Each failed line is checked in this order: length (403), channel digit
//! range (400), registry capacity (400), channel already streaming (409),
//! passphrase (403).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dvrelay_core::{Channel, Record, ServerConfig, DEFAULT_IO_TIMEOUT, SOCKET_BUFFER_SIZE};
use dvrelay_protocol::relay::{self, RelayStatus};
use dvrelay_transport::{with_deadline, StopSignal};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::consumer::{ConsumerHandle, Delivery};
use crate::error::SessionError;
use crate::registry::{AdmissionError, ChannelLease, ChannelRegistry};

/// Longest handshake line accepted, newline included.
pub const MAX_LINE_LEN: usize = 256;

// ── Shared context ───────────────────────────────────────────────────────────

/// Settings and shared state handed to every session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub key: String,
    pub attempt_limit: Option<u32>,
    pub idle_timeout: Duration,
    pub io_timeout: Duration,
    pub registry: Arc<ChannelRegistry>,
    pub consumer: ConsumerHandle,
}

impl SessionContext {
    pub fn new(config: &ServerConfig, registry: Arc<ChannelRegistry>, consumer: ConsumerHandle) -> Self {
        Self {
            key: config.key.clone(),
            attempt_limit: config.handshake_attempt_limit(),
            idle_timeout: config.idle_timeout(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            registry,
            consumer,
        }
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(Channel),
    Closed,
}

/// What a finished session did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub channel: Option<Channel>,
    pub frames: u64,
    pub bytes: u64,
    pub dropped: u64,
}

pub struct Session<S> {
    peer: String,
    reader: BufReader<S>,
    ctx: Arc<SessionContext>,
    state: SessionState,
    lease: Option<ChannelLease>,
    summary: SessionSummary,
}

enum LineRead {
    Line(String),
    Closed,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: impl Into<String>, ctx: Arc<SessionContext>) -> Self {
        Self {
            peer: peer.into(),
            reader: BufReader::new(stream),
            ctx,
            state: SessionState::Unauthenticated,
            lease: None,
            summary: SessionSummary::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the session to completion and closes the connection.
    pub async fn run(mut self, mut stop: StopSignal) -> Result<SessionSummary, SessionError> {
        let result = tokio::select! {
            result = self.drive() => result,
            _ = stop.stopped() => {
                debug!("{}: closing on shutdown", self.peer);
                Ok(())
            }
        };
        self.close().await;
        result.map(|()| self.summary)
    }

    async fn drive(&mut self) -> Result<(), SessionError> {
        let Some(channel) = self.authenticate().await? else {
            return Ok(());
        };
        self.stream_frames(channel).await
    }

    /// Reads handshake lines until one is accepted.
    ///
    /// `Ok(None)` means the peer went away first.
    async fn authenticate(&mut self) -> Result<Option<Channel>, SessionError> {
        let mut failures = 0u32;
        loop {
            let line = match self.read_line().await? {
                LineRead::Line(line) => line,
                LineRead::Closed => return Ok(None),
            };

            match self.admit(&line) {
                Ok(lease) => {
                    let channel = lease.channel();
                    self.lease = Some(lease);
                    self.send_status(RelayStatus::Accepted).await?;
                    self.state = SessionState::Authenticated(channel);
                    self.summary.channel = Some(channel);
                    info!("{}: streaming channel {}", self.peer, channel);
                    return Ok(Some(channel));
                }
                Err(status) => {
                    failures += 1;
                    warn!("{}: handshake refused with {} (attempt {})", self.peer, status, failures);
                    self.send_status(status).await?;
                    if let Some(limit) = self.ctx.attempt_limit {
                        if failures >= limit {
                            return Err(SessionError::TooManyAttempts(failures));
                        }
                    }
                }
            }
        }
    }

    /// Validates one handshake line and, if it passes, claims the channel.
    fn admit(&self, line: &str) -> Result<ChannelLease, RelayStatus> {
        // The only parse failure is a line that is too short.
        let hello = relay::parse_hello(line).map_err(|_| RelayStatus::BadCredentials)?;
        let channel = hello.channel().map_err(|_| RelayStatus::InvalidChannel)?;

        self.ctx.registry.check(channel).map_err(admission_status)?;
        if hello.key != self.ctx.key {
            return Err(RelayStatus::BadCredentials);
        }
        self.ctx.registry.admit(channel).map_err(admission_status)
    }

    async fn stream_frames(&mut self, channel: Channel) -> Result<(), SessionError> {
        let idle = self.ctx.idle_timeout;
        let mut buf = vec![0u8; SOCKET_BUFFER_SIZE];
        loop {
            let n = match tokio::time::timeout(idle, self.reader.read(&mut buf)).await {
                Ok(read) => read?,
                Err(_) => {
                    info!("{}: channel {} idle for {:?}, closing", self.peer, channel, idle);
                    return Ok(());
                }
            };
            if n == 0 {
                info!("{}: channel {} closed by peer", self.peer, channel);
                return Ok(());
            }

            let record = Record::new(channel, Bytes::copy_from_slice(&buf[..n]));
            match self.ctx.consumer.deliver(record).await? {
                Delivery::Queued => {
                    self.summary.frames += 1;
                    self.summary.bytes += n as u64;
                }
                Delivery::Dropped => self.summary.dropped += 1,
            }
        }
    }

    async fn read_line(&mut self) -> Result<LineRead, SessionError> {
        let mut raw = Vec::new();
        let limit = (MAX_LINE_LEN + 1) as u64;
        let read = tokio::time::timeout(
            self.ctx.idle_timeout,
            (&mut self.reader).take(limit).read_until(b'\n', &mut raw),
        )
        .await;

        let n = match read {
            Ok(n) => n?,
            Err(_) => {
                debug!("{}: no handshake within {:?}", self.peer, self.ctx.idle_timeout);
                return Ok(LineRead::Closed);
            }
        };

        if raw.last() != Some(&b'\n') {
            if n > MAX_LINE_LEN {
                return Err(SessionError::LineTooLong(MAX_LINE_LEN));
            }
            // EOF before the newline.
            return Ok(LineRead::Closed);
        }
        Ok(LineRead::Line(String::from_utf8_lossy(&raw).into_owned()))
    }

    async fn send_status(&mut self, status: RelayStatus) -> Result<(), SessionError> {
        let stream = self.reader.get_mut();
        with_deadline(self.ctx.io_timeout, async {
            stream.write_all(status.as_bytes()).await?;
            stream.flush().await
        })
        .await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = with_deadline(self.ctx.io_timeout, self.reader.get_mut().shutdown()).await {
            debug!("{}: error while closing: {}", self.peer, e);
        }
        if let Some(lease) = self.lease.take() {
            info!("{}: releasing channel {}", self.peer, lease.channel());
        }
        self.state = SessionState::Closed;
    }
}

fn admission_status(err: AdmissionError) -> RelayStatus {
    match err {
        AdmissionError::Full { .. } => RelayStatus::InvalidChannel,
        AdmissionError::InUse(_) => RelayStatus::ChannelInUse,
    }
}
