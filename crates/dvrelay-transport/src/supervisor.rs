//! Connection supervisor: dial, handshake, back off, repeat.
//!
//! # Lifecycle
//!
//! ```text
//! connect() ─► dial ──err──► sleep(backoff) ─► dial ...
//!               │ok
//!               ▼
//!            handshake ──Io──► close, sleep(backoff) ─► dial ...
//!               │ok    └─Rejected──► Err(SupervisorError::Rejected)
//!               ▼
//!            reset backoff, hold stream
//!
//! read()/write_all()  each under the per-operation deadline
//! reconnect()         close the held stream, then connect() again
//! ```
//!
//! Transient failures are retried forever; only a handshake rejection or a
//! stop request ends `connect()` with an error.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use dvrelay_core::BackoffPolicy;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::connector::Connector;
use crate::deadline::{timed_out, with_deadline};
use crate::error::{HandshakeError, SupervisorError};
use crate::shutdown::StopSignal;

/// Application handshake run on every freshly dialed connection.
///
/// The supervisor abandons the handshake at `deadline` and treats that as
/// transient. Implementations that read a reply can bound it by `deadline`
/// themselves to classify silence differently.
#[async_trait]
pub trait Handshake<S>: Send + Sync
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn perform(&self, stream: &mut S, deadline: Instant) -> Result<(), HandshakeError>;
}

/// Owns one connection to one peer and keeps it established.
pub struct Supervisor<C, H>
where
    C: Connector,
    H: Handshake<C::Stream>,
{
    name: String,
    connector: C,
    handshake: H,
    backoff: Backoff,
    io_timeout: Duration,
    stop: StopSignal,
    stream: Option<C::Stream>,
    connects: u64,
}

impl<C, H> Supervisor<C, H>
where
    C: Connector,
    H: Handshake<C::Stream>,
{
    pub fn new(
        name: impl Into<String>,
        connector: C,
        handshake: H,
        policy: BackoffPolicy,
        io_timeout: Duration,
        stop: StopSignal,
    ) -> Self {
        Self {
            name: name.into(),
            connector,
            handshake,
            backoff: Backoff::new(policy),
            io_timeout,
            stop,
            stream: None,
            connects: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Successful connects (dial + handshake) so far.
    pub fn connects(&self) -> u64 {
        self.connects
    }

    /// Establishes a fresh, handshaken connection, retrying with backoff.
    ///
    /// Any connection already held is closed first.
    pub async fn connect(&mut self) -> Result<(), SupervisorError> {
        self.disconnect().await;
        info!("{}: connecting to {}...", self.name, self.connector.target());

        loop {
            if self.stop.is_stopped() {
                return Err(SupervisorError::Stopped);
            }

            let dialed = tokio::select! {
                result = self.connector.connect() => result,
                _ = self.stop.stopped() => return Err(SupervisorError::Stopped),
            };
            let mut stream = match dialed {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("{}: unable to dial {}: {}", self.name, self.connector.target(), e);
                    self.pause().await?;
                    continue;
                }
            };

            let timeout = self.io_timeout;
            let deadline = Instant::now() + timeout;
            let outcome = tokio::select! {
                result = tokio::time::timeout_at(deadline, self.handshake.perform(&mut stream, deadline)) => {
                    result.unwrap_or_else(|_| Err(HandshakeError::Io(timed_out(timeout))))
                }
                _ = self.stop.stopped() => return Err(SupervisorError::Stopped),
            };

            match outcome {
                Ok(()) => {
                    self.backoff.reset();
                    self.connects += 1;
                    self.stream = Some(stream);
                    info!("{}: connected to {}", self.name, self.connector.target());
                    return Ok(());
                }
                Err(HandshakeError::Io(e)) => {
                    warn!("{}: handshake with {} failed: {}", self.name, self.connector.target(), e);
                    close(stream, self.io_timeout).await;
                    self.pause().await?;
                }
                Err(HandshakeError::Rejected(reason)) => {
                    close(stream, self.io_timeout).await;
                    error!("{}: {} rejected the handshake: {}", self.name, self.connector.target(), reason);
                    return Err(SupervisorError::Rejected {
                        name: self.name.clone(),
                        target: self.connector.target().to_owned(),
                        reason,
                    });
                }
            }
        }
    }

    /// Drops the current connection and establishes a new one.
    pub async fn reconnect(&mut self) -> Result<(), SupervisorError> {
        info!("{}: re-establishing connection...", self.name);
        self.connect().await
    }

    /// Closes the held connection, if any.
    pub async fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            close(stream, self.io_timeout).await;
        }
    }

    /// Reads up to `buf.len()` bytes under the per-operation deadline.
    ///
    /// `Ok(0)` means the peer closed the connection.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        with_deadline(timeout, stream.read(buf)).await
    }

    /// Writes all of `data` under the per-operation deadline.
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        with_deadline(timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
    }

    async fn pause(&mut self) -> Result<(), SupervisorError> {
        let delay = self.backoff.next_delay();
        info!("{}: retrying in {:?}...", self.name, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.stop.stopped() => Err(SupervisorError::Stopped),
        }
    }
}

async fn close<S: AsyncWrite + Unpin>(mut stream: S, timeout: Duration) {
    if let Err(e) = with_deadline(timeout, stream.shutdown()).await {
        debug!("Ignoring error while closing connection: {}", e);
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "no established connection")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::io::DuplexStream;

    use super::*;
    use crate::shutdown::ShutdownToken;

    const POLICY: BackoffPolicy = BackoffPolicy { min_ms: 100, max_ms: 1_000, factor: 2.0 };

    /// Fails the first `failures` dials, then hands out duplex streams.
    #[derive(Clone, Default)]
    struct FlakyConnector {
        failures: Arc<AtomicU32>,
        attempts: Arc<Mutex<Vec<Instant>>>,
        peers: Arc<Mutex<Vec<DuplexStream>>>,
    }

    impl FlakyConnector {
        fn failing(n: u32) -> Self {
            let c = Self::default();
            c.failures.store(n, Ordering::SeqCst);
            c
        }

        fn gaps(&self) -> Vec<Duration> {
            let attempts = self.attempts.lock().unwrap();
            attempts.windows(2).map(|w| w[1] - w[0]).collect()
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            self.attempts.lock().unwrap().push(Instant::now());
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            let (ours, theirs) = tokio::io::duplex(1024);
            self.peers.lock().unwrap().push(theirs);
            Ok(ours)
        }

        fn target(&self) -> &str {
            "mock:1"
        }
    }

    /// Returns scripted outcomes, then succeeds.
    #[derive(Default)]
    struct ScriptedHandshake {
        script: Mutex<VecDeque<Result<(), HandshakeError>>>,
    }

    impl ScriptedHandshake {
        fn with(outcomes: Vec<Result<(), HandshakeError>>) -> Self {
            Self { script: Mutex::new(outcomes.into()) }
        }
    }

    #[async_trait]
    impl Handshake<DuplexStream> for ScriptedHandshake {
        async fn perform(&self, _stream: &mut DuplexStream, _deadline: Instant) -> Result<(), HandshakeError> {
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    /// Hangs forever on the first `stalls` attempts, then succeeds.
    struct StallingHandshake {
        stalls: AtomicU32,
    }

    #[async_trait]
    impl Handshake<DuplexStream> for StallingHandshake {
        async fn perform(&self, _stream: &mut DuplexStream, _deadline: Instant) -> Result<(), HandshakeError> {
            if self.stalls.load(Ordering::SeqCst) > 0 {
                self.stalls.fetch_sub(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn supervisor(
        connector: FlakyConnector,
        handshake: ScriptedHandshake,
        stop: StopSignal,
    ) -> Supervisor<FlakyConnector, ScriptedHandshake> {
        Supervisor::new("test", connector, handshake, POLICY, Duration::from_secs(5), stop)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test(start_paused = true)]
    async fn dial_failures_back_off_exponentially() {
        let connector = FlakyConnector::failing(6);
        let mut sup = supervisor(connector.clone(), ScriptedHandshake::default(), StopSignal::never());

        sup.connect().await.unwrap();

        assert!(sup.is_connected());
        assert_eq!(connector.attempt_count(), 7);
        assert_eq!(
            connector.gaps(),
            vec![ms(100), ms(200), ms(400), ms(800), ms(1_000), ms(1_000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_resets_after_success() {
        let connector = FlakyConnector::failing(3);
        let mut sup = supervisor(connector.clone(), ScriptedHandshake::default(), StopSignal::never());
        sup.connect().await.unwrap();
        assert_eq!(sup.connects(), 1);

        connector.failures.store(1, Ordering::SeqCst);
        connector.attempts.lock().unwrap().clear();
        sup.reconnect().await.unwrap();

        assert_eq!(connector.gaps(), vec![ms(100)]);
        assert_eq!(sup.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_handshake_failure_is_retried() {
        let connector = FlakyConnector::default();
        let handshake = ScriptedHandshake::with(vec![
            Err(HandshakeError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"))),
            Err(HandshakeError::Io(timed_out(Duration::from_secs(5)))),
        ]);
        let mut sup = supervisor(connector.clone(), handshake, StopSignal::never());

        sup.connect().await.unwrap();
        assert_eq!(connector.attempt_count(), 3);
        assert_eq!(connector.gaps(), vec![ms(100), ms(200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_handshake_is_abandoned_at_io_timeout() {
        let connector = FlakyConnector::default();
        let handshake = StallingHandshake { stalls: AtomicU32::new(1) };
        let mut sup = Supervisor::new("test", connector.clone(), handshake, POLICY, ms(5_000), StopSignal::never());

        sup.connect().await.unwrap();

        assert!(sup.is_connected());
        assert_eq!(connector.attempt_count(), 2);
        // io_timeout spent in the handshake, then the minimum backoff.
        assert_eq!(connector.gaps(), vec![ms(5_100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_terminal() {
        let connector = FlakyConnector::default();
        let handshake = ScriptedHandshake::with(vec![Err(HandshakeError::rejected("bad creds"))]);
        let mut sup = supervisor(connector.clone(), handshake, StopSignal::never());

        let err = sup.connect().await.unwrap_err();
        assert!(matches!(err, SupervisorError::Rejected { ref reason, .. } if reason == "bad creds"));
        assert_eq!(connector.attempt_count(), 1);
        assert!(!sup.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_backoff_sleep() {
        let token = ShutdownToken::new();
        let connector = FlakyConnector::failing(u32::MAX);
        let mut sup = supervisor(connector, ScriptedHandshake::default(), token.subscribe());

        let task = tokio::spawn(async move { sup.connect().await });
        tokio::time::sleep(ms(1_500)).await;
        token.signal_stop();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(SupervisorError::Stopped)));
    }

    #[tokio::test]
    async fn io_requires_connection_and_flows_through() {
        let connector = FlakyConnector::default();
        let mut sup = supervisor(connector.clone(), ScriptedHandshake::default(), StopSignal::never());

        let err = sup.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        sup.connect().await.unwrap();
        sup.write_all(b"frame").await.unwrap();

        let mut peer = connector.peers.lock().unwrap().pop().unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"frame");

        peer.write_all(b"ok").await.unwrap();
        let mut reply = [0u8; 8];
        let n = sup.read(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], b"ok");

        sup.disconnect().await;
        assert!(!sup.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn read_deadline_expires_as_timed_out() {
        let connector = FlakyConnector::default();
        let mut sup = supervisor(connector.clone(), ScriptedHandshake::default(), StopSignal::never());
        sup.connect().await.unwrap();

        let mut buf = [0u8; 16];
        let err = sup.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn write_deadline_expires_when_peer_stops_reading() {
        let connector = FlakyConnector::default();
        let mut sup = supervisor(connector.clone(), ScriptedHandshake::default(), StopSignal::never());
        sup.connect().await.unwrap();

        // The peer half stays alive in the connector but never reads, so the
        // 1 KiB duplex buffer fills up.
        let started = Instant::now();
        let err = sup.write_all(&[0u8; 4096]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(started.elapsed(), ms(5_000));
        assert_eq!(connector.peers.lock().unwrap().len(), 1);
    }
}
