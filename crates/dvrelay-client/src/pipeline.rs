//! `ChannelRelay`: one camera channel's DVR → relay forwarding loop.
//!
//! ```text
//! Supervisor<DVR>  ──read──►  source task
//!                                 │  mpsc (SOCKET_BUFFER_SIZE frames)
//!                                 ▼
//!                             sink task  ──write──►  Supervisor<relay>
//! ```
//!
//! The source blocks when the queue is full, so a slow relay link pushes back
//! on the DVR socket instead of reordering or discarding frames. The sink
//! drops the frame whose write failed, reconnects, and carries on with the
//! next one.
//!
//! A handshake rejection on either leg stops both tasks of this channel and
//! becomes the pipeline's result. Other channels keep running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dvrelay_core::{BackoffPolicy, Channel, ClientConfig, DvrCredentials, SOCKET_BUFFER_SIZE};
use dvrelay_protocol::CodecError;
use dvrelay_transport::{Connector, ShutdownToken, StopSignal, Supervisor, SupervisorError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::handshake::{DvrHandshake, RelayHandshake};

// ── Configuration ────────────────────────────────────────────────────────────

/// Everything one channel pipeline needs besides its two connectors.
#[derive(Clone)]
pub struct PipelineConfig {
    pub channel:         Channel,
    pub dvr_handshake:   DvrHandshake,
    pub relay_handshake: RelayHandshake,
    pub io_timeout:      Duration,
    pub dvr_backoff:     BackoffPolicy,
    pub relay_backoff:   BackoffPolicy,
    /// Frames buffered between the source and the sink.
    pub queue_capacity:  usize,
}

impl PipelineConfig {
    /// Pre-encodes both handshakes for `channel`.
    pub fn new(config: &ClientConfig, channel: Channel) -> Result<Self, CodecError> {
        let credentials = DvrCredentials::new(config.user.clone(), config.pass.clone());
        Ok(Self {
            channel,
            dvr_handshake: DvrHandshake::new(channel, &credentials)?,
            relay_handshake: RelayHandshake::new(channel, &config.key),
            io_timeout: config.io_timeout(),
            dvr_backoff: config.dvr_backoff,
            relay_backoff: config.relay_backoff,
            queue_capacity: SOCKET_BUFFER_SIZE,
        })
    }
}

// ── Stats ────────────────────────────────────────────────────────────────────

/// Live counters shared between the pipeline tasks and the handle.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_read:      AtomicU64,
    frames_forwarded: AtomicU64,
    frames_dropped:   AtomicU64,
    dvr_reconnects:   AtomicU64,
    relay_reconnects: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_read:      u64,
    pub frames_forwarded: u64,
    pub frames_dropped:   u64,
    pub dvr_reconnects:   u64,
    pub relay_reconnects: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_read:      self.frames_read.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_dropped:   self.frames_dropped.load(Ordering::Relaxed),
            dvr_reconnects:   self.dvr_reconnects.load(Ordering::Relaxed),
            relay_reconnects: self.relay_reconnects.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ── ChannelRelay ─────────────────────────────────────────────────────────────

/// Handle to a running channel pipeline.
pub struct ChannelRelay {
    pub channel: Channel,
    stats: Arc<PipelineStats>,
    token: Arc<ShutdownToken>,
    task: JoinHandle<Result<(), PipelineError>>,
}

impl ChannelRelay {
    /// Spawns the source and sink tasks for one channel.
    ///
    /// The pipeline stops on its own rejection, on [`stop`](Self::stop), or
    /// when `parent` fires.
    pub fn spawn<D, R>(config: PipelineConfig, dvr: D, relay: R, parent: StopSignal) -> Self
    where
        D: Connector + 'static,
        R: Connector + 'static,
    {
        let channel = config.channel;
        let stats = Arc::new(PipelineStats::default());
        let token = Arc::new(ShutdownToken::child_of(&parent));

        let task = tokio::spawn(run_pipeline(
            config,
            dvr,
            relay,
            Arc::clone(&token),
            Arc::clone(&stats),
        ));

        Self { channel, stats, token, task }
    }

    /// Request graceful stop (non-blocking).
    pub fn stop(&self) {
        self.token.signal_stop();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Waits for both tasks to finish.
    pub async fn wait(self) -> Result<(), PipelineError> {
        match self.task.await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::TaskFailed("pipeline")),
        }
    }
}

// ── Pipeline tasks ───────────────────────────────────────────────────────────

async fn run_pipeline<D, R>(
    config: PipelineConfig,
    dvr: D,
    relay: R,
    token: Arc<ShutdownToken>,
    stats: Arc<PipelineStats>,
) -> Result<(), PipelineError>
where
    D: Connector + 'static,
    R: Connector + 'static,
{
    let ch = config.channel;
    let (tx, rx) = mpsc::channel::<Bytes>(config.queue_capacity.max(1));

    let source = Supervisor::new(
        format!("DVR[{}]", ch),
        dvr,
        config.dvr_handshake,
        config.dvr_backoff,
        config.io_timeout,
        token.subscribe(),
    );
    let sink = Supervisor::new(
        format!("Relay[{}]", ch),
        relay,
        config.relay_handshake,
        config.relay_backoff,
        config.io_timeout,
        token.subscribe(),
    );

    info!("Channel[{}] pipeline starting", ch);

    let source = tokio::spawn(stop_on_error(
        Arc::clone(&token),
        source_loop(source, tx, Arc::clone(&stats), token.subscribe()),
    ));
    let sink = tokio::spawn(stop_on_error(
        Arc::clone(&token),
        sink_loop(sink, rx, Arc::clone(&stats), token.subscribe()),
    ));

    let (source, sink) = tokio::join!(source, sink);
    let source = source.unwrap_or(Err(PipelineError::TaskFailed("source")));
    let sink = sink.unwrap_or(Err(PipelineError::TaskFailed("sink")));

    let s = stats.snapshot();
    info!(
        "Channel[{}] pipeline stopped (read={} forwarded={} dropped={} reconnects dvr={} relay={})",
        ch, s.frames_read, s.frames_forwarded, s.frames_dropped, s.dvr_reconnects, s.relay_reconnects
    );

    source.and(sink)
}

/// Stops the sibling task when this one fails.
async fn stop_on_error<F>(token: Arc<ShutdownToken>, fut: F) -> Result<(), PipelineError>
where
    F: std::future::Future<Output = Result<(), PipelineError>>,
{
    let result = fut.await;
    if result.is_err() {
        token.signal_stop();
    }
    result
}

/// `Ok(false)` when the supervisor gave up because the pipeline is stopping.
fn established(result: Result<(), SupervisorError>) -> Result<bool, PipelineError> {
    match result {
        Ok(()) => Ok(true),
        Err(SupervisorError::Stopped) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn source_loop<C>(
    mut dvr: Supervisor<C, DvrHandshake>,
    tx: mpsc::Sender<Bytes>,
    stats: Arc<PipelineStats>,
    mut stop: StopSignal,
) -> Result<(), PipelineError>
where
    C: Connector,
{
    if !established(dvr.connect().await)? {
        return Ok(());
    }

    let mut buf = vec![0u8; SOCKET_BUFFER_SIZE];
    loop {
        let read = tokio::select! {
            result = dvr.read(&mut buf) => result,
            _ = stop.stopped() => break,
        };

        let n = match read {
            Ok(0) => {
                warn!("{}: connection closed by DVR", dvr.name());
                0
            }
            Ok(n) => n,
            Err(e) => {
                warn!("{}: read failed: {}", dvr.name(), e);
                0
            }
        };

        if n == 0 {
            if !established(dvr.reconnect().await)? {
                break;
            }
            PipelineStats::bump(&stats.dvr_reconnects);
            continue;
        }

        PipelineStats::bump(&stats.frames_read);
        let frame = Bytes::copy_from_slice(&buf[..n]);
        tokio::select! {
            sent = tx.send(frame) => {
                if sent.is_err() {
                    debug!("{}: sink gone, stopping source", dvr.name());
                    break;
                }
            }
            _ = stop.stopped() => break,
        }
    }

    dvr.disconnect().await;
    Ok(())
}

async fn sink_loop<C>(
    mut relay: Supervisor<C, RelayHandshake>,
    mut rx: mpsc::Receiver<Bytes>,
    stats: Arc<PipelineStats>,
    mut stop: StopSignal,
) -> Result<(), PipelineError>
where
    C: Connector,
{
    if !established(relay.connect().await)? {
        return Ok(());
    }

    loop {
        let frame = tokio::select! {
            frame = rx.recv() => frame,
            _ = stop.stopped() => None,
        };
        let Some(frame) = frame else { break };

        let written = tokio::select! {
            result = relay.write_all(&frame) => result,
            _ = stop.stopped() => break,
        };

        match written {
            Ok(()) => PipelineStats::bump(&stats.frames_forwarded),
            Err(e) => {
                warn!("{}: write failed, dropping {} byte frame: {}", relay.name(), frame.len(), e);
                PipelineStats::bump(&stats.frames_dropped);
                if !established(relay.reconnect().await)? {
                    break;
                }
                PipelineStats::bump(&stats.relay_reconnects);
            }
        }
    }

    relay.disconnect().await;
    Ok(())
}
