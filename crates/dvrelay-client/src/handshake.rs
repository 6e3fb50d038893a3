//! Handshakes run by the two supervised legs of a pipeline.
//!
//! ```text
//! DVR leg:    write 507-byte login frame ─► read 8-byte reply
//! relay leg:  write "<digit><key>\n"     ─► read 3-byte status
//! ```
//!
//! Once the DVR has the login frame, anything short of a full reply (a
//! hang-up, a read error, silence until the deadline) is an unknown reply and
//! ends the attempt for good. A relay that hangs up before answering is
//! retried.

use async_trait::async_trait;
use dvrelay_core::{Channel, DvrCredentials};
use dvrelay_protocol::dvr::{self, HANDSHAKE_LEN, REPLY_LEN};
use dvrelay_protocol::relay::{self, STATUS_LEN};
use dvrelay_protocol::CodecError;
use dvrelay_transport::{Handshake, HandshakeError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

// ── DVR ──────────────────────────────────────────────────────────────────────

/// Logs in to the DVR and selects one channel.
///
/// The login frame is encoded once; every reconnect replays the same bytes.
#[derive(Clone)]
pub struct DvrHandshake {
    channel: Channel,
    frame: [u8; HANDSHAKE_LEN],
}

impl DvrHandshake {
    pub fn new(channel: Channel, credentials: &DvrCredentials) -> Result<Self, CodecError> {
        let frame = dvr::encode_handshake(channel, credentials)?;
        Ok(Self { channel, frame })
    }

    pub fn frame(&self) -> &[u8; HANDSHAKE_LEN] {
        &self.frame
    }
}

#[async_trait]
impl<S> Handshake<S> for DvrHandshake
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn perform(&self, stream: &mut S, deadline: Instant) -> Result<(), HandshakeError> {
        stream.write_all(&self.frame).await?;
        stream.flush().await?;

        let mut reply = [0u8; REPLY_LEN];
        let n = read_reply(stream, &mut reply, deadline, self.channel).await;
        dvr::validate_handshake_reply(&reply[..n]).map_err(HandshakeError::rejected)?;
        debug!("DVR[{}] login accepted", self.channel);
        Ok(())
    }
}

// ── Relay ────────────────────────────────────────────────────────────────────

/// Authenticates to the relay server and claims one channel.
#[derive(Clone)]
pub struct RelayHandshake {
    channel: Channel,
    line: Vec<u8>,
}

impl RelayHandshake {
    pub fn new(channel: Channel, key: &str) -> Self {
        Self { channel, line: relay::encode_hello(channel, key) }
    }
}

#[async_trait]
impl<S> Handshake<S> for RelayHandshake
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn perform(&self, stream: &mut S, _deadline: Instant) -> Result<(), HandshakeError> {
        stream.write_all(&self.line).await?;
        stream.flush().await?;

        let mut status = [0u8; STATUS_LEN];
        stream.read_exact(&mut status).await?;

        relay::interpret_status(&status).map_err(HandshakeError::rejected)?;
        debug!("Relay[{}] channel claimed", self.channel);
        Ok(())
    }
}

/// Reads until `buf` is full, the peer closes, a read fails or `deadline`
/// passes. Returns the bytes read.
async fn read_reply<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut [u8],
    deadline: Instant,
    channel: Channel,
) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match tokio::time::timeout_at(deadline, stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => {
                debug!("DVR[{}] closed after {} reply bytes", channel, filled);
                break;
            }
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => {
                debug!("DVR[{}] reply read failed: {}", channel, e);
                break;
            }
            Err(_) => {
                debug!("DVR[{}] no reply before the deadline", channel);
                break;
            }
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use dvrelay_core::BackoffPolicy;
    use dvrelay_protocol::dvr::{REPLY_AUTH_FAILED, REPLY_SUCCESS};
    use dvrelay_protocol::RelayStatus;
    use dvrelay_transport::{StopSignal, Supervisor, SupervisorError, TcpConnector};
    use tokio::io::duplex;
    use tokio::net::TcpListener;

    use super::*;

    fn ch(n: u8) -> Channel {
        Channel::new(n).unwrap()
    }

    fn dvr_handshake() -> DvrHandshake {
        DvrHandshake::new(ch(2), &DvrCredentials::new("admin", "123456")).unwrap()
    }

    /// Fake DVR: reads the login frame, answers with `reply`, then closes.
    async fn run_dvr(reply: &'static [u8]) -> Result<(), HandshakeError> {
        let handshake = dvr_handshake();
        let expected = *handshake.frame();
        let (mut ours, mut theirs) = duplex(4096);
        let peer = tokio::spawn(async move {
            let mut frame = [0u8; HANDSHAKE_LEN];
            theirs.read_exact(&mut frame).await.unwrap();
            assert_eq!(frame, expected);
            theirs.write_all(reply).await.unwrap();
        });
        let result = handshake.perform(&mut ours, in_5s()).await;
        peer.await.unwrap();
        result
    }

    fn in_5s() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn dvr_success_reply_is_accepted() {
        assert!(run_dvr(&REPLY_SUCCESS).await.is_ok());
    }

    #[tokio::test]
    async fn dvr_auth_failure_is_rejected() {
        let err = run_dvr(&REPLY_AUTH_FAILED).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("rejected the credentials"));
    }

    #[tokio::test]
    async fn dvr_truncated_reply_is_rejected() {
        let err = run_dvr(&[0x10, 0x00, 0x00]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Rejected(_)));
    }

    #[tokio::test]
    async fn dvr_silent_close_is_rejected() {
        let err = run_dvr(&[]).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Rejected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn dvr_silence_until_deadline_is_rejected() {
        let handshake = dvr_handshake();
        let (mut ours, mut theirs) = duplex(4096);
        let peer = tokio::spawn(async move {
            let mut frame = [0u8; HANDSHAKE_LEN];
            theirs.read_exact(&mut frame).await.unwrap();
            theirs
        });

        let started = Instant::now();
        let err = handshake.perform(&mut ours, in_5s()).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Rejected(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        drop(peer.await.unwrap());
    }

    /// Fake DVR on loopback: counts dials, swallows the login frame and then
    /// either hangs up or goes quiet.
    async fn mute_dvr(hang_up: bool) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let dials = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&dials);
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (mut sock, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                let mut frame = [0u8; HANDSHAKE_LEN];
                sock.read_exact(&mut frame).await.unwrap();
                if !hang_up {
                    held.push(sock);
                }
            }
        });
        (addr, dials)
    }

    async fn connect_to_mute_dvr(hang_up: bool) -> (Result<(), SupervisorError>, usize) {
        let (addr, dials) = mute_dvr(hang_up).await;
        let io_timeout = Duration::from_millis(200);
        let mut sup = Supervisor::new(
            "DVR[2]",
            TcpConnector::new(addr, io_timeout),
            dvr_handshake(),
            BackoffPolicy { min_ms: 10, max_ms: 20, factor: 2.0 },
            io_timeout,
            StopSignal::never(),
        );
        let result = tokio::time::timeout(Duration::from_secs(5), sup.connect())
            .await
            .expect("connect settles");
        (result, dials.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn dvr_hanging_up_without_reply_is_not_redialed() {
        let (result, dials) = connect_to_mute_dvr(true).await;
        assert!(matches!(
            result,
            Err(SupervisorError::Rejected { ref reason, .. }) if reason.contains("unrecognised DVR reply")
        ));
        assert_eq!(dials, 1);
    }

    #[tokio::test]
    async fn dvr_never_replying_is_not_redialed() {
        let (result, dials) = connect_to_mute_dvr(false).await;
        assert!(matches!(result, Err(SupervisorError::Rejected { .. })));
        assert_eq!(dials, 1);
    }

    #[test]
    fn dvr_frame_rejects_oversized_user() {
        let creds = DvrCredentials::new("a-very-long-user", "pw");
        assert!(matches!(
            DvrHandshake::new(ch(1), &creds),
            Err(CodecError::UserTooLong { .. })
        ));
    }

    async fn run_relay(status: &'static [u8]) -> Result<(), HandshakeError> {
        let handshake = RelayHandshake::new(ch(3), "secret");
        let (mut ours, mut theirs) = duplex(1024);
        let peer = tokio::spawn(async move {
            let mut line = [0u8; 8];
            theirs.read_exact(&mut line).await.unwrap();
            assert_eq!(&line, b"3secret\n");
            theirs.write_all(status).await.unwrap();
        });
        let result = handshake.perform(&mut ours, in_5s()).await;
        peer.await.unwrap();
        result
    }

    #[tokio::test]
    async fn relay_accepts_200() {
        assert!(run_relay(RelayStatus::Accepted.as_bytes()).await.is_ok());
    }

    #[tokio::test]
    async fn relay_refusals_are_rejections() {
        for status in [RelayStatus::BadCredentials, RelayStatus::InvalidChannel, RelayStatus::ChannelInUse] {
            let err = run_relay(status.as_bytes()).await.unwrap_err();
            assert!(!err.is_transient());
            assert!(err.to_string().contains(&status.code().to_string()));
        }
        assert!(matches!(run_relay(b"500").await, Err(HandshakeError::Rejected(_))));
    }

    #[tokio::test]
    async fn relay_eof_is_transient() {
        assert!(run_relay(b"20").await.unwrap_err().is_transient());
    }
}
