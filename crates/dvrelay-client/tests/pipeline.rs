//! Channel pipeline against fake DVR and relay servers on loopback TCP.

use std::time::Duration;

use dvrelay_client::{ChannelRelay, PipelineConfig};
use dvrelay_core::{BackoffPolicy, Channel, ClientConfig};
use dvrelay_protocol::dvr::{self, HANDSHAKE_LEN, REPLY_SUCCESS};
use dvrelay_protocol::RelayStatus;
use dvrelay_transport::{StopSignal, TcpConnector};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const FRAME: usize = 100;

fn frame(i: u8) -> [u8; FRAME] {
    [i; FRAME]
}

fn client_config(dvr: String, relay: String) -> ClientConfig {
    ClientConfig {
        source: dvr,
        dest: relay,
        user: "admin".into(),
        pass: "123456".into(),
        key: "secret".into(),
        channels: vec![Channel::new(1).unwrap()],
        dvr_backoff: BackoffPolicy { min_ms: 10, max_ms: 100, factor: 2.0 },
        relay_backoff: BackoffPolicy { min_ms: 10, max_ms: 100, factor: 2.0 },
        ..Default::default()
    }
}

/// Fake DVR: the first session sends frames 0..3 then hangs up, the second
/// sends frames 3..6 and stays open until `hold` resolves.
async fn fake_dvr(listener: TcpListener, hold: oneshot::Receiver<()>) {
    let expected = dvr::encode_handshake(
        Channel::new(1).unwrap(),
        &dvrelay_core::DvrCredentials::new("admin", "123456"),
    )
    .unwrap();

    for (session, frames) in [(0, 0..3u8), (1, 3..6u8)] {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut login = [0u8; HANDSHAKE_LEN];
        sock.read_exact(&mut login).await.unwrap();
        assert_eq!(login, expected, "session {session} login frame");
        sock.write_all(&REPLY_SUCCESS).await.unwrap();

        for i in frames {
            sock.write_all(&frame(i)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        if session == 1 {
            let _ = hold.await;
            return;
        }
        // Dropping `sock` closes the first session.
    }
}

/// Fake relay server: checks the handshake, answers 200, then collects
/// `want` bytes of payload.
async fn fake_relay(listener: TcpListener, want: usize) -> Vec<u8> {
    let (sock, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(sock);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert_eq!(line, "1secret\n");
    reader.get_mut().write_all(RelayStatus::Accepted.as_bytes()).await.unwrap();

    let mut payload = vec![0u8; want];
    reader.read_exact(&mut payload).await.unwrap();
    payload
}

#[tokio::test]
async fn dvr_drop_mid_stream_resumes_without_duplicates() {
    let dvr_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dvr_addr = dvr_listener.local_addr().unwrap().to_string();
    let relay_addr = relay_listener.local_addr().unwrap().to_string();

    let (hold_tx, hold_rx) = oneshot::channel();
    let dvr_task = tokio::spawn(fake_dvr(dvr_listener, hold_rx));
    let relay_task = tokio::spawn(fake_relay(relay_listener, 6 * FRAME));

    let cfg = client_config(dvr_addr.clone(), relay_addr.clone());
    let channel = Channel::new(1).unwrap();
    let pipeline = ChannelRelay::spawn(
        PipelineConfig::new(&cfg, channel).unwrap(),
        TcpConnector::new(dvr_addr, cfg.io_timeout()),
        TcpConnector::new(relay_addr, cfg.io_timeout()),
        StopSignal::never(),
    );

    let payload = tokio::time::timeout(Duration::from_secs(10), relay_task)
        .await
        .expect("relay received all frames")
        .unwrap();

    let expected: Vec<u8> = (0..6u8).flat_map(frame).collect();
    assert_eq!(payload, expected, "frames arrive once, in DVR order");

    let stats = pipeline.stats();
    assert_eq!(stats.dvr_reconnects, 1);
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(stats.relay_reconnects, 0);

    let _ = hold_tx.send(());
    pipeline.stop();
    pipeline.wait().await.unwrap();
    dvr_task.await.unwrap();
}
