//! Where received frames go: a bounded intake queue and the disk writer
//! draining it.
//!
//! ```text
//! session ─deliver()─►  mpsc<Record> (capacity N)  ─►  DiskConsumer
//!                       full for offer_timeout?          <dir>/2024-05-01-13-2.h264
//!                       └─ drop the record, count it
//! ```

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use dvrelay_core::{Channel, Record};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, info, warn};

use crate::error::ConsumerClosed;

// ── Intake queue ─────────────────────────────────────────────────────────────

/// Outcome of [`ConsumerHandle::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue stayed full for the whole offer timeout.
    Dropped,
}

/// Producer side of the consumer queue, cloned into every session.
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    tx: mpsc::Sender<Record>,
    offer_timeout: Duration,
    dropped: Arc<AtomicU64>,
}

/// Creates the intake queue.
pub fn queue(capacity: usize, offer_timeout: Duration) -> (ConsumerHandle, mpsc::Receiver<Record>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = ConsumerHandle { tx, offer_timeout, dropped: Arc::new(AtomicU64::new(0)) };
    (handle, rx)
}

impl ConsumerHandle {
    /// Hands `record` to the consumer, waiting at most the offer timeout.
    pub async fn deliver(&self, record: Record) -> Result<Delivery, ConsumerClosed> {
        match self.tx.send_timeout(record, self.offer_timeout).await {
            Ok(()) => Ok(Delivery::Queued),
            Err(SendTimeoutError::Timeout(record)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Consumer queue full, dropped {} byte frame for channel {} ({} dropped so far)",
                    record.len(),
                    record.channel,
                    total
                );
                Ok(Delivery::Dropped)
            }
            Err(SendTimeoutError::Closed(_)) => Err(ConsumerClosed),
        }
    }

    /// Records dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ── Disk writer ──────────────────────────────────────────────────────────────

struct OpenFile {
    name: String,
    file: File,
}

/// Appends each channel's frames to an hourly file in `dir`.
pub struct DiskConsumer {
    dir: PathBuf,
    open: HashMap<Channel, OpenFile>,
}

impl DiskConsumer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), open: HashMap::new() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `YYYY-MM-DD-HH-<channel>.h264` for the hour containing `at`.
    pub fn file_name<Tz: TimeZone>(at: &DateTime<Tz>, channel: Channel) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        format!("{}-{}.h264", at.format("%Y-%m-%d-%H"), channel)
    }

    /// Appends `record` to the file for its channel and the hour of `at`.
    pub async fn write<Tz: TimeZone>(&mut self, record: &Record, at: &DateTime<Tz>) -> io::Result<()>
    where
        Tz::Offset: std::fmt::Display,
    {
        let name = Self::file_name(at, record.channel);
        let rotate = self.open.get(&record.channel).map_or(true, |f| f.name != name);

        if rotate {
            if let Some(mut old) = self.open.remove(&record.channel) {
                old.file.flush().await?;
                debug!("Closed {}", old.name);
            }
            fs::create_dir_all(&self.dir).await?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(&name))
                .await?;
            info!("Recording channel {} to {}", record.channel, name);
            self.open.insert(record.channel, OpenFile { name, file });
        }

        let Some(open) = self.open.get_mut(&record.channel) else {
            return Ok(());
        };
        open.file.write_all(&record.frame).await?;
        open.file.flush().await
    }

    /// Drains `rx` until every [`ConsumerHandle`] is gone.
    ///
    /// A failed write is logged and the record skipped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Record>) {
        info!("Disk consumer writing to {}", self.dir.display());
        while let Some(record) = rx.recv().await {
            if let Err(e) = self.write(&record, &Local::now()).await {
                warn!("Channel {}: failed to store {} bytes: {}", record.channel, record.len(), e);
                self.open.remove(&record.channel);
            }
        }
        for (_, mut open) in self.open.drain() {
            if let Err(e) = open.file.flush().await {
                warn!("Failed to flush {}: {}", open.name, e);
            }
        }
        info!("Disk consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn ch(n: u8) -> Channel {
        Channel::new(n).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 30, 0).unwrap()
    }

    #[test]
    fn file_names_are_hourly_per_channel() {
        assert_eq!(DiskConsumer::file_name(&at(9), ch(2)), "2024-05-01-09-2.h264");
        assert_eq!(DiskConsumer::file_name(&at(23), ch(4)), "2024-05-01-23-4.h264");
    }

    #[tokio::test]
    async fn appends_and_rotates_on_hour_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut disk = DiskConsumer::new(dir.path());

        disk.write(&Record::new(ch(1), &b"abc"[..]), &at(9)).await.unwrap();
        disk.write(&Record::new(ch(1), &b"def"[..]), &at(9)).await.unwrap();
        disk.write(&Record::new(ch(2), &b"zz"[..]), &at(9)).await.unwrap();
        disk.write(&Record::new(ch(1), &b"ghi"[..]), &at(10)).await.unwrap();

        let read = |name: &str| std::fs::read(dir.path().join(name)).unwrap();
        assert_eq!(read("2024-05-01-09-1.h264"), b"abcdef");
        assert_eq!(read("2024-05-01-09-2.h264"), b"zz");
        assert_eq!(read("2024-05-01-10-1.h264"), b"ghi");
    }

    #[tokio::test]
    async fn run_drains_until_handles_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, rx) = queue(8, Duration::from_millis(100));
        let task = tokio::spawn(DiskConsumer::new(dir.path().join("rec")).run(rx));

        handle.deliver(Record::new(ch(3), &b"one"[..])).await.unwrap();
        handle.deliver(Record::new(ch(3), &b"two"[..])).await.unwrap();
        drop(handle);
        task.await.unwrap();

        let name = DiskConsumer::file_name(&Local::now(), ch(3));
        let stored = std::fs::read(dir.path().join("rec").join(name)).unwrap();
        assert_eq!(stored, b"onetwo");
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_drops_after_offer_timeout() {
        let (handle, mut rx) = queue(1, Duration::from_millis(500));

        assert_eq!(handle.deliver(Record::new(ch(1), &b"a"[..])).await, Ok(Delivery::Queued));
        assert_eq!(handle.deliver(Record::new(ch(1), &b"b"[..])).await, Ok(Delivery::Dropped));
        assert_eq!(handle.dropped(), 1);

        assert_eq!(rx.recv().await.unwrap().frame, &b"a"[..]);
        assert_eq!(handle.deliver(Record::new(ch(1), &b"c"[..])).await, Ok(Delivery::Queued));
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (handle, rx) = queue(1, Duration::from_millis(10));
        drop(rx);
        assert_eq!(handle.deliver(Record::new(ch(1), &b"x"[..])).await, Err(ConsumerClosed));
    }
}
