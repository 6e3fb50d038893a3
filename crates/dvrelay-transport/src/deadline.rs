//! Per-operation deadlines.
//!
//! Expiry is reported as an ordinary `io::Error` of kind `TimedOut`, so the
//! callers' reconnect paths treat it like any other I/O failure.

use std::future::Future;
use std::io;
use std::time::Duration;

pub async fn with_deadline<T, F>(timeout: Duration, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(timed_out(timeout)),
    }
}

pub fn timed_out(timeout: Duration) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("deadline of {:?} exceeded", timeout))
}
