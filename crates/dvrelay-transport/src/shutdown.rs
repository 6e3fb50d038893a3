//! Cancellation shared by every blocking point (dial, handshake, frame I/O,
//! queue waits, backoff sleeps, accept loops).
//!
//! A [`ShutdownToken`] owns a `CancellationToken`; each task holds a
//! [`StopSignal`] and races it in `tokio::select!`:
//!
//! ```ignore
//! tokio::select! {
//!     result = some_io_op => { /* handle */ }
//!     _ = stop.stopped() => { break; }
//! }
//! ```

use tokio_util::sync::CancellationToken;

/// Owner side of a stop signal.
#[derive(Debug, Default)]
pub struct ShutdownToken {
    token: CancellationToken,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self { token: CancellationToken::new() }
    }

    /// A token that also stops when `parent` stops. Stopping the child leaves
    /// the parent untouched.
    pub fn child_of(parent: &StopSignal) -> Self {
        Self { token: parent.token.child_token() }
    }

    /// Get a new subscription to the stop signal.
    pub fn subscribe(&self) -> StopSignal {
        StopSignal { token: self.token.clone() }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Send the stop signal to all subscribers. Idempotent.
    pub fn signal_stop(&self) {
        self.token.cancel();
    }
}

/// Subscriber side of a [`ShutdownToken`].
#[derive(Debug, Clone)]
pub struct StopSignal {
    token: CancellationToken,
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { token: CancellationToken::new() }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the stop signal has been sent.
    ///
    /// If the owning token is dropped without stopping, this never resolves.
    pub async fn stopped(&mut self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn new_token_is_not_stopped() {
        let token = ShutdownToken::new();
        assert!(!token.is_stopped());
        assert!(!token.subscribe().is_stopped());
    }

    #[test]
    fn signal_stop_is_idempotent_and_visible() {
        let token = ShutdownToken::new();
        let rx1 = token.subscribe();
        token.signal_stop();
        token.signal_stop();
        assert!(token.is_stopped());
        assert!(rx1.is_stopped());
        // Subscribe after stop, should immediately see true
        assert!(token.subscribe().is_stopped());
    }

    #[tokio::test]
    async fn stopped_resolves_after_signal() {
        let token = ShutdownToken::new();
        let mut stop = token.subscribe();
        let waiter = tokio::spawn(async move { stop.stopped().await });
        token.signal_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("stop observed")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn never_signal_stays_pending() {
        let mut stop = StopSignal::never();
        let res = tokio::time::timeout(Duration::from_secs(60), stop.stopped()).await;
        assert!(res.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_token_never_fires() {
        let token = ShutdownToken::new();
        let mut stop = token.subscribe();
        drop(token);
        let res = tokio::time::timeout(Duration::from_secs(60), stop.stopped()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn child_follows_parent() {
        let parent = ShutdownToken::new();
        let child = ShutdownToken::child_of(&parent.subscribe());

        let mut child_stop = child.subscribe();
        parent.signal_stop();
        tokio::time::timeout(Duration::from_secs(1), child_stop.stopped())
            .await
            .expect("child stopped with parent");
        assert!(child.is_stopped());
    }

    #[test]
    fn child_stop_does_not_reach_parent() {
        let parent = ShutdownToken::new();
        let child = ShutdownToken::child_of(&parent.subscribe());
        child.signal_stop();
        assert!(child.is_stopped());
        assert!(!parent.is_stopped());
    }
}
