//! Cooperative stop signal for a running acquisition.
//!
//! A `watch` channel carrying a single bool. The controller keeps the
//! [`StopHandle`], the engine polls its [`StopSignal`] at the top of each tick
//! and waits on it between ticks.

use std::time::Duration;
use tokio::sync::watch;

/// Create a fresh stop channel for one run.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx })
}

/// Sender side, held by whoever may cancel the run.
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiver side, owned by the engine.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // A closed sender keeps the value at `false` forever.
        drop(tx);
        Self { rx }
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless a stop arrives first.
    ///
    /// Returns `true` if the wait was cut short by a stop request. A dropped
    /// handle is not a stop; the full duration is slept.
    pub async fn wait_timeout(&mut self, duration: Duration) -> bool {
        if self.is_set() {
            return true;
        }
        let deadline = tokio::time::Instant::now() + duration;
        // The `wait_for` result borrows the channel and must not live across an await.
        let stopped = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            result = self.rx.wait_for(|stopped| *stopped) => result.is_ok(),
        };
        if !stopped {
            tokio::time::sleep_until(deadline).await;
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_stop() {
        let (_handle, mut signal) = stop_channel();
        let start = tokio::time::Instant::now();

        assert!(!signal.wait_timeout(Duration::from_secs(1)).await);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_wait() {
        let (handle, mut signal) = stop_channel();
        let start = tokio::time::Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            handle.stop();
        });

        assert!(signal.wait_timeout(Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(signal.is_set());
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_wait_future_is_send() {
        let (_handle, mut signal) = stop_channel();
        let wait = signal.wait_timeout(Duration::from_secs(1));
        assert_send(&wait);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_is_not_a_stop() {
        let (handle, mut signal) = stop_channel();
        drop(handle);

        assert!(!signal.wait_timeout(Duration::from_millis(500)).await);
        assert!(!signal.is_set());

        let mut never = StopSignal::never();
        assert!(!never.wait_timeout(Duration::from_millis(10)).await);
    }
}
