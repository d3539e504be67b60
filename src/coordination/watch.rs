//! One-shot watch latch.
//!
//! The coordination client delivers watch notifications from its own event
//! context (the ensemble's mutation path for in-process sessions, a long-poll
//! task for HTTP sessions). `WatchLatch` turns that delivery into something a
//! caller can wait on, optionally bounded by a deadline.

use super::types::WatchEvent;

use tokio::sync::oneshot;
use tokio::time::Instant;

/// Result of waiting on a latch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The watch fired.
    Fired(WatchEvent),
    /// The deadline passed first.
    TimedOut,
    /// The trigger was dropped without firing (session or service went away),
    /// or the latch was already consumed.
    Abandoned,
}

/// Sending half, held by whoever observes the change.
#[derive(Debug)]
pub struct WatchTrigger {
    tx: oneshot::Sender<WatchEvent>,
}

impl WatchTrigger {
    /// Releases the latch. Returns `false` if nobody is waiting anymore.
    pub fn fire(self, event: WatchEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// True once the latch side has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the latch side has been dropped.
    pub async fn abandoned(&mut self) {
        self.tx.closed().await
    }
}

/// Receiving half. Fires at most once.
#[derive(Debug)]
pub struct WatchLatch {
    rx: Option<oneshot::Receiver<WatchEvent>>,
}

impl WatchLatch {
    pub fn pair() -> (WatchTrigger, WatchLatch) {
        let (tx, rx) = oneshot::channel();
        (WatchTrigger { tx }, WatchLatch { rx: Some(rx) })
    }

    /// Waits until the watch fires.
    pub async fn wait(mut self) -> WatchOutcome {
        self.wait_until(None).await
    }

    /// Waits until the watch fires or `deadline` passes. `None` waits forever.
    ///
    /// Borrows the latch so a timed-out wait can be resumed; once the watch has
    /// fired, further waits report `Abandoned`.
    pub async fn wait_until(&mut self, deadline: Option<Instant>) -> WatchOutcome {
        let Some(rx) = self.rx.as_mut() else {
            return WatchOutcome::Abandoned;
        };

        let received = match deadline {
            None => rx.await,
            Some(deadline) => match tokio::time::timeout_at(deadline, rx).await {
                Ok(received) => received,
                Err(_) => return WatchOutcome::TimedOut,
            },
        };

        self.rx = None;
        match received {
            Ok(event) => WatchOutcome::Fired(event),
            Err(_) => WatchOutcome::Abandoned,
        }
    }

    /// Non-blocking check.
    pub fn try_fired(&mut self) -> Option<WatchEvent> {
        let event = self.rx.as_mut()?.try_recv().ok()?;
        self.rx = None;
        Some(event)
    }
}
