//! Single-timer flush scheduling for one stream session.
//!
//! The scheduler never runs anything itself. It owns the one pending
//! deadline of its session and the session actor awaits [`FlushScheduler::wait`]
//! inside its `select!` loop. A deadline already in place is never pushed
//! back by further enqueues, which bounds latency under sustained bursts.

use std::time::Duration;

use tokio::time::Instant;

/// Owner of a session's pending flush deadline.
#[derive(Debug)]
pub struct FlushScheduler {
    debounce: Duration,
    interval: Duration,
    deadline: Option<Instant>,
}

impl FlushScheduler {
    /// Create an idle scheduler.
    #[must_use]
    pub fn new(debounce: Duration, interval: Duration) -> Self {
        Self {
            debounce,
            interval,
            deadline: None,
        }
    }

    /// React to an enqueue: start a debounce window unless a flush is already
    /// pending or the session is closing.
    ///
    /// Returns `true` if a new window was started.
    pub fn on_enqueue(&mut self, closing: bool) -> bool {
        if self.deadline.is_some() || closing {
            return false;
        }
        self.deadline = Some(Instant::now() + self.debounce);
        true
    }

    /// Schedule the follow-up flush while the queue is still non-empty.
    pub fn schedule_interval(&mut self) {
        self.schedule_in(self.interval);
    }

    /// Schedule the next flush after an explicit delay (backoff retries).
    pub fn schedule_in(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    /// Consume the pending deadline as the flush starts.
    pub fn fire(&mut self) {
        self.deadline = None;
    }

    /// Drop the pending deadline, if any.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a flush is pending.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.deadline.is_some()
    }

    /// The pending deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve when the pending deadline elapses; never resolves while idle.
    pub async fn wait(&self) {
        sleep_until_some(self.deadline).await;
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
