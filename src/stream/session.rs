//! Per-stream actor: buffering, flush cycles, and finalization.
//!
//! Each [`StreamSession`] runs as one tokio task that exclusively owns its
//! chunk queue, aggregated state, backoff counter, and flush timer. Producers
//! talk to it through a cloneable [`StreamHandle`]: [`enqueue`](StreamHandle::enqueue)
//! pushes onto an unbounded command channel and never suspends, while
//! [`close`](StreamHandle::close) waits for a reply carrying the finalization
//! outcome.
//!
//! Finalization waits for an empty queue and a captured correlation id. The
//! actor re-checks both after every command and every flush, so the waiter is
//! released by the flush that satisfies them rather than by polling. The wait
//! is bounded by `finalize_timeout`. Once the terminal frame is due the
//! command channel is closed: fragments already buffered are folded into the
//! terminal frame and later ones are rejected with `SessionClosed`.
//!
//! Observer events are best effort. A full event channel drops the event
//! rather than stalling delivery.

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::backoff::BackoffController;
use super::queue::ChunkQueue;
use super::scheduler::{sleep_until_some, FlushScheduler};
use super::sender::{SendOutcome, TransportSender};
use crate::config::StreamConfig;
use crate::models::{AggregatedState, Fragment, FrameKind};
use crate::{AppError, Result};

/// Lifecycle phase of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing buffered and no flush pending.
    Idle,
    /// Fragments buffered, a flush is scheduled.
    Buffering,
    /// A flush cycle is writing to the transport.
    Flushing,
    /// `close()` was requested; waiting to send the terminal frame.
    Closing,
    /// Terminal. No further operations are accepted.
    Closed,
}

/// Events emitted for observers of a session.
///
/// Delivered with `try_send`; a lagging observer misses events.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A progress frame was delivered.
    Chunk {
        /// Session that sent the frame.
        session_id: String,
        /// Outcome of the send.
        outcome: SendOutcome,
    },
    /// The terminal frame was delivered.
    Close {
        /// Session that finished.
        session_id: String,
        /// Outcome of the terminal send.
        outcome: SendOutcome,
    },
    /// A send failed and a retry was scheduled.
    SendFailed {
        /// Session whose send failed.
        session_id: String,
        /// Failure counter after this failure.
        consecutive_failures: u32,
        /// Delay before the retry.
        retry_in: Duration,
    },
}

/// Result of a completed `close()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    /// Terminal send outcome; `None` when nothing was ever enqueued.
    pub terminal: Option<SendOutcome>,
}

impl CloseOutcome {
    /// Whether a terminal frame went out.
    #[must_use]
    pub fn frame_sent(&self) -> bool {
        self.terminal.is_some()
    }
}

enum Command {
    Enqueue(Fragment),
    Close(oneshot::Sender<Result<CloseOutcome>>),
}

struct PendingClose {
    reply: oneshot::Sender<Result<CloseOutcome>>,
    deadline: Instant,
}

/// Builder for a per-stream session actor.
///
/// Call [`spawn`](Self::spawn) to start the background task.
pub struct StreamSession {
    session_id: String,
    config: StreamConfig,
    sender: TransportSender,
    event_tx: Option<mpsc::Sender<StreamEvent>>,
    cancel: CancellationToken,
}

impl StreamSession {
    /// Construct a new session (does not start the task yet).
    #[must_use]
    pub fn new(
        session_id: String,
        config: StreamConfig,
        sender: TransportSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            config,
            sender,
            event_tx: None,
            cancel,
        }
    }

    /// Deliver [`StreamEvent`]s to `event_tx`.
    #[must_use]
    pub fn with_events(mut self, event_tx: mpsc::Sender<StreamEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Spawn the session task and return a handle for producers.
    #[must_use]
    pub fn spawn(self) -> StreamHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Idle);
        let session_id = self.session_id.clone();
        let span = info_span!("stream_session", session_id = %session_id);

        tokio::spawn(
            SessionActor::new(self, phase_tx)
                .run(cmd_rx)
                .instrument(span),
        );

        StreamHandle {
            session_id,
            cmd_tx,
            phase_rx,
        }
    }
}

/// Producer-side handle to a running session.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    session_id: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    phase_rx: watch::Receiver<SessionPhase>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enqueue(_) => f.write_str("Enqueue"),
            Self::Close(_) => f.write_str("Close"),
        }
    }
}

impl StreamHandle {
    /// Append a fragment to the session's queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionClosed` once the session has closed.
    pub fn enqueue(&self, fragment: Fragment) -> Result<()> {
        self.ensure_open()?;
        self.cmd_tx
            .send(Command::Enqueue(fragment))
            .map_err(|_| self.closed_error())
    }

    /// Finalize the stream and wait for the terminal frame.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionClosed` if the session already closed, a close is
    ///   already in progress, or the session was cancelled.
    /// - `AppError::FinalizationTimeout` if the queue did not drain or no
    ///   send succeeded within the configured bound.
    pub async fn close(&self) -> Result<CloseOutcome> {
        self.ensure_open()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close(reply_tx))
            .map_err(|_| self.closed_error())?;
        reply_rx.await.map_err(|_| self.closed_error())?
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase_rx.borrow()
    }

    /// Wait until the session reaches [`SessionPhase::Closed`].
    pub async fn closed(&self) {
        let mut phase_rx = self.phase_rx.clone();
        let _ = phase_rx
            .wait_for(|phase| *phase == SessionPhase::Closed)
            .await;
    }

    /// The session this handle controls.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.phase() == SessionPhase::Closed {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    fn closed_error(&self) -> AppError {
        AppError::SessionClosed(format!("stream session {} is closed", self.session_id))
    }
}

/// State owned by the running task.
struct SessionActor {
    session_id: String,
    config: StreamConfig,
    sender: TransportSender,
    event_tx: Option<mpsc::Sender<StreamEvent>>,
    cancel: CancellationToken,
    phase_tx: watch::Sender<SessionPhase>,
    queue: ChunkQueue,
    state: AggregatedState,
    backoff: BackoffController,
    scheduler: FlushScheduler,
    pending_close: Option<PendingClose>,
}

impl SessionActor {
    fn new(session: StreamSession, phase_tx: watch::Sender<SessionPhase>) -> Self {
        let StreamSession {
            session_id,
            config,
            sender,
            event_tx,
            cancel,
        } = session;
        Self {
            backoff: BackoffController::new(config.failure_penalty, config.backoff_unit()),
            scheduler: FlushScheduler::new(config.debounce(), config.interval()),
            session_id,
            config,
            sender,
            event_tx,
            cancel,
            phase_tx,
            queue: ChunkQueue::new(),
            state: AggregatedState::default(),
            pending_close: None,
        }
    }

    fn closing(&self) -> bool {
        self.pending_close.is_some()
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase_tx.send_replace(phase);
    }

    /// Phase to report between flush cycles.
    fn resting_phase(&self) -> SessionPhase {
        if self.closing() {
            SessionPhase::Closing
        } else if self.scheduler.is_scheduled() {
            SessionPhase::Buffering
        } else {
            SessionPhase::Idle
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        debug!("stream session started");

        loop {
            let close_deadline = self.pending_close.as_ref().map(|close| close.deadline);

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    info!("stream session cancelled");
                    self.abandon(self.cancelled_error()).await;
                    break;
                }

                () = sleep_until_some(close_deadline) => {
                    warn!(
                        queued = self.queue.len(),
                        correlated = self.state.is_correlated(),
                        "finalization timed out"
                    );
                    self.abandon(self.timeout_error()).await;
                    break;
                }

                cmd = cmd_rx.recv() => match cmd {
                    None => {
                        debug!("all stream handles dropped");
                        self.abandon(AppError::SessionClosed(format!(
                            "stream session {} was dropped",
                            self.session_id
                        )))
                        .await;
                        break;
                    }
                    Some(Command::Enqueue(fragment)) => self.on_enqueue(fragment),
                    Some(Command::Close(reply)) => {
                        if self.on_close(reply).await {
                            break;
                        }
                    }
                },

                () = self.scheduler.wait() => self.flush().await,
            }

            if self.ready_to_finalize() {
                self.finalize(&mut cmd_rx).await;
                break;
            }
        }

        self.set_phase(SessionPhase::Closed);
        reject_remaining(&mut cmd_rx, &self.session_id);
        debug!("stream session stopped");
    }

    fn on_enqueue(&mut self, fragment: Fragment) {
        self.queue.push(fragment);
        if self.scheduler.on_enqueue(self.closing()) {
            debug!(queued = self.queue.len(), "debounce window started");
            self.set_phase(SessionPhase::Buffering);
        }
    }

    /// Handle a close request. Returns `true` when the session is finished.
    async fn on_close(&mut self, reply: oneshot::Sender<Result<CloseOutcome>>) -> bool {
        if self.closing() {
            let _ = reply.send(Err(AppError::SessionClosed(format!(
                "close already in progress for stream session {}",
                self.session_id
            ))));
            return false;
        }

        if !self.queue.has_started() {
            info!("close requested before any fragment; nothing to finalize");
            self.scheduler.cancel();
            self.end_transport().await;
            self.set_phase(SessionPhase::Closed);
            let _ = reply.send(Ok(CloseOutcome { terminal: None }));
            return true;
        }

        info!(queued = self.queue.len(), "close requested");
        self.pending_close = Some(PendingClose {
            reply,
            deadline: Instant::now() + self.config.finalize_timeout(),
        });
        self.set_phase(SessionPhase::Closing);
        false
    }

    fn ready_to_finalize(&self) -> bool {
        self.closing()
            && self.queue.is_empty()
            && self.state.is_correlated()
            && !self.scheduler.is_scheduled()
    }

    /// One flush cycle: drain a batch, send the snapshot once, reschedule.
    async fn flush(&mut self) {
        self.scheduler.fire();
        if !self.closing() {
            self.set_phase(SessionPhase::Flushing);
        }

        let batch = self.queue.batch_size(self.config.batch_divisor);
        let drained = self.queue.drain_into(batch, &mut self.state);

        match self.sender.send(&mut self.state, FrameKind::Progress).await {
            Ok(outcome) => {
                self.backoff.on_success();
                debug!(
                    drained,
                    remaining = self.queue.len(),
                    sequence = outcome.sequence,
                    "progress frame sent"
                );
                if !self.queue.is_empty() {
                    self.scheduler.schedule_interval();
                }
                self.emit(StreamEvent::Chunk {
                    session_id: self.session_id.clone(),
                    outcome,
                });
            }
            Err(err) => {
                let delay = self.backoff.on_failure();
                warn!(
                    %err,
                    drained,
                    consecutive_failures = self.backoff.consecutive_failures(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "progress send failed; retrying"
                );
                self.scheduler.schedule_in(delay);
                self.emit(StreamEvent::SendFailed {
                    session_id: self.session_id.clone(),
                    consecutive_failures: self.backoff.consecutive_failures(),
                    retry_in: delay,
                });
            }
        }

        self.set_phase(self.resting_phase());
    }

    /// Send the terminal frame, retrying with backoff until the close deadline.
    ///
    /// Closes the command channel first so no fragment can be accepted
    /// after the terminal snapshot is taken.
    async fn finalize(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<Command>) {
        let Some(PendingClose { reply, deadline }) = self.pending_close.take() else {
            return;
        };
        self.scheduler.cancel();
        cmd_rx.close();
        self.absorb_buffered(cmd_rx);

        let result = loop {
            let attempt = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    info!("stream session cancelled during finalization");
                    break Err(self.cancelled_error());
                }
                attempt = tokio::time::timeout_at(
                    deadline,
                    self.sender.send(&mut self.state, FrameKind::Final),
                ) => attempt,
            };

            match attempt {
                Ok(Ok(outcome)) => {
                    self.backoff.on_success();
                    info!(
                        sequence = outcome.sequence,
                        text_len = outcome.text_len,
                        "terminal frame sent"
                    );
                    self.emit(StreamEvent::Close {
                        session_id: self.session_id.clone(),
                        outcome: outcome.clone(),
                    });
                    break Ok(CloseOutcome {
                        terminal: Some(outcome),
                    });
                }
                Ok(Err(err)) => {
                    let delay = self.backoff.on_failure();
                    if Instant::now() + delay >= deadline {
                        warn!(%err, "terminal send failed with no time left before deadline");
                        break Err(self.timeout_error());
                    }
                    warn!(
                        %err,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "terminal send failed; retrying"
                    );
                    self.emit(StreamEvent::SendFailed {
                        session_id: self.session_id.clone(),
                        consecutive_failures: self.backoff.consecutive_failures(),
                        retry_in: delay,
                    });
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {
                            info!("stream session cancelled during finalization");
                            break Err(self.cancelled_error());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(_) => break Err(self.timeout_error()),
            }
        };

        self.state.reset();
        self.end_transport().await;
        self.set_phase(SessionPhase::Closed);
        let _ = reply.send(result);
    }

    /// Fold commands that were buffered before the channel closed into the
    /// terminal snapshot.
    fn absorb_buffered(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<Command>) {
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                Command::Enqueue(fragment) => self.queue.push(fragment),
                Command::Close(reply) => {
                    let _ = reply.send(Err(AppError::SessionClosed(format!(
                        "close already in progress for stream session {}",
                        self.session_id
                    ))));
                }
            }
        }
        let late = self.queue.len();
        if late > 0 {
            self.queue.drain_into(late, &mut self.state);
            debug!(late, "buffered fragments folded into terminal frame");
        }
    }

    /// Tear down without a terminal frame, failing any pending close.
    async fn abandon(&mut self, reason: AppError) {
        self.scheduler.cancel();
        self.queue.clear();
        self.state.reset();
        self.end_transport().await;
        self.set_phase(SessionPhase::Closed);
        if let Some(close) = self.pending_close.take() {
            let _ = close.reply.send(Err(reason));
        }
    }

    async fn end_transport(&self) {
        if let Err(err) = self.sender.end().await {
            warn!(%err, "failed to end transport stream");
        }
    }

    fn emit(&self, event: StreamEvent) {
        let Some(tx) = &self.event_tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => warn!("observer channel full; stream event dropped"),
        }
    }

    fn cancelled_error(&self) -> AppError {
        AppError::SessionClosed(format!("stream session {} was cancelled", self.session_id))
    }

    fn timeout_error(&self) -> AppError {
        AppError::FinalizationTimeout(format!(
            "stream session {} did not settle within {}s ({} fragment(s) queued, correlation id {})",
            self.session_id,
            self.config.finalize_timeout_seconds,
            self.queue.len(),
            if self.state.is_correlated() {
                "captured"
            } else {
                "missing"
            },
        ))
    }
}

/// Reject commands that raced with shutdown.
fn reject_remaining(cmd_rx: &mut mpsc::UnboundedReceiver<Command>, session_id: &str) {
    cmd_rx.close();
    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            Command::Enqueue(_) => {
                warn!(session_id, "fragment enqueued after close was dropped");
            }
            Command::Close(reply) => {
                let _ = reply.send(Err(AppError::SessionClosed(format!(
                    "stream session {session_id} is closed"
                ))));
            }
        }
    }
}
