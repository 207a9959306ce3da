//! Incremental stream aggregation: queueing, flush scheduling, backoff,
//! transport sends, and finalization for one consumer per session.

pub mod backoff;
pub mod queue;
pub mod scheduler;
pub mod sender;
pub mod session;

pub use session::{CloseOutcome, SessionPhase, StreamEvent, StreamHandle, StreamSession};
