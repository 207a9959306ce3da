//! Domain models: fragments, aggregated state, and outbound frames.

pub mod fragment;
pub mod frame;
pub mod state;

pub use fragment::{Attachment, Entity, Fragment};
pub use frame::{Frame, FrameKind};
pub use state::AggregatedState;
