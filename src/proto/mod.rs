//! Wire message types and framing.

pub mod codec;
pub mod compress;
pub mod messages;

pub use messages::{Message, MessageKind, PushNodeState, PushPullState};
