//! Member coordination layer: status tracking
//! above the raw SWIM health, with Lamport-gated join/leave intents.

pub mod manager;
pub mod state_machine;

pub use manager::{IntentResult, MemberManager};
pub use state_machine::{MemberRecord, MemberStatus};
