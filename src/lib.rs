//! meshkeeper: decentralized cluster membership, failure detection, and
//! event dissemination. A SWIM-style gossip agent — see `coordinator` for
//! the top-level façade embedding applications drive.

pub mod broadcast;
pub mod clock;
pub mod common;
pub mod compat;
pub mod config;
pub mod coordinator;
pub mod delegate;
pub mod error;
pub mod event;
pub mod keymanager;
pub mod member;
pub mod proto;
pub mod query;
pub mod security;
pub mod snapshot;
pub mod state;
pub mod swim;
pub mod transport;

pub use error::{AgentError, Result};

pub use common::{Node, NodeId, ProtocolVersion};
pub use config::Config;
pub use coordinator::{ClusterCoordinator, Phase};
pub use delegate::{AliveDelegate, ConflictDelegate, Delegates, EventDelegate, MergeDelegate, NodeDelegate, PingDelegate, QueryDelegate};

/// Crate version, for startup banners and query responses.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
