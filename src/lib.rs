//! WolfPaxos - Single-Value Paxos with Leader Election
//!
//! Agrees on one value across a cluster of nodes, each of which acts as
//! proposer, acceptor and learner at the same time. A heartbeat-driven
//! leader election keeps a single node driving proposals so competing
//! proposers do not livelock.
//!
//! # Architecture
//!
//! The consensus core (`paxos`) is a synchronous state machine that never
//! performs I/O. A `Replica` owns one node and drives it from a tokio task:
//! it feeds in messages from the TCP transport (`network`), ticks the leader
//! pulse and liveness poll, and makes acceptor state durable (`state`)
//! before any promise or accepted vote leaves the node.
//!
//! # Features
//!
//! - Number-first, owner-tiebroken proposal ordering
//! - Deferred acceptor replies released only after a durable write
//! - Leader heartbeats with randomized election back-off
//! - Length-prefixed, checksummed wire frames
//! - SQLite-backed acceptor state and resolved value

pub mod config;
pub mod error;
pub mod paxos;
pub mod network;
pub mod state;
pub mod replica;

pub use config::WolfPaxosConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfPaxosConfig;
    pub use crate::error::{Error, Result};
    pub use crate::network::Message;
    pub use crate::paxos::{Messenger, PaxosNode, ProposalId};
    pub use crate::replica::Replica;
    pub use crate::state::AcceptorStore;
}
