//! Paxos Consensus Core
//!
//! Single-value Paxos with the proposer, acceptor and learner roles plus a
//! heartbeat-driven leader election layer (`PaxosNode`). The core is
//! synchronous and never performs I/O itself: every call runs to completion
//! and all output goes through a [`Messenger`].

mod proposal_id;
pub mod messenger;
mod acceptor;
mod proposer;
mod learner;
mod node;

pub use proposal_id::ProposalId;
pub use messenger::Messenger;
pub use acceptor::{Acceptor, AcceptorSnapshot};
pub use proposer::Proposer;
pub use learner::Learner;
pub use node::{ElectionConfig, ElectionState, PaxosNode};

/// Identifier of a cluster member
pub type NodeId = String;

/// A proposed / decided value
pub type Value = String;
