//! Messenger
//!
//! The only I/O boundary of the consensus core. Every role emits its replies,
//! broadcasts and notifications through this trait; the transport decides how
//! (and to whom) they are actually delivered.

use super::{ProposalId, Value};

/// Outbound side of a Paxos node.
///
/// All methods default to no-ops so an implementation only overrides what its
/// transport cares about. Calls must hand off without blocking.
pub trait Messenger {
    /// Broadcast a Prepare to the acceptors
    fn send_prepare(&self, _proposal_id: &ProposalId) {}

    /// Reply to a Prepare with a Promise
    fn send_promise(
        &self,
        _to: &str,
        _proposal_id: &ProposalId,
        _accepted_id: Option<&ProposalId>,
        _accepted_value: Option<&Value>,
    ) {
    }

    /// Broadcast an Accept request to the acceptors
    fn send_accept(&self, _proposal_id: &ProposalId, _value: &Value) {}

    /// Announce an accepted proposal (to the proposer and the learners)
    fn send_accepted(&self, _to: &str, _proposal_id: &ProposalId, _value: &Value) {}

    /// Reject a Prepare, carrying the currently promised id
    fn send_prepare_nack(&self, _to: &str, _proposal_id: &ProposalId, _promised_id: &ProposalId) {}

    /// Reject an Accept request, carrying the currently promised id
    fn send_accept_nack(&self, _to: &str, _proposal_id: &ProposalId, _promised_id: &ProposalId) {}

    /// Broadcast a leader heartbeat
    fn send_heartbeat(&self, _leader_id: &str, _leader_proposal_id: &ProposalId) {}

    /// The learner resolved a value
    fn on_resolution(&self, _proposal_id: &ProposalId, _value: &Value) {}

    /// The local proposer won a promise quorum
    fn on_leadership_acquired(&self) {}

    /// The local proposer stopped being leader
    fn on_leadership_lost(&self) {}

    /// The known leader changed
    fn on_leadership_change(&self, _old_leader_id: Option<&str>, _new_leader_id: Option<&str>) {}
}
