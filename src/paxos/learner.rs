//! Learner
//!
//! Counts Accepted votes per proposal and resolves once any proposal is
//! accepted by a quorum. A learner resolves at most once; afterwards all
//! bookkeeping is dropped.

use std::collections::HashMap;

use super::{Messenger, NodeId, ProposalId, Value};

/// Vote tally for one proposal
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProposalTally {
    /// Acceptors that ever voted for this proposal
    accept_count: usize,
    /// Acceptors whose latest vote is still this proposal
    retention_count: usize,
    value: Value,
}

/// Paxos learner role
pub struct Learner<M> {
    messenger: M,
    learner_id: NodeId,
    quorum_size: usize,
    proposals: HashMap<ProposalId, ProposalTally>,
    acceptor_votes: HashMap<NodeId, ProposalId>,
    final_value: Option<Value>,
    final_proposal_id: Option<ProposalId>,
    active: bool,
}

impl<M: Messenger> Learner<M> {
    /// Create a new learner
    pub fn new(messenger: M, learner_id: impl Into<NodeId>, quorum_size: usize) -> Self {
        Self {
            messenger,
            learner_id: learner_id.into(),
            quorum_size,
            proposals: HashMap::new(),
            acceptor_votes: HashMap::new(),
            final_value: None,
            final_proposal_id: None,
            active: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.final_value.is_some()
    }

    /// Handle an Accepted vote from an acceptor
    pub fn receive_accepted(&mut self, from: &str, proposal_id: &ProposalId, value: &Value) {
        if self.is_complete() || !proposal_id.is_valid() {
            return;
        }

        // Votes only move forward
        if let Some(previous) = self.acceptor_votes.get(from) {
            if previous >= proposal_id {
                return;
            }
        }

        if let Some(previous) = self.acceptor_votes.insert(from.to_string(), proposal_id.clone()) {
            if let Some(tally) = self.proposals.get_mut(&previous) {
                tally.retention_count -= 1;
                if tally.retention_count == 0 {
                    self.proposals.remove(&previous);
                }
            }
        }

        let tally = self
            .proposals
            .entry(proposal_id.clone())
            .or_insert_with(|| ProposalTally {
                accept_count: 0,
                retention_count: 0,
                value: value.clone(),
            });
        tally.accept_count += 1;
        tally.retention_count += 1;

        tracing::trace!(
            "{}: {} accepted {} ({}/{})",
            self.learner_id,
            from,
            proposal_id,
            tally.accept_count,
            self.quorum_size
        );

        if tally.accept_count >= self.quorum_size {
            let value = tally.value.clone();
            self.proposals.clear();
            self.acceptor_votes.clear();

            tracing::info!("{}: resolved {} with value {:?}", self.learner_id, proposal_id, value);

            self.final_proposal_id = Some(proposal_id.clone());
            self.final_value = Some(value.clone());
            self.messenger.on_resolution(proposal_id, &value);
        }
    }

    pub fn final_value(&self) -> Option<&Value> {
        self.final_value.as_ref()
    }

    pub fn final_proposal_id(&self) -> Option<&ProposalId> {
        self.final_proposal_id.as_ref()
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Number of proposals still being tracked
    pub fn tracked_proposals(&self) -> usize {
        self.proposals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::messenger::recording::{RecordingMessenger, Sent};

    fn learner(quorum: usize) -> (Learner<RecordingMessenger>, RecordingMessenger) {
        let messenger = RecordingMessenger::new();
        (Learner::new(messenger.clone(), "l1", quorum), messenger)
    }

    fn pid(number: u64, owner: &str) -> ProposalId {
        ProposalId::new(number, owner)
    }

    #[test]
    fn test_quorum_boundary() {
        let (mut learner, messenger) = learner(3);
        let value = "X".to_string();

        learner.receive_accepted("a1", &pid(1, "p1"), &value);
        learner.receive_accepted("a2", &pid(1, "p1"), &value);
        assert!(!learner.is_complete());
        assert!(messenger.drain().is_empty());

        learner.receive_accepted("a3", &pid(1, "p1"), &value);
        assert!(learner.is_complete());
        assert_eq!(learner.final_value(), Some(&value));
        assert_eq!(learner.final_proposal_id(), Some(&pid(1, "p1")));
        assert_eq!(learner.tracked_proposals(), 0);

        learner.receive_accepted("a4", &pid(1, "p1"), &value);
        assert_eq!(messenger.drain(), vec![Sent::Resolution(pid(1, "p1"), value)]);
    }

    #[test]
    fn test_duplicate_votes_not_counted() {
        let (mut learner, _messenger) = learner(2);
        let value = "X".to_string();

        learner.receive_accepted("a1", &pid(1, "p1"), &value);
        learner.receive_accepted("a1", &pid(1, "p1"), &value);
        assert!(!learner.is_complete());
    }

    #[test]
    fn test_votes_only_move_forward() {
        let (mut learner, _messenger) = learner(2);

        learner.receive_accepted("a1", &pid(2, "p1"), &"new".to_string());
        learner.receive_accepted("a1", &pid(1, "p1"), &"old".to_string());
        learner.receive_accepted("a2", &pid(1, "p1"), &"old".to_string());

        assert!(!learner.is_complete());
        assert_eq!(learner.tracked_proposals(), 2);
    }

    #[test]
    fn test_switched_vote_garbage_collects() {
        let (mut learner, messenger) = learner(2);

        learner.receive_accepted("a1", &pid(1, "p1"), &"A".to_string());
        assert_eq!(learner.tracked_proposals(), 1);

        learner.receive_accepted("a1", &pid(2, "p2"), &"B".to_string());
        assert_eq!(learner.tracked_proposals(), 1);

        learner.receive_accepted("a2", &pid(2, "p2"), &"B".to_string());
        assert_eq!(learner.final_value(), Some(&"B".to_string()));
        assert_eq!(messenger.count(|s| matches!(s, Sent::Resolution(..))), 1);
    }

    #[test]
    fn test_accept_count_outlives_switched_votes() {
        let (mut learner, _messenger) = learner(3);
        let a = "A".to_string();

        learner.receive_accepted("a1", &pid(1, "p1"), &a);
        learner.receive_accepted("a2", &pid(1, "p1"), &a);
        // a1 moves on; (1, p1) keeps its accept count of 2
        learner.receive_accepted("a1", &pid(2, "p2"), &a);
        learner.receive_accepted("a3", &pid(1, "p1"), &a);

        assert!(learner.is_complete());
        assert_eq!(learner.final_proposal_id(), Some(&pid(1, "p1")));
    }

    #[test]
    fn test_invalid_id_ignored() {
        let (mut learner, _messenger) = learner(1);
        learner.receive_accepted("a1", &pid(1, ""), &"v".to_string());
        assert!(!learner.is_complete());
    }
}
