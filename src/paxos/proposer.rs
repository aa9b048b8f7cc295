//! Proposer
//!
//! Drives prepare/accept rounds. Winning a promise quorum makes the proposer
//! the leader for its current ballot, after which it may issue Accept
//! requests without another prepare phase.

use std::collections::HashSet;

use super::{Messenger, NodeId, ProposalId, Value};

/// Paxos proposer role
pub struct Proposer<M> {
    messenger: M,
    proposer_id: NodeId,
    quorum_size: usize,
    proposal_id: ProposalId,
    proposed_value: Option<Value>,
    /// Highest accepted id reported by any promise this round
    last_accepted_id: Option<ProposalId>,
    promises_received: HashSet<NodeId>,
    leader: bool,
    active: bool,
}

impl<M: Messenger> Proposer<M> {
    /// Create a new proposer. Its ballot starts at `(0, proposer_id)`.
    pub fn new(messenger: M, proposer_id: impl Into<NodeId>, quorum_size: usize) -> Self {
        let proposer_id = proposer_id.into();
        Self {
            messenger,
            proposal_id: ProposalId::new(0, proposer_id.clone()),
            proposer_id,
            quorum_size,
            proposed_value: None,
            last_accepted_id: None,
            promises_received: HashSet::new(),
            leader: false,
            active: true,
        }
    }

    /// Send a Prepare, optionally starting a fresh round first
    pub fn prepare(&mut self, increment_proposal_number: bool) {
        if increment_proposal_number {
            self.leader = false;
            self.promises_received.clear();
            if !self.proposal_id.increment() {
                tracing::warn!("{}: round numbers exhausted at {}", self.proposer_id, self.proposal_id);
            }
            tracing::debug!("{}: starting round {}", self.proposer_id, self.proposal_id);
        }

        if self.active {
            self.messenger.send_prepare(&self.proposal_id);
        }
    }

    /// Set the value to propose. Ignored once a value is already set.
    pub fn set_proposal(&mut self, value: Value) {
        if self.proposed_value.is_some() {
            return;
        }

        self.proposed_value = Some(value);

        if self.leader && self.active {
            if let Some(value) = self.proposed_value.as_ref() {
                self.messenger.send_accept(&self.proposal_id, value);
            }
        }
    }

    /// Handle a Promise from an acceptor
    pub fn receive_promise(
        &mut self,
        from: &str,
        proposal_id: &ProposalId,
        prev_accepted_id: Option<&ProposalId>,
        prev_accepted_value: Option<&Value>,
    ) {
        self.observe_proposal(from, proposal_id);

        // Once the round is won, late promises must not change the value
        // already sent under this ballot.
        if self.leader
            || *proposal_id != self.proposal_id
            || self.promises_received.contains(from)
        {
            return;
        }

        self.promises_received.insert(from.to_string());

        if prev_accepted_id.is_some() && prev_accepted_id > self.last_accepted_id.as_ref() {
            self.last_accepted_id = prev_accepted_id.cloned();
            // A value some acceptor already accepted must be re-proposed
            if let Some(value) = prev_accepted_value {
                self.proposed_value = Some(value.clone());
            }
        }

        if self.promises_received.len() >= self.quorum_size {
            self.leader = true;
            tracing::info!(
                "{}: promise quorum reached for {} ({}/{})",
                self.proposer_id,
                self.proposal_id,
                self.promises_received.len(),
                self.quorum_size
            );
            self.messenger.on_leadership_acquired();

            if self.active {
                if let Some(value) = self.proposed_value.as_ref() {
                    self.messenger.send_accept(&self.proposal_id, value);
                }
            }
        }
    }

    /// Track the highest round seen so the next prepare can outbid it.
    /// A leader's ballot stays fixed until it steps down, so heartbeats and
    /// resent Accepts never carry a ballot that was not prepared.
    /// The observed number is capped one below `u64::MAX` so the next
    /// prepare always has a round left to move to.
    pub fn observe_proposal(&mut self, _from: &str, proposal_id: &ProposalId) {
        if self.leader {
            return;
        }
        let number = proposal_id.number.min(u64::MAX - 1);
        if number > self.proposal_id.number {
            self.proposal_id.set_number(number);
        }
    }

    pub fn receive_prepare_nack(&mut self, from: &str, _proposal_id: &ProposalId, promised_id: &ProposalId) {
        self.observe_proposal(from, promised_id);
    }

    pub fn receive_accept_nack(&mut self, from: &str, _proposal_id: &ProposalId, promised_id: &ProposalId) {
        self.observe_proposal(from, promised_id);
    }

    /// Retry the Accept for the current ballot
    pub fn resend_accept(&self) {
        if self.leader && self.active {
            if let Some(value) = self.proposed_value.as_ref() {
                self.messenger.send_accept(&self.proposal_id, value);
            }
        }
    }

    pub fn proposer_id(&self) -> &str {
        &self.proposer_id
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    pub fn proposal_id(&self) -> &ProposalId {
        &self.proposal_id
    }

    pub fn proposed_value(&self) -> Option<&Value> {
        self.proposed_value.as_ref()
    }

    pub fn last_accepted_id(&self) -> Option<&ProposalId> {
        self.last_accepted_id.as_ref()
    }

    pub fn num_promises(&self) -> usize {
        self.promises_received.len()
    }

    pub fn is_leader(&self) -> bool {
        self.leader
    }

    pub fn set_leader(&mut self, leader: bool) {
        self.leader = leader;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}
