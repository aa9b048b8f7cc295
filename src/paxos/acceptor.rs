//! Acceptor
//!
//! Promise/accept state machine. Replies that commit the acceptor to a new
//! promise or accepted value are deferred until the durable store confirms
//! the state is on disk (`persisted`).

use std::cmp::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{Messenger, NodeId, ProposalId, Value};

/// The part of acceptor state that must survive a restart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptorSnapshot {
    pub promised_id: Option<ProposalId>,
    pub accepted_id: Option<ProposalId>,
    pub accepted_value: Option<Value>,
}

/// Paxos acceptor role
pub struct Acceptor<M> {
    messenger: M,
    acceptor_id: NodeId,
    promised_id: Option<ProposalId>,
    accepted_id: Option<ProposalId>,
    accepted_value: Option<Value>,
    /// Peer waiting for a Promise that is not durable yet
    pending_promise: Option<NodeId>,
    /// Peer waiting for an Accepted that is not durable yet
    pending_accept: Option<NodeId>,
    last_prepare: Instant,
    liveness_window: Duration,
    active: bool,
}

impl<M: Messenger> Acceptor<M> {
    /// Create a new acceptor
    pub fn new(messenger: M, acceptor_id: impl Into<NodeId>, liveness_window: Duration) -> Self {
        Self {
            messenger,
            acceptor_id: acceptor_id.into(),
            promised_id: None,
            accepted_id: None,
            accepted_value: None,
            pending_promise: None,
            pending_accept: None,
            last_prepare: Instant::now(),
            liveness_window,
            active: true,
        }
    }

    /// Handle a Prepare request
    pub fn receive_prepare(&mut self, from: &str, proposal_id: &ProposalId) {
        if !proposal_id.is_valid() {
            tracing::trace!("{}: dropping prepare with invalid id from {}", self.acceptor_id, from);
            return;
        }

        // Any prepare traffic means some proposer is working on a round
        self.last_prepare = Instant::now();

        let ordering = self.promised_id.as_ref().map(|p| proposal_id.cmp(p));
        match ordering {
            Some(Ordering::Equal) => {
                // Duplicate. A pending promise will be sent by persisted().
                if self.active && self.pending_promise.is_none() {
                    self.messenger.send_promise(
                        from,
                        proposal_id,
                        self.accepted_id.as_ref(),
                        self.accepted_value.as_ref(),
                    );
                }
            }
            Some(Ordering::Less) => {
                if let (true, Some(promised)) = (self.active, self.promised_id.as_ref()) {
                    tracing::debug!(
                        "{}: rejecting prepare {} from {}, promised {}",
                        self.acceptor_id,
                        proposal_id,
                        from,
                        promised
                    );
                    self.messenger.send_prepare_nack(from, proposal_id, promised);
                }
            }
            None | Some(Ordering::Greater) => {
                if self.pending_promise.is_none() {
                    tracing::trace!("{}: promising {} to {}", self.acceptor_id, proposal_id, from);
                    self.promised_id = Some(proposal_id.clone());
                    if self.active {
                        self.pending_promise = Some(from.to_string());
                    }
                }
            }
        }
    }

    /// Handle an Accept request
    pub fn receive_accept_request(&mut self, from: &str, proposal_id: &ProposalId, value: &Value) {
        if !proposal_id.is_valid() {
            tracing::trace!("{}: dropping accept with invalid id from {}", self.acceptor_id, from);
            return;
        }

        if self.accepted_id.as_ref() == Some(proposal_id) && self.accepted_value.as_ref() == Some(value) {
            if self.active && self.pending_accept.is_none() {
                self.messenger.send_accepted(from, proposal_id, value);
            }
            return;
        }

        let ordering = self.promised_id.as_ref().map(|p| proposal_id.cmp(p));
        match ordering {
            Some(Ordering::Less) => {
                if let (true, Some(promised)) = (self.active, self.promised_id.as_ref()) {
                    tracing::debug!(
                        "{}: rejecting accept {} from {}, promised {}",
                        self.acceptor_id,
                        proposal_id,
                        from,
                        promised
                    );
                    self.messenger.send_accept_nack(from, proposal_id, promised);
                }
            }
            _ => {
                if self.pending_accept.is_none() {
                    tracing::trace!("{}: accepting {} from {}", self.acceptor_id, proposal_id, from);
                    self.promised_id = Some(proposal_id.clone());
                    self.accepted_id = Some(proposal_id.clone());
                    self.accepted_value = Some(value.clone());
                    if self.active {
                        self.pending_accept = Some(from.to_string());
                    }
                }
            }
        }
    }

    /// True once no prepare has been seen for longer than the liveness window
    pub fn is_prepare_expire(&self) -> bool {
        self.last_prepare.elapsed() > self.liveness_window
    }

    /// True while a deferred reply is waiting on durable storage
    pub fn persistence_required(&self) -> bool {
        self.pending_promise.is_some() || self.pending_accept.is_some()
    }

    /// Durable state to hand to the store
    pub fn snapshot(&self) -> AcceptorSnapshot {
        AcceptorSnapshot {
            promised_id: self.promised_id.clone(),
            accepted_id: self.accepted_id.clone(),
            accepted_value: self.accepted_value.clone(),
        }
    }

    /// Restore durable state after a restart, before handling any traffic
    pub fn recover(
        &mut self,
        promised_id: Option<ProposalId>,
        accepted_id: Option<ProposalId>,
        accepted_value: Option<Value>,
    ) {
        self.promised_id = promised_id;
        self.accepted_id = accepted_id;
        self.accepted_value = accepted_value;
    }

    /// The store has made the current state durable; release deferred replies
    pub fn persisted(&mut self) {
        let pending_promise = self.pending_promise.take();
        let pending_accept = self.pending_accept.take();

        if !self.active {
            return;
        }

        if let (Some(to), Some(promised)) = (pending_promise, self.promised_id.as_ref()) {
            self.messenger.send_promise(
                &to,
                promised,
                self.accepted_id.as_ref(),
                self.accepted_value.as_ref(),
            );
        }

        if let (Some(to), Some(accepted), Some(value)) = (
            pending_accept,
            self.accepted_id.as_ref(),
            self.accepted_value.as_ref(),
        ) {
            self.messenger.send_accepted(&to, accepted, value);
        }
    }

    pub fn promised_id(&self) -> Option<&ProposalId> {
        self.promised_id.as_ref()
    }

    pub fn accepted_id(&self) -> Option<&ProposalId> {
        self.accepted_id.as_ref()
    }

    pub fn accepted_value(&self) -> Option<&Value> {
        self.accepted_value.as_ref()
    }

    pub fn pending_promise(&self) -> Option<&str> {
        self.pending_promise.as_deref()
    }

    pub fn pending_accept(&self) -> Option<&str> {
        self.pending_accept.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Inactive acceptors keep updating state but send nothing
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}
