//! Paxos Node
//!
//! Composes an acceptor, a proposer and a learner for one cluster member and
//! layers heartbeat-based leader election on top. The elected leader keeps
//! its ballot alive with periodic heartbeats; followers only try to take over
//! once both the leader's heartbeats and other proposers' prepares have gone
//! quiet, which keeps competing proposers from livelocking each other.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use super::{Acceptor, AcceptorSnapshot, Learner, Messenger, NodeId, ProposalId, Proposer, Value};

/// Election state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Following whichever leader heartbeats reach us
    Follower,
    /// Preparing rounds to take over from a silent leader
    AcquiringLeadership,
    /// Holds a promise quorum for the current ballot
    Leader,
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionState::Follower => write!(f, "FOLLOWER"),
            ElectionState::AcquiringLeadership => write!(f, "ACQUIRING"),
            ElectionState::Leader => write!(f, "LEADER"),
        }
    }
}

/// Timing policy for leader election
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// How often the leader pulses
    pub heartbeat_period: Duration,
    /// Silence after which the leader is presumed dead
    pub heartbeat_timeout: Duration,
    /// Quiet period after the last prepare before a new election may start
    pub liveness_window: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_millis(500),
            heartbeat_timeout: Duration::from_millis(1500),
            liveness_window: Duration::from_millis(2000),
        }
    }
}

/// One cluster member acting as proposer, acceptor and learner
pub struct PaxosNode<M> {
    messenger: M,
    node_id: NodeId,
    proposer: Proposer<M>,
    acceptor: Acceptor<M>,
    learner: Learner<M>,
    leader_id: Option<NodeId>,
    leader_proposal_id: Option<ProposalId>,
    last_heartbeat: Instant,
    config: ElectionConfig,
    acquiring_leadership: bool,
    /// Acceptors that rejected an Accept for the current ballot
    accept_nacks: HashSet<NodeId>,
}

impl<M: Messenger + Clone> PaxosNode<M> {
    /// Create a new node. A node configured as the initial leader starts
    /// out leading without a prepare phase.
    pub fn new(
        messenger: M,
        node_id: impl Into<NodeId>,
        quorum_size: usize,
        config: ElectionConfig,
        leader_id: Option<NodeId>,
    ) -> Self {
        let node_id = node_id.into();
        let mut proposer = Proposer::new(messenger.clone(), node_id.clone(), quorum_size);
        if leader_id.as_deref() == Some(node_id.as_str()) {
            proposer.set_leader(true);
        }

        Self {
            acceptor: Acceptor::new(messenger.clone(), node_id.clone(), config.liveness_window),
            learner: Learner::new(messenger.clone(), node_id.clone(), quorum_size),
            proposer,
            messenger,
            node_id,
            leader_id,
            leader_proposal_id: None,
            last_heartbeat: Instant::now(),
            config,
            acquiring_leadership: false,
            accept_nacks: HashSet::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn state(&self) -> ElectionState {
        if self.proposer.is_leader() {
            ElectionState::Leader
        } else if self.acquiring_leadership {
            ElectionState::AcquiringLeadership
        } else {
            ElectionState::Follower
        }
    }

    pub fn is_leader(&self) -> bool {
        self.proposer.is_leader()
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    pub fn leader_proposal_id(&self) -> Option<&ProposalId> {
        self.leader_proposal_id.as_ref()
    }

    pub fn is_acquiring_leadership(&self) -> bool {
        self.acquiring_leadership
    }

    pub fn heartbeat_period(&self) -> Duration {
        self.config.heartbeat_period
    }

    pub fn is_active(&self) -> bool {
        self.proposer.is_active() && self.acceptor.is_active() && self.learner.is_active()
    }

    pub fn set_active(&mut self, active: bool) {
        self.proposer.set_active(active);
        self.acceptor.set_active(active);
        self.learner.set_active(active);
    }

    pub fn proposer(&self) -> &Proposer<M> {
        &self.proposer
    }

    pub fn acceptor(&self) -> &Acceptor<M> {
        &self.acceptor
    }

    pub fn learner(&self) -> &Learner<M> {
        &self.learner
    }

    pub fn is_complete(&self) -> bool {
        self.learner.is_complete()
    }

    pub fn final_value(&self) -> Option<&Value> {
        self.learner.final_value()
    }

    pub fn prepare(&mut self, increment_proposal_number: bool) {
        if increment_proposal_number {
            self.accept_nacks.clear();
        }
        self.proposer.prepare(increment_proposal_number);
    }

    pub fn set_proposal(&mut self, value: Value) {
        self.proposer.set_proposal(value);
    }

    pub fn resend_accept(&self) {
        self.proposer.resend_accept();
    }

    pub fn is_leader_alive(&self) -> bool {
        self.last_heartbeat.elapsed() <= self.config.heartbeat_timeout
    }

    pub fn is_prepare_expire(&self) -> bool {
        self.acceptor.is_prepare_expire()
    }

    /// Externally ticked: start or retry an election once the leader is silent
    pub fn poll_liveness(&mut self) {
        if self.is_leader_alive() || !self.is_prepare_expire() {
            return;
        }

        if self.acquiring_leadership {
            tracing::debug!("{}: election round timed out, preparing again", self.node_id);
            self.prepare(true);
        } else {
            self.acquire_leadership();
        }
    }

    pub fn acquire_leadership(&mut self) {
        if self.is_leader_alive() {
            self.acquiring_leadership = false;
        } else {
            tracing::info!(
                "{}: leader {:?} looks dead, acquiring leadership",
                self.node_id,
                self.leader_id
            );
            self.acquiring_leadership = true;
            self.prepare(true);
        }
    }

    /// Handle a leader heartbeat. Only a heartbeat carrying exactly the
    /// known leader ballot counts as proof of life.
    ///
    /// Any newer ballot replaces the known leader ballot, but
    /// `on_leadership_change` fires only when the leader id differs. A
    /// leader re-elected under a higher ballot is not reported again.
    pub fn receive_heartbeat(&mut self, from: &str, proposal_id: &ProposalId) {
        if !proposal_id.is_valid() {
            return;
        }

        let newer = self
            .leader_proposal_id
            .as_ref()
            .map_or(true, |current| proposal_id > current);

        if newer {
            self.acquiring_leadership = false;
            let old_leader_id = self.leader_id.replace(from.to_string());
            self.leader_proposal_id = Some(proposal_id.clone());

            if self.proposer.is_leader() && from != self.node_id {
                tracing::info!(
                    "{}: stepping down, {} leads with {}",
                    self.node_id,
                    from,
                    proposal_id
                );
                self.proposer.set_leader(false);
                self.messenger.on_leadership_lost();
                self.proposer.observe_proposal(from, proposal_id);
            }

            if old_leader_id.as_deref() != Some(from) {
                tracing::info!("{}: leader changed {:?} -> {}", self.node_id, old_leader_id, from);
                self.messenger.on_leadership_change(old_leader_id.as_deref(), Some(from));
            }
        }

        if self.leader_proposal_id.as_ref() == Some(proposal_id) {
            self.last_heartbeat = Instant::now();
        }
    }

    /// Externally ticked: while leading, heartbeat to self and the cluster
    pub fn pulse(&mut self) {
        if !self.proposer.is_leader() {
            return;
        }

        let node_id = self.node_id.clone();
        let proposal_id = self.proposer.proposal_id().clone();
        self.receive_heartbeat(&node_id, &proposal_id);
        self.messenger.send_heartbeat(&node_id, &proposal_id);
    }

    pub fn receive_prepare(&mut self, from: &str, proposal_id: &ProposalId) {
        self.acceptor.receive_prepare(from, proposal_id);
    }

    pub fn receive_accept_request(&mut self, from: &str, proposal_id: &ProposalId, value: &Value) {
        self.acceptor.receive_accept_request(from, proposal_id, value);
    }

    pub fn receive_promise(
        &mut self,
        from: &str,
        proposal_id: &ProposalId,
        prev_accepted_id: Option<&ProposalId>,
        prev_accepted_value: Option<&Value>,
    ) {
        let was_leader = self.proposer.is_leader();
        self.proposer
            .receive_promise(from, proposal_id, prev_accepted_id, prev_accepted_value);

        if was_leader || !self.proposer.is_leader() {
            return;
        }

        self.acquiring_leadership = false;

        if self.leader_id.is_none() {
            self.leader_id = Some(self.node_id.clone());
            self.leader_proposal_id = Some(self.proposer.proposal_id().clone());
            self.pulse();
            self.messenger.on_leadership_change(None, Some(self.node_id.as_str()));
        } else {
            // Our ballot outranks the old leader's, so the self-heartbeat
            // takes over the leader fields and reports the change.
            self.pulse();
        }
    }

    pub fn receive_accepted(&mut self, from: &str, proposal_id: &ProposalId, value: &Value) {
        self.learner.receive_accepted(from, proposal_id, value);
    }

    pub fn receive_prepare_nack(&mut self, from: &str, proposal_id: &ProposalId, promised_id: &ProposalId) {
        self.proposer.receive_prepare_nack(from, proposal_id, promised_id);
    }

    pub fn receive_accept_nack(&mut self, from: &str, proposal_id: &ProposalId, promised_id: &ProposalId) {
        let current = self.proposer.proposal_id().clone();
        self.proposer.receive_accept_nack(from, proposal_id, promised_id);

        if *proposal_id == current {
            self.accept_nacks.insert(from.to_string());
        }

        if self.proposer.is_leader() && self.accept_nacks.len() >= self.proposer.quorum_size() {
            tracing::info!(
                "{}: accept rejected by a quorum, giving up leadership of {}",
                self.node_id,
                current
            );
            self.proposer.set_leader(false);
            self.leader_id = None;
            self.leader_proposal_id = None;
            self.messenger.on_leadership_lost();
            self.messenger.on_leadership_change(Some(self.node_id.as_str()), None);
            self.proposer.observe_proposal(from, promised_id);
        }
    }

    pub fn persistence_required(&self) -> bool {
        self.acceptor.persistence_required()
    }

    pub fn snapshot(&self) -> AcceptorSnapshot {
        self.acceptor.snapshot()
    }

    /// Restore durable acceptor state after a restart.
    ///
    /// The local acceptor has seen every ballot this node ever broadcast, so
    /// the proposer resumes at or above its promise and never reuses a number.
    /// A configured leader with prior state has to win a real election.
    pub fn recover(&mut self, snapshot: AcceptorSnapshot) {
        if let Some(promised) = &snapshot.promised_id {
            if self.proposer.is_leader() {
                self.proposer.set_leader(false);
            }
            let node_id = self.node_id.clone();
            self.proposer.observe_proposal(&node_id, promised);
        }

        self.acceptor
            .recover(snapshot.promised_id, snapshot.accepted_id, snapshot.accepted_value);
    }

    pub fn persisted(&mut self) {
        self.acceptor.persisted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::messenger::recording::{RecordingMessenger, Sent};

    fn node(id: &str, quorum: usize, leader: Option<&str>) -> (PaxosNode<RecordingMessenger>, RecordingMessenger) {
        let messenger = RecordingMessenger::new();
        let node = PaxosNode::new(
            messenger.clone(),
            id,
            quorum,
            ElectionConfig::default(),
            leader.map(str::to_string),
        );
        (node, messenger)
    }

    fn pid(number: u64, owner: &str) -> ProposalId {
        ProposalId::new(number, owner)
    }

    /// Drive `node` through a won election for round 1
    fn win_round(node: &mut PaxosNode<RecordingMessenger>, acceptors: &[&str]) {
        node.prepare(true);
        let round = node.proposer().proposal_id().clone();
        for a in acceptors {
            node.receive_promise(a, &round, None, None);
        }
    }

    #[test]
    fn test_initial_state() {
        let (follower, _) = node("a", 2, None);
        assert_eq!(follower.state(), ElectionState::Follower);
        assert!(follower.is_leader_alive());
        assert!(follower.is_active());

        let (leader, _) = node("a", 2, Some("a"));
        assert_eq!(leader.state(), ElectionState::Leader);
        assert_eq!(leader.leader_id(), Some("a"));

        let (other, _) = node("b", 2, Some("a"));
        assert_eq!(other.state(), ElectionState::Follower);
    }

    #[test]
    fn test_promise_quorum_elects_and_pulses() {
        let (mut a, messenger) = node("a", 2, None);
        win_round(&mut a, &["a", "b"]);

        assert_eq!(a.state(), ElectionState::Leader);
        assert_eq!(a.leader_id(), Some("a"));
        assert_eq!(a.leader_proposal_id(), Some(&pid(1, "a")));
        assert_eq!(
            messenger.drain(),
            vec![
                Sent::Prepare(pid(1, "a")),
                Sent::LeadershipAcquired,
                Sent::Heartbeat("a".into(), pid(1, "a")),
                Sent::LeadershipChange(None, Some("a".into())),
            ]
        );

        // A third promise is not a new transition
        a.receive_promise("c", &pid(1, "a"), None, None);
        assert!(messenger.drain().is_empty());
    }

    #[test]
    fn test_leader_handoff_on_higher_heartbeat() {
        let (mut a, messenger) = node("a", 2, None);
        win_round(&mut a, &["a", "b"]);
        messenger.drain();

        a.receive_heartbeat("b", &pid(4, "b"));

        assert!(!a.is_leader());
        assert_eq!(a.state(), ElectionState::Follower);
        assert_eq!(a.leader_id(), Some("b"));
        assert_eq!(
            messenger.drain(),
            vec![
                Sent::LeadershipLost,
                Sent::LeadershipChange(Some("a".into()), Some("b".into())),
            ]
        );
        // Next round outbids the new leader
        assert_eq!(a.proposer().proposal_id().number, 4);
    }

    #[test]
    fn test_stale_and_duplicate_heartbeats() {
        let (mut a, messenger) = node("a", 2, None);

        a.receive_heartbeat("b", &pid(3, "b"));
        assert_eq!(a.leader_id(), Some("b"));
        assert_eq!(messenger.drain().len(), 1);

        a.receive_heartbeat("b", &pid(3, "b"));
        a.receive_heartbeat("c", &pid(2, "c"));
        assert_eq!(a.leader_id(), Some("b"));
        assert_eq!(a.leader_proposal_id(), Some(&pid(3, "b")));
        assert!(messenger.drain().is_empty());

        // Same leader with a newer ballot is not a leadership change
        a.receive_heartbeat("b", &pid(5, "b"));
        assert_eq!(a.leader_proposal_id(), Some(&pid(5, "b")));
        assert!(messenger.drain().is_empty());
    }

    #[test]
    fn test_pulse_only_while_leader() {
        let (mut a, messenger) = node("a", 2, None);
        a.pulse();
        assert!(messenger.drain().is_empty());

        let (mut b, messenger) = node("b", 2, Some("b"));
        b.pulse();
        assert_eq!(b.leader_proposal_id(), Some(&pid(0, "b")));
        assert_eq!(messenger.drain(), vec![Sent::Heartbeat("b".into(), pid(0, "b"))]);
    }

    #[test]
    fn test_accept_nack_quorum_forces_step_down() {
        let (mut a, messenger) = node("a", 2, None);
        a.set_proposal("X".into());
        win_round(&mut a, &["a", "b"]);
        messenger.drain();

        let round = pid(1, "a");
        a.receive_accept_nack("b", &round, &pid(2, "c"));
        assert!(a.is_leader());

        // NACKs for older rounds do not count
        a.receive_accept_nack("c", &pid(0, "a"), &pid(2, "c"));
        assert!(a.is_leader());

        a.receive_accept_nack("c", &round, &pid(2, "c"));
        assert!(!a.is_leader());
        assert!(a.leader_id().is_none());
        assert!(a.leader_proposal_id().is_none());
        assert_eq!(
            messenger.drain(),
            vec![
                Sent::LeadershipLost,
                Sent::LeadershipChange(Some("a".into()), None),
            ]
        );
        assert_eq!(a.proposer().proposal_id().number, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_liveness_waits_for_silence() {
        let (mut a, messenger) = node("a", 2, None);

        a.poll_liveness();
        assert!(messenger.drain().is_empty());

        // Leader silent but a prepare was just seen
        tokio::time::advance(Duration::from_millis(1600)).await;
        a.receive_prepare("c", &pid(1, "c"));
        a.poll_liveness();
        assert_eq!(a.state(), ElectionState::Follower);

        tokio::time::advance(Duration::from_millis(2100)).await;
        a.poll_liveness();
        assert_eq!(a.state(), ElectionState::AcquiringLeadership);
        assert_eq!(messenger.count(|s| matches!(s, Sent::Prepare(_))), 1);

        // Still acquiring after another quiet window: prepare a fresh round
        tokio::time::advance(Duration::from_millis(2100)).await;
        a.poll_liveness();
        assert_eq!(a.state(), ElectionState::AcquiringLeadership);
        assert_eq!(a.proposer().proposal_id().number, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_leader_alive() {
        let (mut a, _messenger) = node("a", 2, None);
        a.receive_heartbeat("b", &pid(1, "b"));

        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(1000)).await;
            a.receive_heartbeat("b", &pid(1, "b"));
            assert!(a.is_leader_alive());
        }

        tokio::time::advance(Duration::from_millis(1600)).await;
        assert!(!a.is_leader_alive());

        a.acquire_leadership();
        assert!(a.is_acquiring_leadership());

        // A heartbeat from a newer leader ends the attempt
        a.receive_heartbeat("c", &pid(7, "c"));
        assert!(!a.is_acquiring_leadership());
        assert!(a.is_leader_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_leadership_noop_while_leader_alive() {
        let (mut a, messenger) = node("a", 2, None);
        a.acquire_leadership();
        assert!(!a.is_acquiring_leadership());
        assert!(messenger.drain().is_empty());
    }

    #[test]
    fn test_set_active_fans_out() {
        let (mut a, _) = node("a", 2, None);
        a.set_active(false);
        assert!(!a.is_active());
        assert!(!a.proposer().is_active());
        assert!(!a.acceptor().is_active());
        assert!(!a.learner().is_active());
    }

    #[test]
    fn test_recover_restores_acceptor() {
        let (mut a, _) = node("a", 2, None);
        a.recover(AcceptorSnapshot {
            promised_id: Some(pid(3, "b")),
            accepted_id: Some(pid(2, "b")),
            accepted_value: Some("v".into()),
        });
        assert_eq!(a.acceptor().promised_id(), Some(&pid(3, "b")));
        assert_eq!(a.snapshot().accepted_value, Some("v".into()));
        // Next round starts above the recovered promise
        assert_eq!(a.proposer().proposal_id(), &pid(3, "a"));
        a.prepare(true);
        assert_eq!(a.proposer().proposal_id(), &pid(4, "a"));
    }

    #[test]
    fn test_recover_drops_configured_leadership() {
        let (mut a, _) = node("a", 2, Some("a"));
        assert!(a.is_leader());

        a.recover(AcceptorSnapshot {
            promised_id: Some(pid(0, "a")),
            accepted_id: Some(pid(0, "a")),
            accepted_value: Some("v".into()),
        });
        assert!(!a.is_leader());

        // A fresh store keeps the configured leader
        let (mut b, _) = node("b", 2, Some("b"));
        b.recover(AcceptorSnapshot::default());
        assert!(b.is_leader());
    }
}
