//! Replica
//!
//! Drives one `PaxosNode` from a single tokio task. Inbound messages, the
//! leader pulse and the liveness poll are all handled in one `select!` loop,
//! so the node itself needs no locking. Everything the node emits goes
//! through a [`ChannelMessenger`] and is routed here: to the local node for
//! self-addressed traffic, or to a per-peer delivery task otherwise.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::WolfPaxosConfig;
use crate::error::Result;
use crate::network::{Message, NetworkClient, NetworkServer};
use crate::paxos::{Messenger, NodeId, PaxosNode, ProposalId, Value};
use crate::state::AcceptorStore;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const INBOUND_QUEUE_SIZE: usize = 10_000;

/// Work emitted by the node for the replica to carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Deliver to every member, this node included
    Broadcast(Message),
    /// Deliver to one member
    To(NodeId, Message),
    /// The learner resolved a value
    Resolved(ProposalId, Value),
}

/// `Messenger` that hands every call off to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    node_id: NodeId,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelMessenger {
    pub fn new(node_id: impl Into<NodeId>) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let messenger = Self {
            node_id: node_id.into(),
            tx,
        };
        (messenger, rx)
    }

    fn emit(&self, outbound: Outbound) {
        // Only fails once the replica is gone
        let _ = self.tx.send(outbound);
    }
}

impl Messenger for ChannelMessenger {
    fn send_prepare(&self, proposal_id: &ProposalId) {
        self.emit(Outbound::Broadcast(Message::Prepare {
            from: self.node_id.clone(),
            proposal_id: proposal_id.clone(),
        }));
    }

    fn send_promise(
        &self,
        to: &str,
        proposal_id: &ProposalId,
        accepted_id: Option<&ProposalId>,
        accepted_value: Option<&Value>,
    ) {
        self.emit(Outbound::To(
            to.to_string(),
            Message::Promise {
                from: self.node_id.clone(),
                proposal_id: proposal_id.clone(),
                accepted_id: accepted_id.cloned(),
                accepted_value: accepted_value.cloned(),
            },
        ));
    }

    fn send_accept(&self, proposal_id: &ProposalId, value: &Value) {
        self.emit(Outbound::Broadcast(Message::Accept {
            from: self.node_id.clone(),
            proposal_id: proposal_id.clone(),
            value: value.clone(),
        }));
    }

    /// Accepted votes go to every learner, not just the proposer
    fn send_accepted(&self, _to: &str, proposal_id: &ProposalId, value: &Value) {
        self.emit(Outbound::Broadcast(Message::Accepted {
            from: self.node_id.clone(),
            proposal_id: proposal_id.clone(),
            value: value.clone(),
        }));
    }

    fn send_prepare_nack(&self, to: &str, proposal_id: &ProposalId, promised_id: &ProposalId) {
        self.emit(Outbound::To(
            to.to_string(),
            Message::PrepareNack {
                from: self.node_id.clone(),
                proposal_id: proposal_id.clone(),
                promised_id: promised_id.clone(),
            },
        ));
    }

    fn send_accept_nack(&self, to: &str, proposal_id: &ProposalId, promised_id: &ProposalId) {
        self.emit(Outbound::To(
            to.to_string(),
            Message::AcceptNack {
                from: self.node_id.clone(),
                proposal_id: proposal_id.clone(),
                promised_id: promised_id.clone(),
            },
        ));
    }

    fn send_heartbeat(&self, leader_id: &str, leader_proposal_id: &ProposalId) {
        self.emit(Outbound::Broadcast(Message::Heartbeat {
            from: leader_id.to_string(),
            leader_proposal_id: leader_proposal_id.clone(),
        }));
    }

    fn on_resolution(&self, proposal_id: &ProposalId, value: &Value) {
        self.emit(Outbound::Resolved(proposal_id.clone(), value.clone()));
    }

    fn on_leadership_acquired(&self) {
        tracing::info!("{}: this node is now the leader", self.node_id);
    }

    fn on_leadership_lost(&self) {
        tracing::info!("{}: this node is no longer the leader", self.node_id);
    }
}

/// Feed one protocol message into the node
pub fn dispatch<M: Messenger + Clone>(node: &mut PaxosNode<M>, message: Message) {
    match message {
        Message::Prepare { from, proposal_id } => {
            node.receive_prepare(&from, &proposal_id);
        }
        Message::Promise {
            from,
            proposal_id,
            accepted_id,
            accepted_value,
        } => {
            node.receive_promise(&from, &proposal_id, accepted_id.as_ref(), accepted_value.as_ref());
        }
        Message::PrepareNack {
            from,
            proposal_id,
            promised_id,
        } => {
            node.receive_prepare_nack(&from, &proposal_id, &promised_id);
        }
        Message::Accept {
            from,
            proposal_id,
            value,
        } => {
            node.receive_accept_request(&from, &proposal_id, &value);
        }
        Message::Accepted {
            from,
            proposal_id,
            value,
        } => {
            node.receive_accepted(&from, &proposal_id, &value);
        }
        Message::AcceptNack {
            from,
            proposal_id,
            promised_id,
        } => {
            node.receive_accept_nack(&from, &proposal_id, &promised_id);
        }
        Message::Heartbeat {
            from,
            leader_proposal_id,
        } => {
            node.receive_heartbeat(&from, &leader_proposal_id);
        }
        Message::Propose { value } => {
            node.set_proposal(value);
        }
    }
}

/// A running cluster member
pub struct Replica {
    node_id: NodeId,
    bind_address: String,
    node: PaxosNode<ChannelMessenger>,
    store: AcceptorStore,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    /// Replies addressed to this node, waiting to be handled
    loopback: VecDeque<Message>,
    /// Delivery queues for every other member
    peers: HashMap<NodeId, mpsc::UnboundedSender<Message>>,
    pulse_period: Duration,
    liveness_poll: Duration,
    liveness_jitter_ms: u64,
    resolution_tx: watch::Sender<Option<(ProposalId, Value)>>,
}

impl Replica {
    /// Open the store, recover acceptor state and set up peer delivery
    pub async fn new(config: &WolfPaxosConfig) -> Result<Self> {
        let node_id = config.node.id.clone();
        let store = AcceptorStore::new(config.data_dir())?;

        let (messenger, outbound_rx) = ChannelMessenger::new(node_id.clone());
        let mut node = PaxosNode::new(
            messenger,
            node_id.clone(),
            config.quorum_size(),
            config.election_config(),
            config.cluster.leader.clone(),
        );

        if let Some(snapshot) = store.load().await? {
            tracing::info!(
                "Recovered acceptor state: promised={:?} accepted={:?}",
                snapshot.promised_id,
                snapshot.accepted_id
            );
            node.recover(snapshot);
        }

        let resolution = store.resolution().await?;
        if let Some((id, value)) = &resolution {
            tracing::info!("Value already resolved at {}: {}", id, value);
        }
        let (resolution_tx, _) = watch::channel(resolution);

        let peers = config
            .peers()
            .map(|member| {
                let tx = spawn_delivery(member.id.clone(), member.address.clone());
                (member.id.clone(), tx)
            })
            .collect();

        let pulse_period = node.heartbeat_period();
        tracing::info!(
            "Node {} advertised to peers as {}",
            node_id,
            config.advertise_address()
        );

        Ok(Self {
            node_id,
            bind_address: config.node.bind_address.clone(),
            node,
            store,
            outbound_rx,
            loopback: VecDeque::new(),
            peers,
            pulse_period,
            liveness_poll: config.liveness_poll_interval(),
            liveness_jitter_ms: config.cluster.liveness_jitter_ms,
            resolution_tx,
        })
    }

    pub fn node(&self) -> &PaxosNode<ChannelMessenger> {
        &self.node
    }

    /// Watch for the resolved value
    pub fn subscribe_resolution(&self) -> watch::Receiver<Option<(ProposalId, Value)>> {
        self.resolution_tx.subscribe()
    }

    /// Propose a value, as if a client had sent it
    pub async fn propose(&mut self, value: Value) {
        self.handle(Message::Propose { value });
        self.flush().await;
    }

    /// Serve until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (incoming_tx, mut incoming_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
        let server = NetworkServer::bind(&self.bind_address, incoming_tx).await?;
        tracing::info!(
            "Node {} serving on {} with {} peers",
            self.node_id,
            server.local_addr()?,
            self.peers.len()
        );
        let server_handle = tokio::spawn(server.run(shutdown.clone()));

        let mut pulse = tokio::time::interval(self.pulse_period);
        pulse.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let liveness = tokio::time::sleep(self.next_poll_delay());
        tokio::pin!(liveness);

        loop {
            tokio::select! {
                Some(message) = incoming_rx.recv() => {
                    self.handle(message);
                }
                _ = pulse.tick() => {
                    self.on_pulse();
                }
                _ = &mut liveness => {
                    self.node.poll_liveness();
                    liveness.as_mut().reset(Instant::now() + self.next_poll_delay());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            self.flush().await;
        }

        self.persist().await;

        match server_handle.await {
            Ok(result) => result?,
            Err(e) => tracing::warn!("Network server task failed: {}", e),
        }

        tracing::info!("Node {} stopped", self.node_id);
        Ok(())
    }

    /// Heartbeat and retry Accept while leading. Accept keeps going out
    /// after our own learner resolves, so followers that missed the
    /// Accepted votes still catch up.
    fn on_pulse(&mut self) {
        if self.node.is_leader() {
            self.node.pulse();
            self.node.resend_accept();
        }
    }

    fn next_poll_delay(&self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=self.liveness_jitter_ms);
        self.liveness_poll + Duration::from_millis(jitter)
    }

    /// Handle a message from a peer, a client or this node
    fn handle(&mut self, message: Message) {
        if let Some(from) = message.sender() {
            if from != self.node_id && !self.peers.contains_key(from) {
                tracing::debug!("Dropping {} from unknown node {}", message.type_name(), from);
                return;
            }
        }

        if let Message::Propose { value } = &message {
            if let Some(leader) = self.forward_target() {
                tracing::debug!("Forwarding proposal to leader {}", leader);
                let leader = leader.to_string();
                self.deliver(&leader, Message::Propose { value: value.clone() });
                return;
            }
            tracing::info!("Proposing value: {}", value);
        }

        tracing::trace!("{}: handling {}", self.node_id, message.type_name());
        dispatch(&mut self.node, message);
    }

    /// A live leader other than this node
    fn forward_target(&self) -> Option<&str> {
        self.node
            .leader_id()
            .filter(|leader| *leader != self.node_id && self.node.is_leader_alive())
    }

    /// Persist, route and loop back until nothing is left to do
    async fn flush(&mut self) {
        loop {
            self.persist().await;

            while let Ok(outbound) = self.outbound_rx.try_recv() {
                self.route(outbound).await;
            }

            match self.loopback.pop_front() {
                Some(message) => self.handle(message),
                None => break,
            }
        }
    }

    /// Make deferred acceptor state durable, then release its replies.
    /// Returns false if state is still waiting on the store.
    async fn persist(&mut self) -> bool {
        if !self.node.persistence_required() {
            return true;
        }

        match self.store.save(&self.node.snapshot()).await {
            Ok(()) => {
                self.node.persisted();
                true
            }
            Err(e) => {
                tracing::warn!("Failed to persist acceptor state: {}", e);
                false
            }
        }
    }

    async fn route(&mut self, outbound: Outbound) {
        match outbound {
            Outbound::Broadcast(message) => {
                // The local acceptor hears every ballot first and durably,
                // so a restarted proposer can never reuse one.
                self.handle(message.clone());
                if !self.persist().await {
                    tracing::warn!("Holding back {} until local state is durable", message.type_name());
                    return;
                }
                for tx in self.peers.values() {
                    let _ = tx.send(message.clone());
                }
            }
            Outbound::To(to, message) => {
                self.deliver(&to, message);
            }
            Outbound::Resolved(proposal_id, value) => {
                tracing::info!("Resolved value {} with proposal {}", value, proposal_id);
                if let Err(e) = self.store.record_resolution(&proposal_id, &value).await {
                    tracing::warn!("Failed to record resolution: {}", e);
                }
                self.resolution_tx.send_replace(Some((proposal_id, value)));
            }
        }
    }

    fn deliver(&mut self, to: &str, message: Message) {
        if to == self.node_id {
            self.loopback.push_back(message);
        } else if let Some(tx) = self.peers.get(to) {
            let _ = tx.send(message);
        } else {
            tracing::warn!("No route to {}, dropping {}", to, message.type_name());
        }
    }
}

/// Spawn the task that delivers to one peer
fn spawn_delivery(peer_id: NodeId, address: String) -> mpsc::UnboundedSender<Message> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        let mut client = NetworkClient::new(CONNECT_TIMEOUT, WRITE_TIMEOUT);

        while let Some(message) = rx.recv().await {
            if let Err(e) = client.send(&address, &message).await {
                // The protocol tolerates loss; skip the backlog rather than
                // stall behind an unreachable peer.
                let mut dropped = 0usize;
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
                if e.is_retryable() {
                    tracing::debug!(
                        "Delivery of {} to {} failed ({}), dropped {} queued",
                        message.type_name(),
                        peer_id,
                        e,
                        dropped
                    );
                } else {
                    tracing::warn!(
                        "Delivery of {} to {} failed ({}), dropped {} queued",
                        message.type_name(),
                        peer_id,
                        e,
                        dropped
                    );
                }
            }
        }

        client.close_all();
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::ElectionConfig;
    use tempfile::tempdir;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(o) = rx.try_recv() {
            out.push(o);
        }
        out
    }

    #[test]
    fn test_channel_messenger_routing() {
        let (messenger, mut rx) = ChannelMessenger::new("node-1");
        let id = ProposalId::new(2, "node-3");

        messenger.send_prepare(&id);
        messenger.send_promise("node-3", &id, None, None);
        messenger.send_accepted("node-3", &id, &"X".to_string());
        messenger.send_heartbeat("node-3", &id);

        let out = drain(&mut rx);
        assert_eq!(out.len(), 4);
        assert_eq!(
            out[0],
            Outbound::Broadcast(Message::Prepare {
                from: "node-1".into(),
                proposal_id: id.clone(),
            })
        );
        assert!(matches!(&out[1], Outbound::To(to, Message::Promise { .. }) if to == "node-3"));
        // Accepted is broadcast so every learner sees it
        assert!(matches!(&out[2], Outbound::Broadcast(Message::Accepted { from, .. }) if from == "node-1"));
        assert!(matches!(&out[3], Outbound::Broadcast(Message::Heartbeat { from, .. }) if from == "node-3"));
    }

    #[test]
    fn test_dispatch_prepare_defers_promise() {
        let (messenger, mut rx) = ChannelMessenger::new("node-1");
        let mut node = PaxosNode::new(messenger, "node-1", 2, ElectionConfig::default(), None);

        dispatch(
            &mut node,
            Message::Prepare {
                from: "node-2".into(),
                proposal_id: ProposalId::new(1, "node-2"),
            },
        );
        assert!(node.persistence_required());
        assert!(drain(&mut rx).is_empty());

        node.persisted();
        let out = drain(&mut rx);
        assert!(matches!(&out[..], [Outbound::To(to, Message::Promise { .. })] if to == "node-2"));
    }

    #[test]
    fn test_dispatch_propose_sets_value() {
        let (messenger, _rx) = ChannelMessenger::new("node-1");
        let mut node = PaxosNode::new(messenger, "node-1", 2, ElectionConfig::default(), None);

        dispatch(&mut node, Message::Propose { value: "X".into() });
        assert_eq!(node.proposer().proposed_value().map(String::as_str), Some("X"));
    }

    fn single_node_config(data_dir: &std::path::Path) -> WolfPaxosConfig {
        let toml = format!(
            r#"
[node]
id = "node-1"
bind_address = "127.0.0.1:0"
data_dir = "{}"

[cluster]
heartbeat_interval_ms = 20
heartbeat_timeout_ms = 50
liveness_window_ms = 60
liveness_poll_ms = 10
liveness_jitter_ms = 5
"#,
            data_dir.display()
        );
        WolfPaxosConfig::from_str(&toml).unwrap()
    }

    #[tokio::test]
    async fn test_single_node_resolves_proposal() {
        let dir = tempdir().unwrap();
        let config = single_node_config(dir.path());

        let mut replica = Replica::new(&config).await.unwrap();
        let mut resolution = replica.subscribe_resolution();
        replica.propose("X".into()).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(replica.run(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(10), async {
            while resolution.borrow().is_none() {
                resolution.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let (id, value) = resolution.borrow().clone().unwrap();
        assert_eq!(value, "X");
        assert_eq!(id.owner_id, "node-1");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // Decision and acceptor state are durable
        let store = AcceptorStore::new(dir.path()).unwrap();
        assert_eq!(store.resolution().await.unwrap(), Some((id.clone(), value)));
        let snapshot = store.load().await.unwrap().unwrap();
        assert_eq!(snapshot.accepted_id, Some(id));
        assert_eq!(snapshot.accepted_value.as_deref(), Some("X"));
    }

    #[tokio::test]
    async fn test_pulse_resends_accept_after_resolution() {
        let dir = tempdir().unwrap();
        let config = single_node_config(dir.path());

        let mut replica = Replica::new(&config).await.unwrap();
        let resolution = replica.subscribe_resolution();
        replica.propose("X".into()).await;
        replica.node.prepare(true);
        replica.flush().await;

        assert!(replica.node.is_leader());
        assert!(replica.node.is_complete());
        assert!(resolution.borrow().is_some());

        replica.on_pulse();
        let out = drain(&mut replica.outbound_rx);
        assert!(out.iter().any(|o| matches!(
            o,
            Outbound::Broadcast(Message::Accept { value, .. }) if value == "X"
        )));
        assert!(out
            .iter()
            .any(|o| matches!(o, Outbound::Broadcast(Message::Heartbeat { .. }))));
    }

    #[tokio::test]
    async fn test_restart_reports_resolution() {
        let dir = tempdir().unwrap();
        let config = single_node_config(dir.path());

        {
            let store = AcceptorStore::new(dir.path()).unwrap();
            store
                .record_resolution(&ProposalId::new(1, "node-1"), &"Y".to_string())
                .await
                .unwrap();
        }

        let replica = Replica::new(&config).await.unwrap();
        let resolution = replica.subscribe_resolution();
        assert_eq!(
            resolution.borrow().as_ref().map(|(_, v)| v.as_str()),
            Some("Y")
        );
    }
}
