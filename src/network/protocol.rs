//! Wire Protocol
//!
//! Defines the messages exchanged between WolfPaxos nodes and the frame
//! header that wraps each encoded message.

use serde::{Deserialize, Serialize};

use crate::paxos::{NodeId, ProposalId, Value};

/// Largest message body accepted off the wire
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Protocol messages for node communication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // ========== Phase 1 ==========
    /// Prepare request (proposer to acceptors)
    Prepare {
        from: NodeId,
        proposal_id: ProposalId,
    },

    /// Promise (acceptor to proposer)
    Promise {
        from: NodeId,
        proposal_id: ProposalId,
        accepted_id: Option<ProposalId>,
        accepted_value: Option<Value>,
    },

    /// Prepare rejected (acceptor to proposer)
    PrepareNack {
        from: NodeId,
        proposal_id: ProposalId,
        promised_id: ProposalId,
    },

    // ========== Phase 2 ==========
    /// Accept request (leader to acceptors)
    Accept {
        from: NodeId,
        proposal_id: ProposalId,
        value: Value,
    },

    /// Accepted vote (acceptor to learners)
    Accepted {
        from: NodeId,
        proposal_id: ProposalId,
        value: Value,
    },

    /// Accept rejected (acceptor to proposer)
    AcceptNack {
        from: NodeId,
        proposal_id: ProposalId,
        promised_id: ProposalId,
    },

    // ========== Leadership ==========
    /// Heartbeat from leader
    Heartbeat {
        from: NodeId,
        leader_proposal_id: ProposalId,
    },

    // ========== Client ==========
    /// Ask a node to propose a value
    Propose { value: Value },
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Sending node, if the message came from a cluster member
    pub fn sender(&self) -> Option<&str> {
        match self {
            Message::Prepare { from, .. }
            | Message::Promise { from, .. }
            | Message::PrepareNack { from, .. }
            | Message::Accept { from, .. }
            | Message::Accepted { from, .. }
            | Message::AcceptNack { from, .. }
            | Message::Heartbeat { from, .. } => Some(from),
            Message::Propose { .. } => None,
        }
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Prepare { .. } => "Prepare",
            Message::Promise { .. } => "Promise",
            Message::PrepareNack { .. } => "PrepareNack",
            Message::Accept { .. } => "Accept",
            Message::Accepted { .. } => "Accepted",
            Message::AcceptNack { .. } => "AcceptNack",
            Message::Heartbeat { .. } => "Heartbeat",
            Message::Propose { .. } => "Propose",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }

    /// Whether the body matches this header's checksum
    pub fn verify(&self, body: &[u8]) -> bool {
        crc32fast::hash(body) == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = Message::Promise {
            from: "node-2".to_string(),
            proposal_id: ProposalId::new(3, "node-1"),
            accepted_id: Some(ProposalId::new(2, "node-3")),
            accepted_value: Some("config-v7".to_string()),
        };

        let bytes = msg.serialize().unwrap();
        let restored = Message::deserialize(&bytes).unwrap();

        match restored {
            Message::Promise { from, proposal_id, accepted_id, accepted_value } => {
                assert_eq!(from, "node-2");
                assert_eq!(proposal_id, ProposalId::new(3, "node-1"));
                assert_eq!(accepted_id, Some(ProposalId::new(2, "node-3")));
                assert_eq!(accepted_value.as_deref(), Some("config-v7"));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_sender_and_type_name() {
        let heartbeat = Message::Heartbeat {
            from: "node-1".into(),
            leader_proposal_id: ProposalId::new(1, "node-1"),
        };
        assert_eq!(heartbeat.sender(), Some("node-1"));
        assert_eq!(heartbeat.type_name(), "Heartbeat");

        let propose = Message::Propose { value: "x".into() };
        assert_eq!(propose.sender(), None);
        assert_eq!(propose.type_name(), "Propose");
    }

    #[test]
    fn test_frame_header() {
        let data = b"test message data";
        let header = FrameHeader::new(data);
        let bytes = header.to_bytes();
        let restored = FrameHeader::from_bytes(&bytes);

        assert_eq!(header.length, restored.length);
        assert_eq!(header.checksum, restored.checksum);
        assert!(restored.verify(data));
        assert!(!restored.verify(b"tampered message!"));
    }
}
