//! Proposal Identifiers
//!
//! A proposal id (ballot) is a `(number, owner_id)` pair. Ids are totally
//! ordered by `number` first, with the owner id breaking ties, so two
//! proposers can never issue equal ballots.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::NodeId;

/// Totally ordered ballot number owned by one proposer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId {
    /// Round number, only ever raised
    pub number: u64,
    /// Id of the proposer that owns this ballot
    pub owner_id: NodeId,
}

impl ProposalId {
    /// Create a new proposal id
    pub fn new(number: u64, owner_id: impl Into<NodeId>) -> Self {
        Self {
            number,
            owner_id: owner_id.into(),
        }
    }

    /// An id is only meaningful when it has an owner
    pub fn is_valid(&self) -> bool {
        !self.owner_id.is_empty()
    }

    /// Move to the next round. Returns false, leaving the id unchanged,
    /// when the round number is exhausted.
    pub fn increment(&mut self) -> bool {
        match self.number.checked_add(1) {
            Some(next) => {
                self.number = next;
                true
            }
            None => false,
        }
    }

    /// Overwrite the round number. Callers only use this to raise it.
    pub fn set_number(&mut self, number: u64) {
        self.number = number;
    }
}

impl Ord for ProposalId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number
            .cmp(&other.number)
            .then_with(|| self.owner_id.cmp(&other.owner_id))
    }
}

impl PartialOrd for ProposalId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.number, self.owner_id)
    }
}
