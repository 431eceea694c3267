use serde::{Deserialize, Serialize};

/// Type used to uniquely identify each node. Node-ids form the sort key over
/// the wrap-around membership ring (see `membership::MembershipRing`).
pub type NodeId = u64;

pub type Term = u64;

pub type LogIndex = u64;

/// Integer unit of partitioning. `S` slots partition the whole key space.
pub type Slot = u32;

/// Identity triple of a single cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub address: String,
    pub meta_port: u16,
    pub id: NodeId,
}

impl Node {
    pub fn new(address: impl Into<String>, meta_port: u16, id: NodeId) -> Self {
        Self {
            address: address.into(),
            meta_port,
            id,
        }
    }
}

/// Ordered sequence of `Node`s of fixed replication factor. Index 0 (the
/// "header") uniquely identifies the group across the cluster and is stable
/// for the group's lifetime; other members may be replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionGroup {
    members: Vec<Node>,
}

impl PartitionGroup {
    pub fn new(members: Vec<Node>) -> Self {
        assert!(!members.is_empty(), "a partition group may not be empty");
        Self { members }
    }

    /// The distinguishing first member. Immutable for the group's lifetime.
    pub fn header(&self) -> &Node {
        &self.members[0]
    }

    pub fn members(&self) -> &[Node] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A position in a replicated log, used both for the data-group log and (as
/// reported by the candidate) the metadata-group log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub term: Term,
    pub index: LogIndex,
}

impl LogPosition {
    pub const ZERO: LogPosition = LogPosition { term: 0, index: 0 };

    pub fn new(term: Term, index: LogIndex) -> Self {
        Self { term, index }
    }
}

/// The three roles a member occupies at any point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Leader,
    Follower,
    Elector,
}
