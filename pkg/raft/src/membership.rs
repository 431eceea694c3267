use crate::types::{Node, NodeId};

/// Consistent-hash-free membership ring: nodes are ordered by id and the
/// owner of a slot is whichever node's id is the first at or after the
/// slot's hashed position, wrapping around to the smallest id.
///
/// This mirrors the partition-table's ring used to decide which group owns
/// a new slot when the cluster grows: nodes are kept sorted by id, and
/// insertion finds the wrap-around point rather than rehashing the whole
/// ring.
#[derive(Debug, Clone, Default)]
pub struct MembershipRing {
    nodes: Vec<Node>,
}

impl MembershipRing {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn from_nodes(mut nodes: Vec<Node>) -> Self {
        nodes.sort_by_key(|n| n.id);
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Inserts `node` at its sorted position. Returns the index it landed
    /// at, or `None` if a node with the same id was already present.
    ///
    /// Insertion walks the ring looking for the first existing id greater
    /// than the new node's id; if none is found the new node becomes the
    /// new last element. The ring stays sorted by id after every insertion.
    pub fn insert(&mut self, node: Node) -> Option<usize> {
        if self.contains(node.id) {
            return None;
        }

        let mut insert_index = self.nodes.len();
        for (i, existing) in self.nodes.iter().enumerate() {
            if existing.id > node.id {
                insert_index = i;
                break;
            }
        }

        self.nodes.insert(insert_index, node);
        Some(insert_index)
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let pos = self.nodes.iter().position(|n| n.id == id)?;
        Some(self.nodes.remove(pos))
    }

    /// Removes `id` from wherever it sits and appends it to the tail,
    /// deliberately breaking sorted order. Returns `true` if `id` was
    /// present. This exists only for `add_node`'s eviction quirk (a node
    /// that would become the new smallest id is moved to the tail instead,
    /// so it is the first candidate dropped on overflow); general callers
    /// should use `insert` to keep the ring sorted.
    pub fn move_to_tail(&mut self, id: NodeId) -> bool {
        match self.remove(id) {
            Some(node) => {
                self.nodes.push(node);
                true
            }
            None => false,
        }
    }

    /// Keeps the first `len` members in their current order, discarding the
    /// rest. Does not re-sort, so it composes correctly with `move_to_tail`.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    /// The node owning `slot`: the first node whose id is >= the slot's
    /// projection onto the id space, wrapping to the smallest id.
    pub fn owner_of(&self, slot_hash: u64) -> Option<&Node> {
        if self.nodes.is_empty() {
            return None;
        }
        self.nodes
            .iter()
            .find(|n| n.id as u64 >= slot_hash)
            .or_else(|| self.nodes.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: NodeId) -> Node {
        Node::new(format!("host-{id}"), 9000, id)
    }

    #[test]
    fn insert_keeps_sorted_order() {
        let mut ring = MembershipRing::new();
        ring.insert(node(5));
        ring.insert(node(1));
        ring.insert(node(9));
        let ids: Vec<NodeId> = ring.nodes().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 5, 9]);
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut ring = MembershipRing::new();
        ring.insert(node(5));
        assert!(ring.insert(node(5)).is_none());
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn owner_wraps_around_to_smallest() {
        let ring = MembershipRing::from_nodes(vec![node(10), node(20), node(30)]);
        assert_eq!(ring.owner_of(25).unwrap().id, 30);
        assert_eq!(ring.owner_of(35).unwrap().id, 10);
        assert_eq!(ring.owner_of(5).unwrap().id, 10);
    }

    proptest::proptest! {
        #[test]
        fn ring_stays_sorted_after_arbitrary_insertions(ids in proptest::collection::vec(0u64..1000, 0..50)) {
            let mut ring = MembershipRing::new();
            for id in ids {
                ring.insert(node(id));
            }
            let mut sorted = ring.nodes().to_vec();
            sorted.sort_by_key(|n| n.id);
            prop_assert_eq!(ring.nodes().to_vec(), sorted);
        }
    }
}
