use std::sync::Arc;

use data_group_member::config::MemberConfig;
use data_group_member::consensus::ElectionResponse;
use data_group_member::errors::MemberError;
use data_group_member::testing::{
    InMemoryLogApplier, InMemoryMetadataGroupHandle, InMemoryPeerClient, InMemorySchemaRegistry,
    InMemoryStorageEngine, RecordingLeaderForwarder,
};
use data_group_member::types::{LogPosition, Node, PartitionGroup};
use data_group_member::DataGroupMemberFactory;

fn node(id: u64) -> Node {
    Node::new(format!("host-{id}"), 9000, id)
}

fn config(replication_factor: usize, local_node_id: u64) -> MemberConfig {
    MemberConfig {
        local_address: format!("host-{local_node_id}"),
        local_meta_port: 9003,
        local_node_id,
        replication_factor,
        slot_count: 16,
        remote_root: std::env::temp_dir().join(format!("dgm-scenarios-{local_node_id}")),
        connection_timeout_ms: 5_000,
        chunk_size: 65536,
    }
}

fn build(
    header_id: u64,
    initial_ids: Vec<u64>,
    replication_factor: usize,
) -> (
    Arc<data_group_member::DataGroupMember>,
    Arc<InMemoryMetadataGroupHandle>,
    Arc<InMemoryPeerClient>,
) {
    let meta = Arc::new(InMemoryMetadataGroupHandle::new());
    let peer = Arc::new(InMemoryPeerClient::new());
    let member = DataGroupMemberFactory::create(
        node(header_id),
        initial_ids.into_iter().map(node).collect(),
        config(replication_factor, header_id),
        Arc::new(InMemoryStorageEngine::new()),
        Arc::new(InMemorySchemaRegistry::new()),
        Arc::new(InMemoryLogApplier::new()),
        meta.clone(),
        peer.clone(),
        Arc::new(RecordingLeaderForwarder::new()),
    );
    (member, meta, peer)
}

#[tokio::test]
async fn scenario_1_election_with_stale_meta_log() {
    let (member, meta, _) = build(1, vec![1, 2, 3], 3);
    // Local meta last = (term=5, idx=100, t=5); candidate meta last =
    // (term=5, idx=50, t=5). Any data log values.
    meta.set_log_position(5, 100, 5);
    let candidate_meta = LogPosition::new(5, 50);

    let resp = member
        .process_election_request(node(2), 10, candidate_meta, LogPosition::new(999, 999))
        .await;
    assert_eq!(resp, ElectionResponse::MetaLogStale);
}

#[tokio::test]
async fn scenario_2_election_agree() {
    let (member, meta, _) = build(1, vec![1, 2, 3], 3);
    meta.set_log_position(3, 50, 3);
    let candidate = node(2);
    let resp = member
        .process_election_request(
            candidate.clone(),
            4,
            LogPosition::new(4, 60),
            LogPosition::new(4, 60),
        )
        .await;
    assert_eq!(resp, ElectionResponse::Agree);
    assert_eq!(member.known_leader(), Some(candidate));
    assert!(!member.is_leader());
}

#[test]
fn scenario_3_add_node_with_wrap() {
    let (member, _, _) = build(40, vec![10, 20, 30, 40], 4);
    let evicted = member.add_node(node(35));
    assert!(evicted);
}

#[tokio::test]
async fn scenario_4_snapshot_application_slot_held_filter() {
    let (member, meta, _) = build(1, vec![1, 2, 3], 3);
    let local_group = PartitionGroup::new(vec![node(1), node(2), node(3)]);
    let other_group = PartitionGroup::new(vec![node(9)]);
    meta.set_owner(1, local_group.clone());
    meta.set_owner(2, other_group);
    meta.set_owner(3, local_group);

    let snapshot = data_group_member::snapshot::Snapshot::Partitioned {
        per_slot: vec![
            (1, simple_slot_snapshot(5)),
            (2, simple_slot_snapshot(5)),
            (3, simple_slot_snapshot(5)),
        ],
        last_index: 5,
        last_term: 1,
    };

    member.apply_snapshot(snapshot).await.unwrap();

    let result = member.held_slot_snapshots(&[1, 2, 3]).await;
    let mut held: Vec<u32> = result.keys().copied().collect();
    held.sort();
    assert_eq!(held, vec![1, 3]);
}

#[tokio::test]
async fn scenario_5_pull_snapshot_as_follower_forwards_without_locking() {
    let (member, _, _) = build(1, vec![1, 2, 3], 3);
    let leader = node(2);
    member
        .process_election_request(leader.clone(), 5, LogPosition::new(1, 1), LogPosition::new(1, 1))
        .await;
    assert!(!member.is_leader());

    let result = member.pull_snapshot(vec![1, 2, 3]).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn pull_snapshot_with_no_leader_known_fails() {
    let (member, _, _) = build(1, vec![1, 2, 3], 3);
    let err = member.pull_snapshot(vec![1]).await.unwrap_err();
    assert!(matches!(err, MemberError::LeaderUnknown { .. }));
}

fn simple_slot_snapshot(last_index: u64) -> data_group_member::snapshot::SlotSnapshot {
    data_group_member::snapshot::SlotSnapshot::Simple {
        schemas: vec![],
        operations: vec![],
        last_index,
        last_term: 1,
    }
}
