use std::time::Instant;

use tracing::info;

use crate::types::{LogPosition, Node, Role, Term};

/// Verdict of an election freshness comparison. `LogMismatch` is
/// distinguishable from the term-stale case so that `process_election_request`
/// can tell a metadata-log mismatch apart from an ordinary term rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Agree,
    TermStale,
    LogMismatch,
}

/// Response codes exposed on the election RPC surface: the two verdict
/// codes specific to the metadata-gated election, plus the standard
/// term-stale codes from `verify_elector`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionResponse {
    Agree,
    LogMismatch,
    MetaLogStale,
}

/// Rejects a candidate whose term is not strictly greater than local, or
/// whose (lastLogTerm, lastLogIndex) is lexicographically less than local.
/// On a log mismatch (term is fine, log position is not) returns
/// `LogMismatch`, distinguishable from term-stale.
pub fn verify_elector(
    local_term: Term,
    local_log: LogPosition,
    candidate_term: Term,
    candidate_log: LogPosition,
) -> Verdict {
    if candidate_term <= local_term {
        return Verdict::TermStale;
    }
    let candidate_key = (candidate_log.term, candidate_log.index);
    let local_key = (local_log.term, local_log.index);
    if candidate_key < local_key {
        return Verdict::LogMismatch;
    }
    Verdict::Agree
}

/// The member's election-relevant state: role, term, last-heartbeat time,
/// known leader, and the local data-group log position used by the
/// freshness gate. Mutation is always performed under the single
/// `std::sync::Mutex` guarding the election/membership compound critical
/// section.
pub struct RoleState {
    pub role: Role,
    pub term: Term,
    pub leader: Option<Node>,
    pub last_heartbeat: Instant,
    pub data_log: LogPosition,
}

impl RoleState {
    pub fn new(term: Term) -> Self {
        Self {
            role: Role::Elector,
            term,
            leader: None,
            last_heartbeat: Instant::now(),
            data_log: LogPosition::ZERO,
        }
    }

    /// Runs the metadata-log freshness check first; only if that agrees
    /// does the data-log check run, and only a data-log `Agree` mutates
    /// state.
    pub fn process_election_request(
        &mut self,
        candidate: Node,
        candidate_term: Term,
        meta_log: LogPosition,
        local_meta_log: LogPosition,
        data_log: LogPosition,
    ) -> ElectionResponse {
        // Step 1: metadata-group freshness gate. The metadata log's own
        // term bookkeeping belongs to the metadata group; only the log
        // position ordering matters for this gate.
        if (meta_log.term, meta_log.index) < (local_meta_log.term, local_meta_log.index) {
            return ElectionResponse::MetaLogStale;
        }

        // Step 2: data-group freshness gate, which actually governs this
        // member's own term/role.
        match verify_elector(self.term, self.data_log, candidate_term, data_log) {
            Verdict::TermStale | Verdict::LogMismatch => ElectionResponse::LogMismatch,
            Verdict::Agree => {
                self.term = candidate_term;
                self.role = Role::Follower;
                self.leader = Some(candidate);
                self.last_heartbeat = Instant::now();
                self.data_log = data_log;
                info!(term = candidate_term, "granted vote, became follower");
                ElectionResponse::Agree
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_meta_log_rejected_regardless_of_data_log() {
        let local_meta = LogPosition::new(5, 100);
        let candidate_meta = LogPosition::new(5, 50);
        let mut state = RoleState::new(5);
        state.data_log = LogPosition::new(3, 1);
        let resp = state.process_election_request(
            Node::new("cand", 1, 2),
            6,
            candidate_meta,
            local_meta,
            LogPosition::new(999, 999),
        );
        assert_eq!(resp, ElectionResponse::MetaLogStale);
    }

    #[test]
    fn agreeing_election_updates_state() {
        let local_meta = LogPosition::new(3, 50);
        let candidate_meta = LogPosition::new(4, 60);
        let mut state = RoleState::new(3);
        state.data_log = LogPosition::new(3, 50);
        let candidate = Node::new("cand", 1, 2);
        let resp = state.process_election_request(
            candidate.clone(),
            4,
            candidate_meta,
            local_meta,
            LogPosition::new(4, 60),
        );
        assert_eq!(resp, ElectionResponse::Agree);
        assert_eq!(state.role, Role::Follower);
        assert_eq!(state.term, 4);
        assert_eq!(state.leader, Some(candidate));
    }

    #[test]
    fn verify_elector_rejects_non_increasing_term() {
        let local = LogPosition::new(2, 10);
        assert_eq!(
            verify_elector(5, local, 5, LogPosition::new(10, 100)),
            Verdict::TermStale
        );
    }

    #[test]
    fn verify_elector_rejects_behind_log() {
        let local = LogPosition::new(5, 10);
        assert_eq!(
            verify_elector(3, local, 4, LogPosition::new(5, 5)),
            Verdict::LogMismatch
        );
    }
}
