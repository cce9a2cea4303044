//! Protocol-level error taxonomy for the coordination subsystem.
//!
//! Orchestration paths carry errors as `anyhow::Error`; callers that need to
//! distinguish the protocol cases below downcast to `ClusterError`.

use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// Heartbeat payload contained no member with a raft id. Applying it
    /// would wipe a healthy quorum view, so it is rejected at the boundary.
    #[error("heartbeat member list contains no raft nodes")]
    EmptyQuorumSet,

    /// A partial member list was delivered to the leader. The leader is the
    /// aggregation point and must only ever act on full state.
    #[error("leader received a partial heartbeat member list")]
    UnexpectedPartialHeartbeat,

    /// A leadership change raced with a leader-only call. Expected and
    /// transient; the new leader redoes the pass on its own round.
    #[error("this member is not the raft leader")]
    NotLeader,

    /// The daemon is running standalone, outside any cluster. Permanent
    /// no-op for every control loop, not a failure.
    #[error("this member is not part of a cluster")]
    NodeNotClustered,
}

/// True when `err` is (or wraps) the given protocol error.
pub fn is_cluster_error(err: &anyhow::Error, kind: ClusterError) -> bool {
    err.downcast_ref::<ClusterError>() == Some(&kind)
}
