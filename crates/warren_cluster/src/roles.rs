//! Leader-only consensus-role balancing.
//!
//! Level-triggered and self-healing: every leader heartbeat round
//! re-evaluates the member list and asks the quorum collaborator to fix any
//! shortfall. Single-round failures are tolerable because the next round
//! repeats the pass.

use crate::cluster::{MemberHeartbeatInfo, RaftRole};
use crate::config::RoleConfig;
use crate::error::{is_cluster_error, ClusterError};
use crate::services::QuorumManager;

/// What the current member list implies for the quorum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleAssessment {
    pub online_voters: usize,
    pub online_standbys: usize,
    /// Some offline member still holds a voter or standby role.
    pub degraded: bool,
    /// Names of online members that have no raft id at all. Such members
    /// are never eligible for voter/standby promotion until joined.
    pub unjoined: Vec<String>,
    /// Names of offline members holding voter/standby roles.
    pub offline_role_holders: Vec<String>,
}

pub fn assess(members: &[MemberHeartbeatInfo]) -> RoleAssessment {
    let mut out = RoleAssessment::default();
    for member in members {
        let holds_role = matches!(member.raft_role, RaftRole::Voter | RaftRole::StandBy);
        if member.online {
            if member.raft_id == 0 {
                out.unjoined.push(member.name.clone());
            } else {
                match member.raft_role {
                    RaftRole::Voter => out.online_voters += 1,
                    RaftRole::StandBy => out.online_standbys += 1,
                    RaftRole::Spare => {}
                }
            }
        } else if member.raft_id != 0 && holds_role {
            out.degraded = true;
            out.offline_role_holders.push(member.name.clone());
        }
    }
    out
}

/// Whether any trigger condition holds: degradation, voter shortfall, or
/// standby shortfall.
pub fn needs_rebalance(assessment: &RoleAssessment, cfg: &RoleConfig) -> bool {
    assessment.degraded
        || assessment.online_voters < cfg.target_voters
        || assessment.online_standbys < cfg.target_standbys
}

/// Run one role-balancing pass against the quorum collaborator.
///
/// `unavailable` names members that did not answer the current heartbeat
/// round; they are excluded from promotion even if nominally online, since
/// their responsiveness is unconfirmed.
pub async fn rebalance(
    quorum: &dyn QuorumManager,
    cfg: &RoleConfig,
    members: &[MemberHeartbeatInfo],
    unavailable: &[String],
) {
    let assessment = assess(members);

    if needs_rebalance(&assessment, cfg) {
        let mut exclude = unavailable.to_vec();
        for name in &assessment.offline_role_holders {
            if !exclude.contains(name) {
                exclude.push(name.clone());
            }
        }
        tracing::info!(
            online_voters = assessment.online_voters,
            online_standbys = assessment.online_standbys,
            degraded = assessment.degraded,
            excluded = exclude.len(),
            "rebalancing consensus roles"
        );
        if let Err(err) = quorum.replace_unavailable_role_holders(&exclude).await {
            log_quorum_error(err, "role rebalance");
        }
    }

    if !assessment.unjoined.is_empty() {
        tracing::info!(unjoined = ?assessment.unjoined, "assigning raft ids to unjoined members");
        if let Err(err) = quorum.promote_unjoined_members().await {
            log_quorum_error(err, "raft join");
        }
    }
}

/// A leadership change racing with this call is expected; the new leader
/// redoes the pass on its own round. Everything else is a warning retried
/// next round.
fn log_quorum_error(err: anyhow::Error, pass: &'static str) {
    if is_cluster_error(&err, ClusterError::NotLeader)
        || is_cluster_error(&err, ClusterError::NodeNotClustered)
    {
        tracing::debug!(pass, error = %err, "quorum pass skipped");
    } else {
        tracing::warn!(pass, error = ?err, "quorum pass failed; retrying next round");
    }
}
