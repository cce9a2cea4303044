//! Membership refresh orchestration.
//!
//! Compares each applied full heartbeat to the previous snapshot and, when
//! something material changed, fans out to the collaborators that depend on
//! an up-to-date member view. Side-effect ordering is significant:
//! certificate refresh → event resubscription → role rebalancing. Promoting
//! a member whose trust material is stale is the failure mode that ordering
//! exists to prevent.

use std::sync::Arc;

use crate::cluster::HeartbeatData;
use crate::daemon::Daemon;
use crate::roles;

/// What caused a refresh: the leader's own heartbeat round, or a heartbeat
/// passively received from the leader. Only active rounds may run the
/// leader-only role pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    ActiveRound,
    ReceivedHeartbeat,
}

/// True when `next` differs materially from `prev`: no previous snapshot,
/// a different member count, or any member present in both that changed
/// address or online state.
pub fn has_changed(prev: Option<&HeartbeatData>, next: &HeartbeatData) -> bool {
    let Some(prev) = prev else {
        return true;
    };
    if prev.members.len() != next.members.len() {
        return true;
    }
    for member in &next.members {
        let Some(old) = prev.members.iter().find(|m| m.name == member.name) else {
            continue;
        };
        if old.address != member.address || old.online != member.online {
            return true;
        }
    }
    false
}

/// Apply a full heartbeat snapshot and trigger downstream refreshes.
///
/// The event resubscription runs as a spawned task whose handle is awaited
/// here: the caller's heartbeat reply is not blocked (the receiver decides
/// whether to call this synchronously), but event delivery is never silently
/// stale across this function boundary.
pub async fn refresh(
    daemon: &Arc<Daemon>,
    data: &HeartbeatData,
    is_leader: bool,
    trigger: RefreshTrigger,
    unavailable: &[String],
) -> anyhow::Result<()> {
    if !daemon.db_ready() || !data.full_state_list {
        return Ok(());
    }

    let mut membership = daemon.membership.lock().await;

    let changed = has_changed(membership.last_node_list.as_ref(), data);
    if changed {
        // Role decisions and event forwarding both depend on an up-to-date
        // trust set, so the certificate cache refreshes first.
        if let Err(err) = daemon.api.certificates.refresh().await {
            tracing::warn!(error = ?err, "certificate cache refresh failed");
        }
    }

    let resubscribe = {
        let events = daemon.api.events.clone();
        let members = data.members.clone();
        tokio::spawn(async move { events.resubscribe_listeners(&members).await })
    };
    match resubscribe.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = ?err, "event listener resubscription failed"),
        Err(err) => tracing::warn!(error = ?err, "event resubscription task panicked"),
    }

    let version_advanced = membership
        .last_node_list
        .as_ref()
        .is_some_and(|prev| data.version.advanced_past(&prev.version));
    if version_advanced {
        // A member must not be promoted or demoted while a schema upgrade
        // might be in flight.
        if let Err(err) = daemon.api.upgrades.check_upgrade().await {
            tracing::warn!(error = ?err, "upgrade check failed; skipping role pass this round");
            replace_snapshot(&mut membership, data);
            return Ok(());
        }
    }

    replace_snapshot(&mut membership, data);

    if is_leader && trigger == RefreshTrigger::ActiveRound && data.members.len() > 1 {
        // Serialized under the membership mutex held above: two concurrent
        // heartbeat rounds never rebalance simultaneously.
        roles::rebalance(
            daemon.api.quorum.as_ref(),
            &daemon.cfg.roles,
            &data.members,
            unavailable,
        )
        .await;
    }

    Ok(())
}

/// Replace the registry and the diff snapshot atomically under the
/// membership mutex. The old snapshot is dropped, never mutated in place.
fn replace_snapshot(membership: &mut crate::daemon::MembershipState, data: &HeartbeatData) {
    membership.registry = data
        .members
        .iter()
        .map(|m| (m.name.clone(), m.clone()))
        .collect();
    membership.last_node_list = Some(data.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MemberHeartbeatInfo, RaftRole, VersionInfo};

    fn member(name: &str, address: &str, online: bool) -> MemberHeartbeatInfo {
        MemberHeartbeatInfo {
            name: name.to_string(),
            address: address.to_string(),
            online,
            architecture: "x86_64".to_string(),
            raft_id: 1,
            raft_role: RaftRole::Voter,
            roles: vec![],
        }
    }

    fn snapshot(members: Vec<MemberHeartbeatInfo>) -> HeartbeatData {
        HeartbeatData {
            time_unix_ms: 0,
            full_state_list: true,
            members,
            version: VersionInfo::default(),
        }
    }

    #[test]
    fn no_previous_snapshot_counts_as_changed() {
        let next = snapshot(vec![member("n1", "10.0.0.1:8443", true)]);
        assert!(has_changed(None, &next));
    }

    #[test]
    fn deep_equal_snapshots_are_unchanged() {
        let prev = snapshot(vec![
            member("n1", "10.0.0.1:8443", true),
            member("n2", "10.0.0.2:8443", true),
        ]);
        let next = prev.clone();
        assert!(!has_changed(Some(&prev), &next));
    }

    #[test]
    fn single_online_flag_flip_is_a_change() {
        let prev = snapshot(vec![
            member("n1", "10.0.0.1:8443", true),
            member("n2", "10.0.0.2:8443", true),
        ]);
        let next = snapshot(vec![
            member("n1", "10.0.0.1:8443", true),
            member("n2", "10.0.0.2:8443", false),
        ]);
        assert!(has_changed(Some(&prev), &next));
    }

    #[test]
    fn address_change_is_a_change() {
        let prev = snapshot(vec![member("n1", "10.0.0.1:8443", true)]);
        let next = snapshot(vec![member("n1", "10.0.0.9:8443", true)]);
        assert!(has_changed(Some(&prev), &next));
    }

    #[test]
    fn member_count_change_is_a_change() {
        let prev = snapshot(vec![member("n1", "10.0.0.1:8443", true)]);
        let next = snapshot(vec![
            member("n1", "10.0.0.1:8443", true),
            member("n2", "10.0.0.2:8443", true),
        ]);
        assert!(has_changed(Some(&prev), &next));
    }

    #[test]
    fn version_only_bump_is_not_a_membership_change() {
        let prev = snapshot(vec![member("n1", "10.0.0.1:8443", true)]);
        let mut next = prev.clone();
        next.version.api_extensions = 7;
        assert!(!has_changed(Some(&prev), &next));
    }
}
