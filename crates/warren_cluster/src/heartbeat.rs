//! Heartbeat application: validation, clock-skew tracking, raft node list
//! persistence, and dispatch into the membership refresh.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::cluster::{unix_time_ms, HeartbeatData};
use crate::daemon::{Daemon, Leadership};
use crate::error::ClusterError;
use crate::membership::{self, RefreshTrigger};
use crate::services::WarningKind;

/// Apply a heartbeat received from the leader (or pushed out by it).
///
/// Rejections (`EmptyQuorumSet`, `UnexpectedPartialHeartbeat`) surface as
/// `ClusterError` inside the returned `anyhow::Error`; the transport layer
/// maps them to a 400-class reply.
pub async fn handle_heartbeat(
    daemon: &Arc<Daemon>,
    data: HeartbeatData,
    from_leader: bool,
) -> anyhow::Result<()> {
    // A payload without a single raft node would wipe a healthy quorum view.
    // Reject it before touching any local state.
    if data.members.iter().all(|m| m.raft_id == 0) {
        return Err(ClusterError::EmptyQuorumSet.into());
    }

    track_clock_skew(daemon, data.time_unix_ms).await;

    let leadership = daemon.leadership().await?;
    if leadership == Leadership::Standalone {
        return Ok(());
    }
    let is_leader = leadership == Leadership::Leader;

    // Freshness of the raw node addresses beats strict full-state
    // discipline: rewrite the persisted list wholesale for partial and full
    // payloads alike.
    daemon.node_store.replace(data.raft_nodes())?;

    if !data.full_state_list {
        if is_leader {
            // The leader is the aggregation point; a partial view must
            // never drive its decisions.
            return Err(ClusterError::UnexpectedPartialHeartbeat.into());
        }
        tracing::debug!(from_leader, members = data.members.len(), "applied partial heartbeat");
        return Ok(());
    }

    if is_leader && daemon.round.in_flight.load(Ordering::SeqCst) {
        // Tell the in-flight round to restart rather than running two
        // refreshes concurrently, and do the refresh off the reply path.
        // The snapshot is stashed before the flag is set so the restarted
        // round always finds it and never re-applies its own older copy.
        *daemon.round.pending.lock().unwrap() = Some(data.clone());
        daemon.round.restart.store(true, Ordering::SeqCst);
        let daemon = daemon.clone();
        tokio::spawn(async move {
            if let Err(err) =
                membership::refresh(&daemon, &data, is_leader, RefreshTrigger::ReceivedHeartbeat, &[])
                    .await
            {
                tracing::warn!(error = ?err, "async membership refresh failed");
            }
        });
        return Ok(());
    }

    membership::refresh(daemon, &data, is_leader, RefreshTrigger::ReceivedHeartbeat, &[]).await
}

/// Drive one leader-side heartbeat round to completion.
///
/// The transport layer assembles `data` from the responses it collected and
/// names the members that did not answer in `unavailable`. If a fresher
/// heartbeat lands while this round runs, the round reruns its refresh
/// instead of a second refresh starting concurrently.
pub async fn run_heartbeat_round(
    daemon: &Arc<Daemon>,
    data: HeartbeatData,
    unavailable: &[String],
) -> anyhow::Result<()> {
    if data.members.iter().all(|m| m.raft_id == 0) {
        return Err(ClusterError::EmptyQuorumSet.into());
    }
    if !data.full_state_list {
        return Err(ClusterError::UnexpectedPartialHeartbeat.into());
    }

    daemon.node_store.replace(data.raft_nodes())?;

    daemon.round.in_flight.store(true, Ordering::SeqCst);
    daemon.round.pending.lock().unwrap().take();
    let mut current = data;
    let result = loop {
        daemon.round.restart.store(false, Ordering::SeqCst);
        let res =
            membership::refresh(daemon, &current, true, RefreshTrigger::ActiveRound, unavailable)
                .await;
        if res.is_err() || !daemon.round.restart.load(Ordering::SeqCst) {
            break res;
        }
        // Rerun against the stashed fresher snapshot, never the round's own
        // older copy: the concurrent refresh may already have applied the
        // fresher one, and re-applying ours would roll the view back.
        if let Some(fresher) = daemon.round.pending.lock().unwrap().take() {
            current = fresher;
        }
        tracing::debug!("heartbeat round restarting after concurrent heartbeat");
    };
    daemon.round.in_flight.store(false, Ordering::SeqCst);
    result
}

/// Level-triggered clock-skew warning: raise once when the sender's clock
/// diverges beyond the window, resolve once when it falls back inside.
async fn track_clock_skew(daemon: &Arc<Daemon>, sender_unix_ms: u64) {
    let now_ms = unix_time_ms();
    let skew_ms = now_ms.abs_diff(sender_unix_ms);
    let max_skew_ms = daemon.cfg.heartbeat.max_skew.as_millis() as u64;

    if skew_ms > max_skew_ms {
        if !daemon.skew_warning_raised.swap(true, Ordering::SeqCst) {
            tracing::warn!(skew_ms, max_skew_ms, "cluster time skew detected");
            let message = format!(
                "heartbeat clock skew of {skew_ms}ms exceeds the {max_skew_ms}ms window"
            );
            if let Err(err) = daemon
                .api
                .warnings
                .upsert(WarningKind::ClusterTimeSkew, &message)
                .await
            {
                tracing::warn!(error = ?err, "failed to record time-skew warning");
            }
        }
    } else if daemon.skew_warning_raised.swap(false, Ordering::SeqCst) {
        tracing::info!(skew_ms, "cluster time skew resolved");
        if let Err(err) = daemon
            .api
            .warnings
            .resolve_by_kind(WarningKind::ClusterTimeSkew)
            .await
        {
            tracing::warn!(error = ?err, "failed to resolve time-skew warning");
        }
    }
}
