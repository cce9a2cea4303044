//! Background load-aware workload rebalancing.
//!
//! A minute ticker drives the scheduler; each eligible tick scores every
//! online member, pairs the busiest and calmest member per CPU architecture,
//! and live-migrates instances from the busiest toward the calmest until the
//! midpoint balance target, the per-tick batch limit, or the candidate list
//! runs out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cluster;
use crate::daemon::{Daemon, Leadership};
use crate::load::{self, ServerScore};
use crate::services::MigrationCapability;

/// Instance-config key recording the last time the rebalancer moved the
/// instance. Written after each successful migration, aged out once the
/// cooldown window elapses, never cleared explicitly.
pub const COOLDOWN_MARKER_KEY: &str = "last-rebalance-move";

/// Spawn the scheduler loop. Runs until daemon shutdown.
pub fn spawn(daemon: Arc<Daemon>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        // Consume the interval's immediate first tick.
        ticker.tick().await;
        let mut shutdown = daemon.shutdown_signal();
        let mut elapsed_minutes: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            }
            elapsed_minutes += 1;
            match rebalance_tick(&daemon, elapsed_minutes).await {
                Ok(0) => {}
                Ok(migrated) => tracing::info!(migrated, "rebalance tick complete"),
                Err(err) => tracing::warn!(error = ?err, "rebalance tick failed"),
            }
        }
    })
}

/// Divergence between the busiest and calmest score, as a percentage of the
/// busiest. Caller guarantees `busiest > 0`.
pub fn percentage_change(busiest: u8, calmest: u8) -> u64 {
    u64::from(busiest - calmest) * 100 / u64::from(busiest)
}

/// Balance point the selector migrates toward.
pub fn midpoint_target(src_score: u8, dst_score: u8) -> u8 {
    ((u16::from(src_score) + u16::from(dst_score)) / 2) as u8
}

/// True when the instance's cooldown marker is younger than the window.
pub fn within_cooldown(
    config: &BTreeMap<String, String>,
    now_unix_secs: u64,
    cooldown: Duration,
) -> bool {
    let Some(raw) = config.get(COOLDOWN_MARKER_KEY) else {
        return false;
    };
    let Ok(moved_at) = raw.parse::<u64>() else {
        // Unparseable marker: treat as absent rather than pinning the
        // instance forever.
        return false;
    };
    now_unix_secs.saturating_sub(moved_at) < cooldown.as_secs()
}

/// Run one scheduler tick. Returns the number of migrations issued.
///
/// A no-op unless elapsed minutes hit the configured interval and this
/// member currently leads; only the leader rebalances, so two members never
/// issue contradictory migrations.
pub async fn rebalance_tick(daemon: &Arc<Daemon>, elapsed_minutes: u64) -> anyhow::Result<usize> {
    let cfg = daemon.cfg.rebalance;
    if elapsed_minutes % cfg.interval_minutes != 0 {
        return Ok(0);
    }
    if daemon.leadership().await? != Leadership::Leader {
        return Ok(0);
    }

    // The scheduler works from its own snapshot of the registry; heartbeat
    // application can proceed concurrently without a shared lock.
    let members: Vec<_> = {
        let membership = daemon.membership.lock().await;
        if let Some(last) = &membership.last_node_list {
            // The online flags in the registry are only as current as the
            // heartbeat that carried them. Past the offline threshold the
            // view is stale and must not drive migrations.
            let threshold_ms = daemon.cfg.heartbeat.offline_threshold.as_millis() as u64;
            if !cluster::is_online(last.time_unix_ms, cluster::unix_time_ms(), threshold_ms) {
                tracing::debug!("member view is stale, skipping rebalance tick");
                return Ok(0);
            }
        }
        membership
            .registry
            .values()
            .filter(|m| m.online)
            .cloned()
            .collect()
    };
    if members.len() < 2 {
        return Ok(0);
    }

    let shutdown = daemon.shutdown_signal();
    let grouped = load::score_members(daemon.api.resources.as_ref(), &members, &shutdown).await?;

    let mut migrated_total = 0usize;
    for (architecture, scores) in &grouped {
        if scores.len() < 2 {
            continue;
        }
        if migrated_total >= cfg.batch_limit {
            // Global cap reached; remaining groups wait for the next tick.
            break;
        }
        let busiest = &scores[0];
        let calmest = &scores[scores.len() - 1];
        if busiest.score == 0 {
            // No load anywhere in this group, nothing to gain.
            continue;
        }
        let change = percentage_change(busiest.score, calmest.score);
        if change < cfg.threshold_percent {
            continue;
        }
        tracing::info!(
            %architecture,
            busiest = %busiest.member.name,
            busiest_score = busiest.score,
            calmest = %calmest.member.name,
            calmest_score = calmest.score,
            change,
            "architecture group out of balance"
        );
        let budget = cfg.batch_limit - migrated_total;
        migrated_total += select_and_migrate(daemon, busiest, calmest, budget).await?;
    }
    Ok(migrated_total)
}

/// Pick instances on `src` and live-migrate them to `dst`, up to
/// `max_count`, stopping once the predicted destination score reaches the
/// midpoint target.
///
/// A failed migration aborts the whole pass: it usually indicates a
/// transient cluster-wide problem that would recur for every remaining
/// candidate, so continuing wastes the round.
pub async fn select_and_migrate(
    daemon: &Arc<Daemon>,
    src: &ServerScore,
    dst: &ServerScore,
    max_count: usize,
) -> anyhow::Result<usize> {
    if max_count == 0 {
        return Ok(0);
    }
    let cfg = daemon.cfg.rebalance;
    let target_score = midpoint_target(src.score, dst.score);
    let now_secs = unix_time_secs();

    let instances = daemon
        .api
        .instances
        .local_instances(&src.member.name)
        .await?;

    // Projects repeat across instances; resolve each policy once per round.
    let mut placement_cache: BTreeMap<String, bool> = BTreeMap::new();

    let mut running_usage = dst.usage;
    let mut current_score = dst.score;
    let mut migrated = 0usize;

    for instance in &instances {
        if daemon.shutting_down() {
            anyhow::bail!("migration pass aborted by shutdown");
        }

        let allowed = match placement_cache.get(&instance.project) {
            Some(allowed) => *allowed,
            None => {
                let allowed = match daemon
                    .api
                    .projects
                    .can_place_on(&instance.project, &dst.member.name)
                    .await
                {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::debug!(
                            project = %instance.project,
                            target = %dst.member.name,
                            error = %err,
                            "placement policy excludes target member"
                        );
                        false
                    }
                };
                placement_cache.insert(instance.project.clone(), allowed);
                allowed
            }
        };
        if !allowed {
            continue;
        }
        if instance.migration != MigrationCapability::Live {
            continue;
        }
        if within_cooldown(&instance.config, now_secs, cfg.cooldown) {
            continue;
        }
        // Predict the destination's score with this instance on board;
        // overshooting the balance point is worse than stopping short.
        let mut predicted = running_usage;
        predicted.add(&instance.usage);
        if predicted.score() >= target_score {
            continue;
        }

        tracing::info!(
            instance = %instance.name,
            from = %src.member.name,
            to = %dst.member.name,
            "live-migrating instance for rebalance"
        );
        let op = daemon
            .api
            .migration
            .live_migrate(&instance.name, &dst.member.name)
            .await?;
        daemon.api.migration.wait(op).await?;

        daemon
            .api
            .instances
            .set_instance_config(&instance.name, COOLDOWN_MARKER_KEY, &now_secs.to_string())
            .await?;

        running_usage.add(&instance.usage);
        current_score = running_usage.score();
        migrated += 1;
        if migrated == max_count || current_score >= target_score {
            break;
        }
    }

    tracing::debug!(
        migrated,
        final_score = current_score,
        target_score,
        "migration selection pass finished"
    );
    Ok(migrated)
}

fn unix_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
