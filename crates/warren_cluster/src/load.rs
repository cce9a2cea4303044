//! Per-member load scoring for the workload rebalancer.
//!
//! Scores are transient: recomputed every scheduling round, never persisted.
//! A fetch failure for any single member aborts the entire round, because
//! moving load based on an incomplete picture risks moving it the wrong way.

use std::collections::BTreeMap;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::cluster::MemberHeartbeatInfo;
use crate::services::ResourceReporter;

/// Raw resource counters for one member.
///
/// Memory is in bytes. CPU fields are in comparable load units: `cpu_used`
/// is the 1-minute scheduler load scaled by 100 and `cpu_total` is the core
/// count scaled by 100, so the ratio survives integer division.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerUsage {
    pub memory_used: u64,
    pub memory_total: u64,
    pub cpu_used: u64,
    pub cpu_total: u64,
}

impl ServerUsage {
    /// 0 (idle) to 100 (saturated), combining memory and CPU pressure.
    pub fn score(&self) -> u8 {
        if self.memory_total == 0 || self.cpu_total == 0 {
            return 0;
        }
        let memory_pct = self.memory_used * 100 / self.memory_total;
        let cpu_pct = self.cpu_used * 100 / self.cpu_total;
        let combined = (memory_pct + cpu_pct) / 2;
        combined.min(u64::from(u8::MAX)) as u8
    }

    /// Fold another usage into this one, predicting the effect of hosting
    /// that workload here. Memory adds to memory and CPU adds to CPU; the
    /// totals describe this member's capacity and stay fixed.
    pub fn add(&mut self, other: &ServerUsage) {
        self.memory_used = self.memory_used.saturating_add(other.memory_used);
        self.cpu_used = self.cpu_used.saturating_add(other.cpu_used);
    }
}

/// One member's score for a scheduling round.
#[derive(Debug, Clone)]
pub struct ServerScore {
    pub member: MemberHeartbeatInfo,
    pub usage: ServerUsage,
    pub score: u8,
}

/// Fetch usage for every member concurrently and score them, grouped by CPU
/// architecture and sorted descending by score within each group.
///
/// Cross-architecture migration is never attempted (instances are
/// architecture-pinned), so a per-architecture grouping is the natural shape
/// for the scheduler.
pub async fn score_members(
    reporter: &dyn ResourceReporter,
    members: &[MemberHeartbeatInfo],
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<BTreeMap<String, Vec<ServerScore>>> {
    let mut fetches = FuturesUnordered::new();
    for member in members {
        fetches.push(async move {
            let usage = reporter.get_utilization(&member.address).await;
            (member.clone(), usage)
        });
    }

    let mut grouped: BTreeMap<String, Vec<ServerScore>> = BTreeMap::new();
    while let Some((member, usage)) = fetches.next().await {
        if *shutdown.borrow() {
            anyhow::bail!("scoring round aborted by shutdown");
        }
        let usage = usage
            .map_err(|err| anyhow::anyhow!("fetch resources for {}: {err}", member.name))?;
        let score = usage.score();
        grouped
            .entry(member.architecture.clone())
            .or_default()
            .push(ServerScore {
                member,
                usage,
                score,
            });
    }

    for scores in grouped.values_mut() {
        scores.sort_by(|a, b| b.score.cmp(&a.score));
    }
    Ok(grouped)
}

/// Sample this member's own counters, for serving utilization to peers.
pub fn local_usage() -> ServerUsage {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_usage();
    let load = System::load_average();
    let cores = sys.cpus().len().max(1) as u64;

    ServerUsage {
        memory_used: sys.used_memory(),
        memory_total: sys.total_memory(),
        cpu_used: (load.one * 100.0).max(0.0) as u64,
        cpu_total: cores * 100,
    }
}
