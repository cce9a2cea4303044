//! Runtime configuration for the coordination subsystem.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// CLI/environment surface for one cluster member.
#[derive(Debug, Clone, Parser)]
pub struct NodeArgs {
    /// This member's name in the cluster.
    #[arg(long)]
    pub member_name: String,

    /// Address this member advertises to the cluster.
    #[arg(long)]
    pub listen_address: SocketAddr,

    /// Directory for local (non-replicated) state.
    #[arg(long)]
    pub data_dir: String,

    /// Target number of online voters in the replicated log.
    #[arg(long, env = "WARREN_MAX_VOTERS", default_value_t = 3)]
    pub max_voters: usize,

    /// Target number of online standby (non-voting backup) members.
    #[arg(long, env = "WARREN_MAX_STANDBY", default_value_t = 2)]
    pub max_standby: usize,

    /// Clock-skew tolerance for incoming heartbeats (ms).
    #[arg(long, env = "WARREN_HEARTBEAT_MAX_SKEW_MS", default_value_t = 5_000)]
    pub heartbeat_max_skew_ms: u64,

    /// Mark a member offline when its last heartbeat response is older
    /// than this (ms).
    #[arg(long, env = "WARREN_OFFLINE_THRESHOLD_MS", default_value_t = 20_000)]
    pub offline_threshold_ms: u64,

    /// Evaluate workload rebalancing every this many minutes.
    #[arg(long, env = "WARREN_REBALANCE_INTERVAL_MIN", default_value_t = 5)]
    pub rebalance_interval_minutes: u64,

    /// Minimum busiest/calmest score divergence (percent of the busiest
    /// score) required to migrate anything.
    #[arg(long, env = "WARREN_REBALANCE_THRESHOLD", default_value_t = 20)]
    pub rebalance_threshold_percent: u64,

    /// Upper bound on migrations per scheduler tick, across all
    /// architecture groups combined.
    #[arg(long, env = "WARREN_REBALANCE_BATCH", default_value_t = 5)]
    pub rebalance_batch_limit: usize,

    /// Do not re-migrate an instance within this window (seconds).
    #[arg(long, env = "WARREN_REBALANCE_COOLDOWN_SECS", default_value_t = 3_600)]
    pub rebalance_cooldown_secs: u64,
}

/// Heartbeat receiver tunables.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub max_skew: Duration,
    pub offline_threshold: Duration,
}

/// Consensus-role balancer targets.
#[derive(Debug, Clone, Copy)]
pub struct RoleConfig {
    pub target_voters: usize,
    pub target_standbys: usize,
}

/// Workload rebalancer tunables.
#[derive(Debug, Clone, Copy)]
pub struct RebalanceConfig {
    /// Act only on ticks where elapsed minutes are a multiple of this.
    pub interval_minutes: u64,
    pub threshold_percent: u64,
    pub batch_limit: usize,
    pub cooldown: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterConfig {
    pub heartbeat: HeartbeatConfig,
    pub roles: RoleConfig,
    pub rebalance: RebalanceConfig,
}

impl ClusterConfig {
    pub fn from_args(args: &NodeArgs) -> Self {
        Self {
            heartbeat: HeartbeatConfig {
                max_skew: Duration::from_millis(args.heartbeat_max_skew_ms),
                offline_threshold: Duration::from_millis(args.offline_threshold_ms),
            },
            roles: RoleConfig {
                target_voters: args.max_voters.max(1),
                target_standbys: args.max_standby,
            },
            rebalance: RebalanceConfig {
                interval_minutes: args.rebalance_interval_minutes.max(1),
                threshold_percent: args.rebalance_threshold_percent,
                batch_limit: args.rebalance_batch_limit,
                cooldown: Duration::from_secs(args.rebalance_cooldown_secs),
            },
        }
    }
}
