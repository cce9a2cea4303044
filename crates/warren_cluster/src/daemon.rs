//! Process-wide shared state for one cluster member.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::cluster::{HeartbeatData, MemberHeartbeatInfo, RaftNodeStore};
use crate::config::ClusterConfig;
use crate::error::{is_cluster_error, ClusterError};
use crate::services::{
    CertificateCache, EventBus, InstanceInventory, MigrationApi, ProjectPolicy, QuorumManager,
    ResourceReporter, UpgradeChecker, WarningStore,
};

/// Collaborator handles wired in at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub quorum: Arc<dyn QuorumManager>,
    pub resources: Arc<dyn ResourceReporter>,
    pub migration: Arc<dyn MigrationApi>,
    pub instances: Arc<dyn InstanceInventory>,
    pub certificates: Arc<dyn CertificateCache>,
    pub events: Arc<dyn EventBus>,
    pub warnings: Arc<dyn WarningStore>,
    pub projects: Arc<dyn ProjectPolicy>,
    pub upgrades: Arc<dyn UpgradeChecker>,
}

/// Whether this member currently leads the replicated log.
///
/// Computed once per round and threaded through explicitly rather than
/// re-derived ad hoc at each decision point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leadership {
    Leader,
    Follower,
    /// Not part of any cluster; every control loop is a permanent no-op.
    Standalone,
}

/// Membership state mutated only under the daemon's membership mutex.
#[derive(Default)]
pub struct MembershipState {
    /// Last known member snapshot, keyed by member name. Pure data holder.
    pub registry: std::collections::BTreeMap<String, MemberHeartbeatInfo>,
    /// The most recently *applied* full heartbeat, used only for diffing.
    /// Replaced atomically after each successful apply, never mutated in
    /// place.
    pub last_node_list: Option<HeartbeatData>,
}

/// Flags for the leader's in-flight heartbeat round.
#[derive(Default)]
pub struct HeartbeatRound {
    pub in_flight: AtomicBool,
    /// Set when a fresher full heartbeat arrived while a round was in
    /// flight; the round reruns its refresh instead of a second concurrent
    /// refresh starting.
    pub restart: AtomicBool,
    /// The fresher heartbeat itself, stashed before `restart` is set. The
    /// restarted round refreshes against this, not its own stale copy.
    pub pending: std::sync::Mutex<Option<HeartbeatData>>,
}

pub struct Daemon {
    pub local_name: String,
    pub local_address: String,
    pub cfg: ClusterConfig,
    pub api: Collaborators,
    pub node_store: RaftNodeStore,
    pub membership: Mutex<MembershipState>,
    pub round: HeartbeatRound,
    /// Level-trigger latch for the cluster time-skew warning.
    pub skew_warning_raised: AtomicBool,
    /// False until the replicated database handle is usable; membership
    /// refresh is a no-op before then (startup race guard).
    db_ready: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Daemon {
    pub fn open(
        local_name: impl Into<String>,
        local_address: impl Into<String>,
        data_dir: impl AsRef<Path>,
        cfg: ClusterConfig,
        api: Collaborators,
    ) -> anyhow::Result<Arc<Self>> {
        let node_store = RaftNodeStore::open(data_dir.as_ref().join("raft_nodes.json"))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Arc::new(Self {
            local_name: local_name.into(),
            local_address: local_address.into(),
            cfg,
            api,
            node_store,
            membership: Mutex::new(MembershipState::default()),
            round: HeartbeatRound::default(),
            skew_warning_raised: AtomicBool::new(false),
            db_ready: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
        }))
    }

    /// Mark the replicated database handle as initialized.
    pub fn mark_db_ready(&self) {
        self.db_ready.store(true, Ordering::SeqCst);
    }

    pub fn db_ready(&self) -> bool {
        self.db_ready.load(Ordering::SeqCst)
    }

    /// Probe current leadership via the quorum collaborator.
    pub async fn leadership(&self) -> anyhow::Result<Leadership> {
        match self.api.quorum.leader_address().await {
            Ok(addr) if addr == self.local_address => Ok(Leadership::Leader),
            Ok(_) => Ok(Leadership::Follower),
            Err(err) if is_cluster_error(&err, ClusterError::NotLeader) => Ok(Leadership::Follower),
            Err(err) if is_cluster_error(&err, ClusterError::NodeNotClustered) => {
                Ok(Leadership::Standalone)
            }
            Err(err) => Err(err),
        }
    }

    /// Cancellation signal tied to daemon shutdown. Control loops check it
    /// at network-call boundaries.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
