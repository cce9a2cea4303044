//! Shared helpers for integration tests: a recording mock for every
//! collaborator seam, plus snapshot builders.

// Each test binary compiles its own copy and uses a different subset.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use warren_cluster::cluster::{unix_time_ms, HeartbeatData, MemberHeartbeatInfo, RaftRole, VersionInfo};
use warren_cluster::config::{ClusterConfig, HeartbeatConfig, RebalanceConfig, RoleConfig};
use warren_cluster::daemon::{Collaborators, Daemon};
use warren_cluster::error::ClusterError;
use warren_cluster::load::ServerUsage;
use warren_cluster::services::{
    CertificateCache, EventBus, InstanceInfo, InstanceInventory, MigrationApi, OperationHandle,
    ProjectPolicy, QuorumManager, ResourceReporter, UpgradeChecker, WarningKind, WarningStore,
};

/// One mock implementing every collaborator trait, recording calls in order.
#[derive(Default)]
pub struct MockCluster {
    /// Ordered names of collaborator calls, for ordering assertions.
    pub log: Mutex<Vec<String>>,
    /// Address `leader_address` returns; `None` means `NodeNotClustered`.
    pub leader: Mutex<Option<String>>,
    /// Per-address usage served to the load scorer. Missing address = fetch
    /// failure.
    pub usage: Mutex<BTreeMap<String, ServerUsage>>,
    /// Per-member instance inventory.
    pub instances: Mutex<BTreeMap<String, Vec<InstanceInfo>>>,
    /// Projects whose placement policy rejects every target.
    pub denied_projects: Mutex<Vec<String>>,
    pub replace_calls: Mutex<Vec<Vec<String>>>,
    pub promote_calls: AtomicUsize,
    pub migrations: Mutex<Vec<(String, String)>>,
    pub config_writes: Mutex<Vec<(String, String, String)>>,
    pub upserted_warnings: Mutex<Vec<(WarningKind, String)>>,
    pub resolved_warnings: Mutex<Vec<WarningKind>>,
    /// When set, `replace_unavailable_role_holders` fails with `NotLeader`.
    pub replace_races_leadership: AtomicBool,
    /// When set, every `live_migrate` call fails.
    pub fail_migrations: AtomicBool,
    /// When set, `CertificateCache::refresh` stalls, holding a membership
    /// refresh open so tests can interleave a concurrent heartbeat.
    pub slow_certificates: AtomicBool,
}

impl MockCluster {
    pub fn leading(local_address: &str) -> Arc<Self> {
        let mock = Self::default();
        *mock.leader.lock().unwrap() = Some(local_address.to_string());
        Arc::new(mock)
    }

    pub fn following(leader_address: &str) -> Arc<Self> {
        let mock = Self::default();
        *mock.leader.lock().unwrap() = Some(leader_address.to_string());
        Arc::new(mock)
    }

    pub fn record(&self, call: &str) {
        self.log.lock().unwrap().push(call.to_string());
    }

    pub fn log_snapshot(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn set_usage(&self, address: &str, usage: ServerUsage) {
        self.usage
            .lock()
            .unwrap()
            .insert(address.to_string(), usage);
    }

    pub fn set_instances(&self, member: &str, instances: Vec<InstanceInfo>) {
        self.instances
            .lock()
            .unwrap()
            .insert(member.to_string(), instances);
    }
}

#[async_trait]
impl QuorumManager for MockCluster {
    async fn replace_unavailable_role_holders(&self, unavailable: &[String]) -> anyhow::Result<()> {
        self.record("quorum.replace");
        self.replace_calls.lock().unwrap().push(unavailable.to_vec());
        if self.replace_races_leadership.load(Ordering::SeqCst) {
            return Err(ClusterError::NotLeader.into());
        }
        Ok(())
    }

    async fn promote_unjoined_members(&self) -> anyhow::Result<()> {
        self.record("quorum.promote_unjoined");
        self.promote_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn leader_address(&self) -> anyhow::Result<String> {
        match self.leader.lock().unwrap().clone() {
            Some(addr) => Ok(addr),
            None => Err(ClusterError::NodeNotClustered.into()),
        }
    }
}

#[async_trait]
impl ResourceReporter for MockCluster {
    async fn get_utilization(&self, member_address: &str) -> anyhow::Result<ServerUsage> {
        self.record("resources.get");
        self.usage
            .lock()
            .unwrap()
            .get(member_address)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("member {member_address} unreachable"))
    }
}

#[async_trait]
impl MigrationApi for MockCluster {
    async fn live_migrate(
        &self,
        instance: &str,
        target_member: &str,
    ) -> anyhow::Result<OperationHandle> {
        self.record("migration.live_migrate");
        if self.fail_migrations.load(Ordering::SeqCst) {
            anyhow::bail!("target member unreachable");
        }
        self.migrations
            .lock()
            .unwrap()
            .push((instance.to_string(), target_member.to_string()));
        Ok(OperationHandle(format!("op-{instance}")))
    }

    async fn wait(&self, _op: OperationHandle) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl InstanceInventory for MockCluster {
    async fn local_instances(&self, member: &str) -> anyhow::Result<Vec<InstanceInfo>> {
        self.record(&format!("instances.list:{member}"));
        Ok(self
            .instances
            .lock()
            .unwrap()
            .get(member)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_instance_config(
        &self,
        instance: &str,
        key: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        self.config_writes.lock().unwrap().push((
            instance.to_string(),
            key.to_string(),
            value.to_string(),
        ));
        Ok(())
    }
}

#[async_trait]
impl CertificateCache for MockCluster {
    async fn refresh(&self) -> anyhow::Result<()> {
        self.record("certificates.refresh");
        if self.slow_certificates.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for MockCluster {
    async fn resubscribe_listeners(&self, _members: &[MemberHeartbeatInfo]) -> anyhow::Result<()> {
        self.record("events.resubscribe");
        Ok(())
    }
}

#[async_trait]
impl WarningStore for MockCluster {
    async fn upsert(&self, kind: WarningKind, message: &str) -> anyhow::Result<()> {
        self.record("warnings.upsert");
        self.upserted_warnings
            .lock()
            .unwrap()
            .push((kind, message.to_string()));
        Ok(())
    }

    async fn resolve_by_kind(&self, kind: WarningKind) -> anyhow::Result<()> {
        self.record("warnings.resolve");
        self.resolved_warnings.lock().unwrap().push(kind);
        Ok(())
    }
}

#[async_trait]
impl ProjectPolicy for MockCluster {
    async fn can_place_on(&self, project: &str, _target_member: &str) -> anyhow::Result<()> {
        self.record(&format!("projects.check:{project}"));
        if self
            .denied_projects
            .lock()
            .unwrap()
            .iter()
            .any(|p| p == project)
        {
            anyhow::bail!("project {project} is pinned to its current member");
        }
        Ok(())
    }
}

#[async_trait]
impl UpgradeChecker for MockCluster {
    async fn check_upgrade(&self) -> anyhow::Result<()> {
        self.record("upgrades.check");
        Ok(())
    }
}

pub fn collaborators(mock: &Arc<MockCluster>) -> Collaborators {
    Collaborators {
        quorum: mock.clone(),
        resources: mock.clone(),
        migration: mock.clone(),
        instances: mock.clone(),
        certificates: mock.clone(),
        events: mock.clone(),
        warnings: mock.clone(),
        projects: mock.clone(),
        upgrades: mock.clone(),
    }
}

pub const LOCAL_NAME: &str = "n1";
pub const LOCAL_ADDRESS: &str = "10.0.0.1:8443";

pub fn test_config() -> ClusterConfig {
    ClusterConfig {
        heartbeat: HeartbeatConfig {
            max_skew: Duration::from_secs(5),
            offline_threshold: Duration::from_secs(20),
        },
        roles: RoleConfig {
            target_voters: 3,
            target_standbys: 2,
        },
        rebalance: RebalanceConfig {
            interval_minutes: 5,
            threshold_percent: 10,
            batch_limit: 5,
            cooldown: Duration::from_secs(3_600),
        },
    }
}

pub fn test_daemon(
    mock: &Arc<MockCluster>,
    data_dir: &std::path::Path,
    cfg: ClusterConfig,
) -> Arc<Daemon> {
    let daemon = Daemon::open(LOCAL_NAME, LOCAL_ADDRESS, data_dir, cfg, collaborators(mock))
        .expect("open daemon");
    daemon.mark_db_ready();
    daemon
}

pub fn member(name: &str, raft_id: u64, role: RaftRole, online: bool) -> MemberHeartbeatInfo {
    MemberHeartbeatInfo {
        name: name.to_string(),
        address: format!("10.0.0.{}:8443", name.trim_start_matches('n')),
        online,
        architecture: "x86_64".to_string(),
        raft_id,
        raft_role: role,
        roles: vec![],
    }
}

pub fn full_heartbeat(members: Vec<MemberHeartbeatInfo>) -> HeartbeatData {
    HeartbeatData {
        time_unix_ms: unix_time_ms(),
        full_state_list: true,
        members,
        version: VersionInfo {
            api_extensions: 10,
            schema: 4,
            min_api_extensions: 1,
        },
    }
}

pub fn instance(
    name: &str,
    project: &str,
    memory_used: u64,
    cpu_used: u64,
) -> InstanceInfo {
    InstanceInfo {
        name: name.to_string(),
        project: project.to_string(),
        migration: warren_cluster::services::MigrationCapability::Live,
        config: BTreeMap::new(),
        usage: ServerUsage {
            memory_used,
            memory_total: 0,
            cpu_used,
            cpu_total: 0,
        },
    }
}
