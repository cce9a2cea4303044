//! Seams to the collaborators this subsystem consumes.
//!
//! Everything behind these traits is external to the coordination core: the
//! quorum-management side of the replicated database, per-member resource
//! reporting, the instance migration API, certificate/trust caching, the
//! cluster event bus, the persistent warning store, and project placement
//! policy. Each trait has a single implementation per transport in the full
//! daemon; tests substitute recording mocks.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::cluster::MemberHeartbeatInfo;
use crate::load::ServerUsage;

/// Quorum management on top of the replicated log.
///
/// Calls fail with `ClusterError::NotLeader` when a leadership change raced
/// with the caller, and with `ClusterError::NodeNotClustered` on standalone
/// members.
#[async_trait]
pub trait QuorumManager: Send + Sync {
    /// Replace voter/standby role holders named in `unavailable` with
    /// currently-spare online members, then promote further online members
    /// if the voter/standby counts remain short of their targets.
    async fn replace_unavailable_role_holders(&self, unavailable: &[String]) -> anyhow::Result<()>;

    /// Assign raft ids to members that have none yet.
    async fn promote_unjoined_members(&self) -> anyhow::Result<()>;

    /// Address of the current raft leader.
    async fn leader_address(&self) -> anyhow::Result<String>;
}

/// Network fetch of a member's raw resource counters.
#[async_trait]
pub trait ResourceReporter: Send + Sync {
    async fn get_utilization(&self, member_address: &str) -> anyhow::Result<ServerUsage>;
}

/// Opaque handle for an in-flight migration operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle(pub String);

/// Live-migration calls toward the instance execution layer.
#[async_trait]
pub trait MigrationApi: Send + Sync {
    async fn live_migrate(
        &self,
        instance: &str,
        target_member: &str,
    ) -> anyhow::Result<OperationHandle>;

    async fn wait(&self, op: OperationHandle) -> anyhow::Result<()>;
}

/// How an instance can be moved between members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationCapability {
    /// Can move while running.
    Live,
    /// Must be stopped to move.
    Stateless,
    /// Cannot be moved at all.
    None,
}

/// An instance as seen by the migration selector.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub name: String,
    pub project: String,
    pub migration: MigrationCapability,
    /// Instance-local configuration, including the rebalance cooldown marker.
    pub config: BTreeMap<String, String>,
    pub usage: ServerUsage,
}

/// Inventory of instances local to a member, plus instance-config writes.
#[async_trait]
pub trait InstanceInventory: Send + Sync {
    async fn local_instances(&self, member: &str) -> anyhow::Result<Vec<InstanceInfo>>;

    async fn set_instance_config(
        &self,
        instance: &str,
        key: &str,
        value: &str,
    ) -> anyhow::Result<()>;
}

/// Trust-material cache refresh. Fire-and-forget from this subsystem's
/// perspective; failures are logged, never propagated.
#[async_trait]
pub trait CertificateCache: Send + Sync {
    async fn refresh(&self) -> anyhow::Result<()>;
}

/// Cluster event forwarding.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn resubscribe_listeners(&self, members: &[MemberHeartbeatInfo]) -> anyhow::Result<()>;
}

/// Kinds of persistent warnings this subsystem raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    ClusterTimeSkew,
}

/// Persistent, user-visible warnings. Upserts are deduplicated by kind on
/// the store side; this subsystem additionally level-triggers them.
#[async_trait]
pub trait WarningStore: Send + Sync {
    async fn upsert(&self, kind: WarningKind, message: &str) -> anyhow::Result<()>;
    async fn resolve_by_kind(&self, kind: WarningKind) -> anyhow::Result<()>;
}

/// Per-project placement policy.
#[async_trait]
pub trait ProjectPolicy: Send + Sync {
    /// Err when the project's placement rules forbid scheduling onto
    /// `target_member`.
    async fn can_place_on(&self, project: &str, target_member: &str) -> anyhow::Result<()>;
}

/// Schema/API upgrade probe, run when a heartbeat reports a version bump so
/// no member is promoted or demoted while an upgrade might be in flight.
#[async_trait]
pub trait UpgradeChecker: Send + Sync {
    async fn check_upgrade(&self) -> anyhow::Result<()>;
}
