//! Cluster membership data model and local raft-node persistence.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// A member's position in the replicated-log quorum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RaftRole {
    Voter,
    StandBy,
    Spare,
}

/// Version information carried by a heartbeat so members can detect
/// API/schema drift before acting on role decisions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionInfo {
    pub api_extensions: u32,
    pub schema: u32,
    pub min_api_extensions: u32,
}

impl VersionInfo {
    /// True when `self` advanced past `prev` on either axis.
    pub fn advanced_past(&self, prev: &VersionInfo) -> bool {
        self.api_extensions > prev.api_extensions || self.schema > prev.schema
    }
}

/// One member's liveness and role snapshot as seen by the heartbeat sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberHeartbeatInfo {
    pub name: String,
    pub address: String,
    pub online: bool,
    pub architecture: String,
    /// Raft id in the replicated log. `0` means the member has not joined
    /// the log yet.
    pub raft_id: u64,
    pub raft_role: RaftRole,
    /// Generic capability tags, e.g. "ovn-chassis".
    pub roles: Vec<String>,
}

/// Heartbeat payload received from the leader (or pushed out by it).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatData {
    /// Sender's wall clock, unix milliseconds.
    pub time_unix_ms: u64,
    /// True when `members` is the complete cluster view rather than a delta.
    pub full_state_list: bool,
    pub members: Vec<MemberHeartbeatInfo>,
    pub version: VersionInfo,
}

impl HeartbeatData {
    /// Members that are part of the replicated log, as durable node records.
    pub fn raft_nodes(&self) -> Vec<RaftNode> {
        self.members
            .iter()
            .filter(|m| m.raft_id != 0)
            .map(|m| RaftNode {
                id: m.raft_id,
                address: m.address.clone(),
                role: m.raft_role,
                name: m.name.clone(),
            })
            .collect()
    }
}

/// Durable representation of a log participant, persisted locally so this
/// member can always locate the log regardless of who currently leads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaftNode {
    pub id: u64,
    pub address: String,
    pub role: RaftRole,
    pub name: String,
}

/// Local (non-replicated) store for the raft node list.
///
/// The list is rewritten wholesale on every heartbeat, never patched
/// field-by-field, so readers can never observe a half-updated set.
#[derive(Clone)]
pub struct RaftNodeStore {
    nodes: Arc<RwLock<Vec<RaftNode>>>,
    path: PathBuf,
}

impl RaftNodeStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let nodes = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data).context("parse raft node list")?,
            Err(_) => Vec::new(),
        };
        Ok(Self {
            nodes: Arc::new(RwLock::new(nodes)),
            path,
        })
    }

    pub fn nodes(&self) -> Vec<RaftNode> {
        self.nodes.read().unwrap().clone()
    }

    /// Replace the persisted node list wholesale.
    pub fn replace(&self, nodes: Vec<RaftNode>) -> anyhow::Result<()> {
        {
            let mut guard = self.nodes.write().unwrap();
            *guard = nodes;
        }
        self.persist()
    }

    fn persist(&self) -> anyhow::Result<()> {
        let nodes = self.nodes.read().unwrap();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("create node store dir")?;
        }
        let data = serde_json::to_vec_pretty(&*nodes).context("serialize raft node list")?;
        fs::write(&self.path, data).context("write raft node list")?;
        Ok(())
    }
}

/// Whether a member whose last heartbeat response was at `last_seen_unix_ms`
/// should still be considered online at `now_unix_ms`.
pub fn is_online(last_seen_unix_ms: u64, now_unix_ms: u64, offline_threshold_ms: u64) -> bool {
    now_unix_ms.saturating_sub(last_seen_unix_ms) <= offline_threshold_ms
}

pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}
