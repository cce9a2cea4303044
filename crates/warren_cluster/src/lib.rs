//! Cluster coordination for the Warren container/VM orchestration daemon.
//!
//! Each process is one cluster member. This crate owns the heartbeat
//! protocol that keeps every member's view of the cluster consistent, the
//! consensus-role balancer that keeps enough members eligible to vote in the
//! replicated log, and the load-aware rebalancer that live-migrates
//! instances from over-loaded to under-loaded members. Transport, the
//! replicated database engine, and instance execution internals stay behind
//! the trait seams in [`services`].

pub mod cluster;
pub mod config;
pub mod daemon;
pub mod error;
pub mod heartbeat;
pub mod load;
pub mod membership;
pub mod rebalance_manager;
pub mod roles;
pub mod services;

pub use cluster::{HeartbeatData, MemberHeartbeatInfo, RaftNode, RaftRole, VersionInfo};
pub use daemon::{Collaborators, Daemon, Leadership};
pub use error::ClusterError;
pub use load::{ServerScore, ServerUsage};
