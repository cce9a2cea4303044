// Warren cluster daemon entry point.
//
// Wires CLI arguments and logging, opens local state, and runs the
// coordination loops until shutdown. The HTTP transport that feeds
// heartbeats into `heartbeat::handle_heartbeat` is hosted by the parent
// daemon and not part of this binary's scope; it registers the collaborator
// implementations at startup.

use std::io::IsTerminal;
use std::sync::Arc;

use clap::Parser;
use warren_cluster::config::{ClusterConfig, NodeArgs};
use warren_cluster::daemon::{Collaborators, Daemon};
use warren_cluster::rebalance_manager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Enable ANSI colors only when stdout is a terminal and NO_COLOR is unset.
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = NodeArgs::parse();
    let cfg = ClusterConfig::from_args(&args);
    let api = build_collaborators();

    let daemon = Daemon::open(
        args.member_name.clone(),
        args.listen_address.to_string(),
        &args.data_dir,
        cfg,
        api,
    )?;
    daemon.mark_db_ready();

    tracing::info!(
        member = %daemon.local_name,
        address = %daemon.local_address,
        "warren cluster coordination started"
    );

    let scheduler = rebalance_manager::spawn(daemon.clone());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    daemon.trigger_shutdown();
    let _ = scheduler.await;
    Ok(())
}

/// Collaborator wiring for the standalone binary.
///
/// The full daemon injects transport-backed implementations here; the
/// standalone binary runs with inert ones so the coordination loops can be
/// exercised in isolation (soak testing, profiling).
fn build_collaborators() -> Collaborators {
    use async_trait::async_trait;
    use warren_cluster::error::ClusterError;
    use warren_cluster::load::{local_usage, ServerUsage};
    use warren_cluster::services::*;
    use warren_cluster::MemberHeartbeatInfo;

    struct Inert;

    #[async_trait]
    impl QuorumManager for Inert {
        async fn replace_unavailable_role_holders(&self, _: &[String]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn promote_unjoined_members(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn leader_address(&self) -> anyhow::Result<String> {
            Err(ClusterError::NodeNotClustered.into())
        }
    }

    #[async_trait]
    impl ResourceReporter for Inert {
        async fn get_utilization(&self, _member_address: &str) -> anyhow::Result<ServerUsage> {
            Ok(local_usage())
        }
    }

    #[async_trait]
    impl MigrationApi for Inert {
        async fn live_migrate(&self, _: &str, _: &str) -> anyhow::Result<OperationHandle> {
            anyhow::bail!("no migration backend registered")
        }
        async fn wait(&self, _: OperationHandle) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl InstanceInventory for Inert {
        async fn local_instances(&self, _: &str) -> anyhow::Result<Vec<InstanceInfo>> {
            Ok(vec![])
        }
        async fn set_instance_config(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl CertificateCache for Inert {
        async fn refresh(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl EventBus for Inert {
        async fn resubscribe_listeners(&self, _: &[MemberHeartbeatInfo]) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl WarningStore for Inert {
        async fn upsert(&self, kind: WarningKind, message: &str) -> anyhow::Result<()> {
            tracing::warn!(?kind, message, "cluster warning");
            Ok(())
        }
        async fn resolve_by_kind(&self, kind: WarningKind) -> anyhow::Result<()> {
            tracing::info!(?kind, "cluster warning resolved");
            Ok(())
        }
    }

    #[async_trait]
    impl ProjectPolicy for Inert {
        async fn can_place_on(&self, _: &str, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl UpgradeChecker for Inert {
        async fn check_upgrade(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let inert = Arc::new(Inert);
    Collaborators {
        quorum: inert.clone(),
        resources: inert.clone(),
        migration: inert.clone(),
        instances: inert.clone(),
        certificates: inert.clone(),
        events: inert.clone(),
        warnings: inert.clone(),
        projects: inert.clone(),
        upgrades: inert,
    }
}
