use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use data_group_member::config::MemberConfig;
use data_group_member::testing::{
    InMemoryLogApplier, InMemoryMetadataGroupHandle, InMemoryPeerClient, InMemorySchemaRegistry,
    InMemoryStorageEngine, RecordingLeaderForwarder,
};
use data_group_member::types::Node;
use data_group_member::DataGroupMemberFactory;
use dgm_core::DirLock;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "data-group-member")]
struct Args {
    /// Path to the member's TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Data directory this process locks for its lifetime.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = MemberConfig::load(&args.config).await?;

    std::fs::create_dir_all(&args.data_dir)?;
    let _lock = DirLock::open(&args.data_dir)?;

    let header = Node::new(
        config.local_address.clone(),
        config.local_meta_port,
        config.local_node_id,
    );

    // Real collaborators (storage engine, schema registry, metadata-group
    // handle, peer transport) are external to this crate; this binary
    // wires in-memory placeholders so the member is runnable standalone
    // until a concrete deployment supplies the real ones.
    let member = DataGroupMemberFactory::create(
        header.clone(),
        vec![header],
        config,
        Arc::new(InMemoryStorageEngine::new()),
        Arc::new(InMemorySchemaRegistry::new()),
        Arc::new(InMemoryLogApplier::new()),
        Arc::new(InMemoryMetadataGroupHandle::new()),
        Arc::new(InMemoryPeerClient::new()),
        Arc::new(RecordingLeaderForwarder::new()),
    );

    member.start();
    tracing::info!("data group member started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    member.stop();

    Ok(())
}
