// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use mycel_a2a::{BrokerClient, InMemoryBroker};
use mycel_agent::{AgentComponent, EchoAdapter};
use mycel_blob::{
    blob_store_from_env, ArtifactStore, BlobStore, FilesystemBlobStore, MemoryBlobStore,
};
use mycel_config::{BlobBackend, Config};
use mycel_store::CheckpointStore;
use mycel_tools::{builtin::process_file_tool, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::ShowConfig => {
            let config = mycel_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::ToolRunner { spec } => {
            // Child half of the sandbox: same registry as the agent, exit
            // code is the contract with the parent.
            let registry = Arc::new(build_registry());
            let code = mycel_sandbox::tool_runner::run(registry, spec).await;
            std::process::exit(code);
        }
        Commands::Run => {
            let config = Arc::new(mycel_config::load(cli.config.as_deref())?);
            run_agent(config).await
        }
    }
}

fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(process_file_tool());
    registry
}

async fn run_agent(config: Arc<Config>) -> anyhow::Result<()> {
    // Config wins; DATABASE_URL is the deployment-level fallback.
    let db_path = config
        .storage
        .database_path
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());
    let store = match db_path.as_deref() {
        Some(":memory:") | None => CheckpointStore::open_in_memory()
            .map_err(|e| anyhow::anyhow!("opening checkpoint store: {e}"))?,
        Some(path) => CheckpointStore::open(std::path::Path::new(path))
            .map_err(|e| anyhow::anyhow!("opening checkpoint store: {e}"))?,
    };

    let blob: Arc<dyn BlobStore> = match (&config.storage.blob.backend, &config.storage.blob.root)
    {
        (BlobBackend::Memory, _) => Arc::new(MemoryBlobStore::new()),
        (BlobBackend::Filesystem, Some(root)) => Arc::new(
            FilesystemBlobStore::new(root.clone())
                .map_err(|e| anyhow::anyhow!("opening blob store: {e}"))?,
        ),
        // No explicit root: honour the OBJECT_STORAGE_* environment.
        (BlobBackend::Filesystem, None) => {
            blob_store_from_env().map_err(|e| anyhow::anyhow!("blob store from env: {e}"))?
        }
    };

    // The broker client is injected in production deployments; the built-in
    // broker serves single-process meshes and local development.
    let broker: Arc<dyn BrokerClient> = Arc::new(InMemoryBroker::new());

    let component = AgentComponent::new(
        Arc::clone(&config),
        broker,
        Arc::new(store),
        Arc::new(EchoAdapter),
        Arc::new(build_registry()),
        ArtifactStore::new(blob),
    );
    let handle = component.start().await.context("starting agent")?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

/// Tracing goes to stderr; `RUST_LOG` overrides the default filter, which
/// is `info` with `--verbose` and `warn` otherwise.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
