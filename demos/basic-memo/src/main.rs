//! Walks one agent's memories through add, list, search, update and delete.
//!
//! Runs fully in process by default. With `--remote` it uses the SQLite
//! database, Qdrant endpoint and `OpenAI` key from the configuration.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use memo::adapters::hashing::HashingEmbedder;
use memo::adapters::openai::OpenAiEmbedder;
use memo::config::MemoConfig;
use memo::prelude::*;
use memo::store::{LocalDocumentStore, LocalVectorIndex, QdrantIndex, SqliteDocumentStore};
use memo::telemetry::init_tracing;
use tracing::info;

#[derive(Debug, Parser)]
#[command(about = "Basic memo walkthrough")]
struct Args {
    /// TOML configuration file. Missing files fall back to defaults.
    #[arg(long, default_value = "memo.toml")]
    config: PathBuf,

    /// Use SQLite, Qdrant and OpenAI instead of in-process backends.
    #[arg(long)]
    remote: bool,

    /// Agent to operate on. A random one is used when omitted.
    #[arg(long)]
    agent: Option<AgentId>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = MemoConfig::load(&args.config).context("loading configuration")?;
    init_tracing(&config.telemetry_config().with_target(false));

    let engine = if args.remote {
        remote_engine(&config).await?
    } else {
        local_engine(&config)?
    };
    let agent = args.agent.unwrap_or_else(AgentId::random);

    engine.open_agent(agent).await?;
    info!(%agent, remote = args.remote, "agent ready");

    let ids = engine
        .add(
            agent,
            vec![
                MemoryDraft::new("The user prefers tea over coffee"),
                MemoryDraft::new("The user lives in Lisbon"),
                MemoryDraft::new("The user is learning Rust"),
            ],
        )
        .await?;
    info!(count = ids.len(), "memories added");

    for memory in engine.list(agent, None).await? {
        info!(id = %memory.id(), content = memory.content(), "listed");
    }

    let results = engine.search(agent, "what does the user drink?").await?;
    for (memory, score) in results.iter() {
        info!(score, content = memory.content(), "search hit");
    }

    let modified = engine
        .update(
            agent,
            vec![MemoryUpdate::new(ids[0], "The user prefers green tea")],
        )
        .await?;
    info!(count = modified.len(), "memories updated");

    engine.delete(agent, &ids[1..]).await?;
    let remaining = engine.list(agent, None).await?;
    info!(remaining = remaining.len(), "memories deleted");

    if !args.remote {
        engine.purge_agent(agent).await?;
    }
    Ok(())
}

fn local_engine(config: &MemoConfig) -> Result<MemoryEngine> {
    let dimensions = NonZeroUsize::new(256).context("embedding width")?;
    let engine = MemoryEngine::new(
        Arc::new(LocalDocumentStore::new()),
        Arc::new(LocalVectorIndex::new()),
        Arc::new(HashingEmbedder::new(dimensions)),
        config.engine_config()?,
    )?;
    Ok(engine)
}

async fn remote_engine(config: &MemoConfig) -> Result<MemoryEngine> {
    let documents = SqliteDocumentStore::connect(&config.database_url)
        .await
        .context("connecting to the document store")?;
    let vectors = QdrantIndex::new(config.qdrant_config()?)?;
    let embedder = OpenAiEmbedder::new(config.openai_config()?)?;

    let engine = MemoryEngine::new(
        Arc::new(documents),
        Arc::new(vectors),
        Arc::new(embedder),
        config.engine_config()?,
    )?;
    Ok(engine)
}
