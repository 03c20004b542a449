//! Picture ledger node

use anyhow::Context;
use clap::Parser;
use log::info;
use picture_ledger::batch::BatchHasher;
use picture_ledger::blockchain::Blockchain;
use picture_ledger::config::Config;
use picture_ledger::server::{self, AppState};
use picture_ledger::storage::{MemoryStorage, SledStorage, Storage};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.as_str()),
    )
    .init();

    if config.in_memory {
        info!("keeping the ledger in memory");
        run(MemoryStorage::new(), &config).await
    } else {
        let storage = SledStorage::open(&config.data_dir).with_context(|| {
            format!("failed to open ledger database at {}", config.data_dir.display())
        })?;
        run(storage, &config).await
    }
}

async fn run<S>(storage: S, config: &Config) -> anyhow::Result<()>
where
    S: Storage + Send + 'static,
{
    let hasher = BatchHasher::pooled(config.workers).context("failed to build hashing pool")?;
    let mut blockchain = Blockchain::open(storage).context("failed to load the ledger")?;
    if config.parallel_mining {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.unwrap_or(0))
            .thread_name(|i| format!("proof-search-{}", i))
            .build()
            .context("failed to build mining pool")?;
        info!("proof of work split across {} threads", pool.current_num_threads());
        blockchain = blockchain.with_mining_pool(Arc::new(pool));
    }
    info!(
        "ledger ready with {} block(s), last hash {}",
        blockchain.len(),
        blockchain
            .get_last_block()
            .map(|block| block.block_hash())
            .unwrap_or("-")
    );

    let state = AppState::new(blockchain, hasher);
    server::serve(config.bind, state.clone()).await?;

    if let Some(blockchain) = state.into_ledger() {
        blockchain.close().context("failed to flush the ledger")?;
    }
    Ok(())
}
