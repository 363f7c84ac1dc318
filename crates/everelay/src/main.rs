use std::io;
use std::sync::Arc;

use clap::Parser as _;
use everelay::cli::Opts;
use everelay::error::{DataDirSnafu, RelayResult, StoreSnafu};
use everelay::server;
use everelay_store::Store;
use snafu::ResultExt as _;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const LOG_TARGET: &str = "everelay::main";

#[snafu::report]
#[tokio::main]
async fn main() -> RelayResult<()> {
    init_logging();

    let opts = Opts::parse();

    let store = if opts.global.in_memory {
        info!(target: LOG_TARGET, "opening in-memory store");
        Store::open_in_memory().await.context(StoreSnafu)?
    } else {
        let db_path = opts.global.db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context(DataDirSnafu)?;
        }
        info!(target: LOG_TARGET, path = %db_path.display(), "opening store");
        Store::open(db_path).await.context(StoreSnafu)?
    };

    let listener = server::bind(&opts.global.listen).await?;
    server::run(listener, Arc::new(store)).await
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();
}
