use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use clap::{Args, Parser};

/// Command line options for the everelay server.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Address to listen on.
    #[arg(long, env = "RELAY_LISTEN", default_value = "127.0.0.1:7777")]
    pub listen: String,

    /// Path to the database file. Defaults to a per-OS data directory.
    #[arg(long, env = "RELAY_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Run with an in-memory, non-persistent store. Convenient for tests
    /// and demos; `db_path` is ignored when set.
    #[arg(long, env = "RELAY_IN_MEMORY")]
    pub in_memory: bool,
}

static PROJECT_DIRS: LazyLock<directories::ProjectDirs> = LazyLock::new(|| {
    directories::ProjectDirs::from("org", "everelay", "everelay")
        .expect("unable to determine project dirs")
});

impl GlobalOpts {
    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| {
            let dir = data_dir();
            everelay_store::Store::default_db_path(dir)
        })
    }
}

fn data_dir() -> &'static Path {
    PROJECT_DIRS
        .state_dir()
        .unwrap_or_else(|| PROJECT_DIRS.data_local_dir())
}
