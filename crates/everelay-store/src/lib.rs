mod ingest;
mod query;
pub mod tables;

use std::ops;
use std::path::{Path, PathBuf};

use everelay_core::event::Event;
use everelay_core::Seq;
use snafu::{Location, ResultExt as _, Snafu};
use tokio::sync::broadcast;
use tokio::task::JoinError;

pub use self::ingest::IngestOutcome;
pub use self::query::{ChangesOptions, ChangesResult};
pub use self::tables::EventRecord;

const LOG_TARGET: &str = "everelay::store";

/// An event that was newly persisted (or, for ephemeral kinds, accepted
/// without persistence) and should be fanned out to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastEvent {
    pub event: Event,
    /// `None` for ephemeral events, which are never assigned a seq.
    pub seq: Option<Seq>,
}

#[derive(Debug, Snafu)]
pub enum StoreError {
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    Join {
        source: JoinError,
        #[snafu(implicit)]
        location: Location,
    },
    Overflow,
}
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Wraps a `redb_bincode::WriteTransaction`, queuing callbacks to run only
/// after a successful commit (used to defer broadcaster notification until
/// the event is durably persisted).
pub struct WriteTransactionCtx {
    dbtx: redb_bincode::WriteTransaction,
    on_commit: std::sync::Mutex<Vec<Box<dyn FnOnce() + 'static>>>,
}

impl From<redb_bincode::WriteTransaction> for WriteTransactionCtx {
    fn from(dbtx: redb_bincode::WriteTransaction) -> Self {
        Self {
            dbtx,
            on_commit: std::sync::Mutex::new(vec![]),
        }
    }
}

impl ops::Deref for WriteTransactionCtx {
    type Target = redb_bincode::WriteTransaction;

    fn deref(&self) -> &Self::Target {
        &self.dbtx
    }
}

impl ops::DerefMut for WriteTransactionCtx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.dbtx
    }
}

impl WriteTransactionCtx {
    pub fn on_commit(&self, f: impl FnOnce() + 'static) {
        self.on_commit
            .lock()
            .expect("on_commit lock poisoned")
            .push(Box::new(f));
    }

    fn commit(self) -> Result<(), redb::CommitError> {
        let Self { dbtx, on_commit } = self;
        dbtx.commit()?;
        for hook in on_commit.lock().expect("on_commit lock poisoned").drain(..) {
            hook();
        }
        Ok(())
    }
}

/// The persistent, indexed event repository.
pub struct Store {
    inner: redb_bincode::Database,
    broadcast_tx: broadcast::Sender<BroadcastEvent>,
}

impl Store {
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let inner = tokio::task::spawn_blocking(move || redb::Database::create(path))
            .await
            .context(JoinSnafu)?
            .context(DatabaseSnafu)?;
        Self::open_inner(inner).await
    }

    pub async fn open_in_memory() -> StoreResult<Self> {
        tracing::debug!(target: LOG_TARGET, "opening in-memory store");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(DatabaseSnafu)?;
        Self::open_inner(inner).await
    }

    async fn open_inner(inner: redb::Database) -> StoreResult<Self> {
        let inner = redb_bincode::Database::from(inner);
        Self::write_with_inner(&inner, |tx| {
            tx.open_table(&tables::events::TABLE)?;
            tx.open_table(&tables::events_by_seq::TABLE)?;
            tx.open_table(&tables::event_tags::TABLE)?;
            tx.open_table(&tables::replaceable_index::TABLE)?;
            tx.open_table(&tables::addressable_index::TABLE)?;
            tx.open_table(&tables::seq_counter::TABLE)?;
            Ok(())
        })
        .await?;

        let (broadcast_tx, _) = broadcast::channel(1024);

        Ok(Self {
            inner,
            broadcast_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.broadcast_tx.subscribe()
    }

    pub(crate) async fn write_with_inner<T>(
        inner: &redb_bincode::Database,
        f: impl FnOnce(&WriteTransactionCtx) -> StoreResult<T>,
    ) -> StoreResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = WriteTransactionCtx::from(inner.begin_write().context(TransactionSnafu)?);
            let res = f(&dbtx)?;
            dbtx.commit().context(CommitSnafu)?;
            Ok(res)
        })
    }

    pub(crate) async fn write_with<T>(
        &self,
        f: impl FnOnce(&WriteTransactionCtx) -> StoreResult<T>,
    ) -> StoreResult<T> {
        Self::write_with_inner(&self.inner, f).await
    }

    pub(crate) async fn read_with<T>(
        &self,
        f: impl FnOnce(&redb_bincode::ReadTransaction) -> StoreResult<T>,
    ) -> StoreResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_read().context(TransactionSnafu)?;
            f(&dbtx)
        })
    }

    /// Default on-disk database file name for a given data directory.
    pub fn default_db_path(data_dir: &Path) -> PathBuf {
        data_dir.join("everelay.redb")
    }
}
