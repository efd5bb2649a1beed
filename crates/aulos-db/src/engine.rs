#![forbid(unsafe_code)]

//! The storage engine.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, LazyLock,
    },
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

type DbPool = Pool<SqliteConnectionManager>;

/// Databases currently held open by some engine in this process. A
/// `delete_database` call waits for the path to leave this set, which is
/// how "blocked on other connections closing" looks without cross-process
/// locks.
static OPEN_DATABASES: LazyLock<Mutex<HashSet<PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Transactional KV storage over SQLite.
///
/// Each store is a table of `(key INTEGER PRIMARY KEY, value BLOB)` rows.
/// Every operation runs in its own transaction on a pooled connection, so
/// concurrent operations serialize only in the storage engine itself.
pub struct DbEngine {
    pool: DbPool,
    path: PathBuf,
    stores: HashSet<String>,
    next_ids: Mutex<HashMap<String, u64>>,
    cancel: CancellationToken,
    in_flight: Arc<InFlight>,
}

impl DbEngine {
    /// Open or create the database at `path` with the given store names,
    /// retrying the open up to `retries` extra times.
    ///
    /// Missing stores are created; existing stores are scanned so reserved
    /// IDs continue strictly above every key ever persisted.
    pub async fn init(path: impl AsRef<Path>, stores: &[&str], retries: u32) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        for store in stores {
            validate_store_name(store)?;
        }
        let store_names: Vec<String> = stores.iter().map(ToString::to_string).collect();

        let mut attempt = 0;
        let (pool, next_ids) = loop {
            let path_for_open = path.clone();
            let stores_for_open = store_names.clone();
            let opened =
                tokio::task::spawn_blocking(move || open_blocking(&path_for_open, &stores_for_open))
                    .await
                    .map_err(|_| DbError::OperationAborted)?;

            match opened {
                Ok(opened) => break opened,
                Err(source) => {
                    attempt += 1;
                    if attempt > retries {
                        return Err(DbError::OpenFailed {
                            attempts: attempt,
                            source: Box::new(source),
                        });
                    }
                    warn!(
                        path = %path.display(),
                        attempt,
                        error = %source,
                        "aulos-db: open failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
            }
        };

        OPEN_DATABASES.lock().insert(path.clone());
        debug!(path = %path.display(), stores = store_names.len(), "aulos-db: database open");

        Ok(Self {
            pool,
            path,
            stores: store_names.into_iter().collect(),
            next_ids: Mutex::new(next_ids),
            cancel: CancellationToken::new(),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    /// Insert or replace `value` under `key`.
    pub async fn insert(&self, store: &str, key: u64, value: Bytes) -> DbResult<()> {
        let table = self.table(store)?;
        self.with_transaction(move |tx| {
            tx.execute(
                &format!("INSERT OR REPLACE INTO {table} (key, value) VALUES (?1, ?2)"),
                params![as_i64(key), &value[..]],
            )?;
            Ok(())
        })
        .await
    }

    /// The value under `key`, or `None`.
    pub async fn get(&self, store: &str, key: u64) -> DbResult<Option<Bytes>> {
        let table = self.table(store)?;
        self.with_transaction(move |tx| {
            let value: Option<Vec<u8>> = tx
                .query_row(
                    &format!("SELECT value FROM {table} WHERE key = ?1"),
                    params![as_i64(key)],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.map(Bytes::from))
        })
        .await
    }

    /// Delete the record under `key`, if present.
    pub async fn remove(&self, store: &str, key: u64) -> DbResult<()> {
        self.remove_keys(store, &[key]).await
    }

    /// Delete every listed key in one transaction.
    pub async fn remove_keys(&self, store: &str, keys: &[u64]) -> DbResult<()> {
        let table = self.table(store)?;
        let keys = keys.to_vec();
        self.with_transaction(move |tx| {
            let mut statement = tx.prepare(&format!("DELETE FROM {table} WHERE key = ?1"))?;
            for key in keys {
                statement.execute(params![as_i64(key)])?;
            }
            Ok(())
        })
        .await
    }

    /// Visit every record in key order.
    pub async fn for_each(
        &self,
        store: &str,
        mut callback: impl FnMut(u64, Bytes) + Send + 'static,
    ) -> DbResult<()> {
        let table = self.table(store)?;
        self.with_transaction(move |tx| {
            let mut statement =
                tx.prepare(&format!("SELECT key, value FROM {table} ORDER BY key"))?;
            let rows = statement.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            for row in rows {
                let (key, value) = row?;
                callback(from_i64(key), Bytes::from(value));
            }
            Ok(())
        })
        .await
    }

    /// Reserve the next ID for `store`. Strictly increasing across the
    /// process lifetime; purely in-memory after `init`.
    pub fn reserve_id(&self, store: &str) -> DbResult<u64> {
        if !self.stores.contains(store) {
            return Err(DbError::StoreNotFound(store.to_string()));
        }
        let mut next_ids = self.next_ids.lock();
        let next = next_ids.entry(store.to_string()).or_insert(1);
        let id = *next;
        *next += 1;
        Ok(id)
    }

    /// Abort in-flight operations and close the database.
    ///
    /// Operations that have not committed roll back and fail with
    /// [`DbError::OperationAborted`]; this resolves once all of them have
    /// settled. Later calls on this engine fail immediately.
    pub async fn destroy(&self) {
        self.cancel.cancel();
        self.in_flight.wait_idle().await;
        OPEN_DATABASES.lock().remove(&self.path);
        debug!(path = %self.path.display(), "aulos-db: database closed");
    }

    /// Delete the database files at `path`.
    ///
    /// Blocks until no engine in this process holds the database open, then
    /// removes the database and its WAL sidecars.
    pub async fn delete_database(path: impl AsRef<Path>) -> DbResult<()> {
        let path = path.as_ref().to_path_buf();
        while OPEN_DATABASES.lock().contains(&path) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            match std::fs::remove_file(PathBuf::from(file)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn table(&self, store: &str) -> DbResult<String> {
        if !self.stores.contains(store) {
            return Err(DbError::StoreNotFound(store.to_string()));
        }
        Ok(table_name(store))
    }

    /// Run `op` inside a fresh transaction on a pooled connection.
    ///
    /// The abort check sits between the operation and the commit: a destroy
    /// that lands mid-operation rolls the transaction back instead of
    /// letting the write slip in.
    async fn with_transaction<T: Send + 'static>(
        &self,
        op: impl FnOnce(&rusqlite::Transaction<'_>) -> DbResult<T> + Send + 'static,
    ) -> DbResult<T> {
        if self.cancel.is_cancelled() {
            return Err(DbError::OperationAborted);
        }

        let guard = self.in_flight.enter();
        let pool = self.pool.clone();
        let cancel = self.cancel.clone();

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let out = op(&tx)?;
            if cancel.is_cancelled() {
                // Dropping the transaction rolls it back.
                return Err(DbError::OperationAborted);
            }
            tx.commit()?;
            Ok(out)
        })
        .await
        .map_err(|_| DbError::OperationAborted)?
    }
}

fn open_blocking(path: &Path, stores: &[String]) -> DbResult<(DbPool, HashMap<String, u64>)> {
    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.execute_batch("PRAGMA journal_mode = WAL;"));
    let pool = Pool::builder().max_size(4).build(manager)?;

    let conn = pool.get()?;
    let mut next_ids = HashMap::new();
    for store in stores {
        let table = table_name(store);
        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS {table} (key INTEGER PRIMARY KEY, value BLOB NOT NULL)"),
            [],
        )?;
        let max: Option<i64> =
            conn.query_row(&format!("SELECT MAX(key) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        next_ids.insert(store.clone(), max.map_or(1, |m| from_i64(m) + 1));
    }
    Ok((pool, next_ids))
}

fn table_name(store: &str) -> String {
    format!("\"store_{store}\"")
}

fn validate_store_name(store: &str) -> DbResult<()> {
    let valid = !store.is_empty()
        && store
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidStoreName(store.to_string()))
    }
}

/// Keys are `u64` to callers but SQLite integers are signed; round-trip
/// through the bit pattern so the full range stays usable and ordered
/// lookups by exact key stay exact.
fn as_i64(key: u64) -> i64 {
    i64::from_ne_bytes(key.to_ne_bytes())
}

fn from_i64(key: i64) -> u64 {
    u64::from_ne_bytes(key.to_ne_bytes())
}

/// Count of operations currently inside `spawn_blocking`, with a notify
/// for the destroy path to await.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    notify: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            inner: Arc::clone(self),
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct InFlightGuard {
    inner: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}
