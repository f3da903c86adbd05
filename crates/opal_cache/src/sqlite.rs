//! SQLite-backed implementation of the compilation store.
//!
//! One row per cache entry with composite primary key
//! `(container, path, hash)`, plus a one-row `metadata` table holding the
//! schema version. A version mismatch on open discards the database and
//! recreates it empty rather than risk serving incompatible payloads.
//!
//! Successful reads do not write their access timestamp immediately:
//! bumps coalesce in memory and flush as a single transaction after a
//! short delay, or eagerly before eviction and close.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::CacheError;
use crate::store::CompilationStore;

/// Schema version stamp. Must be bumped whenever the table layout or the
/// payload encoding changes.
const SCHEMA_VERSION: &str = "1";

/// Payloads larger than this are stored zlib-compressed.
pub const COMPRESSION_BYTES_THRESHOLD: usize = 500;

/// Delay before coalesced access-time updates are written out.
const FLUSH_DELAY: Duration = Duration::from_secs(6);

/// A raw row from the `entries` table.
///
/// `data` is returned exactly as stored; compressed payloads are not
/// inflated. Intended for inspection and tests.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// Canonical file path component of the key.
    pub path: String,
    /// Logical operation namespace component of the key.
    pub container: String,
    /// Content hash component of the key.
    pub hash: String,
    /// Milliseconds since the Unix epoch of the last read or write.
    pub last_access_date: i64,
    /// Whether `data` holds a zlib stream.
    pub compressed: bool,
    /// The stored payload bytes.
    pub data: Vec<u8>,
}

/// A pending last-access update for one entry.
struct AccessBump {
    path: String,
    container: String,
    hash: String,
    timestamp: i64,
}

#[derive(Default)]
struct PendingBumps {
    bumps: Vec<AccessBump>,
    flush_task: Option<JoinHandle<()>>,
}

struct StoreInner {
    conn: Mutex<Option<Connection>>,
    pending: Mutex<PendingBumps>,
    clock: Arc<dyn Clock>,
}

/// SQLite-backed `CompilationStore`.
///
/// Cheap to clone; all clones share the same connection and pending-update
/// queue.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
}

fn prepare_database(conn: &Connection, resolved_version: &str) -> Result<(), CacheError> {
    conn.execute_batch(
        "CREATE TABLE metadata(
            version TEXT NOT NULL,
            PRIMARY KEY(version)
        );
        CREATE TABLE entries(
            path TEXT NOT NULL,
            container TEXT NOT NULL,
            hash TEXT NOT NULL,
            last_access_date INTEGER NOT NULL,
            compressed INTEGER NOT NULL,
            data BLOB,
            PRIMARY KEY(container, path, hash)
        );",
    )?;
    conn.execute("INSERT INTO metadata VALUES (?1)", [resolved_version])?;
    Ok(())
}

fn read_version(conn: &Connection) -> Result<String, rusqlite::Error> {
    conn.query_row("SELECT version FROM metadata", [], |row| row.get(0))
}

fn create_database(
    db_path: Option<&Path>,
    workspace_version: &str,
) -> Result<Connection, CacheError> {
    let resolved_version = format!("{SCHEMA_VERSION}/{workspace_version}");

    let Some(path) = db_path else {
        let conn = Connection::open_in_memory()?;
        prepare_database(&conn, &resolved_version)?;
        return Ok(conn);
    };

    if !path.exists() {
        debug!("creating new compilation cache database");
        let conn = Connection::open(path)?;
        prepare_database(&conn, &resolved_version)?;
        return Ok(conn);
    }

    let conn = Connection::open(path)?;
    let up_to_date = match read_version(&conn) {
        Ok(version) if version == resolved_version => true,
        Ok(version) => {
            debug!("compilation cache database needs wipe (schema '{version}' is out of date)");
            false
        }
        Err(err) => {
            debug!("compilation cache database needs wipe ({err})");
            false
        }
    };

    if up_to_date {
        return Ok(conn);
    }

    drop(conn);
    std::fs::remove_file(path).map_err(|e| CacheError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let conn = Connection::open(path)?;
    prepare_database(&conn, &resolved_version)?;
    Ok(conn)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|source| CacheError::Compression { source })
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|source| CacheError::Compression { source })?;
    Ok(out)
}

impl SqliteStore {
    /// Opens (or creates) the database at `db_path`.
    ///
    /// `workspace_version` becomes part of the schema stamp, so a tooling
    /// upgrade invalidates the whole store. An existing database with a
    /// different stamp is deleted and recreated empty.
    pub fn open(
        db_path: &Path,
        workspace_version: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        Self::new(Some(db_path), workspace_version, clock)
    }

    /// Creates a store that lives entirely in memory.
    pub fn in_memory(workspace_version: &str, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        Self::new(None, workspace_version, clock)
    }

    fn new(
        db_path: Option<&Path>,
        workspace_version: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let conn = create_database(db_path, workspace_version)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(Some(conn)),
                pending: Mutex::new(PendingBumps::default()),
                clock,
            }),
        })
    }

    /// Returns every row currently in the store, in key order.
    ///
    /// Pending access-time updates are flushed first so the snapshot is
    /// consistent.
    pub fn entries(&self) -> Result<Vec<StoredEntry>, CacheError> {
        self.inner.flush_pending()?;

        let guard = self.inner.lock_conn();
        let conn = guard.as_ref().ok_or(CacheError::Closed)?;
        let mut stmt = conn.prepare_cached(
            "SELECT path, container, hash, last_access_date, compressed, data FROM entries
             ORDER BY container, path, hash",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredEntry {
                path: row.get(0)?,
                container: row.get(1)?,
                hash: row.get(2)?,
                last_access_date: row.get(3)?,
                compressed: row.get(4)?,
                data: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl StoreInner {
    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingBumps> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a last-access update and (re)arms the delayed flush.
    fn enqueue_bump(self: &Arc<Self>, bump: AccessBump) {
        let mut pending = self.lock_pending();
        pending.bumps.push(bump);

        if let Some(task) = pending.flush_task.take() {
            task.abort();
        }

        let weak = Arc::downgrade(self);
        pending.flush_task = Some(tokio::spawn(async move {
            tokio::time::sleep(FLUSH_DELAY).await;
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = inner.flush_pending() {
                    warn!("failed to flush deferred access-time updates: {err}");
                }
            }
        }));
    }

    /// Applies all queued access-time updates in one transaction.
    fn flush_pending(&self) -> Result<(), CacheError> {
        let bumps = {
            let mut pending = self.lock_pending();
            if let Some(task) = pending.flush_task.take() {
                task.abort();
            }
            std::mem::take(&mut pending.bumps)
        };

        if bumps.is_empty() {
            return Ok(());
        }

        let mut guard = self.lock_conn();
        let conn = guard.as_mut().ok_or(CacheError::Closed)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE entries
                 SET last_access_date = ?1
                 WHERE path = ?2 AND container = ?3 AND hash = ?4",
            )?;
            for bump in &bumps {
                stmt.execute(params![bump.timestamp, bump.path, bump.container, bump.hash])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl CompilationStore for SqliteStore {
    async fn get(
        &self,
        path: &str,
        container: &str,
        hash: &str,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        let timestamp = self.inner.clock.now_millis();

        let row: Option<(Vec<u8>, bool)> = {
            let guard = self.inner.lock_conn();
            let conn = guard.as_ref().ok_or(CacheError::Closed)?;
            let mut stmt = conn.prepare_cached(
                "SELECT data, compressed FROM entries
                 WHERE path = ?1 AND container = ?2 AND hash = ?3",
            )?;
            stmt.query_row(params![path, container, hash], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?
        };

        let Some((data, compressed)) = row else {
            return Ok(None);
        };

        self.inner.enqueue_bump(AccessBump {
            path: path.to_string(),
            container: container.to_string(),
            hash: hash.to_string(),
            timestamp,
        });

        if compressed {
            inflate(&data).map(Some)
        } else {
            Ok(Some(data))
        }
    }

    async fn set(
        &self,
        path: &str,
        container: &str,
        hash: &str,
        data: &[u8],
    ) -> Result<(), CacheError> {
        let timestamp = self.inner.clock.now_millis();

        let (payload, compressed) = if data.len() > COMPRESSION_BYTES_THRESHOLD {
            (deflate(data)?, true)
        } else {
            (data.to_vec(), false)
        };

        let guard = self.inner.lock_conn();
        let conn = guard.as_ref().ok_or(CacheError::Closed)?;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO entries VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(container, path, hash) DO UPDATE SET
                 last_access_date = excluded.last_access_date,
                 compressed = excluded.compressed,
                 data = excluded.data",
        )?;
        stmt.execute(params![path, container, hash, timestamp, compressed, payload])?;
        Ok(())
    }

    async fn evict_older_than(&self, cutoff_millis: i64) -> Result<(), CacheError> {
        self.inner.flush_pending()?;

        let guard = self.inner.lock_conn();
        let conn = guard.as_ref().ok_or(CacheError::Closed)?;
        let mut stmt =
            conn.prepare_cached("DELETE FROM entries WHERE last_access_date < ?1")?;
        stmt.execute([cutoff_millis])?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.inner.flush_pending()?;

        let conn = self.inner.lock_conn().take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, err)| CacheError::Database(err))?;
        }
        Ok(())
    }
}
