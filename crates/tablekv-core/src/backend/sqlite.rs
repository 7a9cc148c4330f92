//! SQLite-backed table service
//!
//! Each logical table is a SQLite table named `tkv_<name>` with the
//! composite primary key `(partition_key, row_key)`. Every write draws the
//! next value of a database-wide sequence kept in `tablekv_meta`, and the
//! ETag is built from it, so a tag is never reused for the life of the
//! database file, even after a row is deleted and created again.
//!
//! All tables share one connection. rusqlite is blocking, so every call
//! runs on the blocking thread pool with the connection locked there.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use super::connection::MAX_PAGE_SIZE;
use super::error::{codes, status, BackendError, BackendResult};
use super::{Continuation, Segment, ServiceProperties, Table, TableEntity, TableService};

const TABLE_PREFIX: &str = "tkv_";
const META_TABLE: &str = "tablekv_meta";
const ETAG_SEQUENCE: &str = "etag_sequence";

/// SQLite-backed table service (`DataSource=<path>`)
#[derive(Clone)]
pub struct SqliteTableService {
    conn: Arc<Mutex<Connection>>,
    page_size: usize,
}

impl SqliteTableService {
    /// Open (or create) the database at `path`; `:memory:` opens a private in-memory database
    pub fn open(path: &Path, page_size: usize) -> BackendResult<Self> {
        let opened = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BackendError::unavailable(format!("Failed to create directory {:?}", parent))
                        .with_source(e)
                })?;
            }
            Connection::open(path)
        };
        let conn = opened.map_err(|e| {
            BackendError::unavailable(format!("Failed to open database at {:?}", path)).with_source(e)
        })?;

        init_schema(&conn)?;

        info!(path = ?path, "Opened SQLite table service");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    /// Open a private in-memory database (for testing)
    pub fn open_in_memory(page_size: usize) -> BackendResult<Self> {
        Self::open(Path::new(":memory:"), page_size)
    }
}

impl TableService for SqliteTableService {
    type Table = SqliteTable;

    fn table(&self, name: &str) -> SqliteTable {
        SqliteTable {
            name: name.to_string(),
            conn: Arc::clone(&self.conn),
            page_size: self.page_size,
        }
    }

    async fn service_properties(&self) -> BackendResult<ServiceProperties> {
        let version = with_connection(&self.conn, |conn| {
            conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
                .map_err(map_sqlite_error)
        })
        .await?;
        Ok(ServiceProperties {
            kind: "sqlite",
            version,
        })
    }
}

/// Handle to one table of a [`SqliteTableService`]
pub struct SqliteTable {
    name: String,
    conn: Arc<Mutex<Connection>>,
    page_size: usize,
}

impl Table for SqliteTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_not_exists(&self) -> BackendResult<bool> {
        let name = self.name.clone();
        let sql_name = sql_name(&name)?;

        let created = with_connection(&self.conn, move |conn| {
            if table_exists(conn, &name)? {
                return Ok(false);
            }
            conn.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    partition_key TEXT NOT NULL,
                    row_key TEXT NOT NULL,
                    data TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    etag TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    PRIMARY KEY (partition_key, row_key)
                );
                "#,
                sql_name
            ))
            .map_err(map_sqlite_error)?;
            Ok(true)
        })
        .await?;

        if created {
            debug!(table = %self.name, "Created table");
        }
        Ok(created)
    }

    async fn insert(&self, entity: TableEntity) -> BackendResult<TableEntity> {
        let name = self.name.clone();
        with_connection(&self.conn, move |conn| {
            let sql_name = existing(conn, &name)?;

            let tx = conn.transaction().map_err(map_sqlite_error)?;
            let sequence = next_sequence(&tx)?;
            let stored = stamp(entity, sequence);
            write_row(
                &tx,
                &format!(
                    "INSERT INTO {} (partition_key, row_key, data, version, etag, timestamp) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    sql_name
                ),
                &stored,
                sequence,
            )?;
            tx.commit().map_err(map_sqlite_error)?;

            Ok(stored)
        })
        .await
    }

    async fn upsert(&self, entity: TableEntity, if_match: Option<&str>) -> BackendResult<TableEntity> {
        let name = self.name.clone();
        let if_match = if_match.map(str::to_string);
        with_connection(&self.conn, move |conn| {
            let sql_name = existing(conn, &name)?;

            // Read-check-write must not interleave with another writer
            let tx = conn.transaction().map_err(map_sqlite_error)?;
            if let Some(expected) = if_match {
                let current: Option<String> = tx
                    .query_row(
                        &format!(
                            "SELECT etag FROM {} WHERE partition_key = ? AND row_key = ?",
                            sql_name
                        ),
                        params![entity.partition_key, entity.row_key],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(map_sqlite_error)?;

                match current {
                    None => {
                        return Err(BackendError::not_found(format!(
                            "The specified entity does not exist: ({}, {})",
                            entity.partition_key, entity.row_key
                        )))
                    }
                    Some(etag) if etag != expected => {
                        return Err(BackendError::condition_not_satisfied(
                            "The update condition specified in the request was not satisfied",
                        ))
                    }
                    Some(_) => {}
                }
            }

            let sequence = next_sequence(&tx)?;
            let stored = stamp(entity, sequence);
            write_row(
                &tx,
                &format!(
                    "INSERT INTO {} (partition_key, row_key, data, version, etag, timestamp) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT (partition_key, row_key) DO UPDATE SET \
                     data = excluded.data, version = excluded.version, \
                     etag = excluded.etag, timestamp = excluded.timestamp",
                    sql_name
                ),
                &stored,
                sequence,
            )?;
            tx.commit().map_err(map_sqlite_error)?;

            Ok(stored)
        })
        .await
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> BackendResult<()> {
        let name = self.name.clone();
        let (partition_key, row_key) = (partition_key.to_string(), row_key.to_string());
        with_connection(&self.conn, move |conn| {
            let sql_name = existing(conn, &name)?;

            let removed = conn
                .execute(
                    &format!(
                        "DELETE FROM {} WHERE partition_key = ? AND row_key = ?",
                        sql_name
                    ),
                    params![partition_key, row_key],
                )
                .map_err(map_sqlite_error)?;

            if removed == 0 {
                return Err(BackendError::not_found(format!(
                    "The specified entity does not exist: ({}, {})",
                    partition_key, row_key
                )));
            }
            Ok(())
        })
        .await
    }

    async fn retrieve(&self, partition_key: &str, row_key: &str) -> BackendResult<Option<TableEntity>> {
        let name = self.name.clone();
        let (partition_key, row_key) = (partition_key.to_string(), row_key.to_string());
        with_connection(&self.conn, move |conn| {
            let sql_name = existing(conn, &name)?;

            let row = conn
                .query_row(
                    &format!(
                        "SELECT partition_key, row_key, data, etag, timestamp FROM {} \
                         WHERE partition_key = ? AND row_key = ?",
                        sql_name
                    ),
                    params![partition_key, row_key],
                    read_row,
                )
                .optional()
                .map_err(map_sqlite_error)?;

            row.map(EntityRow::into_entity).transpose()
        })
        .await
    }

    async fn query_partition(
        &self,
        partition_key: &str,
        continuation: Option<Continuation>,
    ) -> BackendResult<Segment> {
        let name = self.name.clone();
        let page_size = self.page_size;
        let partition_key = partition_key.to_string();
        let start_row = continuation.map(|c| c.next_row_key).unwrap_or_default();

        // Fetch one extra row to learn whether another segment follows
        let limit = i64::try_from(page_size)
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| {
                BackendError::new(
                    status::BAD_REQUEST,
                    codes::INVALID_INPUT,
                    format!("Page size {} is out of range", page_size),
                )
            })?;

        with_connection(&self.conn, move |conn| {
            let sql_name = existing(conn, &name)?;

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT partition_key, row_key, data, etag, timestamp FROM {} \
                     WHERE partition_key = ? AND row_key >= ? \
                     ORDER BY row_key LIMIT ?",
                    sql_name
                ))
                .map_err(map_sqlite_error)?;

            let rows = stmt
                .query_map(params![partition_key, start_row, limit], read_row)
                .map_err(map_sqlite_error)?;

            let mut entities = Vec::new();
            for row in rows {
                entities.push(row.map_err(map_sqlite_error)?.into_entity()?);
            }

            let continuation = if entities.len() > page_size {
                entities.pop().map(|extra| Continuation {
                    next_partition_key: extra.partition_key,
                    next_row_key: extra.row_key,
                })
            } else {
                None
            };

            Ok(Segment {
                entities,
                continuation,
            })
        })
        .await
    }
}

/// Run `op` against the shared connection on the blocking thread pool
async fn with_connection<T, F>(conn: &Arc<Mutex<Connection>>, op: F) -> BackendResult<T>
where
    F: FnOnce(&mut Connection) -> BackendResult<T> + Send + 'static,
    T: Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let mut guard = conn
            .lock()
            .map_err(|_| BackendError::internal("Database connection lock poisoned"))?;
        op(&mut guard)
    })
    .await
    .map_err(|e| BackendError::internal("Database task failed").with_source(e))?
}

fn init_schema(conn: &Connection) -> BackendResult<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        "#,
        META_TABLE
    ))
    .map_err(map_sqlite_error)
}

/// Advance the database-wide write sequence
fn next_sequence(conn: &Connection) -> BackendResult<i64> {
    conn.query_row(
        &format!(
            "INSERT INTO {} (name, value) VALUES (?1, 1) \
             ON CONFLICT (name) DO UPDATE SET value = value + 1 \
             RETURNING value",
            META_TABLE
        ),
        params![ETAG_SEQUENCE],
        |row| row.get(0),
    )
    .map_err(map_sqlite_error)
}

/// Quoted SQL identifier for a logical table
fn sql_name(name: &str) -> BackendResult<String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(BackendError::new(
            status::BAD_REQUEST,
            codes::INVALID_RESOURCE_NAME,
            format!("Table name '{}' must be alphanumeric", name),
        ));
    }
    Ok(format!("\"{}{}\"", TABLE_PREFIX, name))
}

fn table_exists(conn: &Connection, name: &str) -> BackendResult<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            params![format!("{}{}", TABLE_PREFIX, name)],
            |row| row.get(0),
        )
        .map_err(map_sqlite_error)?;
    Ok(count > 0)
}

/// Resolve the SQL name, failing with `404` when the table was never created
fn existing(conn: &Connection, name: &str) -> BackendResult<String> {
    let sql_name = sql_name(name)?;
    if !table_exists(conn, name)? {
        return Err(BackendError::table_not_found(name));
    }
    Ok(sql_name)
}

fn write_row(conn: &Connection, sql: &str, stored: &TableEntity, sequence: i64) -> BackendResult<()> {
    conn.execute(
        sql,
        params![
            stored.partition_key,
            stored.row_key,
            stored.data,
            sequence,
            stored.etag,
            stored.timestamp.map(|t| t.timestamp_millis()),
        ],
    )
    .map_err(map_sqlite_error)?;
    Ok(())
}

/// Raw row read from SQLite
struct EntityRow {
    partition_key: String,
    row_key: String,
    data: String,
    etag: String,
    timestamp: i64,
}

impl EntityRow {
    fn into_entity(self) -> BackendResult<TableEntity> {
        let timestamp = Utc
            .timestamp_millis_opt(self.timestamp)
            .single()
            .ok_or_else(|| {
                BackendError::internal(format!("Invalid stored timestamp: {}", self.timestamp))
            })?;

        Ok(TableEntity {
            partition_key: self.partition_key,
            row_key: self.row_key,
            data: self.data,
            etag: Some(self.etag),
            timestamp: Some(timestamp),
        })
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRow> {
    Ok(EntityRow {
        partition_key: row.get(0)?,
        row_key: row.get(1)?,
        data: row.get(2)?,
        etag: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

/// Stamp an entity with a write time and the ETag for a write sequence number
fn stamp(mut entity: TableEntity, sequence: i64) -> TableEntity {
    let now = truncate_to_millis(Utc::now());
    entity.etag = Some(format!(
        "W/\"datetime'{}'-{}\"",
        now.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        sequence
    ));
    entity.timestamp = Some(now);
    entity
}

/// Timestamps are stored with millisecond precision
fn truncate_to_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(t.timestamp_millis())
        .single()
        .unwrap_or(t)
}

/// Translate a SQLite failure into a table service status
fn map_sqlite_error(error: rusqlite::Error) -> BackendError {
    let base = match &error {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            BackendError::already_exists("The specified entity already exists")
        }
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            BackendError::unavailable("The database is busy")
        }
        _ => BackendError::internal("Database operation failed"),
    };
    base.with_source(error)
}
