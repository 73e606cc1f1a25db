//! Session record storage backends
//!
//! In-memory and SQLite implementations of the [`RecordStore`] port. Both execute one
//! single-row statement per call and hand storage failures back as `StorageExec`.

use async_trait::async_trait;
use sqlsess_core::{RecordStore, SessionRecord, SessionResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory record storage
#[derive(Debug, Default, Clone)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_row(&self, record: &SessionRecord) -> SessionResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            let e = std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("duplicate session id {}", record.id),
            );
            return Err(sqlsess_core::storage_error!("insert_row", "memory_store", e));
        }
        records.insert(record.id.clone(), record.clone());
        debug!(session_id = %record.id, "Inserted session record into memory storage");
        Ok(())
    }

    async fn update_row(&self, id: &str, data: &str, expire_on: &str) -> SessionResult<u64> {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) => {
                record.data = data.to_string();
                record.expire_on = expire_on.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_row(&self, id: &str) -> SessionResult<()> {
        if self.records.write().await.remove(id).is_some() {
            debug!(session_id = %id, "Deleted session record from memory storage");
        }
        Ok(())
    }

    async fn select_row(&self, id: &str) -> SessionResult<Option<SessionRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn close(&self) {}
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRecordStore;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use sqlsess_core::{
        config_error, is_valid_table_name, storage_error, ErrorContext, SessionStoreError,
    };
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Executor, SqlitePool};
    use std::str::FromStr;
    use tracing::info;

    /// Database session row
    #[derive(Debug, sqlx::FromRow)]
    struct SessionRow {
        id: String,
        data: String,
        expire_on: String,
    }

    impl From<SessionRow> for SessionRecord {
        fn from(row: SessionRow) -> Self {
            Self {
                id: row.id,
                data: row.data,
                expire_on: row.expire_on,
            }
        }
    }

    /// SQL text for one table
    #[derive(Debug, Clone)]
    struct Statements {
        insert: String,
        update: String,
        delete: String,
        select: String,
        purge: String,
        count: String,
    }

    impl Statements {
        fn for_table(table: &str) -> Self {
            Self {
                insert: format!(
                    "INSERT INTO {} (id, data, expire_on) VALUES (?, ?, ?)",
                    table
                ),
                update: format!("UPDATE {} SET data = ?, expire_on = ? WHERE id = ?", table),
                delete: format!("DELETE FROM {} WHERE id = ?", table),
                select: format!(
                    "SELECT id, data, expire_on FROM {} WHERE id = ? LIMIT 1",
                    table
                ),
                purge: format!("DELETE FROM {} WHERE expire_on <= ?", table),
                count: format!("SELECT COUNT(*) FROM {}", table),
            }
        }

        fn all(&self) -> [(&'static str, &str); 6] {
            [
                ("insert", self.insert.as_str()),
                ("update", self.update.as_str()),
                ("delete", self.delete.as_str()),
                ("select", self.select.as_str()),
                ("purge", self.purge.as_str()),
                ("count", self.count.as_str()),
            ]
        }
    }

    fn checked_table(table: &str) -> SessionResult<()> {
        if is_valid_table_name(table) {
            Ok(())
        } else {
            Err(config_error!(
                format!("Invalid table name '{}'", table),
                "sqlite_store"
            ))
        }
    }

    /// SQLite record storage
    #[derive(Debug, Clone)]
    pub struct SqliteRecordStore {
        pool: SqlitePool,
        table: String,
        statements: Statements,
    }

    impl SqliteRecordStore {
        /// Open a pool for `database_url`
        ///
        /// In-memory databases get a single long-lived connection, since every SQLite
        /// connection to `:memory:` is its own database.
        pub async fn open_pool(database_url: &str) -> SessionResult<SqlitePool> {
            let connection_error = |e: sqlx::Error| SessionStoreError::Connection {
                message: format!("Failed to connect to SQLite database: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("sqlite_store")
                    .with_operation("connect")
                    .with_metadata("database_url", database_url)
                    .with_suggestion("Check the database_url setting"),
            };

            let options = SqliteConnectOptions::from_str(database_url)
                .map_err(connection_error)?
                .create_if_missing(true);

            let pool = if database_url.contains(":memory:") {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await
            } else {
                SqlitePoolOptions::new().connect_with(options).await
            }
            .map_err(connection_error)?;

            info!("Connected to session database");
            Ok(pool)
        }

        /// Connect and prepare statements against an existing table
        pub async fn connect(database_url: &str, table: &str) -> SessionResult<Self> {
            checked_table(table)?;
            let pool = Self::open_pool(database_url).await?;
            Self::from_pool(pool, table).await
        }

        /// Prepare statements for `table` on an existing pool
        ///
        /// Fails with `Preparation` when the table is missing or has the wrong shape.
        pub async fn from_pool(pool: SqlitePool, table: &str) -> SessionResult<Self> {
            checked_table(table)?;
            let statements = Statements::for_table(table);

            for (name, sql) in statements.all() {
                pool.prepare(sql)
                    .await
                    .map_err(|e| SessionStoreError::Preparation {
                        message: format!("Failed to prepare {} statement: {}", name, e),
                        source: Some(Box::new(e)),
                        context: ErrorContext::new("sqlite_store")
                            .with_operation("prepare")
                            .with_metadata("table", table)
                            .with_suggestion("Run 'sqlsess init' to create the session table"),
                    })?;
            }

            debug!(table = %table, "Prepared session statements");
            Ok(Self {
                pool,
                table: table.to_string(),
                statements,
            })
        }

        /// Create the session table and its expiry index if missing
        pub async fn ensure_schema(pool: &SqlitePool, table: &str) -> SessionResult<()> {
            checked_table(table)?;
            let create = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    data TEXT NOT NULL,
                    expire_on TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_{table}_expire_on ON {table}(expire_on);
                "#,
                table = table
            );

            sqlx::raw_sql(&create)
                .execute(pool)
                .await
                .map_err(|e| SessionStoreError::Preparation {
                    message: format!("Failed to create session table: {}", e),
                    source: Some(Box::new(e)),
                    context: ErrorContext::new("sqlite_store")
                        .with_operation("ensure_schema")
                        .with_metadata("table", table),
                })?;

            info!(table = %table, "Session table ready");
            Ok(())
        }

        pub fn pool(&self) -> &SqlitePool {
            &self.pool
        }

        pub fn table(&self) -> &str {
            &self.table
        }

        /// Delete every row whose `expire_on` is at or before `cutoff`
        pub async fn purge_expired(&self, cutoff: &str) -> SessionResult<u64> {
            let result = sqlx::query(&self.statements.purge)
                .bind(cutoff)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    storage_error!("purge_expired", "sqlite_store", e, table = &self.table)
                })?;
            Ok(result.rows_affected())
        }

        pub async fn count_rows(&self) -> SessionResult<i64> {
            sqlx::query_scalar::<_, i64>(&self.statements.count)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    storage_error!("count_rows", "sqlite_store", e, table = &self.table)
                })
        }
    }

    #[async_trait]
    impl RecordStore for SqliteRecordStore {
        async fn insert_row(&self, record: &SessionRecord) -> SessionResult<()> {
            sqlx::query(&self.statements.insert)
                .bind(&record.id)
                .bind(&record.data)
                .bind(&record.expire_on)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    storage_error!("insert_row", "sqlite_store", e, table = &self.table)
                })?;

            debug!(session_id = %record.id, table = %self.table, "Inserted session record");
            Ok(())
        }

        async fn update_row(&self, id: &str, data: &str, expire_on: &str) -> SessionResult<u64> {
            let result = sqlx::query(&self.statements.update)
                .bind(data)
                .bind(expire_on)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    storage_error!("update_row", "sqlite_store", e, table = &self.table)
                })?;
            Ok(result.rows_affected())
        }

        async fn delete_row(&self, id: &str) -> SessionResult<()> {
            sqlx::query(&self.statements.delete)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    storage_error!("delete_row", "sqlite_store", e, table = &self.table)
                })?;

            debug!(session_id = %id, table = %self.table, "Deleted session record");
            Ok(())
        }

        async fn select_row(&self, id: &str) -> SessionResult<Option<SessionRecord>> {
            let row = sqlx::query_as::<_, SessionRow>(&self.statements.select)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    storage_error!("select_row", "sqlite_store", e, table = &self.table)
                })?;
            Ok(row.map(SessionRecord::from))
        }

        async fn close(&self) {
            self.pool.close().await;
            info!(table = %self.table, "Session store closed");
        }
    }
}
