//! SQLite-backed document store.
//!
//! The only component that knows the storage technology. Everything above
//! it speaks collections, JSON documents, and equality filters, so the
//! backend can be swapped without touching invariant logic.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use tern_core::config::StoreConfig;
use tern_core::error::StoreError;
use tern_core::shellexpand;
use tracing::info;
use uuid::Uuid;

/// Equality filter: AND of exact-match field comparisons.
///
/// The reserved key `id` matches the document id; every other key matches a
/// top-level field of the JSON body. No range queries, no server-side sort.
pub type Filter = BTreeMap<String, Value>;

/// A stored document: its id plus the JSON body.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

/// Primitive key/value-document operations backing the ledger repository.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document, generating an id when none is given. An existing
    /// id yields [`StoreError::AlreadyExists`] — this is the atomic
    /// insert-if-absent primitive.
    async fn insert_one(
        &self,
        collection: &str,
        document: Value,
        id: Option<&str>,
    ) -> Result<String, StoreError>;

    /// First document matching the filter, if any.
    async fn find_one(&self, collection: &str, filter: &Filter)
        -> Result<Option<Document>, StoreError>;

    /// All documents matching the filter, in insertion order.
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<u32>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Replace the named fields of the first matching document (JSON merge
    /// patch, applied in a single statement so filter and patch are atomic).
    /// Returns whether a document was updated. With `upsert`, a miss inserts
    /// a new document built from the filter fields plus the patch.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Value,
        upsert: bool,
    ) -> Result<bool, StoreError>;

    /// Delete the first matching document. Returns whether one was deleted.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError>;

    /// Delete every matching document. Returns how many were deleted.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Count matching documents.
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;
}

/// SQLite implementation of [`DocumentStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the store at the configured path, running
    /// migrations on first use.
    pub async fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Backend(format!("failed to create data dir: {e}")))?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| StoreError::Backend(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("ledger store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// An ephemeral in-memory store. Used by tests and one-shot runs.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Backend(format!("invalid db path: {e}")))?
            .create_if_missing(true);

        // A single connection: each pooled connection would otherwise get
        // its own private in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| StoreError::Backend(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| StoreError::Backend(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] =
            &[("001_init", include_str!("../migrations/001_init.sql"))];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        StoreError::Backend(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| StoreError::Backend(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    StoreError::Backend(format!("failed to record migration {name}: {e}"))
                })?;
        }
        Ok(())
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Bind one JSON value as its natural SQLite type.
fn bind_value<'q>(query: SqliteQuery<'q>, value: &'q Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap_or(0)),
        Value::Number(n) if n.is_u64() => query.bind(n.as_u64().unwrap_or(0) as i64),
        Value::Number(n) => query.bind(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

/// Build the WHERE clause and bind list for an equality filter.
fn filter_clause<'f>(filter: &'f Filter) -> Result<(String, Vec<&'f Value>), StoreError> {
    let mut clause = String::from("collection = ?");
    let mut binds = Vec::with_capacity(filter.len());

    for (field, value) in filter {
        if !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::Backend(format!("invalid filter field: {field}")));
        }
        if field == "id" {
            clause.push_str(" AND id = ?");
        } else {
            clause.push_str(&format!(" AND json_extract(body, '$.{field}') = ?"));
        }
        binds.push(value);
    }

    Ok((clause, binds))
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_one(
        &self,
        collection: &str,
        document: Value,
        id: Option<&str>,
    ) -> Result<String, StoreError> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let body = serde_json::to_string(&document)?;

        sqlx::query("INSERT INTO documents (collection, id, body) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(&id)
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::AlreadyExists,
                _ => StoreError::Backend(format!("insert failed: {e}")),
            })?;

        Ok(id)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Option<Document>, StoreError> {
        let (clause, binds) = filter_clause(filter)?;
        let sql = format!("SELECT id, body FROM documents WHERE {clause} ORDER BY rowid LIMIT 1");

        let mut query = sqlx::query(&sql).bind(collection);
        for value in binds {
            query = bind_value(query, value);
        }

        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("query failed: {e}")))?;

        row.map(|r| {
            let id: String = r
                .try_get("id")
                .map_err(|e| StoreError::Backend(format!("row decode failed: {e}")))?;
            let body: String = r
                .try_get("body")
                .map_err(|e| StoreError::Backend(format!("row decode failed: {e}")))?;
            Ok(Document {
                id,
                body: serde_json::from_str(&body)?,
            })
        })
        .transpose()
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<u32>,
    ) -> Result<Vec<Document>, StoreError> {
        let (clause, binds) = filter_clause(filter)?;
        let mut sql = format!("SELECT id, body FROM documents WHERE {clause} ORDER BY rowid");
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        let mut query = sqlx::query(&sql).bind(collection);
        for value in binds {
            query = bind_value(query, value);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("query failed: {e}")))?;

        rows.into_iter()
            .map(|r| {
                let id: String = r
                    .try_get("id")
                    .map_err(|e| StoreError::Backend(format!("row decode failed: {e}")))?;
                let body: String = r
                    .try_get("body")
                    .map_err(|e| StoreError::Backend(format!("row decode failed: {e}")))?;
                Ok(Document {
                    id,
                    body: serde_json::from_str(&body)?,
                })
            })
            .collect()
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Value,
        upsert: bool,
    ) -> Result<bool, StoreError> {
        let (clause, binds) = filter_clause(filter)?;
        let patch = serde_json::to_string(&fields)?;
        let sql = format!(
            "UPDATE documents SET body = json_patch(body, ?) \
             WHERE rowid = (SELECT rowid FROM documents WHERE {clause} ORDER BY rowid LIMIT 1)"
        );

        let mut query = sqlx::query(&sql).bind(&patch).bind(collection);
        for value in binds {
            query = bind_value(query, value);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("update failed: {e}")))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        if upsert {
            let mut document = serde_json::Map::new();
            for (field, value) in filter {
                if field != "id" {
                    document.insert(field.clone(), value.clone());
                }
            }
            if let Value::Object(map) = fields {
                for (field, value) in map {
                    document.insert(field, value);
                }
            }
            let id = filter.get("id").and_then(Value::as_str);
            self.insert_one(collection, Value::Object(document), id)
                .await?;
            return Ok(true);
        }

        Ok(false)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError> {
        let (clause, binds) = filter_clause(filter)?;
        let sql = format!(
            "DELETE FROM documents \
             WHERE rowid = (SELECT rowid FROM documents WHERE {clause} ORDER BY rowid LIMIT 1)"
        );

        let mut query = sqlx::query(&sql).bind(collection);
        for value in binds {
            query = bind_value(query, value);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("delete failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let (clause, binds) = filter_clause(filter)?;
        let sql = format!("DELETE FROM documents WHERE {clause}");

        let mut query = sqlx::query(&sql).bind(collection);
        for value in binds {
            query = bind_value(query, value);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("delete failed: {e}")))?;

        Ok(result.rows_affected())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let (clause, binds) = filter_clause(filter)?;
        let sql = format!("SELECT COUNT(*) AS n FROM documents WHERE {clause}");

        let mut query = sqlx::query(&sql).bind(collection);
        for value in binds {
            query = bind_value(query, value);
        }

        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("count failed: {e}")))?;

        let n: i64 = row
            .try_get("n")
            .map_err(|e| StoreError::Backend(format!("row decode failed: {e}")))?;

        Ok(n as u64)
    }
}
