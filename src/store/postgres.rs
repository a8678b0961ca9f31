//! Postgres-backed document store.
//!
//! Documents live in one JSONB table keyed by `(collection, id)`. Writes
//! publish the collection name on the `herbverse_documents` channel and
//! subscribers re-run their query when their collection is named.

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Row};
use tokio::sync::mpsc;

use super::{ChangeStream, Document, DocumentStore, Filter, Snapshot, StoreError, Write};

const CHANNEL: &str = "herbverse_documents";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self { Self::Backend(e.to_string()) }
}

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self { Self { pool } }

    fn row_to_snapshot(row: PgRow) -> Result<Snapshot, StoreError> {
        let version: i64 = row.try_get("version")?;
        Ok(Snapshot {
            id: row.try_get("id")?,
            version: u64::try_from(version).map_err(|_| StoreError::Backend("negative version".into()))?,
            data: row.try_get("body")?,
        })
    }

    async fn query_on(conn: &mut PgConnection, collection: &str, filter: &Filter) -> Result<Vec<Snapshot>, StoreError> {
        let rows = match filter {
            Filter::All => {
                sqlx::query("SELECT id, version, body FROM documents WHERE collection = $1 ORDER BY id")
                    .bind(collection)
                    .fetch_all(&mut *conn).await?
            }
            Filter::FieldEq { field, value } => {
                sqlx::query("SELECT id, version, body FROM documents WHERE collection = $1 AND body -> $2 = $3 ORDER BY id")
                    .bind(collection).bind(field).bind(value)
                    .fetch_all(&mut *conn).await?
            }
        };
        rows.into_iter().map(Self::row_to_snapshot).collect()
    }

    async fn apply(conn: &mut PgConnection, write: &Write) -> Result<u64, StoreError> {
        let (collection, version) = match write {
            Write::Set { collection, id, data } => {
                let version: i64 = sqlx::query_scalar(
                    "INSERT INTO documents (collection, id, version, body) VALUES ($1, $2, 1, $3) \
                     ON CONFLICT (collection, id) DO UPDATE SET version = documents.version + 1, body = EXCLUDED.body \
                     RETURNING version",
                )
                .bind(collection).bind(id).bind(data)
                .fetch_one(&mut *conn).await?;
                (collection, version)
            }
            Write::Update { collection, id, patch } => {
                if !patch.is_object() {
                    return Err(StoreError::Serde("update requires object documents".into()));
                }
                let version: Option<i64> = sqlx::query_scalar(
                    "UPDATE documents SET version = version + 1, body = body || $3 \
                     WHERE collection = $1 AND id = $2 RETURNING version",
                )
                .bind(collection).bind(id).bind(patch)
                .fetch_optional(&mut *conn).await?;
                let version = version.ok_or_else(|| StoreError::NotFound { collection: collection.clone(), id: id.clone() })?;
                (collection, version)
            }
        };
        sqlx::query("SELECT pg_notify($1, $2)").bind(CHANNEL).bind(collection).execute(&mut *conn).await?;
        u64::try_from(version).map_err(|_| StoreError::Backend("negative version".into()))
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Snapshot>, StoreError> {
        let row = sqlx::query("SELECT id, version, body FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection).bind(id)
            .fetch_optional(&self.pool).await?;
        row.map(Self::row_to_snapshot).transpose()
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::apply(&mut *conn, &Write::set(collection, id, data)).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Document) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::apply(&mut *conn, &Write::update(collection, id, patch)).await
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<Snapshot>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::query_on(&mut *conn, collection, filter).await
    }

    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<ChangeStream, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANNEL).await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let pool = self.pool.clone();
        let collection = collection.to_string();

        let initial = self.query(&collection, &filter).await?;
        let _ = sender.send(Ok(initial));

        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    _ = sender.closed() => break,
                    n = listener.recv() => n,
                };
                let result = match notification {
                    Ok(n) if n.payload() != collection => continue,
                    Ok(_) => match pool.acquire().await {
                        Ok(mut conn) => Self::query_on(&mut *conn, &collection, &filter).await,
                        Err(e) => Err(e.into()),
                    },
                    Err(e) => Err(StoreError::from(e)),
                };
                if sender.send(result).is_err() { break; }
            }
            tracing::debug!(%collection, "postgres subscription closed");
        });
        Ok(receiver)
    }

    async fn next_sequence(&self, counter: &str) -> Result<u64, StoreError> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO counters (name, value) VALUES ($1, 1) \
             ON CONFLICT (name) DO UPDATE SET value = counters.value + 1 RETURNING value",
        )
        .bind(counter)
        .fetch_one(&self.pool).await?;
        u64::try_from(value).map_err(|_| StoreError::Backend("negative counter".into()))
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<Vec<u64>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut versions = Vec::with_capacity(writes.len());
        for write in &writes {
            versions.push(Self::apply(&mut *tx, write).await?);
        }
        tx.commit().await?;
        Ok(versions)
    }
}
