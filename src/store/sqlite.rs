//! SQLite-backed [`DocumentStore`].
//!
//! Documents are JSON rows keyed by `(collection, id)`. All access goes
//! through a dedicated worker thread owning the connection; callers
//! hand it closures over an mpsc channel and await the reply on a
//! oneshot. Change notification is a broadcast of touched collection
//! names that subscription tasks re-query on.

use std::{
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc as tokio_mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Document, DocumentStore, Query, StoreError, StoreResult, Subscription};

const SCHEMA_VERSION: i32 = 1;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn run_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
             collection TEXT NOT NULL,
             id TEXT NOT NULL,
             data TEXT NOT NULL,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL,
             PRIMARY KEY (collection, id)
         );
         CREATE INDEX IF NOT EXISTS idx_documents_collection
             ON documents (collection);",
    )
    .context("failed to create documents table")?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
    notify: broadcast::Sender<String>,
}

impl SqliteStore {
    /// Open (or create) a file-backed store.
    pub fn open(db_path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }
        Self::spawn_worker(Some(db_path))
    }

    /// Open a private in-memory store; used by tests and demos.
    pub fn in_memory() -> anyhow::Result<Self> {
        Self::spawn_worker(None)
    }

    fn spawn_worker(db_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("focusteam-store".into())
            .spawn(move || {
                let open_result = match &path_for_thread {
                    Some(path) => Connection::open(path),
                    None => Connection::open_in_memory(),
                };
                let mut conn = match open_result {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if path_for_thread.is_some() {
                    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                        error!("Failed to enable WAL mode: {err}");
                    }
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        if let Some(path) = &db_path {
            info!("Document store initialized at {}", path.display());
        }

        let (notify, _) = broadcast::channel(64);

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            notify,
        })
    }

    async fn execute<F, T>(&self, task: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| backend(format!("failed to send command to store thread: {err}")))?;

        reply_rx
            .await
            .map_err(|_| backend("store thread terminated unexpectedly"))?
    }

    fn changed(&self, collection: &str) {
        // No receivers is fine; subscriptions come and go.
        let _ = self.notify.send(collection.to_string());
    }
}

fn load_collection(conn: &mut Connection, collection: &str) -> StoreResult<Vec<Document>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, data FROM documents
             WHERE collection = ?1",
        )
        .map_err(backend)?;

    let mut rows = stmt.query(params![collection]).map_err(backend)?;
    let mut docs = Vec::new();
    while let Some(row) = rows.next().map_err(backend)? {
        let id: String = row.get(0).map_err(backend)?;
        let data: String = row.get(1).map_err(backend)?;
        let fields: Value = serde_json::from_str(&data)?;
        docs.push(Document { id, fields });
    }
    Ok(docs)
}

fn apply_query(mut docs: Vec<Document>, query: &Query) -> Vec<Document> {
    docs.retain(|doc| query.matches(doc));

    if let Some(order) = &query.order_by {
        docs.sort_by(|a, b| {
            let ord = match (a.field(&order.field), b.field(&order.field)) {
                (Some(x), Some(y)) => {
                    super::compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal)
                }
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            if order.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    if let Some(limit) = query.limit {
        docs.truncate(limit);
    }

    docs
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.execute(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;

            match data {
                Some(data) => {
                    let fields: Value = serde_json::from_str(&data)?;
                    Ok(Some(Document { id, fields }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn create(&self, collection: &str, fields: Value) -> StoreResult<String> {
        let Value::Object(mut map) = fields else {
            return Err(StoreError::InvalidDocument);
        };

        let id = Uuid::new_v4().to_string();
        map.insert("id".to_string(), Value::String(id.clone()));
        let data = serde_json::to_string(&Value::Object(map))?;

        let collection_owned = collection.to_string();
        let id_for_insert = id.clone();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO documents (collection, id, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![collection_owned, id_for_insert, data, now, now],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await?;

        self.changed(collection);
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()> {
        let Value::Object(mut map) = fields else {
            return Err(StoreError::InvalidDocument);
        };
        map.insert("id".to_string(), Value::String(id.to_string()));
        let data = serde_json::to_string(&Value::Object(map))?;

        let collection_owned = collection.to_string();
        let id_owned = id.to_string();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO documents (collection, id, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (collection, id)
                 DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                params![collection_owned, id_owned, data, now, now],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await?;

        self.changed(collection);
        Ok(())
    }

    async fn patch(&self, collection: &str, id: &str, fields: Value) -> StoreResult<()> {
        let Value::Object(patch) = fields else {
            return Err(StoreError::InvalidDocument);
        };

        let collection_owned = collection.to_string();
        let id_owned = id.to_string();
        // Read-merge-write runs as one task on the worker thread, so the
        // merge is atomic with respect to every other store operation.
        self.execute(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection_owned, id_owned],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;

            let Some(data) = data else {
                return Err(StoreError::NotFound {
                    collection: collection_owned,
                    id: id_owned,
                });
            };

            let mut fields: Value = serde_json::from_str(&data)?;
            let Value::Object(map) = &mut fields else {
                return Err(StoreError::InvalidDocument);
            };
            for (key, value) in patch {
                map.insert(key, value);
            }
            let merged = serde_json::to_string(&fields)?;

            conn.execute(
                "UPDATE documents SET data = ?1, updated_at = ?2
                 WHERE collection = ?3 AND id = ?4",
                params![merged, Utc::now().to_rfc3339(), collection_owned, id_owned],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await?;

        self.changed(collection);
        Ok(())
    }

    async fn query(&self, collection: &str, query: Query) -> StoreResult<Vec<Document>> {
        let collection = collection.to_string();
        self.execute(move |conn| {
            let docs = load_collection(conn, &collection)?;
            Ok(apply_query(docs, &query))
        })
        .await
    }

    async fn subscribe(&self, collection: &str, query: Query) -> StoreResult<Subscription> {
        let (tx, rx) = tokio_mpsc::channel(16);
        let cancel = CancellationToken::new();

        // Register for notifications before the initial read so changes
        // landing in between are not missed.
        let mut notify_rx = self.notify.subscribe();
        let initial = self.query(collection, query.clone()).await?;
        if tx.send(initial).await.is_err() {
            return Err(backend("subscription receiver closed during setup"));
        }

        let store = self.clone();
        let collection = collection.to_string();
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = notify_rx.recv() => {
                        match changed {
                            Ok(touched) if touched == collection => {}
                            Ok(_) => continue,
                            // Lagged: changes were dropped, re-query anyway.
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                        match store.query(&collection, query.clone()).await {
                            Ok(docs) => {
                                if tx.send(docs).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                error!("Subscription query on '{collection}' failed: {err}");
                            }
                        }
                    }
                }
            }
        });

        Ok(Subscription {
            receiver: rx,
            cancel,
        })
    }
}
