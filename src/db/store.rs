use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("version conflict on {collection}/{id}: expected {expected}, found {found}")]
    Conflict {
        collection: String,
        id: String,
        expected: i64,
        found: i64,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub version: i64,
    pub data: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Published after every successful write. `data` is `None` for deletions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    pub collection: String,
    pub id: String,
    pub version: i64,
    pub data: Option<Value>,
}

/// Collection/document keyed storage. Every document carries a version that
/// starts at 1 and increases by one on each replace.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: &str, id: &str, data: &Value) -> Result<i64, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Compare-and-swap on the version; returns the new version.
    async fn replace(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        data: &Value,
    ) -> Result<i64, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Equality match on a top-level string field.
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Document>, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<DocumentChange>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            conn: Mutex::new(conn),
            changes,
        }
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(super::init_db(path)?))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn publish(&self, collection: &str, id: &str, version: i64, data: Option<Value>) {
        // No receivers is fine
        let _ = self.changes.send(DocumentChange {
            collection: collection.to_string(),
            id: id.to_string(),
            version,
            data,
        });
    }
}

fn parse_row(id: String, version: i64, data: String) -> Result<Document, StoreError> {
    Ok(Document {
        id,
        version,
        data: serde_json::from_str(&data)?,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert(&self, collection: &str, id: &str, data: &Value) -> Result<i64, StoreError> {
        let text = serde_json::to_string(data)?;
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO documents (collection, id, version, data) VALUES (?1, ?2, 1, ?3)",
            params![collection, id, text],
        )?;

        if inserted == 0 {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        self.publish(collection, id, 1, Some(data.clone()));
        Ok(1)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row: Option<(String, i64, String)> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT id, version, data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
        };

        row.map(|(id, version, data)| parse_row(id, version, data))
            .transpose()
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        data: &Value,
    ) -> Result<i64, StoreError> {
        let text = serde_json::to_string(data)?;
        // Publish under the lock so listeners see versions in commit order
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE documents SET data = ?1, version = version + 1, updated_at = datetime('now')
             WHERE collection = ?2 AND id = ?3 AND version = ?4",
            params![text, collection, id, expected_version],
        )?;

        if updated == 0 {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT version FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()?;

            return Err(match found {
                None => StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                },
                Some(found) => StoreError::Conflict {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    expected: expected_version,
                    found,
                },
            });
        }

        let version = expected_version + 1;
        self.publish(collection, id, version, Some(data.clone()));
        Ok(version)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;

        if deleted > 0 {
            self.publish(collection, id, 0, None);
        }
        Ok(deleted > 0)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<(String, i64, String)> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, version, data FROM documents WHERE collection = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![collection], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        rows.into_iter()
            .map(|(id, version, data)| parse_row(id, version, data))
            .collect()
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Document>, StoreError> {
        let path = format!("$.{field}");
        let rows: Vec<(String, i64, String)> = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, version, data FROM documents
                 WHERE collection = ?1 AND json_extract(data, ?2) = ?3 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![collection, path, value], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        rows.into_iter()
            .map(|(id, version, data)| parse_row(id, version, data))
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }
}
