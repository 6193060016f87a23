use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, params};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use super::{MetadataStore, VectorHit, VectorIndex};
use crate::core::error::{HubError, HubResult};

/// SQLite-backed storage. JSON documents live in one `documents` table
/// keyed by (kind, id); each embedding space gets a `vec0` virtual
/// table plus a rowid mapping table, created on first use.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    dimension: usize,
}

impl SqliteStore {
    pub fn open(db_path: &Path, dimension: usize) -> HubResult<Self> {
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut std::os::raw::c_char,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> std::os::raw::c_int,
            >(sqlite_vec::sqlite3_vec_init as *const ())));
        }

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HubError::Upstream(format!("creating data dir: {}", e)))?;
        }

        let db = Connection::open(db_path)?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (kind, id)
            )",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS vector_entries (
                rowid INTEGER PRIMARY KEY AUTOINCREMENT,
                space TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                UNIQUE (space, entry_id)
            )",
            [],
        )?;

        info!("sqlite store ready at {}", db_path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(db)),
            dimension,
        })
    }

    /// vec0 table names are derived from the space name, so the space
    /// has to be reduced to a safe identifier first.
    fn space_table(space: &str) -> String {
        let safe: String = space
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("vss_{}", safe.to_lowercase())
    }

    fn ensure_space(&self, db: &Connection, space: &str) -> HubResult<()> {
        db.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(embedding float[{}] distance_metric=cosine)",
                Self::space_table(space),
                self.dimension
            ),
            [],
        )?;
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> HubResult<()> {
        if vector.len() != self.dimension {
            return Err(HubError::Validation(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn put(&self, kind: &str, id: &str, body: &Value) -> HubResult<()> {
        let db = self.conn.lock().await;
        db.execute(
            "INSERT INTO documents (kind, id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT (kind, id) DO UPDATE SET body = excluded.body, updated_at = CURRENT_TIMESTAMP",
            params![kind, id, body.to_string()],
        )?;
        Ok(())
    }

    async fn get(&self, kind: &str, id: &str) -> HubResult<Option<Value>> {
        let db = self.conn.lock().await;
        let mut stmt = db.prepare("SELECT body FROM documents WHERE kind = ?1 AND id = ?2")?;
        let mut rows = stmt.query_map(params![kind, id], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(raw) => Ok(Some(serde_json::from_str(&raw?)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, kind: &str, id: &str) -> HubResult<bool> {
        let db = self.conn.lock().await;
        let n = db.execute(
            "DELETE FROM documents WHERE kind = ?1 AND id = ?2",
            params![kind, id],
        )?;
        Ok(n > 0)
    }

    async fn list(&self, kind: &str) -> HubResult<Vec<Value>> {
        let db = self.conn.lock().await;
        let mut stmt =
            db.prepare("SELECT body FROM documents WHERE kind = ?1 ORDER BY rowid ASC")?;
        let rows = stmt.query_map(params![kind], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(serde_json::from_str(&raw?)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn upsert(&self, space: &str, id: &str, vector: &[f32]) -> HubResult<()> {
        self.check_dimension(vector)?;
        let db = self.conn.lock().await;
        self.ensure_space(&db, space)?;

        db.execute(
            "INSERT INTO vector_entries (space, entry_id) VALUES (?1, ?2)
             ON CONFLICT (space, entry_id) DO NOTHING",
            params![space, id],
        )?;
        let rowid: i64 = db.query_row(
            "SELECT rowid FROM vector_entries WHERE space = ?1 AND entry_id = ?2",
            params![space, id],
            |row| row.get(0),
        )?;

        let table = Self::space_table(space);
        let encoded = serde_json::to_string(vector)?;
        // vec0 has no upsert; replace the row.
        db.execute(
            &format!("DELETE FROM {} WHERE rowid = ?1", table),
            params![rowid],
        )?;
        db.execute(
            &format!("INSERT INTO {} (rowid, embedding) VALUES (?1, ?2)", table),
            params![rowid, encoded],
        )?;
        Ok(())
    }

    async fn search(&self, space: &str, vector: &[f32], limit: usize) -> HubResult<Vec<VectorHit>> {
        self.check_dimension(vector)?;
        let db = self.conn.lock().await;
        self.ensure_space(&db, space)?;

        let encoded = serde_json::to_string(vector)?;
        // Distinct spaces can sanitize to the same table name, so the
        // mapping table's space column is the authority, not the table.
        let mut stmt = db.prepare(&format!(
            "SELECT e.entry_id, v.distance
             FROM {} v
             JOIN vector_entries e ON e.rowid = v.rowid
             WHERE v.embedding MATCH ?1 AND v.k = ?2 AND e.space = ?3
             ORDER BY v.distance ASC",
            Self::space_table(space)
        ))?;
        let rows = stmt.query_map(params![encoded, limit as i64, space], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, distance) = row?;
            hits.push(VectorHit {
                id,
                score: 1.0 - distance as f32,
            });
        }
        Ok(hits)
    }

    async fn remove(&self, space: &str, id: &str) -> HubResult<bool> {
        let db = self.conn.lock().await;
        let rowid: Option<i64> = db
            .query_row(
                "SELECT rowid FROM vector_entries WHERE space = ?1 AND entry_id = ?2",
                params![space, id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        let Some(rowid) = rowid else {
            return Ok(false);
        };
        self.ensure_space(&db, space)?;
        db.execute(
            &format!("DELETE FROM {} WHERE rowid = ?1", Self::space_table(space)),
            params![rowid],
        )?;
        db.execute(
            "DELETE FROM vector_entries WHERE rowid = ?1",
            params![rowid],
        )?;
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) fn test_store() -> (Arc<SqliteStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = SqliteStore::open(&dir.path().join("hub.db"), 64).expect("open test store");
    (Arc::new(store), dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn documents_roundtrip_by_kind_and_id() {
        let (store, _dir) = test_store();

        store
            .put("task", "t1", &json!({"name": "first"}))
            .await
            .unwrap();
        store
            .put("task", "t2", &json!({"name": "second"}))
            .await
            .unwrap();
        store
            .put("server", "t1", &json!({"name": "other kind, same id"}))
            .await
            .unwrap();

        let got = store.get("task", "t1").await.unwrap().unwrap();
        assert_eq!(got["name"], "first");

        let tasks = store.list("task").await.unwrap();
        assert_eq!(tasks.len(), 2);

        assert!(store.delete("task", "t1").await.unwrap());
        assert!(!store.delete("task", "t1").await.unwrap());
        assert!(store.get("task", "t1").await.unwrap().is_none());
        // The other kind is untouched.
        assert!(store.get("server", "t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn put_overwrites_existing_document() {
        let (store, _dir) = test_store();
        store.put("task", "t1", &json!({"v": 1})).await.unwrap();
        store.put("task", "t1", &json!({"v": 2})).await.unwrap();
        let got = store.get("task", "t1").await.unwrap().unwrap();
        assert_eq!(got["v"], 2);
        assert_eq!(store.list("task").await.unwrap().len(), 1);
    }

    fn unit_vec(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; 64];
        v[hot] = 1.0;
        v
    }

    #[tokio::test]
    async fn vector_search_ranks_nearest_first() {
        let (store, _dir) = test_store();
        store.upsert("docs", "a", &unit_vec(0)).await.unwrap();
        store.upsert("docs", "b", &unit_vec(1)).await.unwrap();

        let hits = store.search("docs", &unit_vec(0), 5).await.unwrap();
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn vector_upsert_replaces_and_remove_deletes() {
        let (store, _dir) = test_store();
        store.upsert("docs", "a", &unit_vec(0)).await.unwrap();
        store.upsert("docs", "a", &unit_vec(1)).await.unwrap();

        let hits = store.search("docs", &unit_vec(1), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        assert!(store.remove("docs", "a").await.unwrap());
        assert!(!store.remove("docs", "a").await.unwrap());
        assert!(store.search("docs", &unit_vec(1), 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn spaces_are_isolated() {
        let (store, _dir) = test_store();
        store.upsert("alpha", "a", &unit_vec(0)).await.unwrap();
        store.upsert("beta", "b", &unit_vec(0)).await.unwrap();

        let hits = store.search("alpha", &unit_vec(0), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn spaces_sharing_a_table_name_stay_isolated() {
        // "a-b" and "a.b" both sanitize to vss_a_b.
        let (store, _dir) = test_store();
        store.upsert("a-b", "dash", &unit_vec(0)).await.unwrap();
        store.upsert("a.b", "dot", &unit_vec(0)).await.unwrap();

        let hits = store.search("a-b", &unit_vec(0), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "dash");

        let hits = store.search("a.b", &unit_vec(0), 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "dot");
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let (store, _dir) = test_store();
        let err = store.upsert("docs", "a", &[1.0, 2.0]).await.unwrap_err();
        assert!(matches!(err, HubError::Validation(_)));
    }
}
