use std::path::Path;

use tokio_rusqlite::Connection;

use crate::error::Result;

use super::schema::SCHEMA;

/// Handle to the SQLite database.
///
/// All access runs on the connection's single background thread, so every
/// clone of a `Store` shares one serialized writer.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        tracing::debug!("Opening store at {}", path.display());
        let conn = Connection::open(path).await?;
        Self::bootstrap(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::bootstrap(conn).await
    }

    async fn bootstrap(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            // Relationship cleanup is done explicitly by the repository; the
            // foreign keys only reject dangling references.
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_creates_parent_dirs_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clips.db");

        let store = Store::open(&path).await.unwrap();
        store
            .connection()
            .call(|conn| {
                conn.execute(
                    "INSERT INTO articles (id, url, created_at) VALUES ('a', 'https://a.example', '2025-01-01T00:00:00.000000Z')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        drop(store);

        let reopened = Store::open(&path).await.unwrap();
        let count: i64 = reopened
            .connection()
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let store = Store::open_in_memory().await.unwrap();
        let result = store
            .connection()
            .call(|conn| {
                conn.execute(
                    "INSERT INTO group_members (article_id, group_id, added_at) VALUES ('missing', 42, '2025-01-01T00:00:00.000000Z')",
                    [],
                )?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }
}
