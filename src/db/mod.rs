use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tokio::task;
use crate::error::{Result, InstacoError};

pub mod collections;
pub mod migrate;

pub use collections::{
    HistoryEntry, ReferenceCollection, ReferenceKind, ReferenceUpsert, TrackedAccount,
    TrackedCollection, TrackedUpsert,
};

// WAL for the reader/writer split, NORMAL sync for speed.
// Reconciliation never relies on cross-statement atomicity beyond one bulk write.
const PRAGMAS: &str = "PRAGMA journal_mode = WAL; \
     PRAGMA synchronous = NORMAL; \
     PRAGMA foreign_keys = ON; \
     PRAGMA temp_store = MEMORY; \
     PRAGMA cache_size = -65536; \
     PRAGMA busy_timeout = 5000;";

/// Database connection wrapper
#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new database connection with the store pragmas applied
    pub fn open_connection(&self) -> Result<Connection> {
        open_with_pragmas(&self.path)
    }

    /// Execute a closure with a database connection in a blocking task.
    ///
    /// The connection is dropped when the closure returns, on success and failure alike.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = open_with_pragmas(&path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| InstacoError::Task(e.to_string()))?
    }
}

fn open_with_pragmas(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(InstacoError::Database)?;
    conn.execute_batch(PRAGMAS)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_db_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Db::new(&db_path);

        let result = db.with_connection(|conn| {
            conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY)", [])
                .map_err(InstacoError::Database)?;
            Ok(())
        }).await;

        assert!(result.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_pragmas_set() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));

        db.with_connection(|conn| {
            let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
            assert_eq!(journal_mode.to_uppercase(), "WAL");

            let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
            assert_eq!(foreign_keys, 1);

            Ok::<(), InstacoError>(())
        }).await.unwrap();
    }

    #[tokio::test]
    async fn test_closure_error_propagates() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::new(temp_dir.path().join("test.db"));

        let result: Result<()> = db
            .with_connection(|conn| {
                conn.execute("INSERT INTO missing_table VALUES (1)", [])?;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(InstacoError::Database(_))));
    }
}
