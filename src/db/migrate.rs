//! Versioned schema for the reference collections.
//!
//! Each `NNN_name.sql` file in the migrations folder is applied once, in version
//! order, and recorded in `schema_migrations`. The tracked collection is not part
//! of this: its name comes from settings, see `TrackedCollection::ensure`.

use rusqlite::{Connection, params};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use crate::error::{Result, InstacoError};

const MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

#[derive(Debug)]
struct Migration {
    version: u32,
    name: String,
    sql: String,
}

impl Migration {
    /// `None` for files that aren't `.sql`.
    fn from_path(path: &Path) -> Result<Option<Self>> {
        if path.extension().and_then(|s| s.to_str()) != Some("sql") {
            return Ok(None);
        }
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .ok_or_else(|| InstacoError::Config(format!("Bad migration file name: {}", path.display())))?;

        let version = name
            .split_once('_')
            .and_then(|(version, _)| version.parse::<u32>().ok())
            .ok_or_else(|| {
                InstacoError::Config(format!("Migration {} must be named NNN_description.sql", name))
            })?;

        Ok(Some(Self {
            version,
            name: name.to_string(),
            sql: fs::read_to_string(path)?,
        }))
    }
}

/// Versions already recorded in `schema_migrations`
pub fn applied_versions(conn: &Connection) -> Result<HashSet<u32>> {
    conn.execute(MIGRATIONS_TABLE, [])?;
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, u32>(0))?
        .collect::<std::result::Result<HashSet<_>, rusqlite::Error>>()?;
    Ok(versions)
}

fn load_migrations(migrations_dir: &Path) -> Result<Vec<Migration>> {
    let entries = fs::read_dir(migrations_dir).map_err(|e| {
        InstacoError::Config(format!(
            "Cannot read migrations directory {}: {}",
            migrations_dir.display(),
            e
        ))
    })?;

    let mut migrations = Vec::new();
    for entry in entries {
        if let Some(migration) = Migration::from_path(&entry?.path())? {
            migrations.push(migration);
        }
    }
    migrations.sort_by_key(|m| m.version);

    if let Some(pair) = migrations.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(InstacoError::Config(format!(
            "Migrations {} and {} share version {}",
            pair[0].name, pair[1].name, pair[0].version
        )));
    }

    Ok(migrations)
}

/// Apply pending migrations, each in its own transaction. Returns how many ran.
pub fn run_migrations(conn: &mut Connection, migrations_dir: &Path) -> Result<usize> {
    let applied = applied_versions(conn)?;
    let pending: Vec<_> = load_migrations(migrations_dir)?
        .into_iter()
        .filter(|m| !applied.contains(&m.version))
        .collect();

    for migration in &pending {
        log::info!("Applying migration {}", migration.name);

        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql).map_err(|e| {
            InstacoError::Config(format!("Migration {} failed: {}", migration.name, e))
        })?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )?;
        tx.commit()?;
    }

    log::debug!("{} migrations applied, {} already present", pending.len(), applied.len());
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
            .unwrap()
    }

    #[test]
    fn test_load_migrations_sorted_by_version() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("010_later.sql"), "CREATE TABLE later (id INTEGER);").unwrap();
        fs::write(temp_dir.path().join("002_earlier.sql"), "CREATE TABLE earlier (id INTEGER);").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();

        let migrations = load_migrations(temp_dir.path()).unwrap();
        let versions: Vec<u32> = migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 10]);
        assert_eq!(migrations[0].name, "002_earlier");
    }

    #[test]
    fn test_rejects_bad_names_and_duplicate_versions() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("followers.sql"), "").unwrap();
        assert!(load_migrations(temp_dir.path()).is_err());

        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("001_a.sql"), "").unwrap();
        fs::write(temp_dir.path().join("001_b.sql"), "").unwrap();
        let err = load_migrations(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("share version 1"));
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        let migrations_dir = temp_dir.path().join("migrations");
        fs::create_dir(&migrations_dir).unwrap();
        fs::write(
            migrations_dir.join("001_broken.sql"),
            "CREATE TABLE half (id INTEGER); NOT SQL;",
        )
        .unwrap();

        assert!(run_migrations(&mut conn, &migrations_dir).is_err());
        assert!(!table_names(&conn).contains(&"half".to_string()));
        assert!(applied_versions(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_reference_collections_schema() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");

        assert_eq!(run_migrations(&mut conn, &migrations_dir).unwrap(), 1);
        assert_eq!(run_migrations(&mut conn, &migrations_dir).unwrap(), 0);

        let tables = table_names(&conn);
        assert!(tables.contains(&"followers".to_string()));
        assert!(tables.contains(&"followings".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
        assert_eq!(applied_versions(&conn).unwrap(), HashSet::from([1]));
    }
}
