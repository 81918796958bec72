//! Keyed collections backed by SQLite tables.
//!
//! Every collection is keyed by `user` and written through [`BulkWriter`]: one
//! bulk write is one transaction of `INSERT ... ON CONFLICT(user) DO UPDATE`
//! statements. Values that only appear in the `INSERT` column list behave like
//! set-on-insert fields; the `DO UPDATE SET` list is what every later write sets.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};

use super::Db;
use crate::error::{InstacoError, Result};

/// Names the tracked collection may not take.
const RESERVED_NAMES: &[&str] = &["followers", "followings", "schema_migrations"];

/// Bulk "upsert-by-key" capability of a collection.
pub trait BulkWriter {
    type Op: Send + 'static;

    /// Apply `ops` as one bulk write. Returns the number of operations applied.
    fn bulk_write(&self, ops: Vec<Self::Op>) -> impl Future<Output = Result<usize>> + Send;
}

/// Which export a reference collection mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Followers,
    Followings,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 2] = [ReferenceKind::Followers, ReferenceKind::Followings];

    /// Table backing the collection
    pub fn table(self) -> &'static str {
        match self {
            ReferenceKind::Followers => "followers",
            ReferenceKind::Followings => "followings",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Check that `name` can be used verbatim as a table identifier.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first = chars
        .next()
        .ok_or_else(|| InstacoError::Config("collection name is empty".to_string()))?;

    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(InstacoError::Config(format!(
            "collection name '{}' may only contain ASCII letters, digits and '_' and must not start with a digit",
            name
        )));
    }

    if name.len() > 64 {
        return Err(InstacoError::Config(format!("collection name '{}' is too long", name)));
    }

    let lower = name.to_ascii_lowercase();
    if RESERVED_NAMES.contains(&lower.as_str()) || lower.starts_with("sqlite_") {
        return Err(InstacoError::Config(format!("collection name '{}' is reserved", name)));
    }

    Ok(())
}

/// Convert platform unix seconds into an absolute point in time.
pub fn from_unix_seconds(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| InstacoError::InvalidInput(format!("timestamp out of range: {}", secs)))
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| InstacoError::Parse(format!("bad stored time '{}': {}", value, e)))
}

fn opt_unix(secs: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    secs.map(from_unix_seconds).transpose()
}

fn opt_rfc3339(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_rfc3339).transpose()
}

// ---------------------------------------------------------------------------
// Reference collections
// ---------------------------------------------------------------------------

/// Upsert staged for a reference collection
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceUpsert {
    pub user: String,
    pub timestamp: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// One row of a reference collection
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    pub user: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-run snapshot of one export file (`followers` or `followings`).
#[derive(Debug, Clone)]
pub struct ReferenceCollection {
    db: Db,
    kind: ReferenceKind,
}

impl ReferenceCollection {
    pub fn new(db: Db, kind: ReferenceKind) -> Self {
        Self { db, kind }
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    /// Remove every document. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        let table = self.kind.table();
        self.db
            .with_connection(move |conn| Ok(conn.execute(&format!("DELETE FROM {}", table), [])?))
            .await
    }

    pub async fn count(&self) -> Result<usize> {
        let table = self.kind.table();
        self.db
            .with_connection(move |conn| {
                let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(n as usize)
            })
            .await
    }

    /// One page in natural (insertion) order.
    pub async fn page(&self, skip: usize, limit: usize) -> Result<Vec<ReferenceEntry>> {
        let table = self.kind.table();
        let rows: Vec<(String, i64)> = self
            .db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT user, timestamp FROM {} ORDER BY rowid LIMIT ?1 OFFSET ?2",
                    table
                ))?;
                let rows = stmt
                    .query_map(params![limit as i64, skip as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(user, secs)| Ok(ReferenceEntry { user, timestamp: from_unix_seconds(secs)? }))
            .collect()
    }
}

impl BulkWriter for ReferenceCollection {
    type Op = ReferenceUpsert;

    async fn bulk_write(&self, ops: Vec<ReferenceUpsert>) -> Result<usize> {
        if ops.is_empty() {
            return Ok(0);
        }

        let table = self.kind.table();
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(&format!(
                        "INSERT INTO {} (user, timestamp, updated) VALUES (?1, ?2, ?3)
                         ON CONFLICT(user) DO UPDATE SET
                             timestamp = excluded.timestamp,
                             updated = excluded.updated",
                        table
                    ))?;
                    for op in &ops {
                        stmt.execute(params![op.user, op.timestamp.timestamp(), op.updated.to_rfc3339()])?;
                    }
                }
                tx.commit()?;
                Ok(ops.len())
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Tracked collection
// ---------------------------------------------------------------------------

/// Upsert staged against the tracked collection while replaying a reference collection.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedUpsert {
    pub user: String,
    /// Reference collection the user was found in; decides which flag is asserted.
    pub source: ReferenceKind,
    pub timestamp: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

/// Derived relationship state of one account
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedAccount {
    pub user: String,
    pub follows_me: Option<bool>,
    pub follow_it: Option<bool>,
    pub follows_me_before: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub inserted_at: Option<DateTime<Utc>>,
}

/// Previous state of an account, recorded when a run changed it.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub user: String,
    pub follows_me: Option<bool>,
    pub follow_it: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedStats {
    pub total: usize,
    pub followers: usize,
    pub followings: usize,
    pub mutual: usize,
    /// I follow them, they don't follow me.
    pub one_way: usize,
    /// They follow me, I don't follow them.
    pub fans: usize,
    /// Neither relationship holds any more.
    pub lapsed: usize,
    pub history_entries: usize,
}

type AccountRow = (
    String,
    Option<bool>,
    Option<bool>,
    Option<bool>,
    Option<i64>,
    Option<String>,
    Option<String>,
);

/// Long-lived collection holding one row per handle ever seen.
#[derive(Debug, Clone)]
pub struct TrackedCollection {
    db: Db,
    name: String,
    history: String,
    state: String,
}

impl TrackedCollection {
    /// Get or create the collection `name`, with its unique `user` index and history log.
    pub async fn ensure(db: Db, name: &str) -> Result<Self> {
        validate_collection_name(name)?;
        let collection = Self::named(db, name);

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{t}" (
                user TEXT NOT NULL,
                follows_me INTEGER,
                follow_it INTEGER,
                follows_me_before INTEGER,
                timestamp INTEGER,
                updated_at TEXT,
                inserted_at TEXT,
                prev_follows_me INTEGER,
                prev_follow_it INTEGER,
                prev_timestamp INTEGER
            );
            CREATE UNIQUE INDEX IF NOT EXISTS "idx_{t}_user" ON "{t}"(user);
            CREATE INDEX IF NOT EXISTS "idx_{t}_timestamp" ON "{t}"(timestamp);

            CREATE TABLE IF NOT EXISTS "{h}" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user TEXT NOT NULL,
                follows_me INTEGER,
                follow_it INTEGER,
                timestamp INTEGER,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS "idx_{h}_user" ON "{h}"(user, id);

            CREATE TABLE IF NOT EXISTS "{s}" (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                pass_open INTEGER NOT NULL DEFAULT 0,
                started_at TEXT,
                completed_at TEXT
            );
            INSERT OR IGNORE INTO "{s}" (id, pass_open) VALUES (1, 0);
            "#,
            t = collection.name,
            h = collection.history,
            s = collection.state,
        );

        collection
            .db
            .with_connection(move |conn| Ok(conn.execute_batch(&ddl)?))
            .await?;

        log::debug!("Collection {} is ready", collection.name);
        Ok(collection)
    }

    fn named(db: Db, name: &str) -> Self {
        Self {
            db,
            name: name.to_string(),
            history: format!("{}_history", name),
            state: format!("{}_state", name),
        }
    }

    /// Open an existing collection without creating anything. `None` if it was never created.
    pub async fn open(db: Db, name: &str) -> Result<Option<Self>> {
        validate_collection_name(name)?;
        let collection = Self::named(db, name);
        let tables = [collection.name.clone(), collection.history.clone()];
        let present = collection
            .db
            .with_connection(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
                let mut found = 0;
                for table in &tables {
                    found += stmt.query_row(params![table], |row| row.get::<_, i64>(0))?;
                }
                Ok(found == tables.len() as i64)
            })
            .await?;
        Ok(present.then_some(collection))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a reconciliation pass was started and never completed.
    pub async fn pass_open(&self) -> Result<bool> {
        let sql = format!(r#"SELECT pass_open FROM "{}" WHERE id = 1"#, self.state);
        self.db
            .with_connection(move |conn| {
                let open = conn
                    .query_row(&sql, [], |row| row.get::<_, bool>(0))
                    .optional()?;
                Ok(open.unwrap_or(false))
            })
            .await
    }

    pub async fn count(&self) -> Result<usize> {
        let sql = format!(r#"SELECT COUNT(*) FROM "{}""#, self.name);
        self.db
            .with_connection(move |conn| {
                let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
                Ok(n as usize)
            })
            .await
    }

    /// Clear both relationship flags on every document and open a reconciliation pass.
    /// Returns the number of documents touched.
    ///
    /// The previous flags and timestamp are snapshotted only when the last pass
    /// completed; after an interrupted pass the snapshot of the last completed
    /// one is kept, since the current flags are partial.
    pub async fn reset_flags(&self) -> Result<usize> {
        let snapshot = format!(
            r#"UPDATE "{}" SET
                prev_follows_me = follows_me,
                prev_follow_it = follow_it,
                prev_timestamp = timestamp"#,
            self.name
        );
        let clear = format!(r#"UPDATE "{}" SET follows_me = 0, follow_it = 0"#, self.name);
        let state_sql = format!(r#"SELECT pass_open FROM "{}" WHERE id = 1"#, self.state);
        let open_pass = format!(
            r#"INSERT INTO "{}" (id, pass_open, started_at) VALUES (1, 1, ?1)
               ON CONFLICT(id) DO UPDATE SET pass_open = 1, started_at = excluded.started_at"#,
            self.state
        );
        let now = Utc::now().to_rfc3339();

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let interrupted = tx
                    .query_row(&state_sql, [], |row| row.get::<_, bool>(0))
                    .optional()?
                    .unwrap_or(false);
                if interrupted {
                    log::warn!("Last reconciliation did not complete, keeping its previous-state snapshot");
                } else {
                    tx.execute(&snapshot, [])?;
                }
                let touched = tx.execute(&clear, [])?;
                tx.execute(&open_pass, params![now])?;
                tx.commit()?;
                Ok(touched)
            })
            .await
    }

    /// Set absent flags to false. Returns the number of documents touched.
    pub async fn backfill_flags(&self) -> Result<usize> {
        let sql = format!(
            r#"UPDATE "{t}" SET
                follows_me = COALESCE(follows_me, 0),
                follow_it = COALESCE(follow_it, 0)
             WHERE follows_me IS NULL OR follow_it IS NULL"#,
            t = self.name
        );
        self.db.with_connection(move |conn| Ok(conn.execute(&sql, [])?)).await
    }

    /// Handles I follow that don't follow me, most recent relationship first.
    pub async fn one_way(&self) -> Result<Vec<String>> {
        self.select_users("follows_me = 0 AND follow_it = 1").await
    }

    /// Handles that followed me before the last reset and no longer do.
    pub async fn lost_followers(&self) -> Result<Vec<String>> {
        self.select_users("prev_follows_me = 1 AND follows_me = 0").await
    }

    async fn select_users(&self, predicate: &'static str) -> Result<Vec<String>> {
        let sql = format!(
            r#"SELECT user FROM "{}" WHERE {} ORDER BY timestamp DESC, rowid ASC"#,
            self.name, predicate
        );
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let users = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(users)
            })
            .await
    }

    /// Close the reconciliation pass opened by `reset_flags`.
    ///
    /// With `history = Some(max_entries)` the previous state of every account this
    /// pass changed is appended to the history log first, in the same transaction.
    /// Accounts with no previous state are skipped. With `max_entries > 0` only the
    /// newest `max_entries` entries per account are kept. Returns the entries written.
    pub async fn complete_pass(&self, at: DateTime<Utc>, history: Option<usize>) -> Result<usize> {
        let insert = format!(
            r#"INSERT INTO "{h}" (user, follows_me, follow_it, timestamp, recorded_at)
               SELECT user, prev_follows_me, prev_follow_it, prev_timestamp, ?1 FROM "{t}"
               WHERE (prev_follows_me IS NOT NULL OR prev_follow_it IS NOT NULL)
                 AND (follows_me IS NOT prev_follows_me
                      OR follow_it IS NOT prev_follow_it
                      OR timestamp IS NOT prev_timestamp)
               ORDER BY rowid"#,
            h = self.history,
            t = self.name
        );
        let prune = format!(
            r#"DELETE FROM "{h}" WHERE id IN (
                   SELECT id FROM (
                       SELECT id, ROW_NUMBER() OVER (PARTITION BY user ORDER BY id DESC) AS rn
                       FROM "{h}"
                   ) WHERE rn > ?1
               )"#,
            h = self.history
        );
        let close_pass = format!(
            r#"UPDATE "{}" SET pass_open = 0, completed_at = ?1 WHERE id = 1"#,
            self.state
        );
        let at = at.to_rfc3339();

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let mut written = 0;
                if let Some(max_entries) = history {
                    written = tx.execute(&insert, params![at])?;
                    if max_entries > 0 {
                        let pruned = tx.execute(&prune, params![max_entries as i64])?;
                        if pruned > 0 {
                            log::debug!("Pruned {} history entries", pruned);
                        }
                    }
                }
                tx.execute(&close_pass, params![at])?;
                tx.commit()?;
                Ok(written)
            })
            .await
    }

    pub async fn get(&self, user: &str) -> Result<Option<TrackedAccount>> {
        let sql = format!(
            r#"SELECT user, follows_me, follow_it, follows_me_before, timestamp, updated_at, inserted_at
               FROM "{}" WHERE user = ?1"#,
            self.name
        );
        let user = user.to_string();
        let row: Option<AccountRow> = self
            .db
            .with_connection(move |conn| {
                let row = conn
                    .query_row(&sql, params![user], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    })
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(|(user, follows_me, follow_it, follows_me_before, timestamp, updated_at, inserted_at)| {
            Ok(TrackedAccount {
                user,
                follows_me,
                follow_it,
                follows_me_before,
                timestamp: opt_unix(timestamp)?,
                updated_at: opt_rfc3339(updated_at)?,
                inserted_at: opt_rfc3339(inserted_at)?,
            })
        })
        .transpose()
    }

    /// History of one account, newest first.
    pub async fn history(&self, user: &str) -> Result<Vec<HistoryEntry>> {
        let sql = format!(
            r#"SELECT user, follows_me, follow_it, timestamp, recorded_at
               FROM "{}" WHERE user = ?1 ORDER BY id DESC"#,
            self.history
        );
        let user = user.to_string();
        let rows: Vec<(String, Option<bool>, Option<bool>, Option<i64>, String)> = self
            .db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![user], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(user, follows_me, follow_it, timestamp, recorded_at)| {
                Ok(HistoryEntry {
                    user,
                    follows_me,
                    follow_it,
                    timestamp: opt_unix(timestamp)?,
                    recorded_at: parse_rfc3339(&recorded_at)?,
                })
            })
            .collect()
    }

    pub async fn stats(&self) -> Result<TrackedStats> {
        let sql = format!(
            r#"SELECT
                COUNT(*),
                COALESCE(SUM(follows_me = 1), 0),
                COALESCE(SUM(follow_it = 1), 0),
                COALESCE(SUM(follows_me = 1 AND follow_it = 1), 0),
                COALESCE(SUM(follows_me = 0 AND follow_it = 1), 0),
                COALESCE(SUM(follows_me = 1 AND follow_it = 0), 0),
                COALESCE(SUM(follows_me = 0 AND follow_it = 0), 0),
                (SELECT COUNT(*) FROM "{h}")
               FROM "{t}""#,
            h = self.history,
            t = self.name
        );
        self.db
            .with_connection(move |conn| {
                let stats = conn.query_row(&sql, [], |row| {
                    Ok(TrackedStats {
                        total: row.get::<_, i64>(0)? as usize,
                        followers: row.get::<_, i64>(1)? as usize,
                        followings: row.get::<_, i64>(2)? as usize,
                        mutual: row.get::<_, i64>(3)? as usize,
                        one_way: row.get::<_, i64>(4)? as usize,
                        fans: row.get::<_, i64>(5)? as usize,
                        lapsed: row.get::<_, i64>(6)? as usize,
                        history_entries: row.get::<_, i64>(7)? as usize,
                    })
                })?;
                Ok(stats)
            })
            .await
    }
}

impl BulkWriter for TrackedCollection {
    type Op = TrackedUpsert;

    async fn bulk_write(&self, ops: Vec<TrackedUpsert>) -> Result<usize> {
        if ops.is_empty() {
            return Ok(0);
        }

        // Only the asserted flag is in the update list; the other one and
        // follows_me_before/inserted_at are set on insert.
        let follower_sql = format!(
            r#"INSERT INTO "{}" (user, follows_me, follow_it, follows_me_before, timestamp, updated_at, inserted_at)
               VALUES (?1, 1, 0, 1, ?2, ?3, ?3)
               ON CONFLICT(user) DO UPDATE SET
                   follows_me = 1,
                   timestamp = excluded.timestamp,
                   updated_at = excluded.updated_at"#,
            self.name
        );
        let following_sql = format!(
            r#"INSERT INTO "{}" (user, follows_me, follow_it, timestamp, updated_at, inserted_at)
               VALUES (?1, 0, 1, ?2, ?3, ?3)
               ON CONFLICT(user) DO UPDATE SET
                   follow_it = 1,
                   timestamp = excluded.timestamp,
                   updated_at = excluded.updated_at"#,
            self.name
        );

        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut follower_stmt = tx.prepare(&follower_sql)?;
                    let mut following_stmt = tx.prepare(&following_sql)?;
                    for op in &ops {
                        let stmt = match op.source {
                            ReferenceKind::Followers => &mut follower_stmt,
                            ReferenceKind::Followings => &mut following_stmt,
                        };
                        stmt.execute(params![op.user, op.timestamp.timestamp(), op.at.to_rfc3339()])?;
                    }
                }
                tx.commit()?;
                Ok(ops.len())
            })
            .await
    }
}
