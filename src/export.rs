//! Plain-text list artifacts: one handle per line, regenerated on every run.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::Result;

/// Accounts I follow that don't follow me back
pub const DIFF_LIST_PREFIX: &str = "list";

/// Accounts that stopped following me since the previous run
pub const UNFOLLOWERS_LIST_PREFIX: &str = "unfollowers";

/// `<prefix>_YYYYMMDD.txt`
pub fn list_file_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}_{:04}{:02}{:02}.txt", prefix, date.year(), date.month(), date.day())
}

/// Leave an empty file at `path`, whether or not it existed.
async fn truncate(path: &Path) -> Result<()> {
    match fs::File::create(path).await {
        Ok(_) => Ok(()),
        Err(e) => {
            log::warn!("Could not truncate {}: {}; retrying with a plain write", path.display(), e);
            fs::write(path, b"").await?;
            Ok(())
        }
    }
}

/// Write `handles` to `<dir>/<prefix>_YYYYMMDD.txt`, replacing any earlier content.
pub async fn write_list(dir: &Path, prefix: &str, date: NaiveDate, handles: &[String]) -> Result<PathBuf> {
    let path = dir.join(list_file_name(prefix, date));
    truncate(&path).await?;

    let file = OpenOptions::new().append(true).open(&path).await?;
    let mut writer = BufWriter::new(file);
    for handle in handles {
        writer.write_all(handle.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await?;

    log::info!("Wrote {} handles to {}", handles.len(), path.display());
    Ok(path)
}
