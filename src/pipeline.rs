use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};

use crate::config::Config;
use crate::db::{Db, ReferenceCollection, ReferenceKind, TrackedCollection};
use crate::error::{InstacoError, Result};
use crate::export::{write_list, DIFF_LIST_PREFIX, UNFOLLOWERS_LIST_PREFIX};
use crate::ingest::{ingest_file, IngestReport};
use crate::reconcile::{ReconcileOptions, ReconcileReport, Reconciler};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub history: bool,
    /// Date stamped on the output lists.
    pub date: NaiveDate,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            history: config.history.enabled,
            date: Local::now().date_naive(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub files: Vec<IngestReport>,
    pub reconcile: ReconcileReport,
    pub diff_list: PathBuf,
    pub unfollowers_list: PathBuf,
    pub elapsed: Duration,
}

/// Full run over one followers export and one followings export.
///
/// Steps run one after another and the first failure ends the run.
pub async fn run(
    config: &Config,
    db: &Db,
    tracked: &TrackedCollection,
    files: &[PathBuf; 2],
    options: &RunOptions,
) -> Result<RunSummary> {
    let start = Instant::now();
    let followers = ReferenceCollection::new(db.clone(), ReferenceKind::Followers);
    let followings = ReferenceCollection::new(db.clone(), ReferenceKind::Followings);

    for collection in [&followers, &followings] {
        let removed = collection.clear().await?;
        log::debug!("Cleared {} documents from {}", removed, collection.kind());
    }

    let mut reports = Vec::with_capacity(files.len());
    for path in files {
        let report = ingest_file(db, path, config.files.batch_size, config.files.read_chunk_bytes).await?;
        reports.push(report);
    }
    check_kinds(&reports)?;

    let reconcile_options = ReconcileOptions {
        batch_size: config.files.batch_size,
        history: options.history.then_some(config.history.max_entries),
    };
    let reconcile = Reconciler::new(&followers, &followings, tracked, reconcile_options)?
        .run()
        .await?;

    let (diff_list, unfollowers_list) = export(config.output_dir(), options.date, &reconcile).await?;

    Ok(RunSummary {
        files: reports,
        reconcile,
        diff_list,
        unfollowers_list,
        elapsed: start.elapsed(),
    })
}

/// One export of each kind is required.
fn check_kinds(reports: &[IngestReport]) -> Result<()> {
    for kind in ReferenceKind::ALL {
        if !reports.iter().any(|r| r.kind == kind) {
            let files: Vec<String> = reports
                .iter()
                .map(|r| format!("{} ({})", r.path.display(), r.kind))
                .collect();
            return Err(InstacoError::InvalidInput(format!(
                "no {} export among the input files: {}",
                kind,
                files.join(", ")
            )));
        }
    }
    Ok(())
}

async fn export(dir: &Path, date: NaiveDate, report: &ReconcileReport) -> Result<(PathBuf, PathBuf)> {
    let diff = write_list(dir, DIFF_LIST_PREFIX, date, &report.one_way).await?;
    let unfollowers = write_list(dir, UNFOLLOWERS_LIST_PREFIX, date, &report.lost_followers).await?;
    Ok((diff, unfollowers))
}
