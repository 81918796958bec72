//! Recomputes relationship flags of the tracked collection from the two
//! reference collections.
//!
//! Phases run strictly in order: reset, replay followers, replay followings,
//! backfill, history, diff queries. A failed bulk write aborts the pass; batches
//! already applied stay applied. The pass stays open until history is written, so
//! the next pass compares against the last completed one.

pub mod replay;

use std::time::Instant;

use chrono::Utc;

use crate::db::{ReferenceCollection, ReferenceKind, TrackedCollection};
use crate::error::{InstacoError, Result};

pub use replay::replay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub batch_size: usize,
    /// `Some(max_entries)` records history, keeping at most that many entries per account (0 = all).
    pub history: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub reset: usize,
    pub followers_replayed: usize,
    pub followings_replayed: usize,
    pub bulk_writes: usize,
    pub backfilled: usize,
    pub history_entries: usize,
    /// I follow them, they don't follow me; most recent first.
    pub one_way: Vec<String>,
    /// Followed me before this pass, no longer do; most recent first.
    pub lost_followers: Vec<String>,
}

pub struct Reconciler<'a> {
    followers: &'a ReferenceCollection,
    followings: &'a ReferenceCollection,
    tracked: &'a TrackedCollection,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        followers: &'a ReferenceCollection,
        followings: &'a ReferenceCollection,
        tracked: &'a TrackedCollection,
        options: ReconcileOptions,
    ) -> Result<Self> {
        if followers.kind() != ReferenceKind::Followers || followings.kind() != ReferenceKind::Followings {
            return Err(InstacoError::InvalidInput(
                "reconciler needs the followers and followings collections in that order".to_string(),
            ));
        }
        Ok(Self { followers, followings, tracked, options })
    }

    pub async fn run(&self) -> Result<ReconcileReport> {
        let start = Instant::now();
        let mut report = ReconcileReport::default();

        report.reset = self.tracked.reset_flags().await?;
        log::info!("Reset flags on {} tracked accounts", report.reset);

        let followers = replay(self.followers, self.tracked, self.options.batch_size).await?;
        report.followers_replayed = followers.written;
        log::info!("Replayed {} followers in {} bulk writes", followers.written, followers.bulk_writes);

        let followings = replay(self.followings, self.tracked, self.options.batch_size).await?;
        report.followings_replayed = followings.written;
        log::info!("Replayed {} followings in {} bulk writes", followings.written, followings.bulk_writes);

        report.bulk_writes = followers.bulk_writes + followings.bulk_writes;

        report.backfilled = self.tracked.backfill_flags().await?;
        if report.backfilled > 0 {
            log::info!("Backfilled missing flags on {} accounts", report.backfilled);
        }

        report.history_entries = self.tracked.complete_pass(Utc::now(), self.options.history).await?;
        if self.options.history.is_some() {
            log::info!("Recorded {} history entries", report.history_entries);
        }

        report.one_way = self.tracked.one_way().await?;
        report.lost_followers = self.tracked.lost_followers().await?;

        log::info!(
            "Reconciled {} in {:?}: {} not following back, {} stopped following",
            self.tracked.name(),
            start.elapsed(),
            report.one_way.len(),
            report.lost_followers.len()
        );

        Ok(report)
    }
}
