use chrono::Utc;

use crate::db::collections::{BulkWriter, TrackedUpsert};
use crate::db::ReferenceCollection;
use crate::error::Result;
use crate::ingest::{BatchSink, SinkStats};

/// Replay every document of `source` against `target`, one page and one bulk
/// write per `batch_size` documents.
///
/// Pages are read with skip/limit over `ceil(count / batch_size)` pages, in order.
pub async fn replay<W>(source: &ReferenceCollection, target: &W, batch_size: usize) -> Result<SinkStats>
where
    W: BulkWriter<Op = TrackedUpsert>,
{
    let batch_size = batch_size.max(1);
    let total = source.count().await?;
    let pages = total.div_ceil(batch_size);
    let kind = source.kind();

    let mut sink = BatchSink::new(target, batch_size);

    for page in 0..pages {
        let entries = source.page(page * batch_size, batch_size).await?;
        let at = Utc::now();
        for entry in entries {
            sink.push(TrackedUpsert {
                user: entry.user,
                source: kind,
                timestamp: entry.timestamp,
                at,
            })
            .await?;
        }
        // A short last page is written here; full pages already flushed on push
        sink.flush().await?;
        log::debug!("Replayed {} page {}/{}", kind, page + 1, pages);
    }

    sink.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::collections::tests::setup_test_db;
    use crate::db::collections::{from_unix_seconds, ReferenceUpsert};
    use crate::db::ReferenceKind;
    use crate::ingest::sink::tests::RecordingWriter;
    use std::collections::HashSet;

    async fn seeded_followers(n: usize) -> (ReferenceCollection, tempfile::TempDir) {
        let (db, temp_dir) = setup_test_db().await;
        let followers = ReferenceCollection::new(db, ReferenceKind::Followers);
        let ops = (0..n)
            .map(|i| ReferenceUpsert {
                user: format!("user{}", i),
                timestamp: from_unix_seconds(1_000 + i as i64).unwrap(),
                updated: Utc::now(),
            })
            .collect();
        followers.bulk_write(ops).await.unwrap();
        (followers, temp_dir)
    }

    #[tokio::test]
    async fn test_bulk_writes_equal_page_count() {
        for (n, batch_size, expected) in [(5, 2, 3), (4, 2, 2), (1, 10, 1), (10, 1, 10), (0, 3, 0)] {
            let (followers, _temp_dir) = seeded_followers(n).await;
            let writer = RecordingWriter::<TrackedUpsert>::default();

            let stats = replay(&followers, &writer, batch_size).await.unwrap();
            assert_eq!(stats.bulk_writes, expected, "n={} batch={}", n, batch_size);
            assert_eq!(stats.written, n);

            let calls = writer.calls();
            assert_eq!(calls.len(), expected);
            let users: Vec<String> = calls.into_iter().flatten().map(|op| op.user).collect();
            let unique: HashSet<_> = users.iter().cloned().collect();
            assert_eq!(users.len(), n, "every document exactly once");
            assert_eq!(unique.len(), n);
        }
    }

    #[tokio::test]
    async fn test_replay_carries_source_and_timestamp() {
        let (followers, _temp_dir) = seeded_followers(2).await;
        let writer = RecordingWriter::<TrackedUpsert>::default();
        replay(&followers, &writer, 10).await.unwrap();

        let calls = writer.calls();
        assert_eq!(calls[0][1].user, "user1");
        assert_eq!(calls[0][1].source, ReferenceKind::Followers);
        assert_eq!(calls[0][1].timestamp.timestamp(), 1_001);
    }

    #[tokio::test]
    async fn test_replay_stops_on_failed_batch() {
        let (followers, _temp_dir) = seeded_followers(6).await;
        let writer = RecordingWriter::<TrackedUpsert> { fail_on_call: Some(1), ..Default::default() };
        assert!(replay(&followers, &writer, 2).await.is_err());
        assert_eq!(writer.calls().len(), 1);
    }
}
