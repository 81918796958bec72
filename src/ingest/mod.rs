pub mod classify;
pub mod record;
pub mod scanner;
pub mod sink;
pub mod stream;
pub mod walker;

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use futures_util::{pin_mut, TryStreamExt};
use tokio::io::AsyncRead;

pub use classify::classify;
pub use record::UserRecord;
pub use scanner::{FragmentScanner, CLOSE_MARKER, OPEN_MARKER};
pub use sink::{BatchSink, SinkStats};
pub use stream::ExportStream;
pub use walker::{discover_export_files, require_pair};

use crate::db::collections::{BulkWriter, ReferenceUpsert};
use crate::db::{Db, ReferenceCollection, ReferenceKind};
use crate::error::Result;

/// Outcome of loading one export file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub path: PathBuf,
    pub kind: ReferenceKind,
    pub records: usize,
    pub bulk_writes: usize,
}

/// Drain `export` into `writer` through a batch sink.
pub async fn ingest_stream<R, W>(export: ExportStream<R>, writer: &W, batch_size: usize) -> Result<SinkStats>
where
    R: AsyncRead + Unpin,
    W: BulkWriter<Op = ReferenceUpsert>,
{
    let mut sink = BatchSink::new(writer, batch_size);
    let records = export.into_stream();
    pin_mut!(records);

    while let Some(record) = records.try_next().await? {
        sink.push(record.to_upsert(Utc::now())?).await?;
    }

    sink.finish().await
}

/// Stream one export file into the reference collection it classifies as.
///
/// Any parse, validation or bulk-write failure aborts the file.
pub async fn ingest_file(
    db: &Db,
    path: &Path,
    batch_size: usize,
    chunk_size: usize,
) -> Result<IngestReport> {
    let start = Instant::now();
    let export = ExportStream::from_path(path, chunk_size).await?;
    let kind = export.kind();
    log::info!("Processing {} as {}", path.display(), kind);

    let collection = ReferenceCollection::new(db.clone(), kind);
    let stats = ingest_stream(export, &collection, batch_size).await?;

    log::info!(
        "Stored {} {} from {} in {} bulk writes ({:?})",
        stats.written,
        kind,
        path.display(),
        stats.bulk_writes,
        start.elapsed()
    );

    Ok(IngestReport {
        path: path.to_path_buf(),
        kind,
        records: stats.written,
        bulk_writes: stats.bulk_writes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::collections::tests::setup_test_db;
    use crate::ingest::sink::tests::RecordingWriter;
    use std::fs;

    const FOLLOWERS: &str = r#"[
  {"title": "", "media_list_data": [], "string_list_data": [{"href": "https://www.instagram.com/alice", "value": "alice", "timestamp": 100}]},
  {"title": "", "media_list_data": [], "string_list_data": [{"href": "https://www.instagram.com/bob", "value": "bob", "timestamp": 200}]},
  {"title": "", "media_list_data": [], "string_list_data": [{"href": "https://www.instagram.com/dave", "value": "dave", "timestamp": 300}]}
]"#;

    #[tokio::test]
    async fn test_ingest_stream_batches() {
        let writer = RecordingWriter::<ReferenceUpsert>::default();
        let export = ExportStream::open(FOLLOWERS.as_bytes(), 40).await.unwrap();
        let stats = ingest_stream(export, &writer, 2).await.unwrap();

        assert_eq!(stats, SinkStats { bulk_writes: 2, written: 3 });
        let calls = writer.calls();
        let users: Vec<Vec<&str>> = calls
            .iter()
            .map(|call| call.iter().map(|op| op.user.as_str()).collect())
            .collect();
        assert_eq!(users, vec![vec!["alice", "bob"], vec!["dave"]]);
        assert_eq!(calls[1][0].timestamp.timestamp(), 300);
    }

    #[tokio::test]
    async fn test_ingest_file_into_classified_collection() {
        let (db, temp_dir) = setup_test_db().await;
        let path = temp_dir.path().join("followers_1.json");
        fs::write(&path, FOLLOWERS).unwrap();

        let report = ingest_file(&db, &path, 2, 16).await.unwrap();
        assert_eq!(report.kind, ReferenceKind::Followers);
        assert_eq!(report.records, 3);
        assert_eq!(report.bulk_writes, 2);

        let followers = ReferenceCollection::new(db.clone(), ReferenceKind::Followers);
        let followings = ReferenceCollection::new(db, ReferenceKind::Followings);
        assert_eq!(followers.count().await.unwrap(), 3);
        assert_eq!(followings.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_file_aborts_on_bad_fragment() {
        let (db, temp_dir) = setup_test_db().await;
        let path = temp_dir.path().join("following.json");
        let content = format!(
            "{{\"relationships_following\": [{}]}}",
            r#"{"string_list_data": [{"value": "bob", "timestamp": 1}]}, {"string_list_data": [{"value": "", "timestamp": 2}]}"#
        );
        fs::write(&path, content).unwrap();

        let err = ingest_file(&db, &path, 10, 1024).await.unwrap_err();
        assert!(err.to_string().contains("after 1 accepted"));
    }
}
