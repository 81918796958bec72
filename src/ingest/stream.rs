//! Lazy stream of validated user records read from an export file.

use std::collections::VecDeque;
use std::path::Path;

use futures_util::stream::{self, Stream};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::classify::classify;
use super::record::UserRecord;
use super::scanner::FragmentScanner;
use crate::db::ReferenceKind;
use crate::error::{InstacoError, Result};

pub struct ExportStream<R> {
    reader: R,
    scanner: FragmentScanner,
    pending: VecDeque<Vec<u8>>,
    chunk: Vec<u8>,
    kind: ReferenceKind,
    accepted: usize,
    eof: bool,
}

impl ExportStream<File> {
    /// Open an export file. The file handle is closed when the stream is dropped.
    pub async fn from_path(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = File::open(path).await.map_err(|e| {
            InstacoError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot open {}: {}", path.display(), e),
            ))
        })?;
        Self::open(file, chunk_size).await
    }
}

impl<R: AsyncRead + Unpin> ExportStream<R> {
    /// Read the first chunk and classify the export from it.
    pub async fn open(reader: R, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(InstacoError::InvalidInput("chunk size must be greater than 0".to_string()));
        }

        let mut stream = Self {
            reader,
            scanner: FragmentScanner::default(),
            pending: VecDeque::new(),
            chunk: vec![0; chunk_size],
            kind: ReferenceKind::Followers,
            accepted: 0,
            eof: false,
        };

        let n = stream.read_chunk().await?;
        stream.kind = classify(&stream.chunk[..n]);
        stream.feed(n);
        log::debug!("Export classified as {} from a {} byte first chunk", stream.kind, n);

        Ok(stream)
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    /// Records yielded so far
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Next validated record, or `None` at the end of the export.
    pub async fn next_record(&mut self) -> Result<Option<UserRecord>> {
        loop {
            if let Some(fragment) = self.pending.pop_front() {
                let record = UserRecord::from_fragment(&fragment).map_err(|reason| {
                    InstacoError::InvalidFragment { index: self.accepted, reason }
                })?;
                self.accepted += 1;
                return Ok(Some(record));
            }

            if self.eof {
                self.scanner.finish()?;
                return Ok(None);
            }

            let n = self.read_chunk().await?;
            self.feed(n);
        }
    }

    /// Turn the reader into a `Stream` of records.
    pub fn into_stream(self) -> impl Stream<Item = Result<UserRecord>> {
        stream::try_unfold(self, |mut export| async move {
            let next = export.next_record().await?;
            Ok::<_, InstacoError>(next.map(|record| (record, export)))
        })
    }

    fn feed(&mut self, n: usize) {
        if n == 0 {
            self.eof = true;
            return;
        }
        self.scanner.feed(&self.chunk[..n], &mut self.pending);
    }

    /// Fill the chunk buffer, short only at end of stream.
    async fn read_chunk(&mut self) -> Result<usize> {
        let mut filled = 0;
        while filled < self.chunk.len() {
            let n = self.reader.read(&mut self.chunk[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}
