use crate::db::collections::BulkWriter;
use crate::error::Result;

/// Counters of a finished sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub bulk_writes: usize,
    pub written: usize,
}

/// Stages upserts and flushes them as one bulk write every `batch_size` operations.
///
/// The stage is owned by the sink, so two sinks never share pending operations.
pub struct BatchSink<'a, W: BulkWriter> {
    writer: &'a W,
    staged: Vec<W::Op>,
    batch_size: usize,
    stats: SinkStats,
}

impl<'a, W: BulkWriter> BatchSink<'a, W> {
    pub fn new(writer: &'a W, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            writer,
            staged: Vec::with_capacity(batch_size.min(10_000)),
            batch_size,
            stats: SinkStats::default(),
        }
    }

    pub async fn push(&mut self, op: W::Op) -> Result<()> {
        self.staged.push(op);
        if self.staged.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write whatever is staged, even below the batch size.
    pub async fn flush(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut self.staged);
        let count = ops.len();
        self.stats.written += self.writer.bulk_write(ops).await?;
        self.stats.bulk_writes += 1;
        log::debug!("Bulk write #{} applied {} operations", self.stats.bulk_writes, count);
        Ok(())
    }

    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Flush the remainder and return the counters.
    pub async fn finish(mut self) -> Result<SinkStats> {
        self.flush().await?;
        Ok(self.stats)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::InstacoError;
    use std::sync::Mutex;

    /// Keeps every bulk write it receives.
    pub(crate) struct RecordingWriter<T> {
        pub calls: Mutex<Vec<Vec<T>>>,
        pub fail_on_call: Option<usize>,
    }

    impl<T> Default for RecordingWriter<T> {
        fn default() -> Self {
            Self { calls: Mutex::new(Vec::new()), fail_on_call: None }
        }
    }

    impl<T: Clone + Send + 'static> RecordingWriter<T> {
        pub fn calls(&self) -> Vec<Vec<T>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl<T: Send + 'static> BulkWriter for RecordingWriter<T> {
        type Op = T;

        async fn bulk_write(&self, ops: Vec<T>) -> Result<usize> {
            let mut calls = self.calls.lock().unwrap();
            if self.fail_on_call == Some(calls.len()) {
                return Err(InstacoError::InvalidInput("bulk write rejected".to_string()));
            }
            let n = ops.len();
            calls.push(ops);
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_flushes_every_batch_and_remainder() {
        let writer = RecordingWriter::<u32>::default();
        let mut sink = BatchSink::new(&writer, 3);
        for i in 0..7 {
            sink.push(i).await.unwrap();
        }
        assert_eq!(sink.staged(), 1);
        let stats = sink.finish().await.unwrap();

        assert_eq!(stats, SinkStats { bulk_writes: 3, written: 7 });
        assert_eq!(writer.calls(), vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_flush() {
        let writer = RecordingWriter::<u32>::default();
        let mut sink = BatchSink::new(&writer, 2);
        for i in 0..4 {
            sink.push(i).await.unwrap();
        }
        let stats = sink.finish().await.unwrap();
        assert_eq!(stats.bulk_writes, 2);
    }

    #[tokio::test]
    async fn test_empty_sink_writes_nothing() {
        let writer = RecordingWriter::<u32>::default();
        let stats = BatchSink::new(&writer, 10).finish().await.unwrap();
        assert_eq!(stats, SinkStats::default());
        assert!(writer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_write_failure_propagates() {
        let writer = RecordingWriter::<u32> { fail_on_call: Some(1), ..Default::default() };
        let mut sink = BatchSink::new(&writer, 2);
        sink.push(1).await.unwrap();
        sink.push(2).await.unwrap();
        sink.push(3).await.unwrap();
        assert!(sink.push(4).await.is_err());
    }

    #[tokio::test]
    async fn test_separate_sinks_do_not_share_stage() {
        let first = RecordingWriter::<u32>::default();
        let second = RecordingWriter::<u32>::default();
        let mut a = BatchSink::new(&first, 10);
        let mut b = BatchSink::new(&second, 10);
        a.push(1).await.unwrap();
        b.push(2).await.unwrap();
        a.finish().await.unwrap();
        b.finish().await.unwrap();
        assert_eq!(first.calls(), vec![vec![1]]);
        assert_eq!(second.calls(), vec![vec![2]]);
    }
}
