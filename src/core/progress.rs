//! Purpose: Track how much of the input has been read and log it periodically.
//! Exports: `Progress`, `ProgressReader`, `ProgressLogger`.
//! Role: Operator feedback for long loads; no effect on what gets decoded.
//! Invariants: Byte counts only grow; percentages are clamped to 100.
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

// Shortest accepted logging period; shorter requests are raised to it.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct Progress {
    read: Arc<AtomicU64>,
    total: Option<u64>,
}

impl Progress {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            read: Arc::new(AtomicU64::new(0)),
            total,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// `None` when the total size is unknown.
    pub fn percent(&self) -> Option<f64> {
        let total = self.total?;
        if total == 0 {
            return Some(100.0);
        }
        let ratio = self.bytes_read() as f64 / total as f64;
        Some((ratio * 100.0).min(100.0))
    }

    fn add(&self, bytes: usize) {
        self.read.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

pub struct ProgressReader<R> {
    inner: R,
    progress: Progress,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, total: Option<u64>) -> Self {
        Self {
            inner,
            progress: Progress::new(total),
        }
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.progress.add(read);
        Ok(read)
    }
}

/// Background task logging the input position every interval.
pub struct ProgressLogger {
    progress: Progress,
    task: JoinHandle<()>,
}

impl ProgressLogger {
    /// Must be called from within a tokio runtime. `interval` is raised to at least 100ms.
    pub fn spawn(progress: Progress, interval: Duration) -> Self {
        let reported = progress.clone();
        let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
        let task = tokio::spawn(async move {
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                log_position(&reported);
            }
        });
        Self { progress, task }
    }

    pub fn stop(self) {
        self.task.abort();
        tracing::info!(bytes = self.progress.bytes_read(), "input processed");
    }
}

fn log_position(progress: &Progress) {
    match progress.percent() {
        Some(percent) => tracing::info!(
            bytes = progress.bytes_read(),
            "{percent:.2}% of input processed"
        ),
        None => tracing::info!(bytes = progress.bytes_read(), "input read so far"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use std::time::Duration;

    use super::{Progress, ProgressLogger, ProgressReader};

    #[test]
    fn reader_counts_bytes() {
        let mut reader = ProgressReader::new(Cursor::new(vec![b'x'; 40]), Some(80));
        let progress = reader.progress();
        let mut buf = [0u8; 10];
        reader.read_exact(&mut buf).expect("read");
        assert_eq!(progress.bytes_read(), 10);
        assert_eq!(progress.percent(), Some(12.5));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).expect("read");
        assert_eq!(progress.bytes_read(), 40);
        assert_eq!(progress.percent(), Some(50.0));
    }

    #[test]
    fn percent_handles_unknown_and_empty_totals() {
        assert_eq!(Progress::new(None).percent(), None);
        assert_eq!(Progress::new(Some(0)).percent(), Some(100.0));
    }

    #[test]
    fn percent_is_clamped() {
        let mut reader = ProgressReader::new(Cursor::new(vec![0u8; 10]), Some(4));
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).expect("read");
        assert_eq!(reader.progress().percent(), Some(100.0));
    }

    #[tokio::test]
    async fn zero_interval_logger_starts_and_stops() {
        let progress = Progress::new(Some(10));
        let logger = ProgressLogger::spawn(progress, Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!logger.task.is_finished());
        logger.stop();
    }
}
