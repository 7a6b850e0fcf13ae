//! Durable append-only outbox for records awaiting upload.
//!
//! Records are stored as JSON Lines: one serialized record per line, appended
//! with a single write and synced before [`Outbox::append`] returns. A flush
//! reads the current contents as a [`Batch`]; once the backend acknowledges
//! that batch, [`Outbox::acknowledge`] removes exactly the lines it was read
//! from. Records appended after the batch was read stay in the file.
//!
//! The outbox file is owned by a single writer (the reporting coordinator).
//! Removal rewrites the remaining lines to a sibling temporary file and
//! renames it over the original, so a crash mid-acknowledge leaves either the
//! old or the new contents, never a mix.
//!
//! A line that fails to decode is skipped with a warning and dropped on the
//! next acknowledge. It never blocks the records around it.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from outbox file operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Reading, writing or renaming the outbox file failed.
    #[error("outbox I/O failed for {}: {source}", path.display())]
    Io {
        /// Path of the file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be serialized.
    #[error("failed to encode outbox record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for outbox operations.
pub type OutboxResult<T> = std::result::Result<T, OutboxError>;

/// A snapshot of the outbox taken for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    /// Decoded records in append order.
    pub records: Vec<T>,
    /// Number of complete lines this batch covers, including skipped ones.
    lines: usize,
    /// Lines that could not be decoded.
    pub skipped: usize,
}

impl<T> Batch<T> {
    /// Returns `true` if the batch carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Number of complete lines covered by this batch.
    #[must_use]
    pub const fn lines(&self) -> usize {
        self.lines
    }
}

/// A JSON Lines outbox of `T` records.
#[derive(Debug)]
pub struct Outbox<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> Outbox<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Creates an outbox backed by `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and syncs it to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written.
    pub fn append(&self, record: &T) -> OutboxResult<()> {
        self.append_all(std::slice::from_ref(record))
    }

    /// Appends several records with a single write.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be encoded or the write fails.
    pub fn append_all(&self, records: &[T]) -> OutboxResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        if self.ends_with_partial_line()? {
            // Terminate a torn write so it cannot swallow the next record.
            buf.push(b'\n');
        }
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(&buf).map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), count = records.len(), "appended to outbox");
        Ok(())
    }

    /// Reads every complete line currently in the outbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn read_batch(&self) -> OutboxResult<Batch<T>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Batch {
                    records: Vec::new(),
                    lines: 0,
                    skipped: 0,
                })
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut lines = 0;
        let mut skipped = 0;
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader.read_line(&mut line).map_err(|e| self.io_error(e))?;
            if read == 0 || !line.ends_with('\n') {
                break;
            }
            lines += 1;

            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(
                        path = %self.path.display(),
                        line = lines,
                        error = %e,
                        "skipping corrupt outbox record"
                    );
                }
            }
        }

        Ok(Batch {
            records,
            lines,
            skipped,
        })
    }

    /// Removes the lines covered by an acknowledged `batch`.
    ///
    /// Lines appended after the batch was read are preserved.
    ///
    /// # Errors
    ///
    /// Returns an error if the outbox cannot be read or rewritten. The file
    /// is left unchanged in that case.
    pub fn acknowledge(&self, batch: &Batch<T>) -> OutboxResult<()> {
        if batch.lines == 0 {
            return Ok(());
        }

        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(self.io_error(e)),
        };

        let remainder = skip_lines(&contents, batch.lines);
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp).map_err(|e| self.io_error(e))?;
            file.write_all(remainder).map_err(|e| self.io_error(e))?;
            file.sync_all().map_err(|e| self.io_error(e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(
            path = %self.path.display(),
            removed = batch.lines,
            remaining_bytes = remainder.len(),
            "acknowledged outbox batch"
        );
        Ok(())
    }

    /// Number of decodable records currently pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn pending(&self) -> OutboxResult<usize> {
        Ok(self.read_batch()?.len())
    }

    /// Deletes the outbox file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> OutboxResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn ends_with_partial_line(&self) -> OutboxResult<bool> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(self.io_error(e)),
        };
        let len = file.metadata().map_err(|e| self.io_error(e))?.len();
        if len == 0 {
            return Ok(false);
        }
        file.seek(SeekFrom::End(-1)).map_err(|e| self.io_error(e))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last).map_err(|e| self.io_error(e))?;
        Ok(last[0] != b'\n')
    }

    fn io_error(&self, source: std::io::Error) -> OutboxError {
        OutboxError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Returns the bytes after the first `count` newline-terminated lines.
fn skip_lines(contents: &[u8], count: usize) -> &[u8] {
    let mut seen = 0;
    for (idx, byte) in contents.iter().enumerate() {
        if *byte == b'\n' {
            seen += 1;
            if seen == count {
                return &contents[idx + 1..];
            }
        }
    }
    &contents[contents.len()..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationSample;
    use tempfile::TempDir;

    fn sample(ts: i64) -> LocationSample {
        LocationSample {
            record_timestamp: ts,
            latitude: 48.145_842,
            longitude: 17.126_651,
            accuracy: 10.0,
        }
    }

    fn outbox(dir: &TempDir) -> Outbox<LocationSample> {
        Outbox::new(dir.path().join("outbox").join("locations.jsonl"))
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let batch = outbox(&dir).read_batch().unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.lines(), 0);
    }

    #[test]
    fn test_append_preserves_order() {
        let dir = TempDir::new().unwrap();
        let log = outbox(&dir);
        log.append(&sample(1)).unwrap();
        log.append_all(&[sample(2), sample(3)]).unwrap();

        let batch = log.read_batch().unwrap();
        let stamps: Vec<i64> = batch.records.iter().map(|s| s.record_timestamp).collect();
        assert_eq!(stamps, vec![1, 2, 3]);
    }

    #[test]
    fn test_unacknowledged_batch_is_retained() {
        let dir = TempDir::new().unwrap();
        let log = outbox(&dir);
        log.append_all(&[sample(1), sample(2)]).unwrap();

        // Read for upload, upload fails, nothing acknowledged.
        let first = log.read_batch().unwrap();
        let second = log.read_batch().unwrap();
        assert_eq!(first, second);
        assert_eq!(log.pending().unwrap(), 2);
    }

    #[test]
    fn test_acknowledge_keeps_records_appended_during_flush() {
        let dir = TempDir::new().unwrap();
        let log = outbox(&dir);
        log.append_all(&[sample(1), sample(2)]).unwrap();

        let batch = log.read_batch().unwrap();
        log.append(&sample(3)).unwrap();
        log.acknowledge(&batch).unwrap();

        let rest = log.read_batch().unwrap();
        assert_eq!(rest.records, vec![sample(3)]);
    }

    #[test]
    fn test_corrupt_line_is_skipped_and_dropped_on_ack() {
        let dir = TempDir::new().unwrap();
        let log = outbox(&dir);
        log.append(&sample(1)).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
            file.write_all(b"{not json}\n").unwrap();
        }
        log.append(&sample(2)).unwrap();

        let batch = log.read_batch().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.lines(), 3);

        log.acknowledge(&batch).unwrap();
        assert_eq!(log.read_batch().unwrap().lines(), 0);
    }

    #[test]
    fn test_torn_tail_is_terminated_before_append() {
        let dir = TempDir::new().unwrap();
        let log = outbox(&dir);
        log.append(&sample(1)).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
            file.write_all(b"{\"recordTimes").unwrap();
        }

        // The partial line is not part of the batch yet.
        assert_eq!(log.read_batch().unwrap().lines(), 1);

        log.append(&sample(2)).unwrap();
        let batch = log.read_batch().unwrap();
        assert_eq!(batch.records, vec![sample(1), sample(2)]);
        assert_eq!(batch.skipped, 1);
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let log = outbox(&dir);
        log.append(&sample(1)).unwrap();
        log.clear().unwrap();
        assert!(!log.path().exists());
        log.clear().unwrap();
    }

    #[test]
    fn test_skip_lines() {
        assert_eq!(skip_lines(b"a\nb\nc\n", 2), b"c\n");
        assert_eq!(skip_lines(b"a\nb\n", 5), b"");
    }
}
