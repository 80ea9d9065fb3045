use log::{debug, error, warn};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use crate::error::AcqError;

/// Buffered JSON-lines journal written while a run is in progress.
///
/// Records reach disk every `buffer_size` entries and on drop, so an
/// interrupted run still leaves everything up to the last flush behind.
#[derive(Debug)]
pub struct Journal<T>
where
    T: Serialize,
{
    buffer: Vec<T>,
    buffer_size: usize,
    file_path: PathBuf,
    written: usize,
    flush_failures: usize,
    max_flush_failures: usize,
}

impl<T> Journal<T>
where
    T: Serialize,
{
    pub fn new<P: Into<PathBuf>>(file_path: P, buffer_size: usize) -> Self {
        let mut path = file_path.into();
        // Run names may contain dots, e.g. "37.5C"
        if path.extension() != Some(std::ffi::OsStr::new("jsonl")) {
            let mut name = path.into_os_string();
            name.push(".jsonl");
            path = PathBuf::from(name);
        }

        Self {
            buffer: Vec::with_capacity(buffer_size),
            buffer_size: buffer_size.max(1),
            file_path: path,
            written: 0,
            flush_failures: 0,
            max_flush_failures: 10,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn add(&mut self, entry: T) -> Result<(), AcqError> {
        self.buffer.push(entry);

        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    /// Append buffered entries to the file.
    ///
    /// A failed flush keeps the entries buffered for the next attempt; only
    /// repeated consecutive failures are reported as an error.
    pub fn flush(&mut self) -> Result<(), AcqError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        match self.write_buffer() {
            Ok(()) => {
                self.flush_failures = 0;
                self.written += self.buffer.len();
                debug!(
                    "Journal flushed {} entries to {}",
                    self.buffer.len(),
                    self.file_path.display()
                );
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.flush_failures += 1;
                error!(
                    "Journal flush failure {}/{}: {}",
                    self.flush_failures, self.max_flush_failures, e
                );

                if self.flush_failures >= self.max_flush_failures {
                    return Err(AcqError::Io {
                        source: std::io::Error::other(e.to_string()),
                        context: format!(
                            "Too many consecutive flush failures ({}) for {}",
                            self.max_flush_failures,
                            self.file_path.display()
                        ),
                    });
                }

                if self.flush_failures % 3 == 0 {
                    warn!(
                        "Experiencing intermittent journal flush failures ({}/{})",
                        self.flush_failures, self.max_flush_failures
                    );
                }
                Ok(())
            }
        }
    }

    fn write_buffer(&self) -> Result<(), AcqError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(|e| {
                AcqError::io(e, format!("Could not open journal {}", self.file_path.display()))
            })?;

        let mut writer = std::io::BufWriter::new(file);
        for entry in &self.buffer {
            let line = serde_json::to_string(entry)?;
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Entries flushed to disk so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl<T> Drop for Journal<T>
where
    T: Serialize,
{
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("Journal {} lost entries: {e}", self.file_path.display());
        }
    }
}

/// Load every entry of a journal back.
pub fn read_journal<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, AcqError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| AcqError::io(e, format!("Could not read journal {}", path.display())))?;

    let mut entries = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            entries.push(serde_json::from_str(&line)?);
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{Reading, Sample, SampleLog};
    use std::time::Duration;

    fn samples(n: usize) -> Vec<Sample> {
        let mut log = SampleLog::new();
        for i in 0..n {
            log.push(Duration::from_millis(i as u64 * 10), Reading::new(i as f64));
        }
        log.into_samples()
    }

    #[test]
    fn flushes_when_buffer_fills_and_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run");
        let expected = samples(5);

        let journal_path = {
            let mut journal = Journal::new(&path, 2);
            for s in &expected {
                journal.add(s.clone()).unwrap();
            }
            assert_eq!(journal.written(), 4);
            assert_eq!(journal.len(), 1);
            journal.path().to_path_buf()
        };

        assert_eq!(journal_path.extension().unwrap(), "jsonl");
        let back: Vec<Sample> = read_journal(&journal_path).unwrap();
        assert_eq!(back.len(), expected.len());
        for (b, e) in back.iter().zip(&expected) {
            assert_eq!(b.value, e.value);
            assert!((b.elapsed_s - e.elapsed_s).abs() < 1e-12);
            assert_eq!(b.timestamp, e.timestamp);
        }
    }

    #[test]
    fn dotted_run_names_keep_their_full_stem() {
        let dir = tempfile::tempdir().unwrap();
        let a = Journal::<Sample>::new(dir.path().join("Sample_37.5C_240101_120000"), 10);
        let b = Journal::<Sample>::new(dir.path().join("Sample_37.8C_240101_120000"), 10);
        assert_eq!(
            a.path().file_name().unwrap(),
            "Sample_37.5C_240101_120000.jsonl"
        );
        assert_ne!(a.path(), b.path());

        let c = Journal::<Sample>::new(dir.path().join("run.jsonl"), 10);
        assert_eq!(c.path().file_name().unwrap(), "run.jsonl");
    }

    #[test]
    fn keeps_entries_when_directory_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::new(dir.path().join("missing/run.jsonl"), 1);
        journal.add(samples(1).remove(0)).unwrap();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.written(), 0);
    }
}
