//! # Windowed count checkpoints
//!
//! Frame counts are buffered by [`CountAccumulator`] and flushed as a [`CheckpointRecord`] every
//! `window` frames. A record holds the buffered counts in frame order and the index of the last
//! frame it covers. Counts that never fill a complete window are not flushed when the run ends.

use crate::error::{Error, Result};
use chrono::{NaiveDateTime, SubsecRound, Utc};
use itertools::Itertools;
use log::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Persisted batch of frame counts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Counts in frame order.
    pub count: Vec<usize>,
    /// Index of the last frame included.
    pub index: usize,
}

/// Durable storage of checkpoint records.
pub trait CheckpointSink {
    /// Persist a single record.
    ///
    /// A record must either be written completely or not at all.
    fn write(&mut self, record: &CheckpointRecord) -> io::Result<()>;
}

impl<T: CheckpointSink + ?Sized> CheckpointSink for Box<T> {
    fn write(&mut self, record: &CheckpointRecord) -> io::Result<()> {
        (**self).write(record)
    }
}

/// Writes each record to its own timestamped JSON file.
///
/// Files are named `<stem><timestamp>.json`. Timestamps strictly increase within a sink, so
/// sorting the filenames yields records in write order.
pub struct DirectorySink {
    dir: PathBuf,
    stem: String,
    last_stamp: Option<NaiveDateTime>,
}

impl DirectorySink {
    /// Create a new directory sink.
    ///
    /// The directory is created if it does not exist.
    ///
    /// # Arguments
    ///
    /// * `dir` - output directory.
    /// * `stem` - filename prefix of every record.
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            stem: stem.into(),
            last_stamp: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Timestamp of the next record, strictly after every earlier one.
    fn next_stamp(&mut self, now: NaiveDateTime) -> NaiveDateTime {
        // Filenames only hold microseconds.
        let now = now.trunc_subsecs(6);
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }
}

impl CheckpointSink for DirectorySink {
    fn write(&mut self, record: &CheckpointRecord) -> io::Result<()> {
        let stamp = self.next_stamp(Utc::now().naive_utc());
        let name = format!("{}{}.json", self.stem, stamp.format("%Y%m%dT%H%M%S%.6f"));
        let path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!(".{name}.tmp"));

        let result = (|| {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer(&mut out, record)?;
            out.flush()?;
            out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            std::fs::rename(&tmp_path, &path)
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        } else {
            debug!("Wrote {} counts to {}", record.count.len(), path.display());
        }

        result
    }
}

/// Keeps records in memory.
///
/// Clones share the same storage, so a clone can be kept to inspect what a pipeline wrote.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<CheckpointRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all records written so far.
    pub fn records(&self) -> Vec<CheckpointRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl CheckpointSink for MemorySink {
    fn write(&mut self, record: &CheckpointRecord) -> io::Result<()> {
        self.records
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "record storage poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

/// Discards every record.
#[derive(Clone, Copy, Default)]
pub struct NullSink;

impl CheckpointSink for NullSink {
    fn write(&mut self, _: &CheckpointRecord) -> io::Result<()> {
        Ok(())
    }
}

/// Buffers frame counts and flushes them every `window` frames.
pub struct CountAccumulator {
    window: usize,
    buffer: Vec<usize>,
    next_index: usize,
    written: usize,
    sink: Box<dyn CheckpointSink>,
}

impl CountAccumulator {
    /// Create a new accumulator.
    ///
    /// # Arguments
    ///
    /// * `window` - number of frames per record. Must be non-zero.
    /// * `sink` - storage for the records.
    pub fn new(window: usize, sink: impl CheckpointSink + 'static) -> Self {
        Self::with_boxed_sink(window, Box::new(sink))
    }

    pub fn with_boxed_sink(window: usize, sink: Box<dyn CheckpointSink>) -> Self {
        Self {
            window: window.max(1),
            buffer: Vec::with_capacity(window),
            next_index: 0,
            written: 0,
            sink,
        }
    }

    /// Append the count of a frame.
    ///
    /// Counts must be pushed in frame order, starting at frame 0. When frame `index` completes a
    /// window (`(index + 1) % window == 0`), every buffered count is written out as one record and
    /// the record is returned.
    ///
    /// If writing fails, [`Error::Persistence`] is returned and the counts stay buffered. They will
    /// be part of the record written at the next window boundary.
    pub fn push(&mut self, index: usize, count: usize) -> Result<Option<CheckpointRecord>> {
        if index != self.next_index {
            return Err(Error::OutOfOrder {
                index,
                expected: self.next_index,
            });
        }

        self.buffer.push(count);
        self.next_index += 1;

        if self.next_index % self.window != 0 {
            return Ok(None);
        }

        let record = CheckpointRecord {
            count: std::mem::take(&mut self.buffer),
            index,
        };

        match self.sink.write(&record) {
            Ok(()) => {
                self.written += 1;
                Ok(Some(record))
            }
            Err(source) => {
                self.buffer = record.count;
                Err(Error::Persistence { index, source })
            }
        }
    }

    /// Counts waiting for the next window boundary.
    pub fn buffered(&self) -> &[usize] {
        &self.buffer
    }

    /// Number of records written.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Index of the next frame expected by [`push`](Self::push).
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// End accumulation.
    ///
    /// Buffered counts that never completed a window are not written. They are returned to the
    /// caller for reporting.
    pub fn finish(self) -> Vec<usize> {
        self.buffer
    }
}

/// Load every checkpoint record in `dir` whose filename starts with `stem`.
///
/// Records are returned in filename order, which is write order for records written by a
/// [`DirectorySink`].
pub fn load_checkpoints(dir: impl AsRef<Path>, stem: &str) -> Result<Vec<CheckpointRecord>> {
    std::fs::read_dir(dir.as_ref())?
        .map(|entry| entry.map(|e| e.path()))
        .filter_ok(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(stem) && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect::<io::Result<Vec<_>>>()?
        .into_iter()
        .sorted()
        .map(|path| -> Result<CheckpointRecord> {
            let reader = BufReader::new(File::open(&path)?);
            let record = serde_json::from_reader(reader)?;
            trace!("Loaded {}", path.display());
            Ok(record)
        })
        .collect()
}

/// Concatenate the counts of records.
///
/// `index` fields are not used to order or de-duplicate records.
pub fn concat_counts<'a>(records: impl IntoIterator<Item = &'a CheckpointRecord>) -> Vec<usize> {
    records
        .into_iter()
        .flat_map(|r| r.count.iter().copied())
        .collect()
}
