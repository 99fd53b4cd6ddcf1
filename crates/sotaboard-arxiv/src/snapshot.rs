//! Streaming reader for the bulk metadata snapshot.
//!
//! The snapshot is one JSON object per line and far too large to load
//! whole. Lines that fail to parse are skipped and counted rather than
//! failing the scan.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use sotaboard_core::PaperRecord;

pub struct SnapshotReader {
    lines: Lines<BufReader<File>>,
    skipped: usize,
}

impl SnapshotReader {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            skipped: 0,
        })
    }

    /// Number of lines skipped so far (malformed JSON or read errors).
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for SnapshotReader {
    type Item = PaperRecord;

    fn next(&mut self) -> Option<PaperRecord> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "snapshot read error, skipping line");
                    self.skipped += 1;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PaperRecord>(&line) {
                Ok(record) => return Some(record),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed snapshot line");
                    self.skipped += 1;
                }
            }
        }
    }
}
