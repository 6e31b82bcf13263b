// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL event write-ahead log with group commit.
//!
//! Events are appended to an in-memory buffer and flushed to disk in batches
//! (one fsync per batch, ~10ms durability window). State mutations are
//! applied to the world state synchronously at record time; the log exists
//! for crash recovery via snapshot + replay, so the only read paths are
//! `entries_after` (startup replay) and `truncate_before` (checkpointing).
//!
//! Each entry is a single line of JSON: `{"seq":N,"event":{...}}\n`

use serde::{Deserialize, Serialize};
use shep_core::Event;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Flush interval for group commit (~10ms batches)
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum entries to buffer before forcing flush
const FLUSH_THRESHOLD: usize = 100;

/// Errors that can occur in Wal operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialization helper for writing WAL entries without cloning the event.
#[derive(Serialize)]
struct WalRecordRef<'a> {
    seq: u64,
    event: &'a Event,
}

/// Deserialization helper for reading WAL entries.
#[derive(Deserialize)]
struct WalRecord {
    seq: u64,
    event: Event,
}

/// A single WAL entry with sequence number
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

/// JSONL WAL for durable event storage with group commit.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Highest sequence number assigned so far
    write_seq: u64,
    /// Buffered JSON lines waiting to be flushed (without trailing newline)
    write_buffer: Vec<Vec<u8>>,
    /// Last flush timestamp for interval checking
    last_flush: Instant,
}

impl Wal {
    /// Open or create a WAL at the given path.
    ///
    /// Scans existing entries to find the highest sequence number. A corrupt
    /// tail (partial write from a crash) is rotated to `.bak` and the valid
    /// prefix is preserved in a fresh file.
    pub fn open(path: &Path) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (mut write_seq, corrupt) = Self::scan(&file)?;

        if corrupt {
            let valid_lines = Self::read_valid_lines(&file)?;
            drop(file);

            let bak_path = crate::snapshot::rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = valid_lines.len(),
                "Corrupt WAL detected, rotating to .bak and preserving valid entries",
            );
            std::fs::rename(path, &bak_path)?;

            {
                let mut new_file = File::create(path)?;
                for line in &valid_lines {
                    new_file.write_all(line.as_bytes())?;
                    new_file.write_all(b"\n")?;
                }
                new_file.sync_all()?;
            }

            file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)?;
            write_seq = Self::scan(&file)?.0;
        }

        Ok(Self {
            file,
            path: path.to_owned(),
            write_seq,
            write_buffer: Vec::new(),
            last_flush: Instant::now(),
        })
    }

    /// Scan the WAL for the maximum sequence number.
    ///
    /// Returns `(max_seq, corrupt)` where `corrupt` is true if an
    /// unparseable entry was encountered (not just EOF).
    fn scan(file: &File) -> Result<(u64, bool), WalError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut max_seq = 0u64;
        let mut corrupt = false;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    corrupt = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<WalRecord>(trimmed) {
                Ok(record) => max_seq = max_seq.max(record.seq),
                Err(_) => {
                    corrupt = true;
                    break;
                }
            }
        }

        Ok((max_seq, corrupt))
    }

    /// Read all parseable lines, stopping at the first corrupt entry.
    fn read_valid_lines(file: &File) -> Result<Vec<String>, WalError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut valid_lines = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if serde_json::from_str::<WalRecord>(trimmed).is_err() {
                break;
            }
            valid_lines.push(trimmed.to_string());
        }

        Ok(valid_lines)
    }

    /// Append an event to the write buffer.
    ///
    /// Returns the assigned sequence number. The event is NOT durable until
    /// `flush()` is called.
    pub fn append(&mut self, event: &Event) -> Result<u64, WalError> {
        self.write_seq += 1;
        let seq = self.write_seq;
        let record = WalRecordRef { seq, event };
        let json_bytes = serde_json::to_vec(&record)?;
        self.write_buffer.push(json_bytes);
        Ok(seq)
    }

    /// Check if flush is needed (interval elapsed or buffer full).
    pub fn needs_flush(&self) -> bool {
        !self.write_buffer.is_empty()
            && (self.last_flush.elapsed() >= FLUSH_INTERVAL
                || self.write_buffer.len() >= FLUSH_THRESHOLD)
    }

    /// Flush all buffered entries to disk with a single fsync.
    ///
    /// After this returns successfully, all buffered events are on disk.
    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        for mut json_bytes in self.write_buffer.drain(..) {
            json_bytes.push(b'\n');
            self.file.write_all(&json_bytes)?;
        }

        self.file.sync_all()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Highest sequence number assigned so far.
    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// Iterate over all entries after the given sequence number.
    ///
    /// Used for recovery: replay everything the snapshot does not cover.
    /// A corrupt entry ends the iteration at the corruption point.
    pub fn entries_after(&mut self, seq: u64) -> Result<Vec<WalEntry>, WalError> {
        self.flush()?;

        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let record: WalRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        error = %e,
                        "Corrupt WAL entry during replay, stopping at corruption point",
                    );
                    break;
                }
            };

            if record.seq > seq {
                entries.push(WalEntry {
                    seq: record.seq,
                    event: record.event,
                });
            }
        }

        Ok(entries)
    }

    /// Drop entries before the given sequence number.
    ///
    /// Called after a durable snapshot to reclaim disk space. Rewrites the
    /// file through a `.tmp` + rename so a crash mid-truncation keeps the
    /// old log intact.
    pub fn truncate_before(&mut self, seq: u64) -> Result<(), WalError> {
        self.flush()?;

        let kept: Vec<String> = {
            let mut reader = BufReader::new(self.file.try_clone()?);
            reader.seek(SeekFrom::Start(0))?;

            let mut kept = Vec::new();
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                    Err(e) => return Err(e.into()),
                }

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let record: WalRecord = match serde_json::from_str(trimmed) {
                    Ok(r) => r,
                    Err(_) => break,
                };
                if record.seq >= seq {
                    kept.push(trimmed.to_string());
                }
            }
            kept
        };

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp_file = File::create(&tmp_path)?;
            for kept_line in &kept {
                tmp_file.write_all(kept_line.as_bytes())?;
                tmp_file.write_all(b"\n")?;
            }
            tmp_file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        Ok(())
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
