//! # Telemetry Recorder
//!
//! Writes periodic records as JSON Lines into rotating files.
//!
//! - One JSON object per line
//! - A new file every `max_records_per_file` records
//! - Only the newest `max_files_to_keep` files are retained

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::Result;

const FILE_PREFIX: &str = "telemetry_";
const FILE_SUFFIX: &str = ".jsonl";

/// Rotating JSONL writer
#[derive(Debug)]
pub struct TelemetryRecorder {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    file_seq: u64,
}

impl TelemetryRecorder {
    /// Create a recorder writing under `dir` (created if missing)
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new<P: AsRef<Path>>(
        dir: P,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        info!("Recording telemetry to {}", dir.display());

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            records_in_file: 0,
            file_seq: 0,
        })
    }

    /// Append one record, rotating first if the current file is full
    ///
    /// # Errors
    ///
    /// Returns error on serialization or file I/O failure
    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)?;
        self.write_line(&line)
    }

    /// Append one already serialized JSON line
    ///
    /// # Errors
    ///
    /// Returns error on file I/O failure
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        self.records_in_file += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        self.file_seq += 1;
        let name = format!(
            "{}{}_{:06}{}",
            FILE_PREFIX,
            Utc::now().format("%Y%m%dT%H%M%S"),
            self.file_seq,
            FILE_SUFFIX
        );
        let path = self.dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened telemetry file {}", path.display());

        self.writer = Some(BufWriter::new(file));
        self.records_in_file = 0;
        self.prune();
        Ok(())
    }

    /// Delete the oldest files beyond the retention limit
    fn prune(&self) {
        let mut files = match self.list_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list telemetry files: {}", e);
                return;
            }
        };

        if files.len() <= self.max_files_to_keep {
            return;
        }

        files.sort();
        let excess = files.len() - self.max_files_to_keep;
        for path in files.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to delete old telemetry file {}: {}", path.display(), e);
            }
        }
    }

    fn list_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_ours = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
                .unwrap_or(false);
            if is_ours {
                files.push(path);
            }
        }
        Ok(files)
    }
}

/// Write one sampled record every `period` until shutdown.
///
/// Records are sampled and serialized on the runtime; file writes and
/// rotation run on the blocking pool. A slow disk only delays this loop.
/// Failed records are logged and the next one is tried.
///
/// # Returns
///
/// * `u64` - Number of records written
pub async fn run_recorder<F, T>(
    mut recorder: TelemetryRecorder,
    period: Duration,
    mut sample: F,
    mut shutdown: watch::Receiver<bool>,
) -> u64
where
    F: FnMut() -> T + Send,
    T: Serialize,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut written: u64 = 0;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                let line = match serde_json::to_string(&sample()) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to serialize telemetry record: {}", e);
                        continue;
                    }
                };

                let task = tokio::task::spawn_blocking(move || {
                    let result = recorder.write_line(&line);
                    (recorder, result)
                });
                match task.await {
                    Ok((back, result)) => {
                        recorder = back;
                        match result {
                            Ok(()) => written += 1,
                            Err(e) => warn!("Failed to write telemetry record: {}", e),
                        }
                    }
                    Err(e) => {
                        error!("Telemetry writer task failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    info!("Telemetry recorder stopped after {} records", written);
    written
}
