//! Per-job log directories.
//!
//! Every job writes into its own directory:
//!
//! ```text
//! <log_dir>/
//!   attempt-1.log   stdout + stderr of the first attempt, then a status trailer
//!   attempt-2.log   ... one file per attempt actually made
//!   job.json        summary written once the job is terminal
//! ```
//!
//! Attempt files are never shared between attempts, so the output of a failed
//! attempt is still there after a later attempt succeeds. Preparing the
//! directory for a new run removes the previous run's attempt files and
//! summary, so everything in it belongs to the latest run.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::job::{AttemptOutcome, JobId};

/// File name of the terminal summary inside a job's log directory.
pub const SUMMARY_FILE: &str = "job.json";

/// A job's log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    dir: PathBuf,
}

impl LogRecord {
    /// Refer to `dir` without touching the filesystem.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the directory (and parents) if needed and clear the logs a
    /// previous run left behind. Unrelated files are kept.
    pub fn prepare(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let record = Self::new(dir);
        fs::create_dir_all(&record.dir)?;
        record.clear_previous_run()?;
        Ok(record)
    }

    fn clear_previous_run(&self) -> io::Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if (name == SUMMARY_FILE || is_attempt_log(&name)) && entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log file for a 1-based attempt number.
    pub fn attempt_path(&self, attempt: u32) -> PathBuf {
        self.dir.join(format!("attempt-{}.log", attempt))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    /// Open (truncating) the log file for `attempt`.
    pub fn create_attempt_file(&self, attempt: u32) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.attempt_path(attempt))
    }

    /// Append a line to an attempt's log file.
    pub fn append_line(&self, attempt: u32, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.attempt_path(attempt))?;
        writeln!(file, "{}", line)
    }

    pub fn write_summary(&self, summary: &JobSummary) -> io::Result<()> {
        let json = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
        fs::write(self.summary_path(), json)
    }

    pub fn read_summary(&self) -> io::Result<JobSummary> {
        let content = fs::read_to_string(self.summary_path())?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn is_attempt_log(name: &str) -> bool {
    name.strip_prefix("attempt-")
        .and_then(|rest| rest.strip_suffix(".log"))
        .is_some_and(|n| n.parse::<u32>().is_ok())
}

/// Terminal state recorded in `job.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
}

/// One attempt as recorded in `job.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptEntry {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub log_file: String,
}

/// Contents of `job.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub command: String,
    pub status: JobStatus,
    pub max_attempts: u32,
    pub attempts: Vec<AttemptEntry>,
    pub elapsed_ms: u64,
}
