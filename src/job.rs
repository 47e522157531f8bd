//! Job types shared by the pool, the runners and the job source.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Identifier assigned by the pool at submission, unique per pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// What a job executes. The pool never looks inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCommand {
    /// A command line handed to `sh -c`.
    Shell(String),
    /// A program with an explicit argument vector, no shell involved.
    Exec {
        program: String,
        args: Vec<String>,
        current_dir: Option<PathBuf>,
    },
}

impl JobCommand {
    pub fn shell(line: impl Into<String>) -> Self {
        Self::Shell(line.into())
    }

    pub fn exec<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exec {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            current_dir: None,
        }
    }

    /// Set the working directory the process is launched in.
    pub fn in_dir(self, dir: impl Into<PathBuf>) -> Self {
        match self {
            Self::Shell(line) => Self::Exec {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), line],
                current_dir: Some(dir.into()),
            },
            Self::Exec { program, args, .. } => Self::Exec {
                program,
                args,
                current_dir: Some(dir.into()),
            },
        }
    }

    /// Build the `std::process::Command` for one attempt.
    pub fn to_command(&self) -> Command {
        match self {
            Self::Shell(line) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                cmd
            }
            Self::Exec {
                program,
                args,
                current_dir,
            } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                if let Some(dir) = current_dir {
                    cmd.current_dir(dir);
                }
                cmd
            }
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => write!(f, "sh -c {:?}", line),
            Self::Exec { program, args, .. } => {
                write!(f, "{}", program)?;
                for arg in args {
                    write!(f, " {:?}", arg)?;
                }
                Ok(())
            }
        }
    }
}

/// A unit of work owned by the pool until it is terminal.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub command: JobCommand,
    pub log_dir: PathBuf,
    pub retry: RetryPolicy,
    pub attempts_made: u32,
}

impl Job {
    pub fn new(id: JobId, command: JobCommand, log_dir: PathBuf, retry: RetryPolicy) -> Self {
        Self {
            id,
            command,
            log_dir,
            retry,
            attempts_made: 0,
        }
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Process exited with status zero.
    Succeeded,
    /// Process exited non-zero, or was killed by a signal (`exit_code` is `None`).
    Failed { exit_code: Option<i32> },
    /// Process could not be launched at all.
    LaunchFailed { reason: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "exit status 0"),
            Self::Failed {
                exit_code: Some(code),
            } => write!(f, "exit status {}", code),
            Self::Failed { exit_code: None } => write!(f, "terminated by signal"),
            Self::LaunchFailed { reason } => write!(f, "launch failed: {}", reason),
        }
    }
}

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl JobOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts } | Self::Exhausted { attempts } => *attempts,
        }
    }
}
