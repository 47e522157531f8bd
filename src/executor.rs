//! Attempt execution
//!
//! [`JobRunner`] is the seam between the worker pool and the operating
//! system: the pool decides *when* and *how often* a job runs, the runner
//! executes exactly one attempt and reports how it ended.
//!
//! [`ProcessRunner`] is the production implementation. Each attempt:
//!
//! - opens `attempt-<n>.log` in the job's log directory,
//! - spawns the command in its own process group with stdout and stderr both
//!   redirected into that file,
//! - keeps the PID in the shared [`ChildRegistry`] while it runs,
//!   refusing to start at all once the registry is terminating,
//! - appends a status trailer once the process has exited.
//!
//! A launch failure (missing program, bad working directory, unwritable log
//! file) is reported as [`AttemptOutcome::LaunchFailed`] and counts as a
//! failed attempt like any non-zero exit.

use std::process::{Child, Command, Stdio};
use std::sync::MutexGuard;

use tracing::{debug, warn};

use crate::job::{AttemptOutcome, JobCommand};
use crate::log_record::LogRecord;
use crate::process_guard::{ChildRegistry, CommandProcessGroup, SharedRegistry};

/// Launch failure reason once the driver is terminating its jobs.
pub const SHUTTING_DOWN: &str = "shutting down";

/// Executes one attempt of a job.
pub trait JobRunner: Send + Sync {
    /// Run `command` once as attempt number `attempt` (1-based), writing its
    /// output under `log`.
    fn run_attempt(&self, command: &JobCommand, log: &LogRecord, attempt: u32) -> AttemptOutcome;
}

/// Runs attempts as child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    registry: SharedRegistry,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::with_registry(ChildRegistry::shared())
    }

    /// Share `registry` with whoever needs to kill running jobs.
    pub fn with_registry(registry: SharedRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    fn lock_registry(&self) -> MutexGuard<'_, ChildRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `cmd` and register it under one registry lock, so a concurrent
    /// `terminate_all` either sees the child or stops it from starting.
    fn spawn_tracked(&self, cmd: &mut Command) -> Result<Child, String> {
        let mut registry = self.lock_registry();
        if registry.is_terminating() {
            return Err(SHUTTING_DOWN.to_string());
        }
        let child = cmd.spawn().map_err(|e| e.to_string())?;
        registry.register(child.id());
        Ok(child)
    }

    fn launch_failed(&self, log: &LogRecord, attempt: u32, reason: String) -> AttemptOutcome {
        warn!(attempt, log_dir = %log.dir().display(), %reason, "failed to launch job process");
        let _ = log.append_line(
            attempt,
            &format!("[sqlbatch] attempt {} failed to launch: {}", attempt, reason),
        );
        AttemptOutcome::LaunchFailed { reason }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRunner for ProcessRunner {
    fn run_attempt(&self, command: &JobCommand, log: &LogRecord, attempt: u32) -> AttemptOutcome {
        let stdout = match log.create_attempt_file(attempt) {
            Ok(file) => file,
            Err(e) => return self.launch_failed(log, attempt, format!("cannot open log file: {}", e)),
        };
        let stderr = match stdout.try_clone() {
            Ok(file) => file,
            Err(e) => return self.launch_failed(log, attempt, format!("cannot open log file: {}", e)),
        };

        debug!(attempt, %command, "spawning job process");

        let mut cmd = command.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .in_new_process_group();

        let mut child = match self.spawn_tracked(&mut cmd) {
            Ok(child) => child,
            Err(reason) => return self.launch_failed(log, attempt, reason),
        };

        let pid = child.id();
        let status = child.wait();
        self.lock_registry().unregister(pid);

        let outcome = match status {
            Ok(status) if status.success() => AttemptOutcome::Succeeded,
            Ok(status) => AttemptOutcome::Failed {
                exit_code: status.code(),
            },
            Err(e) => AttemptOutcome::LaunchFailed {
                reason: format!("failed waiting for process: {}", e),
            },
        };

        if let Err(e) = log.append_line(
            attempt,
            &format!("[sqlbatch] attempt {} finished: {}", attempt, outcome),
        ) {
            warn!(attempt, error = %e, "could not write attempt trailer");
        }

        debug!(attempt, pid, %outcome, "job process finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_success_captures_stdout_and_stderr() {
        let tmp = TempDir::new().unwrap();
        let log = LogRecord::prepare(tmp.path()).unwrap();
        let runner = ProcessRunner::new();

        let outcome = runner.run_attempt(
            &JobCommand::shell("echo to-stdout; echo to-stderr >&2"),
            &log,
            1,
        );

        assert_eq!(outcome, AttemptOutcome::Succeeded);
        let content = fs::read_to_string(log.attempt_path(1)).unwrap();
        assert!(content.contains("to-stdout"));
        assert!(content.contains("to-stderr"));
        assert!(content.contains("attempt 1 finished: exit status 0"));
    }

    #[test]
    fn test_nonzero_exit_is_failure() {
        let tmp = TempDir::new().unwrap();
        let log = LogRecord::prepare(tmp.path()).unwrap();

        let outcome = ProcessRunner::new().run_attempt(&JobCommand::shell("exit 3"), &log, 2);

        assert_eq!(outcome, AttemptOutcome::Failed { exit_code: Some(3) });
        let content = fs::read_to_string(log.attempt_path(2)).unwrap();
        assert!(content.contains("exit status 3"));
    }

    #[test]
    fn test_missing_program_is_launch_failure() {
        let tmp = TempDir::new().unwrap();
        let log = LogRecord::prepare(tmp.path()).unwrap();

        let outcome = ProcessRunner::new().run_attempt(
            &JobCommand::exec("definitely-not-a-real-program-12345", ["-e", "x"]),
            &log,
            1,
        );

        assert!(matches!(outcome, AttemptOutcome::LaunchFailed { .. }));
        let content = fs::read_to_string(log.attempt_path(1)).unwrap();
        assert!(content.contains("failed to launch"));
    }

    #[test]
    fn test_invalid_working_dir_is_launch_failure() {
        let tmp = TempDir::new().unwrap();
        let log = LogRecord::prepare(tmp.path()).unwrap();
        let command = JobCommand::exec("true", Vec::<String>::new()).in_dir(tmp.path().join("missing"));

        let outcome = ProcessRunner::new().run_attempt(&command, &log, 1);
        assert!(matches!(outcome, AttemptOutcome::LaunchFailed { .. }));
    }

    #[test]
    fn test_registry_empty_after_attempt() {
        let tmp = TempDir::new().unwrap();
        let log = LogRecord::prepare(tmp.path()).unwrap();
        let runner = ProcessRunner::new();

        runner.run_attempt(&JobCommand::shell("true"), &log, 1);
        assert_eq!(runner.registry().lock().unwrap().count(), 0);
    }

    #[test]
    fn test_no_launch_after_termination_started() {
        let tmp = TempDir::new().unwrap();
        let log = LogRecord::prepare(tmp.path().join("job")).unwrap();
        let marker = tmp.path().join("marker");
        let runner = ProcessRunner::new();

        runner
            .registry()
            .lock()
            .unwrap()
            .terminate_all(std::time::Duration::from_millis(10));

        let command = JobCommand::shell(format!("touch '{}'", marker.display()));
        let outcome = runner.run_attempt(&command, &log, 1);

        assert_eq!(
            outcome,
            AttemptOutcome::LaunchFailed {
                reason: SHUTTING_DOWN.to_string()
            }
        );
        assert!(!marker.exists());
        assert_eq!(runner.registry().lock().unwrap().count(), 0);
        let content = fs::read_to_string(log.attempt_path(1)).unwrap();
        assert!(content.contains("failed to launch: shutting down"));
    }

    #[test]
    fn test_running_child_is_registered() {
        let tmp = TempDir::new().unwrap();
        let log = LogRecord::prepare(tmp.path()).unwrap();
        let runner = ProcessRunner::new();
        let registry = runner.registry();

        let handle = std::thread::spawn(move || {
            runner.run_attempt(&JobCommand::shell("sleep 0.3"), &log, 1)
        });
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(registry.lock().unwrap().count(), 1);

        assert_eq!(handle.join().unwrap(), AttemptOutcome::Succeeded);
        assert_eq!(registry.lock().unwrap().count(), 0);
    }
}
