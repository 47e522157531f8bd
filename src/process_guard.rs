//! Process lifecycle management for job processes
//!
//! Engine invocations can run for hours. If the driver is interrupted or
//! killed while jobs are in flight, their processes must not keep running
//! unattended against the cluster.
//!
//! - Every job process is spawned as the leader of its own process group,
//!   with `PR_SET_PDEATHSIG` so it receives SIGTERM if the driver dies.
//! - Running PIDs are tracked in a [`ChildRegistry`] shared between the
//!   process runner and the signal handler thread.
//! - On SIGINT/SIGTERM/SIGHUP every registered group gets SIGTERM, then
//!   SIGKILL after a grace period.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Registry handle shared between runners and the signal thread.
pub type SharedRegistry = Arc<Mutex<ChildRegistry>>;

/// Set of job process IDs that are currently running.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Set once termination started so a second signal does not repeat it
    terminating: bool,
}

impl ChildRegistry {
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!(pid, "registered job process");
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!(pid, "unregistered job process");
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    /// SIGTERM every registered process group, wait up to `grace_period`,
    /// then SIGKILL whatever is left.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.terminating {
            debug!("termination already in progress");
            return;
        }
        self.terminating = true;

        if self.pids.is_empty() {
            return;
        }

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        info!(count = pids.len(), "terminating running job processes");

        for &pid in &pids {
            if let Err(e) = signal_group(pid, Signal::SIGTERM) {
                warn!(pid, error = %e, "group SIGTERM failed, signalling process directly");
                let _ = signal_process(pid, Signal::SIGTERM);
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                self.pids.clear();
                info!("all job processes exited");
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in pids.iter().filter(|&&pid| is_process_alive(pid)) {
            warn!(pid, "job process ignored SIGTERM, sending SIGKILL");
            if signal_group(pid, Signal::SIGKILL).is_err() {
                let _ = signal_process(pid, Signal::SIGKILL);
            }
        }
        self.pids.clear();
    }
}

fn signal_process(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Negative PID addresses the whole group, so the engine's own children
/// (JVMs, shells) are signalled too.
fn signal_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Alive means the PID exists and is neither a zombie nor dead.
pub(crate) fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // field 3 of /proc/<pid>/stat is the state letter
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// On delivery the registry's processes are terminated and the driver exits
/// with `128 + signal`. Call once, after the registry is created.
pub fn init_signal_handlers(registry: SharedRegistry) -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                let name = match sig {
                    SIGINT => "SIGINT",
                    SIGTERM => "SIGTERM",
                    SIGHUP => "SIGHUP",
                    _ => "UNKNOWN",
                };
                warn!(signal = name, "interrupted, stopping running jobs");

                if let Ok(mut guard) = registry.lock() {
                    guard.terminate_all(Duration::from_secs(3));
                }

                std::process::exit(128 + sig);
            }
        })?;

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group that dies with us.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls (setpgid, prctl) run between fork and exec.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
