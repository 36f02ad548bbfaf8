//! Job executors
//!
//! An [`Executor`] starts a claimed job and hands back a [`JobHandle`] the
//! dispatch loop polls until the job exits. Jobs run either as a local
//! `/bin/sh` process or through `ssh <target> /bin/sh -s` with the script
//! on stdin.
//!
//! Job processes are put in their own process group. A terminal Ctrl-C
//! then reaches partsync only, which decides whether jobs drain or get
//! killed.

use crate::error::WorkerError;
use crate::queue::ClaimedJob;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::debug;

/// Liveness of a started job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Still running
    Running,
    /// Exited; `None` when killed by a signal
    Exited(Option<i32>),
}

/// A started job
pub trait JobHandle: Send {
    /// Check whether the job is still running, without blocking
    fn poll(&mut self) -> io::Result<JobStatus>;

    /// Kill the job and everything it started
    fn kill(&mut self) -> io::Result<()>;
}

/// Something that can start jobs
pub trait Executor: Send + Sync {
    /// Where jobs run, for logs and summaries
    fn label(&self) -> String;

    /// Start `job`
    fn spawn(&self, job: &ClaimedJob) -> Result<Box<dyn JobHandle>, WorkerError>;
}

/// Handle over a child process leading its own process group
pub struct ProcessHandle {
    child: Child,
    exited: Option<JobStatus>,
}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        Self {
            child,
            exited: None,
        }
    }
}

impl JobHandle for ProcessHandle {
    fn poll(&mut self) -> io::Result<JobStatus> {
        if let Some(status) = self.exited {
            return Ok(status);
        }
        match self.child.try_wait()? {
            Some(status) => {
                let status = JobStatus::Exited(status.code());
                self.exited = Some(status);
                Ok(status)
            }
            None => Ok(JobStatus::Running),
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.exited.is_some() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            if let Ok(pgid) = libc::pid_t::try_from(self.child.id()) {
                // SAFETY: kill(2) with a negative pid signals the process group
                // led by our child; no memory is shared with the callee.
                unsafe {
                    libc::kill(-pgid, libc::SIGKILL);
                }
            }
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already reaped or already gone
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Open `<log_dir>/<job>.stderr` for appending
fn stderr_artifact(log_dir: &Path, job: &str) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{}.stderr", job)))
}

fn detach(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Runs jobs as local `/bin/sh` processes
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    shell: PathBuf,
    log_dir: PathBuf,
}

impl LocalExecutor {
    /// Executor writing startup errors to `log_dir`
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            log_dir: log_dir.into(),
        }
    }
}

impl Executor for LocalExecutor {
    fn label(&self) -> String {
        "local".into()
    }

    fn spawn(&self, job: &ClaimedJob) -> Result<Box<dyn JobHandle>, WorkerError> {
        let failed = |reason: String| WorkerError::SpawnFailed {
            job: job.name.clone(),
            slot: self.label(),
            reason,
        };

        let stderr = stderr_artifact(&self.log_dir, &job.name).map_err(|e| failed(e.to_string()))?;
        let mut cmd = Command::new(&self.shell);
        cmd.arg(&job.path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr));
        detach(&mut cmd);

        let child = cmd.spawn().map_err(|e| failed(e.to_string()))?;
        debug!(job = %job.name, pid = child.id(), "Started local job");
        Ok(Box::new(ProcessHandle::new(child)))
    }
}

/// Runs jobs on a remote host with the script piped to `/bin/sh -s`
///
/// The work directory must be shared with the target: the script writes
/// its logs there and reads its listing from there.
#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    target: String,
    ssh: String,
    log_dir: PathBuf,
}

impl RemoteExecutor {
    /// Executor for `target` (`[user@]host`)
    pub fn new(target: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            ssh: "ssh".into(),
            log_dir: log_dir.into(),
        }
    }

    /// Remote target
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Executor for RemoteExecutor {
    fn label(&self) -> String {
        self.target.clone()
    }

    fn spawn(&self, job: &ClaimedJob) -> Result<Box<dyn JobHandle>, WorkerError> {
        let failed = |reason: String| WorkerError::SpawnFailed {
            job: job.name.clone(),
            slot: self.label(),
            reason,
        };

        let script = File::open(&job.path).map_err(|e| failed(e.to_string()))?;
        let stderr = stderr_artifact(&self.log_dir, &job.name).map_err(|e| failed(e.to_string()))?;

        let mut cmd = Command::new(&self.ssh);
        cmd.args(["-q", "-o", "BatchMode=yes"])
            .arg(&self.target)
            .arg("/bin/sh -s")
            .stdin(Stdio::from(script))
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr));
        detach(&mut cmd);

        let child = cmd.spawn().map_err(|e| failed(e.to_string()))?;
        debug!(job = %job.name, target = %self.target, pid = child.id(), "Started remote job");
        Ok(Box::new(ProcessHandle::new(child)))
    }
}

/// One executor per worker slot; slot `i` runs on target `i mod T`
pub fn slot_executors(
    workers: usize,
    targets: &[String],
    log_dir: &Path,
) -> Vec<std::sync::Arc<dyn Executor>> {
    (0..workers)
        .map(|i| -> std::sync::Arc<dyn Executor> {
            if targets.is_empty() {
                std::sync::Arc::new(LocalExecutor::new(log_dir))
            } else {
                std::sync::Arc::new(RemoteExecutor::new(&targets[i % targets.len()], log_dir))
            }
        })
        .collect()
}
