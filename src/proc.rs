//! Process orchestration: one pipe per player (its write end becomes the
//! child's stdout), `fork`+`execv` spawning, and the event-driven multiplex
//! over all live player pipes with a bounded wait (spec §4.3 main loop,
//! §5 suspension points).
//!
//! Built on `nix::unistd` the way the corpus reaches for `nix` over hand
//! rolled FFI for process control (see the `nix::sys::mman` shmempipe
//! reference file for the same preference applied to shared memory).

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::time::Duration;

use nix::sys::select::{select, FdSet};
use nix::sys::time::{TimeVal, TimeValLike};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, execv, fork, pipe, read, ForkResult, Pid};

use crate::error::CoreError;

pub struct ChildProcess {
    pub pid: Pid,
    pub read_fd: OwnedFd,
}

/// Spawn `path` with exactly two arguments, decimal `width` and `height`
/// (spec §6's player invocation contract), redirecting its stdout to a
/// fresh pipe whose read end the arbiter keeps.
pub fn spawn_player(path: &Path, width: u32, height: u32) -> Result<ChildProcess, CoreError> {
    let (read_end, write_end) = pipe().map_err(|e| {
        CoreError::ResourceUnavailable(format!("pipe() for player {}: {e}", path.display()))
    })?;

    match unsafe { fork() }.map_err(|e| CoreError::ResourceUnavailable(format!("fork: {e}")))? {
        ForkResult::Parent { child } => {
            drop(write_end);
            Ok(ChildProcess {
                pid: child,
                read_fd: read_end,
            })
        }
        ForkResult::Child => {
            drop(read_end);
            if dup2(write_end.as_raw_fd(), libc::STDOUT_FILENO).is_err() {
                std::process::exit(126);
            }
            drop(write_end);
            exec_or_exit(path, &[width.to_string(), height.to_string()]);
        }
    }
}

/// Spawn the viewer. Unlike players, the viewer inherits stdout/stderr
/// directly -- only the shared regions carry game state to it.
pub fn spawn_viewer(path: &Path, width: u32, height: u32) -> Result<Pid, CoreError> {
    match unsafe { fork() }.map_err(|e| CoreError::ResourceUnavailable(format!("fork: {e}")))? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => exec_or_exit(path, &[width.to_string(), height.to_string()]),
    }
}

fn exec_or_exit(path: &Path, args: &[String]) -> ! {
    let Ok(path_c) = CString::new(path.as_os_str().to_string_lossy().into_owned()) else {
        std::process::exit(126);
    };
    let mut argv = vec![path_c.clone()];
    for a in args {
        let Ok(c) = CString::new(a.as_str()) else {
            std::process::exit(126);
        };
        argv.push(c);
    }
    let _ = execv(&path_c, &argv);
    // execv only returns on failure.
    std::process::exit(127);
}

/// Blocking wait for any of `pid`'s exit, reported the way spec §6 wants it
/// printed: "exit code N" or "signal N".
pub fn reap(pid: Pid) -> Result<ExitSummary, CoreError> {
    match waitpid(pid, None) {
        Ok(WaitStatus::Exited(_, code)) => Ok(ExitSummary::Exited(code)),
        Ok(WaitStatus::Signaled(_, sig, _)) => Ok(ExitSummary::Signaled(sig as i32)),
        Ok(_) => Ok(ExitSummary::Exited(0)),
        Err(e) => Err(CoreError::IoFailure(std::io::Error::from(e))),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ExitSummary {
    Exited(i32),
    Signaled(i32),
}

impl std::fmt::Display for ExitSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitSummary::Exited(code) => write!(f, "exit code {code}"),
            ExitSummary::Signaled(sig) => write!(f, "signal {sig}"),
        }
    }
}

/// Tracks one read-end file descriptor per player slot; a slot becomes
/// `None` once its player is blocked (EOF or closed explicitly), so it
/// drops out of the multiplex set for good (spec §4.3).
pub struct PlayerPipes {
    fds: Vec<Option<OwnedFd>>,
}

impl PlayerPipes {
    pub fn new(fds: Vec<OwnedFd>) -> Self {
        PlayerPipes {
            fds: fds.into_iter().map(Some).collect(),
        }
    }

    pub fn mark_blocked(&mut self, index: usize) {
        self.fds[index] = None;
    }

    pub fn any_live(&self) -> bool {
        self.fds.iter().any(|f| f.is_some())
    }

    /// Multiplex over all live fds with a bounded wait, per spec §4.3 ("no
    /// round-robin") and §5 ("delay_ms as a selector timeout so termination
    /// checks run regularly"). Returns the indices that became readable, in
    /// kernel readiness order -- arrival order follows `select`'s ordering,
    /// not submission time (spec §4.3 fairness notes).
    pub fn wait_readable(&self, delay: Duration) -> Result<Vec<usize>, CoreError> {
        let mut read_set = FdSet::new();
        let mut max_fd: RawFd = -1;
        for fd in self.fds.iter().flatten() {
            read_set.insert(fd);
            max_fd = max_fd.max(fd.as_raw_fd());
        }
        if max_fd < 0 {
            return Ok(Vec::new());
        }

        let mut timeout = TimeVal::milliseconds(delay.as_millis() as i64);
        let ready = select(max_fd + 1, &mut read_set, None, None, &mut timeout)
            .map_err(|e| CoreError::from_errno(&format!("select: {e}")))?;

        if ready == 0 {
            return Ok(Vec::new());
        }

        let mut indices = Vec::new();
        for (i, fd) in self.fds.iter().enumerate() {
            if let Some(fd) = fd {
                if read_set.contains(fd) {
                    indices.push(i);
                }
            }
        }
        Ok(indices)
    }

    /// Read exactly one byte from player `index`'s pipe. `Ok(None)` means
    /// EOF -- the caller must mark the player blocked (spec §4.3).
    pub fn read_one_byte(&self, index: usize) -> Result<Option<u8>, CoreError> {
        let fd = self.fds[index].as_ref().expect("read from a blocked player");
        let mut buf = [0u8; 1];
        loop {
            match read(fd.as_raw_fd(), &mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(CoreError::IoFailure(std::io::Error::from(e))),
            }
        }
    }
}
