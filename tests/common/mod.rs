#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use sluice::FileIo;

const FIRST_FD: RawFd = 100;

/// Behavior of one `write` call. The script is consumed front to back; once
/// it runs out every write is accepted whole.
pub enum WriteStep {
    /// Accept at most this many bytes (a partial write).
    Accept(usize),
    /// Fail with EAGAIN.
    Again,
    /// Fail with EBUSY.
    Busy,
    /// Fail with EIO.
    Fail,
    /// Park the write until [`ScriptedIo::release_holds`], then accept whole.
    Hold,
}

#[derive(Default)]
struct ScriptState {
    script: VecDeque<WriteStep>,
    per_fd: HashMap<RawFd, Vec<u8>>,
    all: Vec<u8>,
    opens: Vec<PathBuf>,
    open_failures: usize,
    closed: Vec<RawFd>,
    fsyncs: usize,
    sleeps: Vec<Duration>,
    dirs: Vec<PathBuf>,
    next_fd: RawFd,
    holds_released: bool,
    write_attempts: usize,
    write_requests: Vec<usize>,
}

/// Scripted stand-in for the OS file I/O capability: records everything,
/// fragments or fails writes on demand, and never touches a real descriptor.
pub struct ScriptedIo {
    state: Mutex<ScriptState>,
    gate: Condvar,
}

impl ScriptedIo {
    pub fn new() -> Self {
        let state = ScriptState {
            next_fd: FIRST_FD,
            ..ScriptState::default()
        };
        Self {
            state: Mutex::new(state),
            gate: Condvar::new(),
        }
    }

    pub fn script(&self, steps: impl IntoIterator<Item = WriteStep>) {
        let mut state = self.state.lock().unwrap();
        state.script.extend(steps);
    }

    pub fn fail_next_open(&self) {
        self.state.lock().unwrap().open_failures += 1;
    }

    pub fn release_holds(&self) {
        self.state.lock().unwrap().holds_released = true;
        self.gate.notify_all();
    }

    /// Everything delivered, across all descriptors, in write order.
    pub fn delivered(&self) -> Vec<u8> {
        self.state.lock().unwrap().all.clone()
    }

    pub fn delivered_to(&self, fd: RawFd) -> Vec<u8> {
        self.state
            .lock()
            .unwrap()
            .per_fd
            .get(&fd)
            .cloned()
            .unwrap_or_default()
    }

    pub fn opens(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn closed(&self) -> Vec<RawFd> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn fsync_count(&self) -> usize {
        self.state.lock().unwrap().fsyncs
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().sleeps.clone()
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().dirs.clone()
    }

    /// Descriptor handed out by the n-th successful open (0-based).
    pub fn fd_of_open(&self, n: usize) -> RawFd {
        FIRST_FD + n as RawFd
    }

    /// Number of `write` calls entered, including ones still parked.
    pub fn write_attempts(&self) -> usize {
        self.state.lock().unwrap().write_attempts
    }

    /// Requested buffer length of every `write` call, in order.
    pub fn write_requests(&self) -> Vec<usize> {
        self.state.lock().unwrap().write_requests.clone()
    }
}

impl FileIo for ScriptedIo {
    fn open(&self, path: &Path, _append: bool, _mode: u32) -> io::Result<RawFd> {
        let mut state = self.state.lock().unwrap();
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(io::Error::from_raw_os_error(libc::EACCES));
        }
        let fd = state.next_fd;
        state.next_fd += 1;
        state.opens.push(path.to_path_buf());
        state.per_fd.entry(fd).or_default();
        Ok(fd)
    }

    fn write(&self, fd: RawFd, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.write_attempts += 1;
        state.write_requests.push(buf.len());
        let step = state.script.pop_front();
        let accepted = match step {
            None | Some(WriteStep::Hold) => {
                if matches!(step, Some(WriteStep::Hold)) {
                    while !state.holds_released {
                        state = self.gate.wait(state).unwrap();
                    }
                }
                buf.len()
            }
            Some(WriteStep::Accept(limit)) => limit.min(buf.len()),
            Some(WriteStep::Again) => {
                return Err(io::Error::from_raw_os_error(libc::EAGAIN));
            }
            Some(WriteStep::Busy) => {
                return Err(io::Error::from_raw_os_error(libc::EBUSY));
            }
            Some(WriteStep::Fail) => {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
        };
        state.per_fd.entry(fd).or_default().extend_from_slice(&buf[..accepted]);
        state.all.extend_from_slice(&buf[..accepted]);
        Ok(accepted)
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        self.state.lock().unwrap().closed.push(fd);
        Ok(())
    }

    fn fsync(&self, _fd: RawFd) -> io::Result<()> {
        self.state.lock().unwrap().fsyncs += 1;
        Ok(())
    }

    fn create_dirs(&self, path: &Path) -> io::Result<()> {
        self.state.lock().unwrap().dirs.push(path.to_path_buf());
        Ok(())
    }

    fn sleep(&self, duration: Duration) {
        // Recorded, never slept: retry tests stay fast.
        self.state.lock().unwrap().sleeps.push(duration);
    }
}

/// Polls `predicate` for up to two seconds; deferred-mode tests synchronize
/// on observable effects instead of sleeping fixed amounts.
pub fn wait_until(predicate: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::yield_now();
        std::thread::sleep(Duration::from_millis(1));
    }
    predicate()
}
