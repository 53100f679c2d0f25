use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::buffer::{chunk_queue, ChunkQueue};
use crate::config::{Destination, DispatchMode, SinkConfig};
use crate::io::{is_standard_stream, is_transient, FileIo, SystemIo, INVALID_FD};
use crate::signal::Observers;
use crate::{Error, Result};

const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const DISPATCH_THREAD: &str = "sluice-dispatch";

type FlushHook = Box<dyn FnOnce(Result<()>) + Send>;

/// Dispatch state. `Writing` is the mutual-exclusion latch: at most one OS
/// write is in flight per sink, whichever thread performs it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Descriptor not yet available; writes buffer, dispatch waits.
    Opening,
    Idle,
    Writing,
    Closed,
}

struct Core {
    phase: Phase,
    fd: RawFd,
    target_path: Option<PathBuf>,
    chunks: Box<dyn ChunkQueue>,
    /// Bytes logically held: pending chunks plus the in-flight chunk.
    buffered_len: usize,
    destroyed: bool,
    end_requested: bool,
    /// Drain below the flush threshold until the buffer is empty.
    flush_forced: bool,
    /// Dispatch stopped on a non-retryable error; cleared by the next
    /// producer action so the sink is not permanently wedged.
    halted: bool,
    open_failed: bool,
    /// Requested rotation target; `Some(None)` reuses the backing path.
    reopen_pending: Option<Option<PathBuf>>,
    /// Drain already signalled for the current empty period.
    drain_guard: bool,
    flush_hooks: Vec<FlushHook>,
}

impl Core {
    fn set_phase(&mut self, next: Phase) {
        self.phase = next;
    }
}

struct Shared<Io: FileIo> {
    io: Io,
    cfg: SinkConfig,
    hwm: usize,
    state: Mutex<Core>,
    work: Condvar,
    observers: Mutex<Observers>,
    /// Checked between backoff sleeps without taking the state lock.
    destroyed: AtomicBool,
}

enum WriteOutcome {
    Done { written: usize },
    Failed { rest: Vec<u8>, err: Error, written: usize },
    Abandoned,
}

/// Buffered, backpressure-aware writer over a single file descriptor.
///
/// Producer writes accumulate in chunk buffers and are dispatched as
/// OS-sized writes once `flush_threshold` is crossed or a flush is forced.
/// `write` returns the backpressure signal: `false` once the buffered bytes
/// reach the high-water mark, after which the producer is expected to pause
/// until a drain notification.
///
/// In `Blocking` mode all OS work runs on the calling thread, including the
/// fixed backoff sleeps for transient errors. In `Deferred` mode a dispatch
/// thread owns the descriptor work and producer calls return immediately.
pub struct FileSink<Io: FileIo = SystemIo> {
    shared: Arc<Shared<Io>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl FileSink<SystemIo> {
    pub fn open(cfg: SinkConfig) -> Result<Self> {
        Self::open_with_io(cfg, SystemIo)
    }
}

impl<Io: FileIo> FileSink<Io> {
    pub fn open_with_io(cfg: SinkConfig, io: Io) -> Result<Self> {
        cfg.validate()?;
        let hwm = cfg.resolved_high_water_mark();
        let (fd, target_path, phase) = match &cfg.destination {
            Destination::Fd(fd) => (*fd, None, Phase::Idle),
            Destination::Path(path) => (INVALID_FD, Some(path.clone()), Phase::Opening),
        };
        let chunks = chunk_queue(cfg.content, cfg.max_write_size);
        let core = Core {
            phase,
            fd,
            target_path,
            chunks,
            buffered_len: 0,
            destroyed: false,
            end_requested: false,
            flush_forced: false,
            halted: false,
            open_failed: false,
            reopen_pending: None,
            drain_guard: true,
            flush_hooks: Vec::new(),
        };
        let mode = cfg.mode;
        let shared = Arc::new(Shared {
            io,
            cfg,
            hwm,
            state: Mutex::new(core),
            work: Condvar::new(),
            observers: Mutex::new(Observers::default()),
            destroyed: AtomicBool::new(false),
        });
        if phase == Phase::Idle {
            // Pre-opened descriptor: usable immediately.
            Observers::emit_ready(&shared.observers);
        }
        let mut sink = Self {
            shared,
            worker: None,
        };
        match mode {
            DispatchMode::Blocking => {
                if phase == Phase::Opening {
                    open_initial(&sink.shared);
                }
            }
            DispatchMode::Deferred => {
                sink.worker = Some(spawn_dispatch(Arc::clone(&sink.shared))?);
            }
        }
        Ok(sink)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, Core>> {
        self.shared
            .state
            .lock()
            .map_err(|_| Error::Internal("state lock poisoned"))
    }

    /// Buffers `data` and returns the backpressure signal: `true` while the
    /// buffered length stays below the high-water mark.
    ///
    /// When the prospective total would exceed `drop_threshold`, the data is
    /// rejected instead and handed to the drop observers.
    pub fn write(&self, data: &[u8]) -> Result<bool> {
        let mut guard = self.lock_state()?;
        if guard.destroyed {
            return Err(Error::Destroyed);
        }
        if guard.end_requested || guard.phase == Phase::Closed {
            return Err(Error::Ended);
        }
        let prospective = guard.buffered_len + data.len();
        if self.shared.cfg.drop_threshold > 0 && prospective > self.shared.cfg.drop_threshold {
            let below = guard.buffered_len < self.shared.hwm;
            drop(guard);
            Observers::emit_dropped(&self.shared.observers, data);
            return Ok(below);
        }
        guard.chunks.push(data)?;
        guard.buffered_len = prospective;
        guard.halted = false;
        guard.drain_guard = false;
        let trigger = guard.phase == Phase::Idle
            && guard.buffered_len >= self.shared.cfg.flush_threshold;
        drop(guard);
        match self.shared.cfg.mode {
            DispatchMode::Blocking => {
                if trigger {
                    run_dispatch(&self.shared);
                }
                let guard = self.lock_state()?;
                Ok(guard.buffered_len < self.shared.hwm)
            }
            DispatchMode::Deferred => {
                self.shared.work.notify_all();
                Ok(prospective < self.shared.hwm)
            }
        }
    }

    pub fn write_str(&self, data: &str) -> Result<bool> {
        self.write(data.as_bytes())
    }

    /// Forces a dispatch cycle even below the flush threshold.
    pub fn flush(&self) -> Result<()> {
        self.flush_inner(None)
    }

    /// Like [`flush`](Self::flush), invoking `hook` once the buffer has fully
    /// drained and an fsync has been issued, or with the error that stopped
    /// the drain.
    pub fn flush_with<F>(&self, hook: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.flush_inner(Some(Box::new(hook)))
    }

    fn flush_inner(&self, hook: Option<FlushHook>) -> Result<()> {
        let mut guard = self.lock_state()?;
        if guard.destroyed {
            return Err(Error::Destroyed);
        }
        if self.shared.cfg.flush_threshold == 0
            && guard.chunks.is_empty()
            && guard.phase != Phase::Writing
        {
            // Every write already dispatched; nothing is pending.
            drop(guard);
            if let Some(hook) = hook {
                hook(Ok(()));
            }
            return Ok(());
        }
        if guard.fd == INVALID_FD && self.shared.cfg.mode == DispatchMode::Blocking {
            return Err(Error::NotReady);
        }
        guard.flush_forced = true;
        guard.halted = false;
        if let Some(hook) = hook {
            guard.flush_hooks.push(hook);
        }
        drop(guard);
        match self.shared.cfg.mode {
            DispatchMode::Blocking => run_dispatch(&self.shared),
            DispatchMode::Deferred => self.shared.work.notify_all(),
        }
        Ok(())
    }

    /// Drains the entire buffer with blocking OS writes before returning,
    /// regardless of dispatch mode. Intended for last-resort delivery, e.g.
    /// on process exit.
    pub fn flush_sync(&self) -> Result<()> {
        loop {
            let mut guard = self.lock_state()?;
            if guard.destroyed {
                return Err(Error::Destroyed);
            }
            if guard.fd == INVALID_FD {
                return Err(Error::NotReady);
            }
            if guard.phase == Phase::Writing {
                // Wait out the in-flight write; the latch holder notifies.
                let _released = self
                    .shared
                    .work
                    .wait(guard)
                    .map_err(|_| Error::Internal("state lock poisoned"))?;
                continue;
            }
            if guard.reopen_pending.is_some() {
                perform_reopen(&self.shared, guard);
                continue;
            }
            let chunk = match guard.chunks.pop_head() {
                Some(chunk) => chunk,
                None => return Ok(()),
            };
            let fd = guard.fd;
            guard.halted = false;
            guard.set_phase(Phase::Writing);
            drop(guard);

            let outcome = write_chunk(&self.shared, fd, chunk);

            let mut guard = self.lock_state()?;
            if guard.phase == Phase::Writing {
                guard.set_phase(Phase::Idle);
            }
            self.shared.work.notify_all();
            match outcome {
                WriteOutcome::Done { written } => {
                    guard.buffered_len = guard.buffered_len.saturating_sub(written);
                }
                WriteOutcome::Failed { rest, err, written } => {
                    guard.buffered_len = guard.buffered_len.saturating_sub(written);
                    guard.chunks.requeue_head(rest);
                    guard.halted = true;
                    return Err(err);
                }
                WriteOutcome::Abandoned => {
                    close_now(&self.shared, guard, false);
                    return Err(Error::Destroyed);
                }
            }
        }
    }

    /// Requests rotation onto the backing path. Deferred past any in-flight
    /// write; ignored during shutdown.
    pub fn reopen(&self) -> Result<()> {
        self.reopen_inner(None)
    }

    /// Requests rotation onto a new path, which becomes the backing path.
    pub fn reopen_as(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.reopen_inner(Some(path.into()))
    }

    fn reopen_inner(&self, path: Option<PathBuf>) -> Result<()> {
        let mut guard = self.lock_state()?;
        if guard.destroyed {
            return Err(Error::Destroyed);
        }
        if guard.end_requested || guard.phase == Phase::Closed {
            // No rotation during shutdown.
            return Ok(());
        }
        if path.is_none() && guard.target_path.is_none() {
            return Err(Error::MissingPath);
        }
        guard.reopen_pending = Some(path);
        guard.halted = false;
        drop(guard);
        match self.shared.cfg.mode {
            DispatchMode::Blocking => run_dispatch(&self.shared),
            DispatchMode::Deferred => self.shared.work.notify_all(),
        }
        Ok(())
    }

    /// Graceful shutdown: drains everything buffered, then closes. Idempotent
    /// while ending.
    pub fn end(&self) -> Result<()> {
        let mut guard = self.lock_state()?;
        if guard.destroyed {
            return Err(Error::Destroyed);
        }
        if guard.end_requested || guard.phase == Phase::Closed {
            return Ok(());
        }
        guard.end_requested = true;
        guard.halted = false;
        drop(guard);
        match self.shared.cfg.mode {
            DispatchMode::Blocking => run_dispatch(&self.shared),
            DispatchMode::Deferred => self.shared.work.notify_all(),
        }
        Ok(())
    }

    /// Forced shutdown: discards buffered unwritten data and closes.
    /// Idempotent.
    pub fn destroy(&self) -> Result<()> {
        let mut guard = self.lock_state()?;
        if guard.destroyed {
            return Ok(());
        }
        guard.destroyed = true;
        self.shared.destroyed.store(true, Ordering::Release);
        guard.chunks.clear();
        guard.buffered_len = 0;
        let hooks = std::mem::take(&mut guard.flush_hooks);
        let writing = guard.phase == Phase::Writing;
        if writing || self.shared.cfg.mode == DispatchMode::Deferred {
            // The thread holding the latch (or the dispatch thread) observes
            // the flag and runs the close sequence.
            drop(guard);
            self.shared.work.notify_all();
        } else {
            close_now(&self.shared, guard, false);
        }
        for hook in hooks {
            hook(Err(Error::Destroyed));
        }
        Ok(())
    }

    pub fn buffered_len(&self) -> usize {
        self.shared.state.lock().map(|g| g.buffered_len).unwrap_or(0)
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }

    pub fn target_path(&self) -> Option<PathBuf> {
        self.shared
            .state
            .lock()
            .ok()
            .and_then(|g| g.target_path.clone())
    }

    /// Descriptor usable.
    pub fn on_ready(&self, hook: impl FnMut() + Send + 'static) {
        Observers::add_ready(&self.shared.observers, Box::new(hook));
    }

    /// Bytes committed by an OS write.
    pub fn on_write(&self, hook: impl FnMut(usize) + Send + 'static) {
        Observers::add_write(&self.shared.observers, Box::new(hook));
    }

    /// Buffer fully drained. Registration resets the suppression guard so a
    /// fresh observer is not starved by an already-signalled empty period.
    pub fn on_drain(&self, hook: impl FnMut() + Send + 'static) {
        if let Ok(mut guard) = self.shared.state.lock() {
            guard.drain_guard = false;
        }
        Observers::add_drain(&self.shared.observers, Box::new(hook));
    }

    /// Data rejected by `drop_threshold`; receives the rejected payload.
    pub fn on_drop(&self, hook: impl FnMut(&[u8]) + Send + 'static) {
        Observers::add_dropped(&self.shared.observers, Box::new(hook));
    }

    /// Unrecoverable dispatch or lifecycle failure.
    pub fn on_error(&self, hook: impl FnMut(&Error) + Send + 'static) {
        Observers::add_error(&self.shared.observers, Box::new(hook));
    }

    /// Graceful end completed with an empty buffer.
    pub fn on_finish(&self, hook: impl FnMut() + Send + 'static) {
        Observers::add_finish(&self.shared.observers, Box::new(hook));
    }

    /// Terminal; fires exactly once for every sink that closes.
    pub fn on_close(&self, hook: impl FnMut() + Send + 'static) {
        Observers::add_closed(&self.shared.observers, Box::new(hook));
    }
}

impl<Io: FileIo> Drop for FileSink<Io> {
    fn drop(&mut self) {
        enum Exit {
            Done,
            Ending,
            Open,
        }
        let exit = match self.shared.state.lock() {
            Ok(guard) => {
                if guard.destroyed || guard.phase == Phase::Closed {
                    Exit::Done
                } else if guard.end_requested {
                    Exit::Ending
                } else {
                    Exit::Open
                }
            }
            Err(_) => Exit::Done,
        };
        match exit {
            Exit::Open => {
                // Last-resort delivery, then close.
                let _ = self.flush_sync();
                let _ = self.destroy();
            }
            Exit::Ending => {
                if self.worker.is_some() {
                    let mut give_up = false;
                    if let Ok(mut guard) = self.shared.state.lock() {
                        loop {
                            if guard.phase == Phase::Closed {
                                break;
                            }
                            if guard.halted {
                                give_up = true;
                                break;
                            }
                            guard = match self.shared.work.wait(guard) {
                                Ok(guard) => guard,
                                Err(_) => break,
                            };
                        }
                    }
                    if give_up {
                        let _ = self.destroy();
                    }
                } else {
                    // Blocking-mode end stalled on an error; nothing will
                    // retry it now.
                    let _ = self.destroy();
                }
            }
            Exit::Done => {}
        }
        self.shared.work.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn open_descriptor<Io: FileIo>(shared: &Shared<Io>, path: &Path) -> Result<RawFd> {
    if shared.cfg.create_dirs {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                shared.io.create_dirs(parent).map_err(Error::Io)?;
            }
        }
    }
    shared
        .io
        .open(path, shared.cfg.append, shared.cfg.file_mode)
        .map_err(Error::Io)
}

fn open_initial<Io: FileIo>(shared: &Shared<Io>) {
    let mut guard = match shared.state.lock() {
        Ok(guard) => guard,
        Err(_) => return,
    };
    if guard.phase != Phase::Opening || guard.open_failed {
        return;
    }
    let path = match guard.target_path.clone() {
        Some(path) => path,
        None => {
            guard.set_phase(Phase::Idle);
            return;
        }
    };
    match open_descriptor(shared, &path) {
        Ok(fd) => {
            guard.fd = fd;
            guard.set_phase(Phase::Idle);
            drop(guard);
            Observers::emit_ready(&shared.observers);
        }
        Err(err) => {
            // The sink stays recoverable: writes keep buffering and a later
            // reopen can supply a descriptor.
            guard.open_failed = true;
            drop(guard);
            Observers::emit_error(&shared.observers, &err);
        }
    }
}

/// One dispatch cycle: drains chunks while the dispatch condition holds,
/// honoring pending rotation, shutdown and error halts. Runs on the calling
/// thread in blocking mode and on the dispatch thread in deferred mode.
fn run_dispatch<Io: FileIo>(shared: &Shared<Io>) {
    loop {
        let mut guard = match shared.state.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if guard.phase == Phase::Closed || guard.phase == Phase::Writing {
            return;
        }
        if guard.destroyed {
            close_now(shared, guard, false);
            return;
        }
        if guard.reopen_pending.is_some() {
            perform_reopen(shared, guard);
            continue;
        }
        if guard.fd == INVALID_FD {
            if guard.end_requested {
                let graceful = guard.chunks.is_empty();
                close_now(shared, guard, graceful);
            }
            return;
        }
        let dispatchable = !guard.halted
            && !guard.chunks.is_empty()
            && (guard.flush_forced
                || guard.end_requested
                || guard.buffered_len >= shared.cfg.flush_threshold);
        if dispatchable {
            let chunk = match guard.chunks.pop_head() {
                Some(chunk) => chunk,
                None => return,
            };
            let fd = guard.fd;
            guard.set_phase(Phase::Writing);
            drop(guard);

            let outcome = write_chunk(shared, fd, chunk);

            let mut guard = match shared.state.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            if guard.phase == Phase::Writing {
                guard.set_phase(Phase::Idle);
            }
            shared.work.notify_all();
            match outcome {
                WriteOutcome::Done { written } => {
                    guard.buffered_len = guard.buffered_len.saturating_sub(written);
                    if shared.cfg.fsync_each_write {
                        if let Err(err) = shared.io.fsync(fd) {
                            log::debug!("ignoring fsync failure: {err}");
                        }
                    }
                    drop(guard);
                    continue;
                }
                WriteOutcome::Failed { rest, err, written } => {
                    guard.buffered_len = guard.buffered_len.saturating_sub(written);
                    guard.chunks.requeue_head(rest);
                    guard.halted = true;
                    guard.flush_forced = false;
                    let hooks = std::mem::take(&mut guard.flush_hooks);
                    drop(guard);
                    for hook in hooks {
                        hook(Err(err.duplicate()));
                    }
                    Observers::emit_error(&shared.observers, &err);
                    return;
                }
                WriteOutcome::Abandoned => {
                    // Destroy won the race; the next pass closes.
                    drop(guard);
                    continue;
                }
            }
        }
        if guard.end_requested {
            if guard.chunks.is_empty() {
                close_now(shared, guard, true);
            }
            // Non-empty here means dispatch halted on an error; leave the
            // data for an explicit flush or destroy.
            return;
        }
        if guard.chunks.is_empty() {
            let had_flush = guard.flush_forced || !guard.flush_hooks.is_empty();
            let hooks = std::mem::take(&mut guard.flush_hooks);
            guard.flush_forced = false;
            let fd = guard.fd;
            let emit_drain = !guard.drain_guard;
            if emit_drain {
                guard.drain_guard = true;
            }
            drop(guard);
            if had_flush && !shared.cfg.fsync_each_write {
                if let Err(err) = shared.io.fsync(fd) {
                    log::debug!("ignoring fsync failure: {err}");
                }
            }
            if emit_drain {
                Observers::emit_drain(&shared.observers);
            }
            for hook in hooks {
                hook(Ok(()));
            }
            return;
        }
        // Data pending but below the threshold: wait for more.
        return;
    }
}

/// Writes one chunk to completion, resubmitting the remainder after partial
/// writes and sleeping the fixed backoff between retryable failures.
fn write_chunk<Io: FileIo>(shared: &Shared<Io>, fd: RawFd, chunk: Vec<u8>) -> WriteOutcome {
    let mut offset = 0;
    loop {
        if shared.destroyed.load(Ordering::Acquire) {
            return WriteOutcome::Abandoned;
        }
        match shared.io.write(fd, &chunk[offset..]) {
            Ok(written) => {
                offset += written;
                Observers::emit_write(&shared.observers, written);
                if offset >= chunk.len() {
                    return WriteOutcome::Done { written: offset };
                }
                // Partial write: resubmit the remainder of the same chunk.
            }
            Err(err) => {
                let unwritten = chunk.len() - offset;
                let retry = is_transient(&err)
                    && shared
                        .cfg
                        .retry
                        .as_ref()
                        .map_or(true, |allow| allow(&err, unwritten, offset));
                if retry {
                    log::warn!(
                        "transient write error, retrying in {:?}: {err}",
                        RETRY_BACKOFF
                    );
                    shared.io.sleep(RETRY_BACKOFF);
                    continue;
                }
                return WriteOutcome::Failed {
                    rest: chunk[offset..].to_vec(),
                    err: Error::Io(err),
                    written: offset,
                };
            }
        }
    }
}

/// Swaps the backing descriptor. The old descriptor is closed only after
/// the new one is confirmed open, and only if distinct.
fn perform_reopen<Io: FileIo>(shared: &Shared<Io>, mut guard: MutexGuard<'_, Core>) {
    let requested = match guard.reopen_pending.take() {
        Some(target) => target,
        None => return,
    };
    let path = match requested.or_else(|| guard.target_path.clone()) {
        Some(path) => path,
        None => {
            drop(guard);
            Observers::emit_error(&shared.observers, &Error::MissingPath);
            return;
        }
    };
    match open_descriptor(shared, &path) {
        Ok(new_fd) => {
            let old_fd = guard.fd;
            guard.fd = new_fd;
            guard.target_path = Some(path);
            guard.open_failed = false;
            if guard.phase == Phase::Opening {
                guard.set_phase(Phase::Idle);
            }
            drop(guard);
            let mut close_failure = None;
            if old_fd != INVALID_FD && old_fd != new_fd && !is_standard_stream(old_fd) {
                if let Err(err) = shared.io.close(old_fd) {
                    close_failure = Some(Error::Io(err));
                }
            }
            Observers::emit_ready(&shared.observers);
            if let Some(err) = close_failure {
                log::warn!("failed to close rotated-out descriptor {old_fd}: {err}");
                Observers::emit_error(&shared.observers, &err);
            }
        }
        Err(err) => {
            // The previous descriptor, if any, stays in service.
            drop(guard);
            Observers::emit_error(&shared.observers, &err);
        }
    }
}

/// Shared close sequence: best-effort fsync, close unless the descriptor is
/// a standard stream, then the finish (graceful only) and closed signals.
fn close_now<Io: FileIo>(shared: &Shared<Io>, mut guard: MutexGuard<'_, Core>, graceful: bool) {
    if guard.phase == Phase::Closed {
        return;
    }
    let fd = guard.fd;
    guard.fd = INVALID_FD;
    guard.set_phase(Phase::Closed);
    let hooks = std::mem::take(&mut guard.flush_hooks);
    drop(guard);
    shared.work.notify_all();

    let mut close_failure = None;
    if fd != INVALID_FD {
        if let Err(err) = shared.io.fsync(fd) {
            log::debug!("ignoring fsync failure during close: {err}");
        }
        if is_standard_stream(fd) {
            // Never close the process's own console streams.
        } else if let Err(err) = shared.io.close(fd) {
            close_failure = Some(Error::Io(err));
        }
    }
    for hook in hooks {
        hook(Err(Error::Destroyed));
    }
    if let Some(err) = close_failure {
        Observers::emit_error(&shared.observers, &err);
    }
    if graceful {
        Observers::emit_finish(&shared.observers);
    }
    Observers::emit_closed(&shared.observers);
}

fn spawn_dispatch<Io: FileIo>(shared: Arc<Shared<Io>>) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(DISPATCH_THREAD.to_string())
        .spawn(move || {
            open_initial(&shared);
            loop {
                {
                    let mut guard = match shared.state.lock() {
                        Ok(guard) => guard,
                        Err(_) => return,
                    };
                    loop {
                        if guard.phase == Phase::Closed {
                            return;
                        }
                        if has_work(&guard, &shared.cfg) {
                            break;
                        }
                        guard = match shared.work.wait(guard) {
                            Ok(guard) => guard,
                            Err(_) => return,
                        };
                    }
                }
                run_dispatch(&shared);
            }
        })
        .map_err(Error::Io)
}

fn has_work(core: &Core, cfg: &SinkConfig) -> bool {
    if core.phase == Phase::Writing {
        return false;
    }
    if core.destroyed {
        return true;
    }
    if core.reopen_pending.is_some() {
        return true;
    }
    if core.fd == INVALID_FD {
        return core.end_requested;
    }
    if !core.halted
        && !core.chunks.is_empty()
        && (core.flush_forced || core.end_requested || core.buffered_len >= cfg.flush_threshold)
    {
        return true;
    }
    if core.end_requested && core.chunks.is_empty() {
        return true;
    }
    core.flush_forced || !core.flush_hooks.is_empty()
}
