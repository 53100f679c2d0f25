use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const INVALID_FD: RawFd = -1;

/// OS file I/O capability used by the sink.
///
/// The default implementation is [`SystemIo`]. Tests substitute a scripted
/// implementation to exercise partial writes and transient errors without a
/// real descriptor.
pub trait FileIo: Send + Sync + 'static {
    fn open(&self, path: &Path, append: bool, mode: u32) -> io::Result<RawFd>;
    fn write(&self, fd: RawFd, buf: &[u8]) -> io::Result<usize>;
    fn close(&self, fd: RawFd) -> io::Result<()>;
    fn fsync(&self, fd: RawFd) -> io::Result<()>;
    fn create_dirs(&self, path: &Path) -> io::Result<()>;
    fn sleep(&self, duration: Duration);
}

impl<T: FileIo> FileIo for Arc<T> {
    fn open(&self, path: &Path, append: bool, mode: u32) -> io::Result<RawFd> {
        (**self).open(path, append, mode)
    }

    fn write(&self, fd: RawFd, buf: &[u8]) -> io::Result<usize> {
        (**self).write(fd, buf)
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        (**self).close(fd)
    }

    fn fsync(&self, fd: RawFd) -> io::Result<()> {
        (**self).fsync(fd)
    }

    fn create_dirs(&self, path: &Path) -> io::Result<()> {
        (**self).create_dirs(path)
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Descriptor-level I/O against the real OS.
pub struct SystemIo;

impl FileIo for SystemIo {
    fn open(&self, path: &Path, append: bool, mode: u32) -> io::Result<RawFd> {
        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        let disposition = if append { libc::O_APPEND } else { libc::O_TRUNC };
        let flags = libc::O_WRONLY | libc::O_CREAT | libc::O_CLOEXEC | disposition;
        let fd = unsafe { libc::open(cpath.as_ptr(), flags, mode as libc::c_uint) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(fd)
    }

    fn write(&self, fd: RawFd, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const _, buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe { libc::close(fd) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn fsync(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe { libc::fsync(fd) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn create_dirs(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Descriptors 1 and 2 belong to the process, not the sink; closing them
/// would disable the process's own console streams.
pub fn is_standard_stream(fd: RawFd) -> bool {
    fd == libc::STDOUT_FILENO || fd == libc::STDERR_FILENO
}

/// EAGAIN and EBUSY both mean the destination is temporarily unable to
/// accept data and the write is worth retrying after a delay.
pub fn is_transient(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(code) => code == libc::EAGAIN || code == libc::EWOULDBLOCK || code == libc::EBUSY,
        None => false,
    }
}
