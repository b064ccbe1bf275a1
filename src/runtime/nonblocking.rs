//! Non-blocking mode for sockets handed to the readiness multiplexer.
//!
//! Under edge-triggered polling every registered descriptor must be
//! non-blocking: the drain loops rely on `EWOULDBLOCK` to know when to stop.

use crate::error::{Error, FlagOp, Result};
use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd};

/// Set `O_NONBLOCK` on a descriptor, preserving its other status flags.
pub fn set_nonblocking(fd: BorrowedFd<'_>) -> Result<()> {
    let raw = fd.as_raw_fd();
    let flags = get_flags(fd)?;

    let rc = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc == -1 {
        return Err(Error::Flag {
            fd: raw,
            op: FlagOp::Set,
            source: io::Error::last_os_error(),
        });
    }

    Ok(())
}

/// Report whether `O_NONBLOCK` is currently set.
#[cfg(test)]
pub fn is_nonblocking(fd: BorrowedFd<'_>) -> Result<bool> {
    Ok(get_flags(fd)? & libc::O_NONBLOCK != 0)
}

fn get_flags(fd: BorrowedFd<'_>) -> Result<libc::c_int> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags == -1 {
        return Err(Error::Flag {
            fd: raw,
            op: FlagOp::Get,
            source: io::Error::last_os_error(),
        });
    }
    Ok(flags)
}
