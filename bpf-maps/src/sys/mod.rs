//! A collection of system calls for performing eBPF map operations.

mod bpf;

#[cfg(test)]
mod fake;

use std::{
    io, mem,
    os::fd::{AsRawFd as _, BorrowedFd, FromRawFd as _, RawFd},
};

pub(crate) use bpf::*;
#[cfg(test)]
pub(crate) use fake::*;
use libc::{F_DUPFD_CLOEXEC, SYS_bpf};
use log::warn;
use thiserror::Error;

use crate::{
    generated::{bpf_attr, bpf_cmd},
    maps::MapFd,
};

pub(crate) type SysResult<T> = Result<T, (i64, io::Error)>;

/// A system call failed.
#[derive(Debug, Error)]
#[error("`{call}` failed")]
pub struct SyscallError {
    /// The name of the syscall which failed.
    pub call: &'static str,
    /// The [`io::Error`] returned by the syscall.
    #[source]
    pub io_error: io::Error,
}

pub(crate) enum Syscall<'a> {
    Ebpf {
        cmd: bpf_cmd,
        attr: &'a mut bpf_attr,
    },
    DupFd {
        fd: BorrowedFd<'a>,
    },
    Close {
        fd: RawFd,
    },
}

impl std::fmt::Debug for Syscall<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ebpf { cmd, attr: _ } => f
                .debug_struct("Syscall::Ebpf")
                .field("cmd", cmd)
                .field("attr", &format_args!("_"))
                .finish(),
            Self::DupFd { fd } => f.debug_struct("Syscall::DupFd").field("fd", fd).finish(),
            Self::Close { fd } => f.debug_struct("Syscall::Close").field("fd", fd).finish(),
        }
    }
}

fn syscall(call: Syscall<'_>) -> SysResult<i64> {
    #[cfg(test)]
    return TEST_SYSCALL.with(|test_impl| unsafe { test_impl.borrow()(call) });

    #[cfg_attr(test, allow(unreachable_code))]
    {
        let ret: i64 = unsafe {
            match call {
                // `libc::syscall` returns i32 on armv7.
                #[allow(clippy::useless_conversion)]
                Syscall::Ebpf { cmd, attr } => libc::syscall(
                    SYS_bpf,
                    cmd as u32,
                    attr as *mut bpf_attr,
                    mem::size_of::<bpf_attr>(),
                )
                .into(),
                Syscall::DupFd { fd } => libc::fcntl(fd.as_raw_fd(), F_DUPFD_CLOEXEC, 3).into(),
                Syscall::Close { fd } => libc::close(fd).into(),
            }
        };

        match ret {
            ret @ 0.. => Ok(ret),
            ret => Err((ret, io::Error::last_os_error())),
        }
    }
}

/// Converts a status in the "non-negative is success, negative is `-errno`"
/// convention into a [`Result`].
pub(crate) fn check_status(call: &'static str, status: i64) -> Result<i64, SyscallError> {
    if status >= 0 {
        return Ok(status);
    }
    let errno = status
        .checked_neg()
        .and_then(|errno| i32::try_from(errno).ok())
        .unwrap_or(libc::EINVAL);
    Err(SyscallError {
        call,
        io_error: io::Error::from_raw_os_error(errno),
    })
}

/// Duplicates `fd`, returning a new descriptor referring to the same map.
pub(crate) fn dup_fd(fd: BorrowedFd<'_>) -> Result<MapFd, SyscallError> {
    let new_fd = syscall(Syscall::DupFd { fd }).map_err(|(_, io_error)| SyscallError {
        call: "fcntl(F_DUPFD_CLOEXEC)",
        io_error,
    })?;
    let new_fd = RawFd::try_from(new_fd).map_err(|_| SyscallError {
        call: "fcntl(F_DUPFD_CLOEXEC)",
        io_error: io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid fd returned: {new_fd}"),
        ),
    })?;
    // SAFETY: F_DUPFD_CLOEXEC returns a new file descriptor.
    Ok(unsafe { MapFd::from_raw_fd(new_fd) })
}

/// Releases `fd`. Callers guarantee this runs at most once per descriptor.
pub(crate) fn close_fd(fd: RawFd) {
    if let Err((_, io_error)) = syscall(Syscall::Close { fd }) {
        warn!("failed to close map fd {fd}: {io_error}");
    }
}
