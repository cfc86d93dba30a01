use std::{cell::RefCell, io};

use super::{SysResult, Syscall};

type SyscallFn = unsafe fn(Syscall<'_>) -> SysResult<i64>;

thread_local! {
    pub(crate) static TEST_SYSCALL: RefCell<SyscallFn> = RefCell::new(no_kernel);
}

// Releasing always works; everything that needs a kernel fails with ENOSYS.
unsafe fn no_kernel(call: Syscall<'_>) -> SysResult<i64> {
    match call {
        Syscall::Close { .. } => Ok(0),
        Syscall::Ebpf { .. } | Syscall::DupFd { .. } => sys_error(libc::ENOSYS),
    }
}

/// Replaces the syscall implementation for the current thread.
pub(crate) fn override_syscall(call: SyscallFn) {
    TEST_SYSCALL.with(|test_impl| *test_impl.borrow_mut() = call);
}

pub(crate) fn sys_error(errno: i32) -> SysResult<i64> {
    Err((-1, io::Error::from_raw_os_error(errno)))
}
