use std::{
    cmp, io, mem,
    os::fd::{AsRawFd as _, BorrowedFd, FromRawFd as _},
    ptr, slice,
};

use libc::EINVAL;

use super::{syscall, SysResult, Syscall, SyscallError};
use crate::{
    generated::{bpf_attr, bpf_cmd, bpf_map_info, BPF_OBJ_NAME_LEN},
    maps::{MapDef, MapFd},
};

pub(crate) fn bpf_create_map(def: &MapDef) -> SysResult<MapFd> {
    let mut attr = unsafe { mem::zeroed::<bpf_attr>() };

    let u = unsafe { &mut attr.__bindgen_anon_1 };
    u.map_type = def.map_type as u32;
    u.key_size = def.key_size;
    u.value_size = def.value_size;
    u.max_entries = def.max_entries;
    u.map_flags = def.flags.bits();
    u.numa_node = def.numa_node.unwrap_or_default();
    u.map_ifindex = def.ifindex.unwrap_or_default();
    if let Some(inner_map_fd) = def.inner_map_fd {
        u.inner_map_fd = inner_map_fd as u32;
    }

    if let Some(name) = &def.name {
        // u.map_name is 16 bytes max and must be NULL terminated
        let name_len = cmp::min(name.to_bytes().len(), BPF_OBJ_NAME_LEN as usize - 1);
        u.map_name[..name_len]
            .copy_from_slice(unsafe { slice::from_raw_parts(name.as_ptr(), name_len) });
    }

    // SAFETY: BPF_MAP_CREATE returns a new file descriptor.
    unsafe { fd_sys_bpf(bpf_cmd::BPF_MAP_CREATE, &mut attr) }
}

/// The outcome of asking the kernel for a map's metadata.
#[derive(Debug)]
pub(crate) enum MapInfoQuery {
    Supported(bpf_map_info),
    /// The running kernel can't report map info (`EINVAL`).
    Unsupported,
}

pub(crate) fn bpf_map_get_info_by_fd(fd: BorrowedFd<'_>) -> Result<MapInfoQuery, SyscallError> {
    let mut attr = unsafe { mem::zeroed::<bpf_attr>() };
    let mut info = unsafe { mem::zeroed::<bpf_map_info>() };

    attr.info.bpf_fd = fd.as_raw_fd() as u32;
    attr.info.info = ptr::addr_of_mut!(info) as u64;
    attr.info.info_len = mem::size_of_val(&info) as u32;

    match sys_bpf(bpf_cmd::BPF_OBJ_GET_INFO_BY_FD, &mut attr) {
        Ok(_) => Ok(MapInfoQuery::Supported(info)),
        Err((_, io_error)) if io_error.raw_os_error() == Some(EINVAL) => {
            Ok(MapInfoQuery::Unsupported)
        }
        Err((_, io_error)) => Err(SyscallError {
            call: "bpf_obj_get_info_by_fd",
            io_error,
        }),
    }
}

// since kernel 5.2
pub(crate) fn bpf_map_freeze(fd: BorrowedFd<'_>) -> SysResult<i64> {
    let mut attr = unsafe { mem::zeroed::<bpf_attr>() };
    let u = unsafe { &mut attr.__bindgen_anon_2 };
    u.map_fd = fd.as_raw_fd() as u32;
    sys_bpf(bpf_cmd::BPF_MAP_FREEZE, &mut attr)
}

/// The raw result of a batch command: `status` is the syscall return value
/// or `-errno`, `count` is whatever the kernel left in `batch.count`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BatchStatus {
    pub(crate) status: i64,
    pub(crate) count: u32,
}

pub(crate) struct BatchBuffers {
    pub(crate) in_batch: *const u8,
    pub(crate) out_batch: *mut u8,
    pub(crate) keys: *mut u8,
    pub(crate) values: *mut u8,
}

impl Default for BatchBuffers {
    fn default() -> Self {
        Self {
            in_batch: ptr::null(),
            out_batch: ptr::null_mut(),
            keys: ptr::null_mut(),
            values: ptr::null_mut(),
        }
    }
}

// since kernel 5.6
pub(crate) fn bpf_map_batch(
    cmd: bpf_cmd,
    fd: BorrowedFd<'_>,
    buffers: BatchBuffers,
    count: u32,
    elem_flags: u64,
) -> BatchStatus {
    let mut attr = unsafe { mem::zeroed::<bpf_attr>() };

    let u = unsafe { &mut attr.batch };
    u.map_fd = fd.as_raw_fd() as u32;
    u.in_batch = buffers.in_batch as u64;
    u.out_batch = buffers.out_batch as u64;
    u.keys = buffers.keys as u64;
    u.values = buffers.values as u64;
    u.count = count;
    u.elem_flags = elem_flags;

    let status = match sys_bpf(cmd, &mut attr) {
        Ok(ret) => ret,
        Err((_, io_error)) => -i64::from(io_error.raw_os_error().unwrap_or(libc::EIO)),
    };
    BatchStatus {
        status,
        count: unsafe { attr.batch.count },
    }
}

fn sys_bpf(cmd: bpf_cmd, attr: &mut bpf_attr) -> SysResult<i64> {
    syscall(Syscall::Ebpf { cmd, attr })
}

// SAFETY: only use for bpf_cmd that return a new file descriptor on success.
unsafe fn fd_sys_bpf(cmd: bpf_cmd, attr: &mut bpf_attr) -> SysResult<MapFd> {
    let fd = sys_bpf(cmd, attr)?;
    let fd = fd.try_into().map_err(|_| {
        (
            fd,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{cmd:?}: invalid fd returned: {fd}"),
            ),
        )
    })?;
    Ok(MapFd::from_raw_fd(fd))
}
