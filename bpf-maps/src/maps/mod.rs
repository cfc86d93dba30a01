//! Creating and owning eBPF maps.
//!
//! eBPF maps are key/value data structures that live in the kernel. A map is
//! created from a [`MapDescriptor`] with [`MapReference::create`], or adopted
//! from an existing file descriptor with [`MapReference::from_fd`] and
//! [`MapReference::from_borrowed_fd`]. Either way the result is a
//! [`MapReference`]: the map's [`MapInfo`] together with exclusive ownership
//! of one file descriptor.
//!
//! # Metadata
//!
//! The kernel is free to adjust the parameters a map was requested with, so
//! [`MapReference::info`] (not the descriptor) is authoritative once the map
//! exists. On kernels that can't report map info, the info is derived from
//! the normalized descriptor instead.
//!
//! # Example
//!
//! ```no_run
//! use bpf_maps::maps::{InnerMap, MapDescriptor, MapReference, MapType};
//!
//! let inner = MapDescriptor::new(MapType::Array, 4, 8, 16);
//! let outer = MapDescriptor::new(MapType::HashOfMaps, 4, 4, 128)
//!     .with_name("OUTER")
//!     .with_inner_map(InnerMap::Descriptor(Box::new(inner)));
//!
//! let mut map = MapReference::create(&outer)?;
//! assert_eq!(map.info().map_type(), MapType::HashOfMaps);
//! map.close();
//! # Ok::<(), bpf_maps::maps::MapError>(())
//! ```
use std::{
    fmt, io,
    mem::ManuallyDrop,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, RawFd},
};

use libc::{getrlimit, rlimit, RLIMIT_MEMLOCK, RLIM_INFINITY};
use log::warn;
use thiserror::Error;

use crate::{
    generated::{
        BPF_F_CLONE, BPF_F_INNER_MAP, BPF_F_MMAPABLE, BPF_F_NO_COMMON_LRU, BPF_F_NO_PREALLOC,
        BPF_F_NUMA_NODE, BPF_F_PRESERVE_ELEMS, BPF_F_RDONLY, BPF_F_RDONLY_PROG,
        BPF_F_STACK_BUILD_ID, BPF_F_WRONLY, BPF_F_WRONLY_PROG, BPF_F_ZERO_SEED,
    },
    sys::{close_fd, dup_fd, SyscallError},
};

pub mod batch;
mod descriptor;
mod info;
mod reference;

pub use batch::{check_all_processed, fix_count, BatchLookup};
pub(crate) use descriptor::MapDef;
pub use descriptor::{InnerMap, MapDescriptor};
pub use info::{MapInfo, MapType};
pub use reference::MapReference;

#[derive(Error, Debug)]
/// Errors occuring from working with Maps
pub enum MapError {
    /// A creation parameter doesn't fit in the kernel's 32 bit field
    #[error("invalid {field} {value}, the value must fit in a u32")]
    InvalidParameter {
        /// The descriptor field
        field: &'static str,
        /// The rejected value
        value: usize,
    },

    /// Invalid map name encountered
    #[error("invalid map name `{name}`")]
    InvalidName {
        /// The map name
        name: String,
    },

    /// Invalid map type encontered
    #[error("invalid map type {map_type}")]
    InvalidMapType {
        /// The map type
        map_type: u32,
    },

    /// Failed to create map
    #[error("`{call}` failed for map `{}` with errno {code}", .name.as_deref().unwrap_or("<anonymous>"))]
    CreateError {
        /// Map name
        name: Option<String>,
        /// The syscall which failed
        call: &'static str,
        /// The errno reported by the kernel
        code: i32,
        #[source]
        /// Original io::Error
        io_error: io::Error,
    },

    /// The kernel can't report map info
    #[error("map info is not supported by the current kernel")]
    InfoNotSupported,

    /// The map reference was closed
    #[error("the map reference is closed")]
    Closed,

    /// A batch buffer is too small for the requested number of elements
    #[error("invalid {buffer} buffer size {size}, expected at least {expected}")]
    InvalidBatchBuffer {
        /// Which buffer
        buffer: &'static str,
        /// Size passed
        size: usize,
        /// Size required
        expected: usize,
    },

    /// A batch call reported success without processing every element
    #[error("batch processed {count} of {batch_size} elements but reported success")]
    IncompleteBatch {
        /// Elements processed
        count: u32,
        /// Elements requested
        batch_size: u32,
    },

    /// A batch call failed
    #[error("`{call}` failed after processing {} elements", .processed.map_or_else(|| "an unknown number of".to_owned(), |count| count.to_string()))]
    BatchError {
        /// The batch syscall
        call: &'static str,
        /// Elements confirmed processed, `None` when the kernel couldn't
        /// report a count
        processed: Option<u32>,
        #[source]
        /// Original io::Error
        io_error: io::Error,
    },

    /// Syscall failed
    #[error(transparent)]
    SyscallError(#[from] SyscallError),

    /// An IO error occurred
    #[error(transparent)]
    IoError(#[from] io::Error),
}

bitflags::bitflags! {
    /// Flags passed to the kernel when creating a map.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        /// Don't preallocate hash map elements.
        const NO_PREALLOC = BPF_F_NO_PREALLOC;
        /// Use per-CPU LRU lists instead of a common one.
        const NO_COMMON_LRU = BPF_F_NO_COMMON_LRU;
        /// Allocate the map on the NUMA node given by the descriptor.
        const NUMA_NODE = BPF_F_NUMA_NODE;
        /// Read-only for syscalls.
        const RDONLY = BPF_F_RDONLY;
        /// Write-only for syscalls.
        const WRONLY = BPF_F_WRONLY;
        /// Store build ids in a stack trace map.
        const STACK_BUILD_ID = BPF_F_STACK_BUILD_ID;
        /// Zero the hash seed.
        const ZERO_SEED = BPF_F_ZERO_SEED;
        /// Read-only for programs.
        const RDONLY_PROG = BPF_F_RDONLY_PROG;
        /// Write-only for programs.
        const WRONLY_PROG = BPF_F_WRONLY_PROG;
        /// Clone storage when the owning socket is cloned.
        const CLONE = BPF_F_CLONE;
        /// Allow the map to be mmap()ed.
        const MMAPABLE = BPF_F_MMAPABLE;
        /// Keep elements when the perf event array fd is released.
        const PRESERVE_ELEMS = BPF_F_PRESERVE_ELEMS;
        /// Allow inner maps of different `max_entries`.
        const INNER_MAP = BPF_F_INNER_MAP;
    }
}

/// A map file descriptor.
///
/// The descriptor is owned: it is released exactly once, when the `MapFd` is
/// dropped.
#[derive(Debug)]
pub struct MapFd {
    fd: RawFd,
}

impl MapFd {
    /// Duplicates the descriptor. The copy refers to the same kernel map and
    /// is released independently.
    pub fn try_clone(&self) -> Result<Self, SyscallError> {
        dup_fd(self.as_fd())
    }
}

impl AsFd for MapFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: `fd` is open for as long as `self` is alive.
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }
}

impl AsRawFd for MapFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl FromRawFd for MapFd {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl IntoRawFd for MapFd {
    fn into_raw_fd(self) -> RawFd {
        ManuallyDrop::new(self).fd
    }
}

impl Drop for MapFd {
    fn drop(&mut self) {
        close_fd(self.fd);
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct RlimitSize(u64);
impl fmt::Display for RlimitSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 1024 {
            write!(f, "{} bytes", self.0)
        } else if self.0 < 1024 * 1024 {
            write!(f, "{} KiB", self.0 / 1024)
        } else {
            write!(f, "{} MiB", self.0 / 1024 / 1024)
        }
    }
}

/// Raises a warning about rlimit. Should be used only if creating a map was not
/// successful.
fn maybe_warn_rlimit() {
    let mut limit = std::mem::MaybeUninit::<rlimit>::uninit();
    let ret = unsafe { getrlimit(RLIMIT_MEMLOCK, limit.as_mut_ptr()) };
    if ret == 0 {
        let limit = unsafe { limit.assume_init() };

        if limit.rlim_cur == RLIM_INFINITY {
            return;
        }
        #[allow(clippy::useless_conversion)]
        let limit = RlimitSize(limit.rlim_cur.into());
        warn!(
            "RLIMIT_MEMLOCK value is {}, not RLIM_INFINITY; if experiencing problems with creating \
            maps, try raising RLIMIT_MEMLOCK either to RLIM_INFINITY or to a higher value sufficient \
            for the size of your maps",
            limit
        );
    }
}
