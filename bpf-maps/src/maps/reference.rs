//! Owned references to eBPF maps.

use std::os::fd::{AsFd, AsRawFd as _, BorrowedFd};

use libc::{EINVAL, EPERM};
use log::debug;

use super::{maybe_warn_rlimit, InnerMap, MapDef, MapDescriptor, MapError, MapFd, MapInfo};
use crate::sys::{
    bpf_create_map, bpf_map_freeze, bpf_map_get_info_by_fd, dup_fd, MapInfoQuery, SyscallError,
};

/// A map together with the one file descriptor it owns.
///
/// The metadata is fixed when the reference is built. Closing the reference
/// (or dropping it) releases the descriptor exactly once; the kernel keeps the
/// map alive for as long as other descriptors or programs refer to it.
#[derive(Debug)]
pub struct MapReference {
    info: MapInfo,
    fd: Option<MapFd>,
}

impl MapReference {
    /// Creates a new map.
    ///
    /// If the descriptor embeds an [`InnerMap::Descriptor`], the inner map is
    /// created first and used as the template of the new map-in-map. It is
    /// released before this function returns, whether creation succeeded or
    /// not.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidParameter`] or [`MapError::InvalidName`]
    /// before any syscall is made if the descriptor is invalid, and
    /// [`MapError::CreateError`] if `BPF_MAP_CREATE` fails.
    pub fn create(descriptor: &MapDescriptor<'_>) -> Result<Self, MapError> {
        let mut def = descriptor.resolve()?;

        // Dropped on every path out of this function, which releases the
        // inner map's fd.
        let inner;
        def.inner_map_fd = match &descriptor.inner_map {
            None => None,
            Some(InnerMap::Fd(fd)) => Some(fd.as_raw_fd()),
            Some(InnerMap::Descriptor(inner_descriptor)) => {
                inner = Self::create(inner_descriptor)?;
                Some(inner.fd()?.as_raw_fd())
            }
        };

        let fd = bpf_create_map(&def).map_err(|(_, io_error)| {
            let code = io_error.raw_os_error().unwrap_or(EINVAL);
            if code == EPERM {
                maybe_warn_rlimit();
            }

            MapError::CreateError {
                name: def.name_lossy(),
                call: "bpf_map_create",
                code,
                io_error,
            }
        })?;
        debug!(
            "created {:?} map {:?} with fd {}",
            def.map_type,
            def.name,
            fd.as_raw_fd()
        );

        Self::create_with_fallback(fd, &def)
    }

    /// Wraps a freshly created map, falling back to the creation parameters
    /// when the kernel can't report map info.
    pub(crate) fn create_with_fallback(fd: MapFd, def: &MapDef) -> Result<Self, MapError> {
        let info = match bpf_map_get_info_by_fd(fd.as_fd())? {
            MapInfoQuery::Supported(info) => MapInfo::from_kernel(info)?,
            MapInfoQuery::Unsupported => {
                debug!(
                    "map info not supported, using creation parameters for fd {}",
                    fd.as_raw_fd()
                );
                MapInfo::from_def(def)
            }
        };
        Ok(Self { info, fd: Some(fd) })
    }

    /// Takes ownership of `fd` and loads its map info.
    ///
    /// The descriptor is closed on any error, including when it doesn't refer
    /// to a map at all. Use [`MapReference::from_borrowed_fd`] to keep it open
    /// on failure.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InfoNotSupported`] on kernels older than v4.13 (and
    /// for descriptors the kernel rejects with `EINVAL`),
    /// [`MapError::SyscallError`] if `fd` is not a valid descriptor and
    /// [`MapError::InvalidMapType`] if the map type is newer than [`MapType`](super::MapType).
    pub fn from_fd(fd: MapFd) -> Result<Self, MapError> {
        let info = query_info(fd.as_fd())?;
        Ok(Self { info, fd: Some(fd) })
    }

    /// Loads the map info of `fd` and duplicates it.
    ///
    /// `fd` itself stays valid and owned by the caller. Nothing is duplicated
    /// when the info can't be loaded.
    ///
    /// # Errors
    ///
    /// Same as [`MapReference::from_fd`], plus [`MapError::SyscallError`] if
    /// the duplication fails.
    pub fn from_borrowed_fd(fd: BorrowedFd<'_>) -> Result<Self, MapError> {
        let info = query_info(fd)?;
        let fd = dup_fd(fd)?;
        Ok(Self { info, fd: Some(fd) })
    }

    /// Returns the map's metadata.
    pub fn info(&self) -> &MapInfo {
        &self.info
    }

    /// Returns the file descriptor of the map.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Closed`] after [`MapReference::close`].
    pub fn fd(&self) -> Result<BorrowedFd<'_>, MapError> {
        self.fd.as_ref().map(AsFd::as_fd).ok_or(MapError::Closed)
    }

    /// Whether [`MapReference::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }

    /// Releases the file descriptor. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            debug!("closing map fd {}", fd.as_raw_fd());
        }
    }

    /// Returns a new reference to the same map with its own descriptor.
    pub fn try_clone(&self) -> Result<Self, MapError> {
        let fd = dup_fd(self.fd()?)?;
        Ok(Self {
            info: self.info.clone(),
            fd: Some(fd),
        })
    }

    /// Makes the map read-only for syscalls. Programs can still write to it.
    ///
    /// Introduced in kernel v5.2.
    pub fn freeze(&self) -> Result<(), MapError> {
        bpf_map_freeze(self.fd()?).map_err(|(_, io_error)| SyscallError {
            call: "bpf_map_freeze",
            io_error,
        })?;
        Ok(())
    }
}

fn query_info(fd: BorrowedFd<'_>) -> Result<MapInfo, MapError> {
    match bpf_map_get_info_by_fd(fd)? {
        MapInfoQuery::Supported(info) => MapInfo::from_kernel(info),
        MapInfoQuery::Unsupported => Err(MapError::InfoNotSupported),
    }
}
