//! Map creation requests.

use std::{
    ffi::CString,
    os::fd::{BorrowedFd, RawFd},
};

use super::{MapError, MapFlags, MapType};

/// A request to create a map.
///
/// Sizes are taken as `usize` so they can come straight from
/// [`mem::size_of`](std::mem::size_of); they are checked against the kernel's
/// 32 bit fields before any syscall is made.
#[derive(Debug)]
pub struct MapDescriptor<'a> {
    /// The kind of map to create.
    pub map_type: MapType,
    /// Key size in bytes.
    pub key_size: usize,
    /// Value size in bytes.
    pub value_size: usize,
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Creation flags.
    pub flags: MapFlags,
    /// Map name. Only the first 15 bytes are passed to the kernel.
    pub name: Option<String>,
    /// NUMA node backing the map. Setting it implies [`MapFlags::NUMA_NODE`].
    pub numa_node: Option<u32>,
    /// Interface index for offloaded maps.
    pub ifindex: Option<u32>,
    /// Template for the values of a map-in-map.
    pub inner_map: Option<InnerMap<'a>>,
}

/// The inner map template of a map-in-map.
#[derive(Debug)]
pub enum InnerMap<'a> {
    /// Create a map from this descriptor and use it as the template.
    ///
    /// The created map only lives for the duration of
    /// [`MapReference::create`](super::MapReference::create).
    Descriptor(Box<MapDescriptor<'a>>),
    /// Use an existing map as the template. The descriptor is only borrowed
    /// and is never closed.
    Fd(BorrowedFd<'a>),
}

impl<'a> MapDescriptor<'a> {
    /// Creates a descriptor with no flags, name or inner map.
    pub fn new(map_type: MapType, key_size: usize, value_size: usize, max_entries: usize) -> Self {
        Self {
            map_type,
            key_size,
            value_size,
            max_entries,
            flags: MapFlags::empty(),
            name: None,
            numa_node: None,
            ifindex: None,
            inner_map: None,
        }
    }

    /// Sets the creation flags.
    pub fn with_flags(mut self, flags: MapFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the map name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the NUMA node.
    pub fn with_numa_node(mut self, numa_node: u32) -> Self {
        self.numa_node = Some(numa_node);
        self
    }

    /// Sets the interface index.
    pub fn with_ifindex(mut self, ifindex: u32) -> Self {
        self.ifindex = Some(ifindex);
        self
    }

    /// Sets the inner map template.
    pub fn with_inner_map(mut self, inner_map: InnerMap<'a>) -> Self {
        self.inner_map = Some(inner_map);
        self
    }

    /// Validates and normalizes the descriptor.
    ///
    /// The inner map is left unresolved: creating it is up to the caller.
    pub(crate) fn resolve(&self) -> Result<MapDef, MapError> {
        let Self {
            map_type,
            key_size,
            value_size,
            max_entries,
            flags,
            name,
            numa_node,
            ifindex,
            inner_map: _,
        } = self;

        let key_size = check_u32("key_size", *key_size)?;
        let value_size = check_u32("value_size", *value_size)?;
        let max_entries = check_u32("max_entries", *max_entries)?;

        let name = name
            .as_deref()
            .map(|name| CString::new(name).map_err(|_| MapError::InvalidName { name: name.into() }))
            .transpose()?;

        let mut flags = *flags;
        if numa_node.is_some() {
            flags |= MapFlags::NUMA_NODE;
        }

        Ok(MapDef {
            map_type: *map_type,
            key_size,
            value_size,
            max_entries,
            flags,
            name,
            numa_node: *numa_node,
            ifindex: *ifindex,
            inner_map_fd: None,
        })
    }
}

fn check_u32(field: &'static str, value: usize) -> Result<u32, MapError> {
    u32::try_from(value).map_err(|_| MapError::InvalidParameter { field, value })
}

/// A validated, normalized map definition, ready for `BPF_MAP_CREATE`.
#[derive(Debug, Clone)]
pub(crate) struct MapDef {
    pub(crate) map_type: MapType,
    pub(crate) key_size: u32,
    pub(crate) value_size: u32,
    pub(crate) max_entries: u32,
    pub(crate) flags: MapFlags,
    pub(crate) name: Option<CString>,
    pub(crate) numa_node: Option<u32>,
    pub(crate) ifindex: Option<u32>,
    pub(crate) inner_map_fd: Option<RawFd>,
}

impl MapDef {
    pub(crate) fn name_lossy(&self) -> Option<String> {
        self.name
            .as_ref()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let def = MapDescriptor::new(MapType::Hash, 4, 8, 1024)
            .resolve()
            .unwrap();
        assert_eq!(def.map_type, MapType::Hash);
        assert_eq!(def.key_size, 4);
        assert_eq!(def.value_size, 8);
        assert_eq!(def.max_entries, 1024);
        assert_eq!(def.flags, MapFlags::empty());
        assert_eq!(def.name, None);
        assert_eq!(def.inner_map_fd, None);
    }

    #[test]
    fn test_resolve_numa_node_sets_flag() {
        let def = MapDescriptor::new(MapType::Hash, 4, 4, 1)
            .with_flags(MapFlags::NO_PREALLOC)
            .with_numa_node(1)
            .resolve()
            .unwrap();
        assert_eq!(def.flags, MapFlags::NO_PREALLOC | MapFlags::NUMA_NODE);
        assert_eq!(def.numa_node, Some(1));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_resolve_rejects_oversized_fields() {
        let too_big = u32::MAX as usize + 1;

        assert_matches!(
            MapDescriptor::new(MapType::Hash, too_big, 4, 1).resolve(),
            Err(MapError::InvalidParameter { field: "key_size", value }) if value == too_big
        );
        assert_matches!(
            MapDescriptor::new(MapType::Hash, 4, too_big, 1).resolve(),
            Err(MapError::InvalidParameter { field: "value_size", .. })
        );
        assert_matches!(
            MapDescriptor::new(MapType::Hash, 4, 4, too_big).resolve(),
            Err(MapError::InvalidParameter { field: "max_entries", .. })
        );
        assert_matches!(
            MapDescriptor::new(MapType::Hash, 4, 4, u32::MAX as usize).resolve(),
            Ok(MapDef { max_entries: u32::MAX, .. })
        );
    }

    #[test]
    fn test_resolve_rejects_nul_in_name() {
        assert_matches!(
            MapDescriptor::new(MapType::Array, 4, 4, 1)
                .with_name("fo\0o")
                .resolve(),
            Err(MapError::InvalidName { name }) if name == "fo\0o"
        );
    }
}
