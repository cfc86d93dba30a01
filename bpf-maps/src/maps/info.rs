//! Metadata information about an eBPF map.

use crate::{
    generated::{bpf_map_info, bpf_map_type},
    maps::{MapDef, MapError, MapFlags},
    util::bytes_of_bpf_name,
};

/// Metadata about a map.
///
/// When the kernel supports `BPF_OBJ_GET_INFO_BY_FD` (v4.13) this is what the
/// kernel reports, which can differ from what was requested. Otherwise it is
/// derived from the creation request and the kernel-assigned fields are
/// `None`.
#[doc(alias = "bpf_map_info")]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapInfo {
    map_type: MapType,
    key_size: u32,
    value_size: u32,
    max_entries: u32,
    flags: MapFlags,
    id: Option<u32>,
    name: Option<String>,
    ifindex: Option<u32>,
    netns_dev: Option<u64>,
    netns_ino: Option<u64>,
}

impl MapInfo {
    pub(crate) fn from_kernel(info: bpf_map_info) -> Result<Self, MapError> {
        let bpf_map_info {
            type_,
            id,
            key_size,
            value_size,
            max_entries,
            map_flags,
            name,
            ifindex,
            netns_dev,
            netns_ino,
            ..
        } = info;

        let name = std::str::from_utf8(bytes_of_bpf_name(&name))
            .ok()
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        // ifindex and the netns pair are only meaningful for offloaded maps.
        let offloaded = ifindex != 0;

        Ok(Self {
            map_type: type_.try_into()?,
            key_size,
            value_size,
            max_entries,
            flags: MapFlags::from_bits_retain(map_flags),
            id: Some(id),
            name,
            ifindex: offloaded.then_some(ifindex),
            netns_dev: offloaded.then_some(netns_dev),
            netns_ino: offloaded.then_some(netns_ino),
        })
    }

    pub(crate) fn from_def(def: &MapDef) -> Self {
        let MapDef {
            map_type,
            key_size,
            value_size,
            max_entries,
            flags,
            ..
        } = def;

        Self {
            map_type: *map_type,
            key_size: *key_size,
            value_size: *value_size,
            max_entries: *max_entries,
            flags: *flags,
            id: None,
            name: None,
            ifindex: None,
            netns_dev: None,
            netns_ino: None,
        }
    }

    /// The type of map.
    pub fn map_type(&self) -> MapType {
        self.map_type
    }

    /// The key size for this map in bytes.
    pub fn key_size(&self) -> u32 {
        self.key_size
    }

    /// The value size for this map in bytes.
    pub fn value_size(&self) -> u32 {
        self.value_size
    }

    /// The maximum number of entries in this map.
    pub fn max_entries(&self) -> u32 {
        self.max_entries
    }

    /// The flags the map was created with.
    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    /// The unique ID for this map.
    ///
    /// `None` if the kernel couldn't report map info.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    /// The name of the map, limited to 15 bytes.
    ///
    /// Introduced in kernel v4.15.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The interface the map is offloaded to.
    pub fn ifindex(&self) -> Option<u32> {
        self.ifindex
    }

    /// Device of the network namespace of an offloaded map.
    pub fn netns_dev(&self) -> Option<u64> {
        self.netns_dev
    }

    /// Inode of the network namespace of an offloaded map.
    pub fn netns_ino(&self) -> Option<u64> {
        self.netns_ino
    }

    /// Whether the kernel stores one value per possible CPU for each key.
    pub(crate) fn is_per_cpu(&self) -> bool {
        matches!(
            self.map_type,
            MapType::PerCpuHash
                | MapType::PerCpuArray
                | MapType::LruPerCpuHash
                | MapType::PerCpuCgroupStorage
        )
    }
}

/// The type of eBPF map.
///
/// Maps of a type added to the kernel after this enum can't be adopted:
/// [`MapReference::from_fd`](super::MapReference::from_fd) and
/// [`MapReference::from_borrowed_fd`](super::MapReference::from_borrowed_fd)
/// fail with [`MapError::InvalidMapType`] carrying the raw type.
#[non_exhaustive]
#[doc(alias = "bpf_map_type")]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MapType {
    /// An unspecified map type.
    Unspecified = bpf_map_type::BPF_MAP_TYPE_UNSPEC as isize,
    /// A Hash map type.
    ///
    /// Introduced in kernel v3.19.
    #[doc(alias = "BPF_MAP_TYPE_HASH")]
    Hash = bpf_map_type::BPF_MAP_TYPE_HASH as isize,
    /// An Array map type.
    ///
    /// Introduced in kernel v3.19.
    #[doc(alias = "BPF_MAP_TYPE_ARRAY")]
    Array = bpf_map_type::BPF_MAP_TYPE_ARRAY as isize,
    /// A Program Array map type.
    ///
    /// Introduced in kernel v4.2.
    #[doc(alias = "BPF_MAP_TYPE_PROG_ARRAY")]
    ProgramArray = bpf_map_type::BPF_MAP_TYPE_PROG_ARRAY as isize,
    /// A Perf Event Array map type.
    ///
    /// Introduced in kernel v4.3.
    #[doc(alias = "BPF_MAP_TYPE_PERF_EVENT_ARRAY")]
    PerfEventArray = bpf_map_type::BPF_MAP_TYPE_PERF_EVENT_ARRAY as isize,
    /// A per-CPU Hash map type.
    ///
    /// Introduced in kernel v4.6.
    #[doc(alias = "BPF_MAP_TYPE_PERCPU_HASH")]
    PerCpuHash = bpf_map_type::BPF_MAP_TYPE_PERCPU_HASH as isize,
    /// A per-CPU Array map type.
    ///
    /// Introduced in kernel v4.6.
    #[doc(alias = "BPF_MAP_TYPE_PERCPU_ARRAY")]
    PerCpuArray = bpf_map_type::BPF_MAP_TYPE_PERCPU_ARRAY as isize,
    /// A Stack Trace map type.
    ///
    /// Introduced in kernel v4.6.
    #[doc(alias = "BPF_MAP_TYPE_STACK_TRACE")]
    StackTrace = bpf_map_type::BPF_MAP_TYPE_STACK_TRACE as isize,
    /// A cGroup Array map type.
    ///
    /// Introduced in kernel v4.8.
    #[doc(alias = "BPF_MAP_TYPE_CGROUP_ARRAY")]
    CgroupArray = bpf_map_type::BPF_MAP_TYPE_CGROUP_ARRAY as isize,
    /// A Least Recently Used (LRU) Hash map type.
    ///
    /// Introduced in kernel v4.10.
    #[doc(alias = "BPF_MAP_TYPE_LRU_HASH")]
    LruHash = bpf_map_type::BPF_MAP_TYPE_LRU_HASH as isize,
    /// A Least Recently Used (LRU) per-CPU Hash map type.
    ///
    /// Introduced in kernel v4.10.
    #[doc(alias = "BPF_MAP_TYPE_LRU_PERCPU_HASH")]
    LruPerCpuHash = bpf_map_type::BPF_MAP_TYPE_LRU_PERCPU_HASH as isize,
    /// A Longest Prefix Match (LPM) Trie map type.
    ///
    /// Introduced in kernel v4.11.
    #[doc(alias = "BPF_MAP_TYPE_LPM_TRIE")]
    LpmTrie = bpf_map_type::BPF_MAP_TYPE_LPM_TRIE as isize,
    /// An Array of Maps map type. Needs an inner map template.
    ///
    /// Introduced in kernel v4.12.
    #[doc(alias = "BPF_MAP_TYPE_ARRAY_OF_MAPS")]
    ArrayOfMaps = bpf_map_type::BPF_MAP_TYPE_ARRAY_OF_MAPS as isize,
    /// A Hash of Maps map type. Needs an inner map template.
    ///
    /// Introduced in kernel v4.12.
    #[doc(alias = "BPF_MAP_TYPE_HASH_OF_MAPS")]
    HashOfMaps = bpf_map_type::BPF_MAP_TYPE_HASH_OF_MAPS as isize,
    /// A Device Map type.
    ///
    /// Introduced in kernel v4.14.
    #[doc(alias = "BPF_MAP_TYPE_DEVMAP")]
    DevMap = bpf_map_type::BPF_MAP_TYPE_DEVMAP as isize,
    /// A Socket Map type.
    ///
    /// Introduced in kernel v4.14.
    #[doc(alias = "BPF_MAP_TYPE_SOCKMAP")]
    SockMap = bpf_map_type::BPF_MAP_TYPE_SOCKMAP as isize,
    /// A CPU Map type.
    ///
    /// Introduced in kernel v4.15.
    #[doc(alias = "BPF_MAP_TYPE_CPUMAP")]
    CpuMap = bpf_map_type::BPF_MAP_TYPE_CPUMAP as isize,
    /// An XDP Socket Map type.
    ///
    /// Introduced in kernel v4.18.
    #[doc(alias = "BPF_MAP_TYPE_XSKMAP")]
    XskMap = bpf_map_type::BPF_MAP_TYPE_XSKMAP as isize,
    /// A Socket Hash map type.
    ///
    /// Introduced in kernel v4.18.
    #[doc(alias = "BPF_MAP_TYPE_SOCKHASH")]
    SockHash = bpf_map_type::BPF_MAP_TYPE_SOCKHASH as isize,
    /// A cGroup Storage map type.
    ///
    /// Introduced in kernel v4.19.
    #[doc(alias = "BPF_MAP_TYPE_CGROUP_STORAGE")]
    CgroupStorage = bpf_map_type::BPF_MAP_TYPE_CGROUP_STORAGE as isize,
    /// A Reuseport Socket Array map type.
    ///
    /// Introduced in kernel v4.19.
    #[doc(alias = "BPF_MAP_TYPE_REUSEPORT_SOCKARRAY")]
    ReuseportSockArray = bpf_map_type::BPF_MAP_TYPE_REUSEPORT_SOCKARRAY as isize,
    /// A per-CPU cGroup Storage map type.
    ///
    /// Introduced in kernel v4.20.
    #[doc(alias = "BPF_MAP_TYPE_PERCPU_CGROUP_STORAGE")]
    PerCpuCgroupStorage = bpf_map_type::BPF_MAP_TYPE_PERCPU_CGROUP_STORAGE as isize,
    /// A Queue map type.
    ///
    /// Introduced in kernel v4.20.
    #[doc(alias = "BPF_MAP_TYPE_QUEUE")]
    Queue = bpf_map_type::BPF_MAP_TYPE_QUEUE as isize,
    /// A Stack map type.
    ///
    /// Introduced in kernel v4.20.
    #[doc(alias = "BPF_MAP_TYPE_STACK")]
    Stack = bpf_map_type::BPF_MAP_TYPE_STACK as isize,
    /// A Socket-local Storage map type.
    ///
    /// Introduced in kernel v5.2.
    #[doc(alias = "BPF_MAP_TYPE_SK_STORAGE")]
    SkStorage = bpf_map_type::BPF_MAP_TYPE_SK_STORAGE as isize,
    /// A Device Hash Map type.
    ///
    /// Introduced in kernel v5.4.
    #[doc(alias = "BPF_MAP_TYPE_DEVMAP_HASH")]
    DevMapHash = bpf_map_type::BPF_MAP_TYPE_DEVMAP_HASH as isize,
    /// A Struct Ops map type.
    ///
    /// Introduced in kernel v5.6.
    #[doc(alias = "BPF_MAP_TYPE_STRUCT_OPS")]
    StructOps = bpf_map_type::BPF_MAP_TYPE_STRUCT_OPS as isize,
    /// A Ring Buffer map type.
    ///
    /// Introduced in kernel v5.8.
    #[doc(alias = "BPF_MAP_TYPE_RINGBUF")]
    RingBuf = bpf_map_type::BPF_MAP_TYPE_RINGBUF as isize,
    /// An Inode Storage map type.
    ///
    /// Introduced in kernel v5.10.
    #[doc(alias = "BPF_MAP_TYPE_INODE_STORAGE")]
    InodeStorage = bpf_map_type::BPF_MAP_TYPE_INODE_STORAGE as isize,
    /// A Task Storage map type.
    ///
    /// Introduced in kernel v5.11.
    #[doc(alias = "BPF_MAP_TYPE_TASK_STORAGE")]
    TaskStorage = bpf_map_type::BPF_MAP_TYPE_TASK_STORAGE as isize,
    /// A Bloom Filter map type.
    ///
    /// Introduced in kernel v5.16.
    #[doc(alias = "BPF_MAP_TYPE_BLOOM_FILTER")]
    BloomFilter = bpf_map_type::BPF_MAP_TYPE_BLOOM_FILTER as isize,
    /// A User Ring Buffer map type.
    ///
    /// Introduced in kernel v6.1.
    #[doc(alias = "BPF_MAP_TYPE_USER_RINGBUF")]
    UserRingBuf = bpf_map_type::BPF_MAP_TYPE_USER_RINGBUF as isize,
    /// A cGroup Storage map type.
    ///
    /// Introduced in kernel v6.2.
    #[doc(alias = "BPF_MAP_TYPE_CGRP_STORAGE")]
    CgrpStorage = bpf_map_type::BPF_MAP_TYPE_CGRP_STORAGE as isize,
    /// An Arena map type.
    ///
    /// Introduced in kernel v6.9.
    #[doc(alias = "BPF_MAP_TYPE_ARENA")]
    Arena = bpf_map_type::BPF_MAP_TYPE_ARENA as isize,
}

impl TryFrom<u32> for MapType {
    type Error = MapError;

    fn try_from(map_type: u32) -> Result<Self, Self::Error> {
        use bpf_map_type::*;
        Ok(match map_type {
            BPF_MAP_TYPE_UNSPEC => Self::Unspecified,
            BPF_MAP_TYPE_HASH => Self::Hash,
            BPF_MAP_TYPE_ARRAY => Self::Array,
            BPF_MAP_TYPE_PROG_ARRAY => Self::ProgramArray,
            BPF_MAP_TYPE_PERF_EVENT_ARRAY => Self::PerfEventArray,
            BPF_MAP_TYPE_PERCPU_HASH => Self::PerCpuHash,
            BPF_MAP_TYPE_PERCPU_ARRAY => Self::PerCpuArray,
            BPF_MAP_TYPE_STACK_TRACE => Self::StackTrace,
            BPF_MAP_TYPE_CGROUP_ARRAY => Self::CgroupArray,
            BPF_MAP_TYPE_LRU_HASH => Self::LruHash,
            BPF_MAP_TYPE_LRU_PERCPU_HASH => Self::LruPerCpuHash,
            BPF_MAP_TYPE_LPM_TRIE => Self::LpmTrie,
            BPF_MAP_TYPE_ARRAY_OF_MAPS => Self::ArrayOfMaps,
            BPF_MAP_TYPE_HASH_OF_MAPS => Self::HashOfMaps,
            BPF_MAP_TYPE_DEVMAP => Self::DevMap,
            BPF_MAP_TYPE_SOCKMAP => Self::SockMap,
            BPF_MAP_TYPE_CPUMAP => Self::CpuMap,
            BPF_MAP_TYPE_XSKMAP => Self::XskMap,
            BPF_MAP_TYPE_SOCKHASH => Self::SockHash,
            BPF_MAP_TYPE_CGROUP_STORAGE => Self::CgroupStorage,
            BPF_MAP_TYPE_REUSEPORT_SOCKARRAY => Self::ReuseportSockArray,
            BPF_MAP_TYPE_PERCPU_CGROUP_STORAGE => Self::PerCpuCgroupStorage,
            BPF_MAP_TYPE_QUEUE => Self::Queue,
            BPF_MAP_TYPE_STACK => Self::Stack,
            BPF_MAP_TYPE_SK_STORAGE => Self::SkStorage,
            BPF_MAP_TYPE_DEVMAP_HASH => Self::DevMapHash,
            BPF_MAP_TYPE_STRUCT_OPS => Self::StructOps,
            BPF_MAP_TYPE_RINGBUF => Self::RingBuf,
            BPF_MAP_TYPE_INODE_STORAGE => Self::InodeStorage,
            BPF_MAP_TYPE_TASK_STORAGE => Self::TaskStorage,
            BPF_MAP_TYPE_BLOOM_FILTER => Self::BloomFilter,
            BPF_MAP_TYPE_USER_RINGBUF => Self::UserRingBuf,
            BPF_MAP_TYPE_CGRP_STORAGE => Self::CgrpStorage,
            BPF_MAP_TYPE_ARENA => Self::Arena,
            map_type => return Err(MapError::InvalidMapType { map_type }),
        })
    }
}
