//! Lifecycle management for eBPF maps.
//!
//! eBPF maps are key/value stores that live in the kernel and are shared
//! between eBPF programs and user space. This crate covers the user space side
//! of owning them:
//!
//! * [`maps::MapReference`] creates a map from a [`maps::MapDescriptor`],
//!   including map-in-maps whose inner template is created on the fly, or
//!   adopts an existing file descriptor. It owns exactly one descriptor and
//!   releases it exactly once.
//! * [`maps::MapInfo`] holds the map's metadata as reported by the kernel, or
//!   as requested on kernels that can't report it.
//! * [`codec`] converts keys and values to and from their fixed size byte
//!   representation.
//! * [`maps::batch`] makes sense of the counts returned by batch commands.
//!
//! The crate talks to the kernel directly through the `bpf(2)` system call and
//! doesn't depend on libbpf.
#![deny(clippy::all, missing_docs)]
#![allow(clippy::missing_safety_doc, clippy::len_without_is_empty)]

pub mod codec;
mod generated;
pub mod maps;
mod sys;
pub mod util;

pub use sys::SyscallError;

/// Marker trait for types that can safely be converted to and from byte slices.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` (or primitive), contain no padding and be
/// valid for any bit pattern.
pub unsafe trait Pod: Copy + 'static {}

macro_rules! unsafe_impl_pod {
    ($($struct_name:ident),+ $(,)?) => {
        $(
            unsafe impl Pod for $struct_name { }
        )+
    }
}

unsafe_impl_pod!(i8, u8, i16, u16, i32, u32, i64, u64, u128, i128);

// It only makes sense that an array of POD types is itself POD
unsafe impl<T: Pod, const N: usize> Pod for [T; N] {}
