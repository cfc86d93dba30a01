//! Fixed width encoding of map keys and values.
//!
//! A [`TypeConversion`] describes how one type maps to exactly
//! [`SIZE`](TypeConversion::SIZE) bytes. [`Conversion`] wraps it with the
//! buffer handling: length checks, allocation, and passing absent values
//! through untouched.
//!
//! # Example
//!
//! ```
//! use bpf_maps::codec::U32;
//!
//! let bytes = U32.format(&0xcafe, None)?;
//! assert_eq!(bytes.len(), 4);
//! assert_eq!(U32.parse(&bytes)?, 0xcafe);
//! assert_eq!(U32.parse_maybe(None)?, None);
//! # Ok::<(), bpf_maps::codec::CodecError>(())
//! ```

use std::{fmt, marker::PhantomData, mem, ptr};

use bytes::BytesMut;
use thiserror::Error;

use crate::{util::bytes_of, Pod};

/// Errors occuring from encoding or decoding values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer is shorter than the encoded value.
    #[error("buffer of {size} bytes is too small, expected at least {expected}")]
    BufferTooSmall {
        /// Buffer size
        size: usize,
        /// Encoded size
        expected: usize,
    },
}

/// Conversion between a type and its fixed size byte representation.
pub trait TypeConversion {
    /// The decoded type.
    type Value;

    /// Size of the encoded value in bytes.
    const SIZE: usize;

    /// Decodes a value. `bytes` holds at least [`Self::SIZE`] bytes.
    fn read(bytes: &[u8]) -> Self::Value;

    /// Encodes `value` into the first [`Self::SIZE`] bytes of `bytes`.
    fn write(value: &Self::Value, bytes: &mut [u8]);
}

/// Buffer handling on top of a [`TypeConversion`].
pub struct Conversion<C> {
    _c: PhantomData<fn() -> C>,
}

impl<C> Conversion<C> {
    /// Creates the adapter.
    pub const fn new() -> Self {
        Self { _c: PhantomData }
    }
}

impl<C> Clone for Conversion<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Conversion<C> {}

impl<C> Default for Conversion<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Conversion<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversion")
            .field("type", &std::any::type_name::<C>())
            .finish()
    }
}

impl<C: TypeConversion> Conversion<C> {
    /// Size of the encoded value in bytes.
    pub const fn size(&self) -> usize {
        C::SIZE
    }

    /// Decodes the first [`size`](Self::size) bytes of `bytes`.
    pub fn parse(&self, bytes: &[u8]) -> Result<C::Value, CodecError> {
        check_size::<C>(bytes.len())?;
        Ok(C::read(bytes))
    }

    /// Like [`parse`](Self::parse), passing `None` through.
    pub fn parse_maybe(&self, bytes: Option<&[u8]>) -> Result<Option<C::Value>, CodecError> {
        bytes.map(|bytes| self.parse(bytes)).transpose()
    }

    /// Encodes `value` into `buf`, or into a new zeroed buffer of
    /// [`size`](Self::size) bytes when `buf` is `None`.
    ///
    /// Bytes of `buf` past the encoded value are left as they are.
    pub fn format(&self, value: &C::Value, buf: Option<BytesMut>) -> Result<BytesMut, CodecError> {
        match buf {
            Some(mut buf) => {
                check_size::<C>(buf.len())?;
                C::write(value, &mut buf);
                Ok(buf)
            }
            None => Ok(Self::format_new(value)),
        }
    }

    /// Encodes `value` into a new buffer, passing `None` through without
    /// allocating.
    pub fn format_maybe(&self, value: Option<&C::Value>) -> Option<BytesMut> {
        value.map(Self::format_new)
    }

    fn format_new(value: &C::Value) -> BytesMut {
        let mut buf = BytesMut::zeroed(C::SIZE);
        C::write(value, &mut buf);
        buf
    }
}

fn check_size<C: TypeConversion>(size: usize) -> Result<(), CodecError> {
    if size < C::SIZE {
        return Err(CodecError::BufferTooSmall {
            size,
            expected: C::SIZE,
        });
    }
    Ok(())
}

/// `u32` in host byte order.
#[derive(Debug)]
pub enum U32Conversion {}

impl TypeConversion for U32Conversion {
    type Value = u32;

    const SIZE: usize = mem::size_of::<u32>();

    fn read(bytes: &[u8]) -> u32 {
        let mut raw = [0; mem::size_of::<u32>()];
        raw.copy_from_slice(&bytes[..Self::SIZE]);
        u32::from_ne_bytes(raw)
    }

    fn write(value: &u32, bytes: &mut [u8]) {
        bytes[..Self::SIZE].copy_from_slice(&value.to_ne_bytes());
    }
}

/// Codec for `u32` keys and values.
pub const U32: Conversion<U32Conversion> = Conversion::new();

/// Any [`Pod`] type, copied as is.
pub struct PodConversion<T> {
    _t: PhantomData<fn() -> T>,
}

impl<T: Pod> TypeConversion for PodConversion<T> {
    type Value = T;

    const SIZE: usize = mem::size_of::<T>();

    fn read(bytes: &[u8]) -> T {
        let bytes = &bytes[..Self::SIZE];
        // SAFETY: `bytes` holds `size_of::<T>()` bytes and any bit pattern is
        // a valid `T`.
        unsafe { ptr::read_unaligned(bytes.as_ptr().cast()) }
    }

    fn write(value: &T, bytes: &mut [u8]) {
        // SAFETY: `T` is plain old data.
        bytes[..Self::SIZE].copy_from_slice(unsafe { bytes_of(value) });
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_u32_round_trip() {
        for value in [0, 1, 0xdead_beef, u32::MAX] {
            let bytes = U32.format(&value, None).unwrap();
            assert_eq!(bytes.len(), 4);
            assert_eq!(U32.parse(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_u32_host_order() {
        assert_eq!(U32.parse(&[1, 0, 0, 0]).unwrap(), u32::from_ne_bytes([1, 0, 0, 0]));
        assert_eq!(&U32.format(&7, None).unwrap()[..], 7u32.to_ne_bytes());
    }

    #[test]
    fn test_parse_reads_prefix() {
        assert_eq!(
            U32.parse(&[2, 0, 0, 0, 0xff, 0xff]).unwrap(),
            u32::from_ne_bytes([2, 0, 0, 0])
        );
    }

    #[test]
    fn test_parse_too_small() {
        assert_matches!(
            U32.parse(&[1, 2, 3]),
            Err(CodecError::BufferTooSmall {
                size: 3,
                expected: 4
            })
        );
        assert_matches!(
            U32.parse_maybe(Some(&[])),
            Err(CodecError::BufferTooSmall { size: 0, .. })
        );
    }

    #[test]
    fn test_absent_values_pass_through() {
        assert_eq!(U32.parse_maybe(None), Ok(None));
        assert_eq!(U32.format_maybe(None), None);
        assert_eq!(
            U32.parse_maybe(Some(&[5, 0, 0, 0])),
            Ok(Some(u32::from_ne_bytes([5, 0, 0, 0])))
        );
        assert_eq!(
            U32.format_maybe(Some(&5)).as_deref(),
            Some(5u32.to_ne_bytes().as_slice())
        );
    }

    #[test]
    fn test_format_into_buffer() {
        let buf = BytesMut::from(&[0xaa; 6][..]);
        let buf = U32.format(&0, Some(buf)).unwrap();
        assert_eq!(&buf[..], [0, 0, 0, 0, 0xaa, 0xaa]);

        assert_matches!(
            U32.format(&0, Some(BytesMut::zeroed(2))),
            Err(CodecError::BufferTooSmall {
                size: 2,
                expected: 4
            })
        );
    }

    #[test]
    fn test_pod_conversion() {
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[repr(C)]
        struct Counters {
            packets: u64,
            bytes: u64,
        }
        unsafe impl Pod for Counters {}

        let codec = Conversion::<PodConversion<Counters>>::new();
        assert_eq!(codec.size(), 16);

        let value = Counters {
            packets: 3,
            bytes: 1500,
        };
        let buf = codec.format(&value, None).unwrap();
        assert_eq!(&buf[..8], 3u64.to_ne_bytes());
        // Decoding doesn't depend on the buffer's alignment.
        let mut unaligned = vec![0u8];
        unaligned.extend_from_slice(&buf);
        assert_eq!(codec.parse(&unaligned[1..]).unwrap(), value);

        let arrays = Conversion::<PodConversion<[u16; 3]>>::new();
        assert_eq!(arrays.size(), 6);
        assert_eq!(
            arrays.parse(&arrays.format(&[1, 2, 3], None).unwrap()).unwrap(),
            [1, 2, 3]
        );
    }
}
