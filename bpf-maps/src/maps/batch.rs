//! Batch operations.
//!
//! The kernel reports the outcome of a batch command as a status and the
//! number of elements it processed. The two don't always agree: on some error
//! paths the count is never written back, so the caller is left looking at the
//! batch size it passed in. [`fix_count`] sorts out what the count actually
//! means, and [`check_all_processed`] rejects a success that skipped elements.
//!
//! The batch methods on [`MapReference`] work on raw byte buffers laid out as
//! `count` consecutive keys and `count` consecutive values, sized from the
//! map's [`MapInfo`](super::MapInfo). Values of per-CPU maps take one 8 byte
//! aligned slot per possible CPU.
//!
//! Batch commands were introduced in kernel v5.6.

use libc::{EFAULT, ENOENT};

use super::{MapError, MapReference};
use crate::{
    generated::bpf_cmd,
    sys::{bpf_map_batch, check_status, BatchBuffers, BatchStatus, SyscallError},
    util::nr_cpus,
};

/// Returns the number of elements a failed batch command actually processed.
///
/// A failure that reports every element as processed is contradictory: the
/// kernel didn't write the count back and `count` is still the batch size
/// passed in. In that case `-EFAULT` means the count is unknown (`None`) and
/// any other error means nothing was processed. Every other combination is
/// returned as is.
///
/// # Example
///
/// ```
/// use bpf_maps::maps::fix_count;
///
/// assert_eq!(fix_count(5, 5, -i64::from(libc::EFAULT)), None);
/// assert_eq!(fix_count(5, 5, -i64::from(libc::EINVAL)), Some(0));
/// assert_eq!(fix_count(3, 5, -i64::from(libc::EINVAL)), Some(3));
/// assert_eq!(fix_count(5, 5, 0), Some(5));
/// ```
pub fn fix_count(count: u32, batch_size: u32, status: i64) -> Option<u32> {
    if status < 0 && count == batch_size {
        if status == -i64::from(EFAULT) {
            None
        } else {
            Some(0)
        }
    } else {
        Some(count)
    }
}

/// Checks that a successful batch command processed the whole batch.
///
/// # Errors
///
/// Returns [`MapError::IncompleteBatch`] if `count != batch_size`.
pub fn check_all_processed(count: u32, batch_size: u32) -> Result<(), MapError> {
    if count == batch_size {
        Ok(())
    } else {
        Err(MapError::IncompleteBatch { count, batch_size })
    }
}

/// The outcome of a batch lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchLookup {
    count: u32,
    next: Option<Vec<u8>>,
}

impl BatchLookup {
    /// Number of elements written to the key and value buffers.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The token to resume the iteration from, or `None` once the end of the
    /// map was reached.
    pub fn next(&self) -> Option<&[u8]> {
        self.next.as_deref()
    }

    /// Whether the end of the map was reached.
    pub fn is_done(&self) -> bool {
        self.next.is_none()
    }
}

impl MapReference {
    /// Inserts or updates `count` elements.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidBatchBuffer`] if a buffer can't hold `count`
    /// elements, [`MapError::BatchError`] if the kernel fails and
    /// [`MapError::IncompleteBatch`] if it succeeds without processing every
    /// element.
    pub fn update_batch(
        &self,
        keys: &[u8],
        values: &[u8],
        count: u32,
        elem_flags: u64,
    ) -> Result<(), MapError> {
        let fd = self.fd()?;
        check_buffer("keys", keys.len(), count, self.key_stride())?;
        check_buffer("values", values.len(), count, self.value_stride()?)?;

        let result = bpf_map_batch(
            bpf_cmd::BPF_MAP_UPDATE_BATCH,
            fd,
            BatchBuffers {
                keys: keys.as_ptr().cast_mut(),
                values: values.as_ptr().cast_mut(),
                ..Default::default()
            },
            count,
            elem_flags,
        );
        let processed = reconcile("bpf_map_update_batch", result, count)?;
        check_all_processed(processed, count)
    }

    /// Deletes `count` elements.
    ///
    /// # Errors
    ///
    /// Same as [`MapReference::update_batch`].
    pub fn delete_batch(&self, keys: &[u8], count: u32) -> Result<(), MapError> {
        let fd = self.fd()?;
        check_buffer("keys", keys.len(), count, self.key_stride())?;

        let result = bpf_map_batch(
            bpf_cmd::BPF_MAP_DELETE_BATCH,
            fd,
            BatchBuffers {
                keys: keys.as_ptr().cast_mut(),
                ..Default::default()
            },
            count,
            0,
        );
        let processed = reconcile("bpf_map_delete_batch", result, count)?;
        check_all_processed(processed, count)
    }

    /// Reads up to `count` elements into `keys` and `values`.
    ///
    /// Start with `in_batch` set to `None`, then pass the token returned by
    /// [`BatchLookup::next`] until it is `None`. The kernel may return fewer
    /// elements than requested without reaching the end of the map.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidBatchBuffer`] if a buffer is too small and
    /// [`MapError::BatchError`] if the kernel fails.
    pub fn lookup_batch(
        &self,
        in_batch: Option<&[u8]>,
        keys: &mut [u8],
        values: &mut [u8],
        count: u32,
    ) -> Result<BatchLookup, MapError> {
        self.lookup_batch_inner(
            bpf_cmd::BPF_MAP_LOOKUP_BATCH,
            "bpf_map_lookup_batch",
            in_batch,
            keys,
            values,
            count,
        )
    }

    /// Like [`MapReference::lookup_batch`], but removes the elements it reads.
    pub fn lookup_and_delete_batch(
        &self,
        in_batch: Option<&[u8]>,
        keys: &mut [u8],
        values: &mut [u8],
        count: u32,
    ) -> Result<BatchLookup, MapError> {
        self.lookup_batch_inner(
            bpf_cmd::BPF_MAP_LOOKUP_AND_DELETE_BATCH,
            "bpf_map_lookup_and_delete_batch",
            in_batch,
            keys,
            values,
            count,
        )
    }

    fn lookup_batch_inner(
        &self,
        cmd: bpf_cmd,
        call: &'static str,
        in_batch: Option<&[u8]>,
        keys: &mut [u8],
        values: &mut [u8],
        count: u32,
    ) -> Result<BatchLookup, MapError> {
        let fd = self.fd()?;
        check_buffer("keys", keys.len(), count, self.key_stride())?;
        check_buffer("values", values.len(), count, self.value_stride()?)?;

        // Hash maps resume from a u32 bucket index, the others from a key.
        let token_size = self.key_stride().max(4);
        if let Some(in_batch) = in_batch {
            check_buffer("in_batch", in_batch.len(), 1, token_size)?;
        }
        let mut out_batch = vec![0u8; token_size];

        let result = bpf_map_batch(
            cmd,
            fd,
            BatchBuffers {
                in_batch: in_batch.map_or(std::ptr::null(), <[u8]>::as_ptr),
                out_batch: out_batch.as_mut_ptr(),
                keys: keys.as_mut_ptr(),
                values: values.as_mut_ptr(),
            },
            count,
            0,
        );
        if result.status == -i64::from(ENOENT) {
            return Ok(BatchLookup {
                count: result.count,
                next: None,
            });
        }
        let count = reconcile(call, result, count)?;
        Ok(BatchLookup {
            count,
            next: Some(out_batch),
        })
    }

    fn key_stride(&self) -> usize {
        self.info().key_size() as usize
    }

    fn value_stride(&self) -> Result<usize, MapError> {
        let value_size = self.info().value_size() as usize;
        if self.info().is_per_cpu() {
            Ok(value_size.next_multiple_of(8) * nr_cpus()?)
        } else {
            Ok(value_size)
        }
    }
}

fn check_buffer(
    buffer: &'static str,
    size: usize,
    count: u32,
    stride: usize,
) -> Result<(), MapError> {
    let expected = (count as usize).saturating_mul(stride);
    if size < expected {
        return Err(MapError::InvalidBatchBuffer {
            buffer,
            size,
            expected,
        });
    }
    Ok(())
}

fn reconcile(
    call: &'static str,
    BatchStatus { status, count }: BatchStatus,
    batch_size: u32,
) -> Result<u32, MapError> {
    match check_status(call, status) {
        Ok(_) => Ok(count),
        Err(SyscallError { call, io_error }) => Err(MapError::BatchError {
            call,
            processed: fix_count(count, batch_size, status),
            io_error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::{os::fd::FromRawFd as _, slice};

    use assert_matches::assert_matches;
    use libc::{EINVAL, ENOSPC};

    use super::*;
    use crate::{
        generated::{bpf_map_info, bpf_map_type},
        maps::MapFd,
        sys::{override_syscall, sys_error, SysResult, Syscall},
    };

    fn errno(errno: i32) -> i64 {
        -i64::from(errno)
    }

    #[test]
    fn test_fix_count() {
        assert_eq!(fix_count(5, 5, errno(EFAULT)), None);
        assert_eq!(fix_count(5, 5, errno(EINVAL)), Some(0));
        assert_eq!(fix_count(5, 5, errno(ENOSPC)), Some(0));
        assert_eq!(fix_count(3, 5, errno(EINVAL)), Some(3));
        assert_eq!(fix_count(3, 5, errno(EFAULT)), Some(3));
        assert_eq!(fix_count(5, 5, 0), Some(5));
        assert_eq!(fix_count(0, 0, errno(EFAULT)), None);
    }

    #[test]
    fn test_check_all_processed() {
        assert_matches!(
            check_all_processed(3, 5),
            Err(MapError::IncompleteBatch {
                count: 3,
                batch_size: 5
            })
        );
        assert_matches!(check_all_processed(5, 5), Ok(()));
    }

    unsafe fn fake_info(call: &mut Syscall<'_>) -> Option<SysResult<i64>> {
        match call {
            Syscall::Ebpf {
                cmd: bpf_cmd::BPF_OBJ_GET_INFO_BY_FD,
                attr,
            } => {
                let info = &mut *(attr.info.info as *mut bpf_map_info);
                *info = bpf_map_info {
                    type_: bpf_map_type::BPF_MAP_TYPE_HASH,
                    key_size: 4,
                    value_size: 8,
                    max_entries: 64,
                    ..Default::default()
                };
                Some(Ok(0))
            }
            Syscall::Close { .. } => Some(Ok(0)),
            _ => None,
        }
    }

    fn new_map() -> MapReference {
        MapReference::from_fd(unsafe { MapFd::from_raw_fd(42) }).unwrap()
    }

    #[test]
    fn test_update_batch() {
        unsafe fn fake(mut call: Syscall<'_>) -> SysResult<i64> {
            if let Some(ret) = fake_info(&mut call) {
                return ret;
            }
            match call {
                Syscall::Ebpf {
                    cmd: bpf_cmd::BPF_MAP_UPDATE_BATCH,
                    attr,
                } => {
                    assert_eq!(attr.batch.map_fd, 42);
                    assert_eq!(attr.batch.count, 2);
                    assert_eq!(attr.batch.elem_flags, 0);
                    Ok(0)
                }
                call => panic!("unexpected syscall {call:?}"),
            }
        }
        override_syscall(fake);

        let map = new_map();
        assert_matches!(map.update_batch(&[0; 8], &[0; 16], 2, 0), Ok(()));
    }

    #[test]
    fn test_per_cpu_value_buffers() {
        unsafe fn fake(call: Syscall<'_>) -> SysResult<i64> {
            match call {
                Syscall::Ebpf {
                    cmd: bpf_cmd::BPF_OBJ_GET_INFO_BY_FD,
                    attr,
                } => {
                    let info = &mut *(attr.info.info as *mut bpf_map_info);
                    *info = bpf_map_info {
                        type_: bpf_map_type::BPF_MAP_TYPE_PERCPU_HASH,
                        key_size: 4,
                        value_size: 4,
                        max_entries: 64,
                        ..Default::default()
                    };
                    Ok(0)
                }
                Syscall::Ebpf {
                    cmd: bpf_cmd::BPF_MAP_UPDATE_BATCH,
                    ..
                }
                | Syscall::Close { .. } => Ok(0),
                call => panic!("unexpected syscall {call:?}"),
            }
        }
        override_syscall(fake);

        let map = new_map();
        let nr_cpus = nr_cpus().unwrap();
        // Each 4 byte value takes an 8 byte slot per CPU.
        let expected = 8 * nr_cpus * 2;
        let keys = [0; 8];

        let short = vec![0; expected - 1];
        assert_matches!(
            map.update_batch(&keys, &short, 2, 0),
            Err(MapError::InvalidBatchBuffer {
                buffer: "values",
                size,
                expected: e,
            }) if size == expected - 1 && e == expected
        );

        let values = vec![0; expected];
        assert_matches!(map.update_batch(&keys, &values, 2, 0), Ok(()));
    }

    #[test]
    fn test_update_batch_buffer_too_small() {
        override_syscall(|mut call| unsafe {
            fake_info(&mut call).unwrap_or_else(|| panic!("unexpected syscall {call:?}"))
        });

        let map = new_map();
        assert_matches!(
            map.update_batch(&[0; 8], &[0; 15], 2, 0),
            Err(MapError::InvalidBatchBuffer {
                buffer: "values",
                size: 15,
                expected: 16
            })
        );
        assert_matches!(
            map.delete_batch(&[0; 7], 2),
            Err(MapError::InvalidBatchBuffer {
                buffer: "keys",
                size: 7,
                expected: 8
            })
        );
    }

    #[test]
    fn test_update_batch_incomplete() {
        unsafe fn fake(mut call: Syscall<'_>) -> SysResult<i64> {
            if let Some(ret) = fake_info(&mut call) {
                return ret;
            }
            match call {
                Syscall::Ebpf { attr, .. } => {
                    attr.batch.count = 1;
                    Ok(0)
                }
                call => panic!("unexpected syscall {call:?}"),
            }
        }
        override_syscall(fake);

        let map = new_map();
        assert_matches!(
            map.update_batch(&[0; 8], &[0; 16], 2, 0),
            Err(MapError::IncompleteBatch {
                count: 1,
                batch_size: 2
            })
        );
    }

    #[test]
    fn test_delete_batch_partial_failure() {
        unsafe fn fake(mut call: Syscall<'_>) -> SysResult<i64> {
            if let Some(ret) = fake_info(&mut call) {
                return ret;
            }
            match call {
                Syscall::Ebpf {
                    cmd: bpf_cmd::BPF_MAP_DELETE_BATCH,
                    attr,
                } => {
                    attr.batch.count = 1;
                    sys_error(ENOENT)
                }
                call => panic!("unexpected syscall {call:?}"),
            }
        }
        override_syscall(fake);

        let map = new_map();
        assert_matches!(
            map.delete_batch(&[0; 12], 3),
            Err(MapError::BatchError {
                call: "bpf_map_delete_batch",
                processed: Some(1),
                io_error,
            }) => assert_eq!(io_error.raw_os_error(), Some(ENOENT))
        );
    }

    #[test]
    fn test_delete_batch_count_not_written() {
        unsafe fn efault(mut call: Syscall<'_>) -> SysResult<i64> {
            fake_info(&mut call).unwrap_or_else(|| sys_error(EFAULT))
        }
        unsafe fn einval(mut call: Syscall<'_>) -> SysResult<i64> {
            fake_info(&mut call).unwrap_or_else(|| sys_error(EINVAL))
        }

        override_syscall(efault);
        let map = new_map();
        assert_matches!(
            map.delete_batch(&[0; 12], 3),
            Err(MapError::BatchError { processed: None, .. })
        );

        override_syscall(einval);
        assert_matches!(
            map.delete_batch(&[0; 12], 3),
            Err(MapError::BatchError {
                processed: Some(0),
                ..
            })
        );
    }

    #[test]
    fn test_lookup_batch() {
        unsafe fn fake(mut call: Syscall<'_>) -> SysResult<i64> {
            if let Some(ret) = fake_info(&mut call) {
                return ret;
            }
            match call {
                Syscall::Ebpf {
                    cmd: bpf_cmd::BPF_MAP_LOOKUP_BATCH,
                    attr,
                } => {
                    let u = &mut attr.batch;
                    let keys = slice::from_raw_parts_mut(u.keys as *mut u8, 8);
                    keys.copy_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0]);
                    let out_batch = slice::from_raw_parts_mut(u.out_batch as *mut u8, 4);
                    if u.in_batch == 0 {
                        out_batch.copy_from_slice(&7u32.to_ne_bytes());
                        u.count = 2;
                        Ok(0)
                    } else {
                        u.count = 1;
                        sys_error(ENOENT)
                    }
                }
                call => panic!("unexpected syscall {call:?}"),
            }
        }
        override_syscall(fake);

        let map = new_map();
        let mut keys = [0; 8];
        let mut values = [0; 16];

        let first = map.lookup_batch(None, &mut keys, &mut values, 2).unwrap();
        assert_eq!(first.count(), 2);
        assert!(!first.is_done());
        assert_eq!(first.next(), Some(7u32.to_ne_bytes().as_slice()));
        assert_eq!(keys, [1, 0, 0, 0, 2, 0, 0, 0]);

        let last = map
            .lookup_batch(first.next(), &mut keys, &mut values, 2)
            .unwrap();
        assert_eq!(last.count(), 1);
        assert!(last.is_done());
        assert_eq!(last.next(), None);
    }

    #[test]
    fn test_lookup_and_delete_batch_error() {
        unsafe fn fake(mut call: Syscall<'_>) -> SysResult<i64> {
            if let Some(ret) = fake_info(&mut call) {
                return ret;
            }
            match call {
                Syscall::Ebpf {
                    cmd: bpf_cmd::BPF_MAP_LOOKUP_AND_DELETE_BATCH,
                    ..
                } => sys_error(ENOSPC),
                call => panic!("unexpected syscall {call:?}"),
            }
        }
        override_syscall(fake);

        let map = new_map();
        let mut keys = [0; 8];
        let mut values = [0; 16];
        assert_matches!(
            map.lookup_and_delete_batch(None, &mut keys, &mut values, 2),
            Err(MapError::BatchError {
                call: "bpf_map_lookup_and_delete_batch",
                processed: Some(0),
                ..
            })
        );
    }

    #[test]
    fn test_lookup_batch_short_token() {
        override_syscall(|mut call| unsafe {
            fake_info(&mut call).unwrap_or_else(|| panic!("unexpected syscall {call:?}"))
        });

        let map = new_map();
        let mut keys = [0; 8];
        let mut values = [0; 16];
        assert_matches!(
            map.lookup_batch(Some(&[0; 2]), &mut keys, &mut values, 2),
            Err(MapError::InvalidBatchBuffer {
                buffer: "in_batch",
                size: 2,
                expected: 4
            })
        );
    }

    #[test]
    fn test_batch_after_close() {
        override_syscall(|mut call| unsafe {
            fake_info(&mut call).unwrap_or_else(|| panic!("unexpected syscall {call:?}"))
        });

        let mut map = new_map();
        map.close();
        assert_matches!(map.delete_batch(&[], 0), Err(MapError::Closed));
    }
}
