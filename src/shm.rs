//! `SharedRegion`: create/open/destroy/close for POSIX named shared memory,
//! with an optional leading process-shared semaphore (spec §4.1).
//!
//! Grounded in the corpus's raw `shm_open`/`mmap` pattern for cross-process
//! shared memory (see the shmempipe and AlphaPulse examples in the
//! reference pack), using `nix` for the syscalls instead of hand-rolled FFI.

use std::ffi::c_void;
use std::os::fd::{AsFd, OwnedFd};
use std::ptr::NonNull;

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::{fstat, Mode};
use nix::unistd::ftruncate;

use crate::error::CoreError;

fn sem_reservation() -> usize {
    std::mem::size_of::<libc::sem_t>()
}

/// A mapped `/name`-style POSIX shared memory object.
///
/// When created `with_front_sem`, the first [`sem_reservation`] bytes of the
/// mapping hold one process-shared `sem_t`; [`SharedRegion::data`] always
/// points *after* that reservation, so callers never need to think about it
/// except via [`SharedRegion::front_sem`].
pub struct SharedRegion {
    name: String,
    fd: Option<OwnedFd>,
    mapping: Option<NonNull<c_void>>,
    mapped_size: usize,
    data_offset: usize,
    has_front_sem: bool,
}

// SAFETY: the mapping is backed by shared memory intended for concurrent
// cross-process access; all mutation through it goes through the crate's
// own synchronization primitives (SyncBlock).
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Create (or re-create) a named region sized for `data_size` bytes of
    /// caller data, plus a front semaphore reservation if requested.
    pub fn create(
        name: &str,
        data_size: usize,
        mode: Mode,
        with_front_sem: bool,
        sem_init_value: u32,
    ) -> Result<Self, CoreError> {
        let data_offset = if with_front_sem { sem_reservation() } else { 0 };
        let mapped_size = data_offset + data_size;

        let fd = shm_open(name, OFlag::O_CREAT | OFlag::O_RDWR | OFlag::O_TRUNC, mode)
            .map_err(|e| CoreError::ResourceUnavailable(format!("shm_open({name}) for create: {e}")))?;

        ftruncate(&fd, mapped_size as i64)
            .map_err(|e| CoreError::ResourceUnavailable(format!("ftruncate({name}): {e}")))?;

        let mapping = map_region(&fd, mapped_size)?;

        if with_front_sem {
            unsafe {
                let sem = mapping.as_ptr() as *mut libc::sem_t;
                if libc::sem_init(sem, 1, sem_init_value) != 0 {
                    let err = CoreError::from_errno(&format!("sem_init({name})"));
                    let _ = nix::sys::mman::munmap(mapping, mapped_size);
                    return Err(err);
                }
            }
        }

        Ok(SharedRegion {
            name: name.to_string(),
            fd: Some(fd),
            mapping: Some(mapping),
            mapped_size,
            data_offset,
            has_front_sem: with_front_sem,
        })
    }

    /// Open an existing region. `data_size` may be `0` to mean "use whatever
    /// size the region already has" (read from filesystem metadata);
    /// otherwise the region must be at least big enough to hold
    /// `data_size` bytes of caller data plus the front-semaphore
    /// reservation, or this fails with [`CoreError::InvalidArgument`].
    pub fn open(name: &str, data_size: usize, with_front_sem: bool) -> Result<Self, CoreError> {
        let data_offset = if with_front_sem { sem_reservation() } else { 0 };

        let (fd, _read_only) = match shm_open(name, OFlag::O_RDWR, Mode::empty()) {
            Ok(fd) => (fd, false),
            Err(_) if !with_front_sem => {
                let fd = shm_open(name, OFlag::O_RDONLY, Mode::empty()).map_err(|e| {
                    CoreError::ResourceUnavailable(format!("shm_open({name}) read-only: {e}"))
                })?;
                (fd, true)
            }
            Err(e) => {
                return Err(CoreError::ResourceUnavailable(format!(
                    "shm_open({name}) for open: {e}"
                )))
            }
        };

        let actual_size = fstat(fd.as_fd())
            .map_err(|e| CoreError::ResourceUnavailable(format!("fstat({name}): {e}")))?
            .st_size as usize;

        let mapped_size = if data_size == 0 {
            actual_size
        } else {
            data_offset + data_size
        };

        if actual_size < mapped_size {
            return Err(CoreError::InvalidArgument(format!(
                "{name}: region is {actual_size} bytes, need at least {mapped_size}"
            )));
        }

        let mapping = map_region(&fd, mapped_size)?;

        Ok(SharedRegion {
            name: name.to_string(),
            fd: Some(fd),
            mapping: Some(mapping),
            mapped_size,
            data_offset,
            has_front_sem: with_front_sem,
        })
    }

    /// Pointer to the caller's data, after any front-semaphore reservation.
    pub fn data(&self) -> *mut u8 {
        let base = self.mapping.expect("region already unmapped").as_ptr() as *mut u8;
        unsafe { base.add(self.data_offset) }
    }

    pub fn data_size(&self) -> usize {
        self.mapped_size - self.data_offset
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn front_sem(&self) -> Option<*mut libc::sem_t> {
        if self.has_front_sem {
            Some(self.mapping.expect("region already unmapped").as_ptr() as *mut libc::sem_t)
        } else {
            None
        }
    }

    /// Unmap, destroy the front semaphore (if any), and unlink the name --
    /// used by the arbiter, the sole owner of both regions, on exit.
    pub fn destroy(mut self) -> Result<(), CoreError> {
        if let Some(sem) = self.front_sem() {
            unsafe {
                libc::sem_destroy(sem);
            }
        }
        self.unmap_only()?;
        shm_unlink(self.name.as_str())
            .map_err(|e| CoreError::ResourceUnavailable(format!("shm_unlink({}): {e}", self.name)))?;
        Ok(())
    }

    /// Unmap and close the descriptor, leaving the name intact -- used by
    /// children, who never own region lifetime.
    pub fn close(mut self) -> Result<(), CoreError> {
        self.unmap_only()
    }

    fn unmap_only(&mut self) -> Result<(), CoreError> {
        if let Some(mapping) = self.mapping.take() {
            unsafe {
                nix::sys::mman::munmap(mapping, self.mapped_size)
                    .map_err(|e| CoreError::IoFailure(std::io::Error::from(e)))?;
            }
        }
        self.fd.take();
        Ok(())
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        let _ = self.unmap_only();
    }
}

fn map_region(fd: &OwnedFd, size: usize) -> Result<NonNull<c_void>, CoreError> {
    let len = std::num::NonZeroUsize::new(size)
        .ok_or_else(|| CoreError::InvalidArgument("region size must be non-zero".into()))?;
    unsafe {
        mmap(
            None,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            0,
        )
        .map_err(|e| CoreError::ResourceUnavailable(format!("mmap: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_open_destroy_round_trip() {
        let name = format!("/chompchamps_test_{}", std::process::id());
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;

        let mut created = SharedRegion::create(&name, 64, mode, false, 0).expect("create");
        unsafe {
            created.data().write_bytes(0xAB, 64);
        }

        let opened = SharedRegion::open(&name, 64, false).expect("open");
        let byte = unsafe { *opened.data() };
        assert_eq!(byte, 0xAB);

        opened.close().expect("close");
        created.destroy().expect("destroy");
    }

    #[test]
    fn front_semaphore_is_usable_across_handles() {
        let name = format!("/chompchamps_test_sem_{}", std::process::id());
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;

        let created = SharedRegion::create(&name, 8, mode, true, 0).expect("create");
        let sem = created.front_sem().expect("front sem");
        unsafe {
            assert_eq!(libc::sem_post(sem), 0);
            let mut value = 0;
            libc::sem_getvalue(sem, &mut value);
            assert_eq!(value, 1);
        }
        created.destroy().expect("destroy");
    }
}
