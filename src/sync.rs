//! `SyncBlock`: the writer-preference reader/writer protocol, per-player
//! turn tokens, and the master↔view handshake, all living inside the
//! `/game_sync` shared region (spec §3, §4.2).
//!
//! Every semaphore here is a raw, process-shared POSIX semaphore
//! (`sem_init(.., pshared = 1, ..)`) embedded by value in `repr(C)` storage,
//! the same approach the corpus uses for cross-process notification (see
//! the `libc::sem_t` embedding in the AlphaPulse `semaphore_shm.rs`
//! reference file) -- `nix` has no semaphore wrapper, so these calls go
//! straight through `libc`.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use crate::error::CoreError;
use crate::state::MAX_PLAYERS;

/// Raw process-shared semaphore. Never moved once placed in shared memory;
/// always accessed through `&self`, since the OS semaphore itself is the
/// real synchronization -- Rust's aliasing rules don't see across process
/// boundaries, so interior mutability here is `unsafe` but correct.
#[repr(transparent)]
pub struct Sem(libc::sem_t);

impl Sem {
    /// # Safety
    /// `ptr` must point to valid, `size_of::<Sem>()`-sized storage inside a
    /// region mapped `MAP_SHARED` by every process that will access it.
    unsafe fn init_in_place(ptr: *mut Sem, value: u32) -> Result<(), CoreError> {
        let rc = libc::sem_init(ptr as *mut libc::sem_t, 1, value);
        if rc != 0 {
            Err(CoreError::from_errno("sem_init"))
        } else {
            Ok(())
        }
    }

    fn wait(&self) -> Result<(), CoreError> {
        let rc = unsafe { libc::sem_wait(&self.0 as *const _ as *mut libc::sem_t) };
        if rc != 0 {
            Err(CoreError::from_errno("sem_wait"))
        } else {
            Ok(())
        }
    }

    /// Waits, retrying transparently on `EINTR` -- callers that must loop on
    /// spurious interruption (spec §4.4 step 1, §5) use this instead of
    /// [`Sem::wait`].
    pub fn wait_retrying(&self) -> Result<(), CoreError> {
        loop {
            match self.wait() {
                Err(e) if e.is_interrupted() => continue,
                other => return other,
            }
        }
    }

    pub fn post(&self) -> Result<(), CoreError> {
        let rc = unsafe { libc::sem_post(&self.0 as *const _ as *mut libc::sem_t) };
        if rc != 0 {
            Err(CoreError::from_errno("sem_post"))
        } else {
            Ok(())
        }
    }

    /// Bounded wait used for the terminal view handshake (spec §9's open
    /// question, resolved: a dead viewer must never hang the arbiter).
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, CoreError> {
        let deadline = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let mut now = deadline;
        unsafe {
            libc::clock_gettime(libc::CLOCK_REALTIME, &mut now as *mut _);
        }
        let mut sec = now.tv_sec + timeout.as_secs() as libc::time_t;
        let mut nsec = now.tv_nsec + timeout.subsec_nanos() as i64;
        if nsec >= 1_000_000_000 {
            sec += 1;
            nsec -= 1_000_000_000;
        }
        let abs = libc::timespec {
            tv_sec: sec,
            tv_nsec: nsec,
        };
        loop {
            let rc = unsafe {
                libc::sem_timedwait(&self.0 as *const _ as *mut libc::sem_t, &abs as *const _)
            };
            if rc == 0 {
                return Ok(true);
            }
            let errno = nix::errno::Errno::last();
            match errno {
                nix::errno::Errno::EINTR => continue,
                nix::errno::Errno::ETIMEDOUT => return Ok(false),
                other => return Err(CoreError::IoFailure(std::io::Error::from(other))),
            }
        }
    }

    unsafe fn destroy(&self) {
        libc::sem_destroy(&self.0 as *const _ as *mut libc::sem_t);
    }
}

/// The fixed-size synchronization header occupying the whole `/game_sync`
/// region (spec §3, §6: "SyncBlock size = sizeof(SyncBlock) (fixed)").
#[repr(C)]
pub struct SyncBlock {
    pub master_to_view: Sem,
    pub view_to_master: Sem,
    writer_intent: Sem,
    state_lock: Sem,
    reader_count_lock: Sem,
    reader_count: AtomicI32,
    pub turn_token: [Sem; MAX_PLAYERS],
}

impl SyncBlock {
    /// Initialise every semaphore in a freshly mapped region (spec §3:
    /// "both start at 0" for the handshake pair; `writer_intent`,
    /// `state_lock`, and `reader_count_lock` start unlocked at 1;
    /// `turn_token[i]` starts at 0 until the arbiter issues the first
    /// signal).
    ///
    /// # Safety
    /// `ptr` must point at `size_of::<SyncBlock>()` bytes of `MAP_SHARED`
    /// memory, not yet initialised.
    pub unsafe fn init_in_place(ptr: *mut SyncBlock) -> Result<(), CoreError> {
        let block = &mut *ptr;
        Sem::init_in_place(&mut block.master_to_view as *mut Sem, 0)?;
        Sem::init_in_place(&mut block.view_to_master as *mut Sem, 0)?;
        Sem::init_in_place(&mut block.writer_intent as *mut Sem, 1)?;
        Sem::init_in_place(&mut block.state_lock as *mut Sem, 1)?;
        Sem::init_in_place(&mut block.reader_count_lock as *mut Sem, 1)?;
        block.reader_count = AtomicI32::new(0);
        for slot in block.turn_token.iter_mut() {
            Sem::init_in_place(slot as *mut Sem, 0)?;
        }
        Ok(())
    }

    /// # Safety
    /// Must only be called once, by the sole owner (the arbiter), after no
    /// other process still holds a reference into the region.
    pub unsafe fn destroy_in_place(&self) {
        self.master_to_view.destroy();
        self.view_to_master.destroy();
        self.writer_intent.destroy();
        self.state_lock.destroy();
        self.reader_count_lock.destroy();
        for slot in &self.turn_token {
            slot.destroy();
        }
    }

    /// Enter the readers' protocol (spec §4.2 "Reader entry"): pass through
    /// the writer-intent barrier, then join (or become) the reader cohort
    /// holding `state_lock`.
    pub fn reader_enter(&self) -> Result<(), CoreError> {
        self.writer_intent.wait_retrying()?;
        self.writer_intent.post()?;

        self.reader_count_lock.wait_retrying()?;
        let previous = self.reader_count.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            if let Err(e) = self.state_lock.wait_retrying() {
                self.reader_count.fetch_sub(1, Ordering::SeqCst);
                self.reader_count_lock.post()?;
                return Err(e);
            }
        }
        self.reader_count_lock.post()?;
        Ok(())
    }

    /// Exit the readers' protocol (spec §4.2 "Reader exit").
    pub fn reader_exit(&self) -> Result<(), CoreError> {
        self.reader_count_lock.wait_retrying()?;
        let previous = self.reader_count.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.state_lock.post()?;
        }
        self.reader_count_lock.post()?;
        Ok(())
    }

    /// Enter as the sole writer (spec §4.2 "Writer entry"). Only the
    /// arbiter calls this for a real mutation; players call it purely as an
    /// ordering barrier around emission (spec §4.4 step 4).
    pub fn writer_enter(&self) -> Result<(), CoreError> {
        self.writer_intent.wait_retrying()?;
        self.state_lock.wait_retrying()?;
        Ok(())
    }

    /// Exit the writer role (spec §4.2 "Writer exit").
    pub fn writer_exit(&self) -> Result<(), CoreError> {
        self.state_lock.post()?;
        self.writer_intent.post()?;
        Ok(())
    }

    pub fn reader_count(&self) -> i32 {
        self.reader_count.load(Ordering::SeqCst)
    }
}

/// RAII guard for [`SyncBlock::reader_enter`]/[`reader_exit`].
pub struct ReaderGuard<'a> {
    sync: &'a SyncBlock,
}

impl<'a> ReaderGuard<'a> {
    pub fn enter(sync: &'a SyncBlock) -> Result<Self, CoreError> {
        sync.reader_enter()?;
        Ok(ReaderGuard { sync })
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        let _ = self.sync.reader_exit();
    }
}

/// RAII guard for [`SyncBlock::writer_enter`]/[`writer_exit`].
pub struct WriterGuard<'a> {
    sync: &'a SyncBlock,
}

impl<'a> WriterGuard<'a> {
    pub fn enter(sync: &'a SyncBlock) -> Result<Self, CoreError> {
        sync.writer_enter()?;
        Ok(WriterGuard { sync })
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        let _ = self.sync.writer_exit();
    }
}

pub fn sync_region_size() -> usize {
    std::mem::size_of::<SyncBlock>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    fn fresh_block() -> (*mut SyncBlock, Layout) {
        let layout = Layout::new::<SyncBlock>();
        let ptr = unsafe { alloc_zeroed(layout) as *mut SyncBlock };
        unsafe { SyncBlock::init_in_place(ptr).expect("init") };
        (ptr, layout)
    }

    #[test]
    fn readers_share_the_lock_writer_excludes() {
        let (ptr, layout) = fresh_block();
        let block = unsafe { &*ptr };

        let g1 = ReaderGuard::enter(block).expect("reader 1");
        let g2 = ReaderGuard::enter(block).expect("reader 2");
        assert_eq!(block.reader_count(), 2);
        drop(g1);
        assert_eq!(block.reader_count(), 1);
        drop(g2);
        assert_eq!(block.reader_count(), 0);

        {
            let _w = WriterGuard::enter(block).expect("writer");
        }

        unsafe {
            block.destroy_in_place();
            dealloc(ptr as *mut u8, layout);
        }
    }

    #[test]
    fn turn_token_signals_exactly_one_emission() {
        let (ptr, layout) = fresh_block();
        let block = unsafe { &*ptr };

        block.turn_token[0].post().unwrap();
        assert!(block.turn_token[0].wait_timeout(Duration::from_millis(50)).unwrap());
        assert!(!block.turn_token[0].wait_timeout(Duration::from_millis(10)).unwrap());

        unsafe {
            block.destroy_in_place();
            dealloc(ptr as *mut u8, layout);
        }
    }
}
