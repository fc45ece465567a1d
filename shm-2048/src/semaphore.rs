use std::{cell::UnsafeCell, io, mem::MaybeUninit, time::Duration};

use crate::error::ChannelError;

/// A process-shared POSIX semaphore living inside the shared region.
#[repr(transparent)]
pub(crate) struct Semaphore(UnsafeCell<libc::sem_t>);

// SAFETY: sem_t is designed for concurrent use from any thread or process once initialised.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// # Safety
    ///
    /// Must be called exactly once, by the region owner, before any other process attaches.
    pub(crate) unsafe fn init(&self) -> Result<(), ChannelError> {
        if libc::sem_init(self.0.get(), 1, 0) != 0 {
            return Err(ChannelError::last_os_error("sem_init"));
        }

        Ok(())
    }

    pub(crate) fn post(&self) -> Result<(), ChannelError> {
        // SAFETY: initialised by the region owner before the region was shared.
        if unsafe { libc::sem_post(self.0.get()) } != 0 {
            return Err(ChannelError::last_os_error("sem_post"));
        }

        Ok(())
    }

    /// Consumes every pending post without blocking.
    pub(crate) fn drain(&self) {
        // SAFETY: as for `post`.
        while unsafe { libc::sem_trywait(self.0.get()) } == 0 {}
    }

    /// Waits for a post. Returns `false` if `timeout` elapsed first.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Result<bool, ChannelError> {
        let deadline = deadline_after(timeout)?;

        loop {
            // SAFETY: as for `post`.
            if unsafe { libc::sem_timedwait(self.0.get(), &deadline) } == 0 {
                return Ok(true);
            }

            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => {
                    return Err(ChannelError::Os {
                        call: "sem_timedwait",
                        source: err,
                    })
                }
            }
        }
    }
}

/// `sem_timedwait` takes an absolute CLOCK_REALTIME deadline.
fn deadline_after(timeout: Duration) -> Result<libc::timespec, ChannelError> {
    let mut now = MaybeUninit::<libc::timespec>::uninit();

    // SAFETY: clock_gettime fills the timespec on success.
    let now = unsafe {
        if libc::clock_gettime(libc::CLOCK_REALTIME, now.as_mut_ptr()) != 0 {
            return Err(ChannelError::last_os_error("clock_gettime"));
        }
        now.assume_init()
    };

    let nanos = now.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
    let seconds = timeout
        .as_secs()
        .saturating_add(nanos / 1_000_000_000)
        .min(libc::time_t::MAX as u64) as libc::time_t;

    Ok(libc::timespec {
        tv_sec: now.tv_sec.saturating_add(seconds),
        tv_nsec: (nanos % 1_000_000_000) as _,
    })
}
