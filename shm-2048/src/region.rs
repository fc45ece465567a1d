use std::{
    cell::UnsafeCell,
    ffi::CString,
    io,
    mem::{size_of, MaybeUninit},
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    ptr::{self, NonNull},
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use env_2048::{EnvConfig, EnvId};
use tracing::{debug, warn};

use crate::{
    error::ChannelError,
    message::{ACTION_SIZE, RESULT_SIZE},
    semaphore::Semaphore,
};

pub const MAGIC: [u8; 8] = *b"DQN2048\0";
pub const VERSION: u32 = 1;

#[repr(C)]
pub(crate) struct Header {
    magic: [u8; 8],
    version: u32,
    slot_count: u32,
    result_size: u32,
    action_size: u32,
    /// Attaches since creation. Only ever grows: a killed worker never detaches.
    pub(crate) attached: AtomicU32,
    pub(crate) shutdown: AtomicU32,
    /// Posted by a worker after every result it publishes.
    pub(crate) results_ready: Semaphore,
}

/// The exchange area of one worker id.
///
/// Each direction is single-producer/single-consumer. Result `n` (from 1) is written into buffer
/// `n % 2` before `result_seq` becomes `n`; the answer to it is written into `action` before
/// `action_seq` becomes `n`. A worker publishes `n + 1` only once `action_seq == n`.
#[repr(C)]
pub(crate) struct Slot {
    result_seq: AtomicU64,
    action_seq: AtomicU64,
    results: UnsafeCell<[[u8; RESULT_SIZE]; 2]>,
    action: UnsafeCell<[u8; ACTION_SIZE]>,
    pub(crate) action_ready: Semaphore,
}

// SAFETY: the byte buffers are only touched under the sequence protocol above.
unsafe impl Sync for Slot {}

impl Slot {
    pub(crate) fn result_seq(&self) -> u64 {
        self.result_seq.load(Ordering::Acquire)
    }

    pub(crate) fn action_seq(&self) -> u64 {
        self.action_seq.load(Ordering::Acquire)
    }

    /// Bytes of result `seq`, valid while the worker waits for the answer to it.
    pub(crate) fn read_result(&self, seq: u64) -> [u8; RESULT_SIZE] {
        // SAFETY: the writer never touches buffer `seq % 2` until `seq` has been answered.
        unsafe {
            ptr::read_volatile(
                self.results
                    .get()
                    .cast::<[u8; RESULT_SIZE]>()
                    .add((seq % 2) as usize),
            )
        }
    }

    pub(crate) fn write_result(&self, seq: u64, bytes: [u8; RESULT_SIZE]) {
        // SAFETY: only the worker owning this slot writes results, into the buffer the reader is
        // not looking at.
        unsafe {
            ptr::write_volatile(
                self.results
                    .get()
                    .cast::<[u8; RESULT_SIZE]>()
                    .add((seq % 2) as usize),
                bytes,
            );
        }

        self.result_seq.store(seq, Ordering::Release);
    }

    pub(crate) fn read_action(&self) -> [u8; ACTION_SIZE] {
        // SAFETY: the consumer writes the action only before bumping `action_seq`, and never twice
        // for one result.
        unsafe { ptr::read_volatile(self.action.get()) }
    }

    pub(crate) fn write_action(&self, seq: u64, bytes: [u8; ACTION_SIZE]) {
        // SAFETY: the single consumer is the only writer; the worker reads after `action_seq`.
        unsafe { ptr::write_volatile(self.action.get(), bytes) };

        self.action_seq.store(seq, Ordering::Release);
    }
}

const fn region_size(slot_count: usize) -> usize {
    size_of::<Header>() + slot_count * size_of::<Slot>()
}

fn shm_name(name: &str) -> Result<CString, ChannelError> {
    let name = if name.starts_with('/') {
        name.to_owned()
    } else {
        format!("/{name}")
    };

    if name.len() < 2 || name[1..].contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid shared memory name {name:?}"),
        )
        .into());
    }

    CString::new(name).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err).into())
}

fn shm_open(name: &CString, flags: libc::c_int) -> Result<OwnedFd, ChannelError> {
    // SAFETY: `name` is a valid C string; the returned descriptor is owned by us.
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, 0o600) };

    if fd < 0 {
        return Err(ChannelError::last_os_error("shm_open"));
    }

    // SAFETY: `fd` is a freshly opened descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// A mapping of the shared region. The creating side owns the name and unlinks it on drop.
pub struct ShmRegion {
    name: CString,
    base: NonNull<u8>,
    len: usize,
    owner: bool,
}

// SAFETY: all shared state behind `base` is accessed through atomics or the slot protocol.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Creates and initialises a region with one slot per environment id.
    ///
    /// A stale region left behind under the same name by a crashed run is replaced.
    pub fn create(name: &str, slot_count: usize) -> Result<Self, ChannelError> {
        if slot_count == 0 || slot_count > EnvConfig::MAX_ENVS {
            return Err(ChannelError::Protocol(format!(
                "slot count must be between 1 and {}, got {slot_count}",
                EnvConfig::MAX_ENVS
            )));
        }

        let c_name = shm_name(name)?;
        let flags = libc::O_CREAT | libc::O_EXCL | libc::O_RDWR;

        let fd = match shm_open(&c_name, flags) {
            Err(ChannelError::Os { source, .. })
                if source.kind() == io::ErrorKind::AlreadyExists =>
            {
                warn!(name, "replacing stale shared memory region");
                // SAFETY: `c_name` is a valid C string.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                shm_open(&c_name, flags)?
            }
            result => result?,
        };

        let len = region_size(slot_count);

        // SAFETY: `fd` is a valid descriptor; a fresh object is zero-filled by ftruncate.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), len as libc::off_t) } != 0 {
            let err = ChannelError::last_os_error("ftruncate");
            // SAFETY: as above.
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(err);
        }

        let region = Self::map(c_name, &fd, len, true)?;

        // SAFETY: nobody else can have mapped the region yet, so plain writes are fine.
        unsafe {
            let header = region.base.as_ptr().cast::<Header>();
            ptr::addr_of_mut!((*header).magic).write(MAGIC);
            ptr::addr_of_mut!((*header).version).write(VERSION);
            ptr::addr_of_mut!((*header).slot_count).write(slot_count as u32);
            ptr::addr_of_mut!((*header).result_size).write(RESULT_SIZE as u32);
            ptr::addr_of_mut!((*header).action_size).write(ACTION_SIZE as u32);

            region.header().results_ready.init()?;
            for slot in region.slots() {
                slot.action_ready.init()?;
            }
        }

        debug!(name, slot_count, len, "created shared memory region");

        Ok(region)
    }

    /// Attaches to a region created by [`ShmRegion::create`], checking its layout.
    pub fn open(name: &str) -> Result<Self, ChannelError> {
        let c_name = shm_name(name)?;
        let fd = shm_open(&c_name, libc::O_RDWR)?;

        let mut stat = MaybeUninit::<libc::stat>::uninit();
        // SAFETY: `fd` is valid and fstat fills `stat` on success.
        let stat = unsafe {
            if libc::fstat(fd.as_raw_fd(), stat.as_mut_ptr()) != 0 {
                return Err(ChannelError::last_os_error("fstat"));
            }
            stat.assume_init()
        };

        let len = usize::try_from(stat.st_size).unwrap_or(0);
        if len < size_of::<Header>() {
            return Err(ChannelError::Protocol(format!(
                "region {name} is {len} bytes, too small for a header"
            )));
        }

        let region = Self::map(c_name, &fd, len, false)?;
        let header = region.header();

        if header.magic != MAGIC || header.version != VERSION {
            return Err(ChannelError::Protocol(format!(
                "region {name} has magic {:?} version {}, expected {MAGIC:?} version {VERSION}",
                header.magic, header.version
            )));
        }

        if header.result_size as usize != RESULT_SIZE || header.action_size as usize != ACTION_SIZE
        {
            return Err(ChannelError::Protocol(format!(
                "region {name} uses {}/{} byte messages, expected {RESULT_SIZE}/{ACTION_SIZE}",
                header.result_size, header.action_size
            )));
        }

        if region_size(header.slot_count as usize) != len {
            return Err(ChannelError::Protocol(format!(
                "region {name} is {len} bytes, which does not fit {} slots",
                header.slot_count
            )));
        }

        Ok(region)
    }

    fn map(name: CString, fd: &OwnedFd, len: usize, owner: bool) -> Result<Self, ChannelError> {
        // SAFETY: mapping a shared memory object we hold a descriptor for.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };

        if base == libc::MAP_FAILED {
            let err = ChannelError::last_os_error("mmap");
            if owner {
                // SAFETY: `name` is a valid C string.
                unsafe { libc::shm_unlink(name.as_ptr()) };
            }
            return Err(err);
        }

        Ok(Self {
            name,
            base: NonNull::new(base.cast()).ok_or_else(|| {
                ChannelError::Protocol("mmap returned a null mapping".to_owned())
            })?,
            len,
            owner,
        })
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    pub fn slot_count(&self) -> usize {
        self.header().slot_count as usize
    }

    /// How many times a worker has attached, counting restarts of the same id.
    pub fn attach_count(&self) -> u32 {
        self.header().attached.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.header().shutdown.load(Ordering::Acquire) != 0
    }

    pub(crate) fn header(&self) -> &Header {
        // SAFETY: the mapping is at least a header long and page aligned.
        unsafe { self.base.cast::<Header>().as_ref() }
    }

    pub(crate) fn slot(&self, id: EnvId) -> Option<&Slot> {
        let index = usize::from(id);

        (index < self.slot_count()).then(|| {
            // SAFETY: the layout was checked against the mapping length, and the header size is a
            // multiple of the slot alignment.
            unsafe {
                &*self
                    .base
                    .as_ptr()
                    .add(size_of::<Header>())
                    .cast::<Slot>()
                    .add(index)
            }
        })
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = &Slot> + '_ {
        (0..self.slot_count()).filter_map(|index| self.slot(index as EnvId))
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` describe our own mapping, which no reference outlives.
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);

            if self.owner {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}

impl std::fmt::Debug for ShmRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRegion")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("owner", &self.owner)
            .finish()
    }
}
