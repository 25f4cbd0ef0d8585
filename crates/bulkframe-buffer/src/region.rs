use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info, warn};

use crate::error::{BufferError, Result};
use crate::mapping::FrameMapping;
use crate::page::page_align;

/// The shared memory object and the producer's read-write view of it.
struct Region {
    map: MmapMut,
    file: File,
    locked: bool,
    leases: AtomicUsize,
}

impl Region {
    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Single page-aligned frame buffer owned by one device attachment.
///
/// The producer side writes through leased [`SlotBuf`]s; consumers read
/// through [`FrameMapping`]s created with [`SharedFrameBuffer::map`]. The
/// allocation never grows, shrinks, or moves.
pub struct SharedFrameBuffer {
    region: Arc<Region>,
}

impl SharedFrameBuffer {
    /// Allocate a buffer of at least `size` bytes, rounded up to the page size.
    pub fn allocate(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(BufferError::InvalidLayout(
                "frame buffer size must be non-zero".to_string(),
            ));
        }
        let len = page_align(size).ok_or_else(|| BufferError::Allocation {
            size,
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "size overflows when page aligned",
            ),
        })?;

        let file = create_backing()
            .and_then(|fd| {
                let file = File::from(fd);
                file.set_len(len as u64)?;
                Ok(file)
            })
            .map_err(|source| BufferError::Allocation { size: len, source })?;

        // SAFETY: the memory object is private to this buffer and sized to
        // `len` above; nothing truncates it while the mapping lives.
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file) }
            .map_err(|source| BufferError::Allocation { size: len, source })?;

        // Pin the pages so their physical addresses stay put; not all
        // environments allow it (RLIMIT_MEMLOCK), so failure is tolerated.
        let locked = match map.lock() {
            Ok(()) => true,
            Err(error) => {
                debug!(len, %error, "frame buffer pages not locked");
                false
            }
        };

        info!(len, requested = size, locked, "frame buffer allocated");

        Ok(Self {
            region: Arc::new(Region {
                map,
                file,
                locked,
                leases: AtomicUsize::new(0),
            }),
        })
    }

    /// Allocated length in bytes (always a multiple of the page size).
    pub fn len(&self) -> usize {
        self.region.len()
    }

    /// Always false: zero-sized buffers are rejected at allocation.
    pub fn is_empty(&self) -> bool {
        self.region.len() == 0
    }

    /// Number of slot leases currently held by in-flight operations.
    pub fn outstanding_leases(&self) -> usize {
        self.region.leases.load(Ordering::Acquire)
    }

    /// Lease `count` disjoint slots of `slot_len` bytes, laid out back to back
    /// from offset 0.
    ///
    /// Only one set of leases may exist at a time; the buffer is handed out
    /// again once every previous [`SlotBuf`] has been dropped.
    pub fn lease_slots(&self, slot_len: usize, count: usize) -> Result<Vec<SlotBuf>> {
        if slot_len == 0 || count == 0 {
            return Err(BufferError::InvalidLayout(format!(
                "cannot lease {count} slot(s) of {slot_len} bytes"
            )));
        }
        let capacity = self.region.len();
        let footprint = slot_len
            .checked_mul(count)
            .ok_or(BufferError::SizeExceeded {
                requested: usize::MAX,
                capacity,
            })?;
        if footprint > capacity {
            return Err(BufferError::SizeExceeded {
                requested: footprint,
                capacity,
            });
        }

        self.region
            .leases
            .compare_exchange(0, count, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|outstanding| BufferError::InUse { outstanding })?;

        debug!(slot_len, count, footprint, "slots leased");

        Ok((0..count)
            .map(|index| SlotBuf {
                region: Arc::clone(&self.region),
                index,
                offset: index * slot_len,
                len: slot_len,
            })
            .collect())
    }

    /// Create a read-only mapping of the first `len` bytes for a consumer.
    ///
    /// Requests larger than the allocation fail with
    /// [`BufferError::SizeExceeded`] and map nothing.
    pub fn map(&self, len: usize) -> Result<FrameMapping> {
        if len > self.region.len() {
            return Err(BufferError::SizeExceeded {
                requested: len,
                capacity: self.region.len(),
            });
        }
        FrameMapping::new(&self.region.file, len)
    }

    /// The backing memory object, for handing to another process.
    pub fn backing_fd(&self) -> BorrowedFd<'_> {
        self.region.file.as_fd()
    }

    /// Release the buffer.
    ///
    /// Fails with [`BufferError::InUse`] while slot leases are outstanding; the
    /// memory is then reclaimed only when the last lease is dropped.
    pub fn release(self) -> Result<()> {
        let outstanding = self.outstanding_leases();
        if outstanding > 0 {
            warn!(outstanding, "frame buffer released with leased slots");
            return Err(BufferError::InUse { outstanding });
        }
        info!(len = self.region.len(), "frame buffer released");
        Ok(())
    }
}

impl std::fmt::Debug for SharedFrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFrameBuffer")
            .field("len", &self.region.len())
            .field("locked", &self.region.locked)
            .field("leases", &self.outstanding_leases())
            .finish()
    }
}

/// Exclusive write access to one fixed slot of a [`SharedFrameBuffer`].
///
/// A slot is the region owned by one recycled transfer operation. Slots of the
/// same lease never overlap, which is what makes [`SlotBuf::as_mut_slice`]
/// sound.
pub struct SlotBuf {
    region: Arc<Region>,
    index: usize,
    offset: usize,
    len: usize,
}

impl SlotBuf {
    /// Slot index within the lease.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Byte offset of the slot within the frame buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Slot length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length slots (never produced by `lease_slots`).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the slot contents.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: offset+len was checked against the mapping at lease time,
        // and the mapping outlives `self` through the Arc. Only this slot's
        // bytes are borrowed, never the whole mapping.
        unsafe { std::slice::from_raw_parts(self.region.map.as_ptr().add(self.offset), self.len) }
    }

    /// Write access to the slot contents.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the mapping is PROT_WRITE and outlives `self` through the
        // Arc; offset+len was checked at lease time. Slots of one lease are
        // disjoint and this handle is unique, so no other reference to these
        // bytes exists while the returned borrow lives.
        unsafe {
            let base = self.region.map.as_ptr().cast_mut();
            std::slice::from_raw_parts_mut(base.add(self.offset), self.len)
        }
    }
}

impl Drop for SlotBuf {
    fn drop(&mut self) {
        self.region.leases.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for SlotBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotBuf")
            .field("index", &self.index)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

/// Create an empty anonymous shared memory object.
#[cfg(target_os = "linux")]
fn create_backing() -> std::io::Result<OwnedFd> {
    // SAFETY: the name is a valid NUL-terminated string.
    let raw = unsafe { libc::memfd_create(c"bulkframe".as_ptr(), libc::MFD_CLOEXEC) };
    if raw < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: memfd_create returned a fresh descriptor we now own.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Create an empty anonymous shared memory object.
#[cfg(not(target_os = "linux"))]
fn create_backing() -> std::io::Result<OwnedFd> {
    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    let name = std::ffi::CString::new(format!(
        "/bulkframe-{}-{}",
        std::process::id(),
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    ))
    .map_err(std::io::Error::other)?;

    // SAFETY: `name` is a valid NUL-terminated string.
    let raw = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
            0o600 as libc::c_uint,
        )
    };
    if raw < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: shm_open returned a fresh descriptor we now own.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    // The object stays alive through the descriptor; drop the name right away.
    // SAFETY: `name` is a valid NUL-terminated string.
    unsafe {
        libc::shm_unlink(name.as_ptr());
    }
    Ok(fd)
}
