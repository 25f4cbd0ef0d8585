/// Fallback used when the platform does not report a page size.
const DEFAULT_PAGE_SIZE: usize = 4096;

/// The platform memory page size in bytes.
#[cfg(unix)]
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        DEFAULT_PAGE_SIZE
    }
}

/// The platform memory page size in bytes.
#[cfg(not(unix))]
pub fn page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Round `len` up to the next multiple of the page size.
///
/// Returns `None` on overflow.
pub fn page_align(len: usize) -> Option<usize> {
    len.checked_next_multiple_of(page_size())
}
