//! Reserved-then-committed virtual memory.
//!
//! The arenas reserve their whole declared capacity as an address range up
//! front (`PROT_NONE`, so no physical memory and no swap charge), then make it
//! usable in large chunks with `mprotect` as the bump allocator crosses the
//! committed watermark. Because the range never moves, slot indices handed out
//! earlier survive every growth step.
//!
//! Unix only; mirrors the POSIX reserve/commit split (`mmap` + `mprotect`).

use std::io;
use std::sync::OnceLock;

/// System page size, cached after the first query.
pub(crate) fn page_size() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();
    *PAGE.get_or_init(|| {
        // SAFETY: sysconf has no memory-safety preconditions.
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if sz > 0 {
            sz as usize
        } else {
            4096
        }
    })
}

/// Round `bytes` up to a whole number of pages.
pub(crate) fn round_up_to_page(bytes: usize) -> usize {
    let page = page_size();
    debug_assert!(page.is_power_of_two());
    (bytes + page - 1) & !(page - 1)
}

/// An anonymous private mapping reserved at a fixed size.
///
/// The region starts entirely inaccessible; [`VmRegion::commit`] opens a
/// prefix of it for reading and writing. Freshly committed pages are
/// guaranteed zero-filled by the kernel, which the concurrent arena relies on
/// for its `built` markers.
pub(crate) struct VmRegion {
    base: *mut u8,
    reserved: usize,
}

impl VmRegion {
    /// Reserve `bytes` (rounded up to whole pages) of address space.
    ///
    /// No physical memory is committed yet.
    pub(crate) fn reserve(bytes: usize) -> io::Result<VmRegion> {
        debug_assert!(bytes > 0);
        let reserved = round_up_to_page(bytes.max(1));
        // SAFETY: requesting a fresh anonymous mapping; no existing memory is
        // touched. MAP_NORESERVE keeps the reservation off the commit charge.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                reserved,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(VmRegion {
            base: base as *mut u8,
            reserved,
        })
    }

    /// Base address of the reservation.
    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        self.base
    }

    /// Size of the reservation in bytes (page-rounded).
    #[inline]
    pub(crate) fn reserved(&self) -> usize {
        self.reserved
    }

    /// Make `[from, to)` readable and writable.
    ///
    /// Both bounds must be page-aligned and inside the reservation. Callers
    /// serialize commits (the arenas do so under their growth lock); already
    /// committed pages are unaffected, so readers of earlier slots race with
    /// this safely.
    pub(crate) fn commit(&self, from: usize, to: usize) -> io::Result<()> {
        debug_assert!(from % page_size() == 0 && to % page_size() == 0);
        debug_assert!(from <= to && to <= self.reserved);
        if from == to {
            return Ok(());
        }
        // SAFETY: the range lies within our own mapping.
        let rc = unsafe {
            libc::mprotect(
                self.base.add(from) as *mut libc::c_void,
                to - from,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for VmRegion {
    fn drop(&mut self) {
        // SAFETY: unmapping our own mapping exactly once. Failure at this
        // point is unreportable and ignored.
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.reserved);
        }
    }
}

// Safety: the region is an owned mapping; the raw base pointer is not aliased
// by anything outside the owning arena, and commit only widens protections.
unsafe impl Send for VmRegion {}
unsafe impl Sync for VmRegion {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        let page = page_size();
        assert_eq!(round_up_to_page(0), 0);
        assert_eq!(round_up_to_page(1), page);
        assert_eq!(round_up_to_page(page), page);
        assert_eq!(round_up_to_page(page + 1), 2 * page);
    }

    #[test]
    fn test_reserve_commit_rw() {
        let page = page_size();
        let region = VmRegion::reserve(4 * page).unwrap();
        assert_eq!(region.reserved(), 4 * page);

        region.commit(0, page).unwrap();
        unsafe {
            region.base().write(0xAB);
            region.base().add(page - 1).write(0xCD);
            assert_eq!(region.base().read(), 0xAB);
            assert_eq!(region.base().add(page - 1).read(), 0xCD);
        }

        // Widen and touch the new pages; fresh pages read as zero.
        region.commit(page, 3 * page).unwrap();
        unsafe {
            assert_eq!(region.base().add(page).read(), 0);
            region.base().add(3 * page - 1).write(0xEF);
            assert_eq!(region.base().add(3 * page - 1).read(), 0xEF);
        }
    }

    #[test]
    fn test_empty_commit_is_noop() {
        let page = page_size();
        let region = VmRegion::reserve(page).unwrap();
        region.commit(0, 0).unwrap();
    }

    #[test]
    fn test_absurd_reservation_fails() {
        // Half the 64-bit address space cannot be mapped.
        assert!(VmRegion::reserve(usize::MAX / 2).is_err());
    }
}
