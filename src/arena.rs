//! Growable arenas over reserved virtual memory.
//!
//! Both arenas reserve address space for their whole declared capacity at
//! construction and never move it, so a slot index, once issued, stays valid
//! for the arena's entire life. Physical memory is committed in large chunks
//! as the bump watermark advances. Two flavors:
//! - [`VmVec`]: single appender, mutation through `&mut self`, plain slots
//! - [`ConcurrentVmVec`]: many appenders; a coarse lock grants each thread a
//!   batch of consecutive slots, allocation inside a batch is lock-free, and
//!   every slot carries a one-shot constructed marker separating zero-filled
//!   memory from finished records
//!
//! Capacity is a hard ceiling: the reservation cannot grow afterwards, since
//! growing would invalidate every index already handed out.

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use thread_local::ThreadLocal;

use crate::sync::Backoff;
use crate::vm::{page_size, round_up_to_page, VmRegion};
use crate::MemoryUsage;

/// Reserve the address range for `capacity` elements of `T`, aborting on
/// failure (an arena that cannot hold its declared capacity is unusable).
fn reserve_for<T>(capacity: usize) -> VmRegion {
    assert!(capacity > 0, "arena capacity must be nonzero");
    assert!(mem::size_of::<T>() > 0, "zero-sized records are not supported");
    assert!(
        mem::align_of::<T>() <= page_size(),
        "record alignment exceeds the page size"
    );
    let bytes = match capacity.checked_mul(mem::size_of::<T>()) {
        Some(b) => b,
        None => panic!("arena capacity overflows the address space"),
    };
    match VmRegion::reserve(bytes) {
        Ok(region) => region,
        Err(e) => panic!("failed to reserve {bytes} bytes of address space: {e}"),
    }
}

// ============================================================================
// Sequential arena
// ============================================================================

/// Append-only storage for a single writer.
///
/// Indices are issued densely from zero. Reads and writes are plain; the
/// borrow checker provides the single-appender guarantee.
pub struct VmVec<T> {
    region: VmRegion,
    len: usize,
    committed: usize,
    cap: usize,
    commit_chunk: usize,
    _marker: PhantomData<T>,
}

impl<T> VmVec<T> {
    /// Create an arena able to hold at most `capacity` elements, committing
    /// physical memory `commit_chunk` bytes (page-rounded) at a time.
    ///
    /// # Panics
    /// Panics if the address range cannot be reserved.
    pub fn with_capacity(capacity: usize, commit_chunk: usize) -> Self {
        VmVec {
            region: reserve_for::<T>(capacity),
            len: 0,
            committed: 0,
            cap: capacity,
            commit_chunk: round_up_to_page(commit_chunk.max(1)),
            _marker: PhantomData,
        }
    }

    /// Append `value`, returning its slot index.
    ///
    /// # Panics
    /// Panics when the declared capacity is exhausted; the reservation cannot
    /// be grown without invalidating already issued indices.
    pub fn push(&mut self, value: T) -> usize {
        let idx = self.len;
        if idx == self.cap {
            panic!("arena capacity exhausted ({} slots)", self.cap);
        }
        let needed = (idx + 1) * mem::size_of::<T>();
        if needed > self.committed {
            self.grow(needed);
        }
        // SAFETY: the slot is committed and not yet occupied.
        unsafe { self.slot_ptr(idx).write(value) };
        self.len += 1;
        idx
    }

    /// Number of elements appended so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no element has been appended yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The declared maximum element count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Checked access.
    #[inline]
    pub fn get(&self, i: usize) -> Option<&T> {
        if i < self.len {
            // SAFETY: `i` is within the initialized prefix.
            Some(unsafe { &*self.slot_ptr(i) })
        } else {
            None
        }
    }

    /// Checked mutable access.
    #[inline]
    pub fn get_mut(&mut self, i: usize) -> Option<&mut T> {
        if i < self.len {
            // SAFETY: `i` is within the initialized prefix.
            Some(unsafe { &mut *self.slot_ptr(i) })
        } else {
            None
        }
    }

    /// Unchecked access for hot paths.
    ///
    /// # Safety
    /// `i` must be less than [`VmVec::len`].
    #[inline]
    pub unsafe fn get_unchecked(&self, i: usize) -> &T {
        debug_assert!(i < self.len);
        // SAFETY: caller promises `i` is within the initialized prefix.
        unsafe { &*self.slot_ptr(i) }
    }

    /// Unchecked mutable access for hot paths.
    ///
    /// # Safety
    /// `i` must be less than [`VmVec::len`].
    #[inline]
    pub unsafe fn get_unchecked_mut(&mut self, i: usize) -> &mut T {
        debug_assert!(i < self.len);
        // SAFETY: caller promises `i` is within the initialized prefix.
        unsafe { &mut *self.slot_ptr(i) }
    }

    /// The initialized elements as one contiguous slice.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: `0..len` is the initialized prefix of the mapping.
        unsafe { slice::from_raw_parts(self.slot_ptr(0), self.len) }
    }

    /// The initialized elements as one contiguous mutable slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as in `as_slice`; `&mut self` excludes other access.
        unsafe { slice::from_raw_parts_mut(self.slot_ptr(0), self.len) }
    }

    /// Drop all elements and reset to empty, retaining committed memory.
    pub fn clear(&mut self) {
        self.drop_elements();
        self.len = 0;
    }

    /// Footprint of the reservation and its committed prefix.
    pub fn memory_usage(&self) -> MemoryUsage {
        MemoryUsage {
            reserved_bytes: self.region.reserved(),
            committed_bytes: self.committed,
            slots: self.len,
            capacity: self.cap,
        }
    }

    #[inline]
    fn slot_ptr(&self, i: usize) -> *mut T {
        debug_assert!(i <= self.cap);
        // SAFETY: `i <= cap`, so the offset stays inside the reservation.
        unsafe { self.region.base().cast::<T>().add(i) }
    }

    #[cold]
    fn grow(&mut self, needed: usize) {
        let target = round_up_to_page(needed)
            .max(self.committed + self.commit_chunk)
            .min(self.region.reserved());
        if let Err(e) = self.region.commit(self.committed, target) {
            panic!("failed to commit arena memory: {e}");
        }
        self.committed = target;
    }

    fn drop_elements(&mut self) {
        if mem::needs_drop::<T>() {
            for i in 0..self.len {
                // SAFETY: `i` is initialized and dropped exactly once here.
                unsafe { ptr::drop_in_place(self.slot_ptr(i)) };
            }
        }
    }
}

impl<T> Drop for VmVec<T> {
    fn drop(&mut self) {
        self.drop_elements();
    }
}

// Safety: the arena owns its mapping and elements outright; shared references
// only read initialized slots, mutation requires `&mut self`.
unsafe impl<T: Send> Send for VmVec<T> {}
unsafe impl<T: Sync> Sync for VmVec<T> {}

// ============================================================================
// Concurrent arena
// ============================================================================

/// One slot of the concurrent arena.
///
/// Slots are never constructed in place: committed pages arrive zero-filled
/// from the kernel, and the all-zero byte pattern is exactly an unbuilt slot
/// (`built == false`, payload uninitialized).
struct Slot<T> {
    built: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A thread's private range of consecutive slots.
#[derive(Clone, Copy)]
struct Batch {
    next: usize,
    limit: usize,
}

impl Batch {
    const EMPTY: Batch = Batch { next: 0, limit: 0 };

    #[inline]
    fn is_exhausted(self) -> bool {
        self.next == self.limit
    }
}

/// Growth state guarded by the coarse lock: the batch watermark and the
/// committed byte count.
struct Grow {
    end: usize,
    committed: usize,
}

/// Append-only storage for many concurrent writers.
///
/// Each thread obtains a batch of consecutive slots under a coarse lock
/// (which also commits further memory when the watermark crosses the
/// committed prefix), then bump-allocates within the batch without any
/// synchronization. A slot's index may become visible to other threads, via
/// [`ConcurrentVmVec::len`], before its record is written; readers
/// distinguish the two states through the per-slot constructed marker.
pub struct ConcurrentVmVec<T> {
    region: VmRegion,
    cap: usize,
    commit_chunk: usize,
    batch: usize,
    grow: Mutex<Grow>,
    len: AtomicUsize,
    batches: ThreadLocal<Cell<Batch>>,
    _marker: PhantomData<T>,
}

impl<T> ConcurrentVmVec<T> {
    /// Create an arena able to hold at most `capacity` elements, committing
    /// `commit_chunk` bytes at a time and granting `batch` consecutive slots
    /// per thread and refill.
    ///
    /// # Panics
    /// Panics if the address range cannot be reserved.
    pub fn with_capacity(capacity: usize, commit_chunk: usize, batch: usize) -> Self {
        assert!(batch > 0, "batch size must be nonzero");
        ConcurrentVmVec {
            region: reserve_for::<Slot<T>>(capacity),
            cap: capacity,
            commit_chunk: round_up_to_page(commit_chunk.max(1)),
            batch,
            grow: Mutex::new(Grow {
                end: 0,
                committed: 0,
            }),
            len: AtomicUsize::new(0),
            batches: ThreadLocal::new(),
            _marker: PhantomData,
        }
    }

    /// Append `value`, returning its slot index.
    ///
    /// The record is fully written before the slot's constructed marker is
    /// set, so the returned index can be published to other threads as-is.
    ///
    /// # Panics
    /// Panics when the declared capacity is exhausted.
    pub fn push(&self, value: T) -> usize {
        let cell = self.batches.get_or(|| Cell::new(Batch::EMPTY));
        let mut batch = cell.get();
        if batch.is_exhausted() {
            batch = self.take_batch();
        }
        let idx = batch.next;
        batch.next += 1;
        cell.set(batch);

        let slot = self.slot(idx);
        // SAFETY: the batch grants this thread exclusive ownership of slot
        // `idx`, and its memory was committed before the grant was published.
        unsafe { (*slot.value.get()).write(value) };
        slot.built.store(true, Ordering::Release);
        idx
    }

    /// Number of slots granted so far.
    ///
    /// This is the bump watermark: it includes slots inside threads' current
    /// batches whose records have not been written yet. Use
    /// [`ConcurrentVmVec::is_built`] or [`ConcurrentVmVec::get`] to tell them
    /// apart.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Whether no slot has been granted yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The declared maximum element count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Whether slot `i` holds a fully constructed record.
    #[inline]
    pub fn is_built(&self, i: usize) -> bool {
        i < self.len() && self.slot(i).built.load(Ordering::Acquire)
    }

    /// Non-blocking checked access: `None` for out-of-range or not yet
    /// constructed slots.
    #[inline]
    pub fn get(&self, i: usize) -> Option<&T> {
        if i >= self.len() {
            return None;
        }
        let slot = self.slot(i);
        if !slot.built.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the acquire load of `built` synchronizes with the release
        // store that followed the record write.
        Some(unsafe { (*slot.value.get()).assume_init_ref() })
    }

    /// Access slot `i`, spinning (bounded backoff) until its record is
    /// constructed by whichever thread owns it.
    ///
    /// # Panics
    /// Panics if `i` is at or past the current watermark.
    pub fn wait_get(&self, i: usize) -> &T {
        assert!(i < self.len(), "slot {i} out of bounds");
        let slot = self.slot(i);
        if !slot.built.load(Ordering::Acquire) {
            Self::wait_built(slot);
        }
        // SAFETY: as in `get`.
        unsafe { (*slot.value.get()).assume_init_ref() }
    }

    /// Unchecked access for hot paths.
    ///
    /// # Safety
    /// Slot `i` must be constructed.
    #[inline]
    pub unsafe fn get_unchecked(&self, i: usize) -> &T {
        debug_assert!(self.is_built(i));
        // SAFETY: caller promises the slot is constructed.
        unsafe { (*self.slot(i).value.get()).assume_init_ref() }
    }

    /// Checked mutable access; exclusivity comes from `&mut self`.
    pub fn get_mut(&mut self, i: usize) -> Option<&mut T> {
        if i >= *self.len.get_mut() {
            return None;
        }
        let slot = self.slot(i);
        if !slot.built.load(Ordering::Relaxed) {
            return None;
        }
        // SAFETY: `&mut self` excludes all other access.
        Some(unsafe { (*slot.value.get()).assume_init_mut() })
    }

    /// Footprint of the reservation and its committed prefix.
    pub fn memory_usage(&self) -> MemoryUsage {
        let committed = self.grow.lock().committed;
        MemoryUsage {
            reserved_bytes: self.region.reserved(),
            committed_bytes: committed,
            slots: self.len(),
            capacity: self.cap,
        }
    }

    #[inline]
    fn slot(&self, i: usize) -> &Slot<T> {
        debug_assert!(i < self.cap);
        // SAFETY: callers only name slots below the watermark (or inside their
        // own batch), all of which lie in committed, zero-initialized memory.
        unsafe { &*self.region.base().cast::<Slot<T>>().add(i) }
    }

    /// Grant the calling thread a fresh batch, committing memory as needed.
    #[cold]
    fn take_batch(&self) -> Batch {
        let mut grow = self.grow.lock();
        let start = grow.end;
        if start >= self.cap {
            panic!(
                "arena capacity exhausted ({} slots reserved at construction)",
                self.cap
            );
        }
        let limit = (start + self.batch).min(self.cap);
        let needed = limit * mem::size_of::<Slot<T>>();
        if needed > grow.committed {
            let target = round_up_to_page(needed)
                .max(grow.committed + self.commit_chunk)
                .min(self.region.reserved());
            if let Err(e) = self.region.commit(grow.committed, target) {
                panic!("failed to commit arena memory: {e}");
            }
            grow.committed = target;
        }
        grow.end = limit;
        // Publish after the commit: a reader that observes the new watermark
        // must find the backing pages usable.
        self.len.store(limit, Ordering::Release);
        Batch { next: start, limit }
    }

    #[cold]
    fn wait_built(slot: &Slot<T>) {
        let mut backoff = Backoff::new();
        while !slot.built.load(Ordering::Acquire) {
            backoff.snooze();
        }
    }
}

impl<T> Drop for ConcurrentVmVec<T> {
    fn drop(&mut self) {
        if mem::needs_drop::<T>() {
            let end = *self.len.get_mut();
            for i in 0..end {
                let slot = self.slot(i);
                // Batches abandoned mid-use leave unbuilt holes; skip them.
                if slot.built.load(Ordering::Relaxed) {
                    // SAFETY: built slots are initialized; each drops once.
                    unsafe { (*slot.value.get()).assume_init_drop() };
                }
            }
        }
    }
}

// Safety: records are published only through the release store on `built`;
// after that they are read-only until `&mut self`. Push moves `T` in from any
// thread (`T: Send`), shared getters hand out `&T` across threads (`T: Sync`).
unsafe impl<T: Send> Send for ConcurrentVmVec<T> {}
unsafe impl<T: Send + Sync> Sync for ConcurrentVmVec<T> {}
