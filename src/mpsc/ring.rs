//! The bitmap-backed MPSC ring buffer.
//!
//! Unlike a sequence-number ring, slots here are not tied to positions:
//! producers claim *any* free slot from an atomic bitmap, construct into it,
//! then publish its index through a ring of index cells. This keeps every
//! producer step a bounded-intent atomic, which is what makes the queue safe
//! to use from interrupt handlers as well as ordinary threads.

use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::alloc::{Global, RawAlloc};
use crate::bitset;

/// Marker occupying an index-ring cell that has nothing published in it.
pub(crate) const SLOT_NONE: u32 = u32::MAX;

/// Largest supported capacity; slot indexes must stay below [`SLOT_NONE`].
pub const MAX_CAPACITY: usize = (u32::MAX - 1) as usize;

/// Error returned when the queue could not be created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateError {
    /// Requested capacity was zero.
    ZeroCapacity,
    /// Requested capacity exceeds [`MAX_CAPACITY`] or overflows the
    /// storage size computation.
    CapacityTooLarge,
    /// The allocator reported failure.
    AllocationFailed,
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCapacity => write!(f, "capacity cannot be zero"),
            Self::CapacityTooLarge => write!(f, "capacity too large"),
            Self::AllocationFailed => write!(f, "storage allocation failed"),
        }
    }
}

impl std::error::Error for CreateError {}

/// Error returned when the queue is full.
/// Contains the value that could not be pushed, allowing recovery.
#[derive(Debug, PartialEq, Eq)]
pub struct Full<T>(
    /// The value that could not be pushed.
    pub T,
);

/// Resolved sub-region offsets of the single backing allocation.
struct Region {
    layout: Layout,
    bitset_offset: usize,
    ring_offset: usize,
}

/// A fixed-capacity, multi-producer single-consumer, lock-free, reentrant
/// ring buffer.
///
/// Backing storage is one contiguous allocation:
///
/// ```text
/// ┌──────────────────────────────────────────────────────┐
/// │ element storage: capacity × T                        │
/// ├──────────────────────────────────────────────────────┤
/// │ bitmap: ⌈capacity / 64⌉ × AtomicU64 (1 = slot owned) │
/// ├──────────────────────────────────────────────────────┤
/// │ index ring: capacity × AtomicU32 (SLOT_NONE = empty) │
/// └──────────────────────────────────────────────────────┘
/// ```
///
/// A producer claims a free slot from the bitmap, writes its value into the
/// slot, then publishes the slot's index into the ring cell at the next head
/// position. The consumer swaps the cell at the tail position back to the
/// empty marker, reads the slot it named, and returns the bit to the bitmap.
///
/// [`try_push`](Self::try_push) is safe from any number of concurrent
/// producers, including reentrant ones such as interrupt handlers: no step
/// takes a lock or spins on another participant's progress.
/// [`try_pop`](Self::try_pop) supports exactly one consumer context at a
/// time; see its safety contract, or use the safe [`pop`](Self::pop) /
/// the [`channel`](crate::mpsc::channel) handles.
pub struct RingBuffer<T, A: RawAlloc = Global> {
    /// Base of the backing region; null for the empty (capacity 0) queue.
    storage: *mut u8,
    capacity: u32,

    /// Producer-side publish position, monotonic; mod capacity names the
    /// next ring cell to write.
    head: CachePadded<AtomicU64>,
    /// Consumer-side drain position, same scheme.
    tail: CachePadded<AtomicU64>,
    /// Occupancy estimate, used only for admission on push.
    count: CachePadded<AtomicU64>,

    alloc: A,
    _marker: PhantomData<T>,
}

// Safety: the queue owns its elements; all shared mutation goes through the
// bitmap, ring cell, and counter atomics. The single-consumer requirement is
// enforced by `try_pop` being unsafe (or `pop` taking `&mut self`).
unsafe impl<T: Send, A: RawAlloc + Send> Send for RingBuffer<T, A> {}
unsafe impl<T: Send, A: RawAlloc + Sync> Sync for RingBuffer<T, A> {}

impl<T, A: RawAlloc> RingBuffer<T, A> {
    // === Region layout ===

    /// Byte offset of the bitmap words within the backing region.
    #[inline]
    fn bitset_offset(capacity: usize) -> usize {
        (mem::size_of::<T>() * capacity).next_multiple_of(mem::align_of::<AtomicU64>())
    }

    /// Byte offset of the index-ring cells within the backing region.
    #[inline]
    fn ring_offset(capacity: usize) -> usize {
        let end = Self::bitset_offset(capacity)
            + mem::size_of::<AtomicU64>() * bitset::words_for(capacity);
        end.next_multiple_of(mem::align_of::<AtomicU32>())
    }

    /// Computes the full region layout, or `None` if the size arithmetic
    /// overflows. Checked once at creation; the unchecked offset helpers
    /// above are only used after that.
    fn region(capacity: usize) -> Option<Region> {
        let elements = mem::size_of::<T>().checked_mul(capacity)?;
        let bitset_offset = elements.checked_next_multiple_of(mem::align_of::<AtomicU64>())?;
        let bitset_end = bitset_offset
            .checked_add(mem::size_of::<AtomicU64>().checked_mul(bitset::words_for(capacity))?)?;
        let ring_offset = bitset_end.checked_next_multiple_of(mem::align_of::<AtomicU32>())?;
        let size =
            ring_offset.checked_add(mem::size_of::<AtomicU32>().checked_mul(capacity)?)?;

        let align = mem::align_of::<T>().max(mem::align_of::<AtomicU64>());
        let layout = Layout::from_size_align(size.checked_next_multiple_of(align)?, align).ok()?;

        Some(Region {
            layout,
            bitset_offset,
            ring_offset,
        })
    }

    // === Construction ===

    /// Creates a queue holding up to `capacity` elements, using the given
    /// allocator for the backing region.
    ///
    /// # Errors
    ///
    /// Fails for a zero or oversized capacity, or when the allocator returns
    /// `None`. On failure nothing is retained and nothing leaks.
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Result<Self, CreateError> {
        if capacity == 0 {
            return Err(CreateError::ZeroCapacity);
        }
        if capacity > MAX_CAPACITY {
            return Err(CreateError::CapacityTooLarge);
        }

        let region = Self::region(capacity).ok_or(CreateError::CapacityTooLarge)?;
        let storage = alloc
            .allocate(region.layout)
            .ok_or(CreateError::AllocationFailed)?
            .as_ptr();

        // Element slots stay uninitialized; the bitmap says which are live.
        unsafe {
            let words = storage.add(region.bitset_offset).cast::<AtomicU64>();
            for w in 0..bitset::words_for(capacity) {
                words.add(w).write(AtomicU64::new(0));
            }

            let ring = storage.add(region.ring_offset).cast::<AtomicU32>();
            for i in 0..capacity {
                ring.add(i).write(AtomicU32::new(SLOT_NONE));
            }
        }

        Ok(Self {
            storage,
            capacity: capacity as u32,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            count: CachePadded::new(AtomicU64::new(0)),
            alloc,
            _marker: PhantomData,
        })
    }

    /// Creates a queue holding up to `capacity` elements.
    ///
    /// # Errors
    ///
    /// See [`with_capacity_in`](Self::with_capacity_in).
    ///
    /// # Example
    ///
    /// ```
    /// use bitring::{CreateError, RingBuffer};
    ///
    /// let queue = RingBuffer::<u64>::with_capacity(1024).unwrap();
    /// assert_eq!(queue.capacity(), 1024);
    ///
    /// assert_eq!(
    ///     RingBuffer::<u64>::with_capacity(0).unwrap_err(),
    ///     CreateError::ZeroCapacity,
    /// );
    /// ```
    pub fn with_capacity(capacity: usize) -> Result<Self, CreateError>
    where
        A: Default,
    {
        Self::with_capacity_in(capacity, A::default())
    }

    // === Sub-region accessors ===

    #[inline]
    fn slot_ptr(&self, index: usize) -> *mut T {
        debug_assert!(index < self.capacity as usize);
        unsafe { self.storage.cast::<T>().add(index) }
    }

    #[inline]
    fn bitset_words(&self) -> &[AtomicU64] {
        if self.storage.is_null() {
            return &[];
        }
        let capacity = self.capacity as usize;
        unsafe {
            slice::from_raw_parts(
                self.storage.add(Self::bitset_offset(capacity)).cast(),
                bitset::words_for(capacity),
            )
        }
    }

    #[inline]
    fn index_ring(&self) -> &[AtomicU32] {
        debug_assert!(!self.storage.is_null());
        let capacity = self.capacity as usize;
        unsafe {
            slice::from_raw_parts(
                self.storage.add(Self::ring_offset(capacity)).cast(),
                capacity,
            )
        }
    }

    #[inline]
    fn normalize(&self, position: u64) -> usize {
        (position % u64::from(self.capacity)) as usize
    }

    // === Queue operations ===

    /// Attempts to push a value.
    ///
    /// Safe to call from any number of producer contexts concurrently,
    /// including reentrant ones (an interrupt handler preempting another
    /// push on the same thread of control).
    ///
    /// # Errors
    ///
    /// Returns `Err(Full(value))` when the queue is at capacity, handing the
    /// value back to the caller.
    pub fn try_push(&self, value: T) -> Result<(), Full<T>> {
        let Some(index) = bitset::claim_first_free(self.bitset_words(), self.capacity as usize)
        else {
            return Err(Full(value));
        };

        // Optimistic admission: claim a count, roll back if we raced past
        // capacity. The bit claim and the counter are independently
        // reversible, so losing this race leaves no trace.
        let count = self.count.fetch_add(1, Ordering::AcqRel);
        if count >= u64::from(self.capacity) {
            self.count.fetch_sub(1, Ordering::AcqRel);
            bitset::release(self.bitset_words(), index);
            return Err(Full(value));
        }

        // The slot is ours and invisible to the consumer until published.
        unsafe { self.slot_ptr(index).write(value) };

        let head = self.head.fetch_add(1, Ordering::AcqRel);
        self.index_ring()[self.normalize(head)].store(index as u32, Ordering::Release);

        Ok(())
    }

    /// Attempts to pop the next published value.
    ///
    /// # Safety
    ///
    /// At most one consumer context may be inside `try_pop` at a time.
    /// Concurrent calls from two consumer contexts are undefined behavior.
    /// Prefer [`pop`](Self::pop), whose exclusive borrow enforces this, or
    /// the [`channel`](crate::mpsc::channel) handles.
    pub unsafe fn try_pop(&self) -> Option<T> {
        if self.capacity == 0 {
            return None;
        }

        let tail = self.tail.load(Ordering::Acquire);
        let index = self.index_ring()[self.normalize(tail)].swap(SLOT_NONE, Ordering::AcqRel);
        if index == SLOT_NONE {
            return None;
        }

        // Read the value out before the slot is handed back to producers.
        let value = unsafe { self.slot_ptr(index as usize).read() };
        bitset::release(self.bitset_words(), index as usize);

        self.tail.fetch_add(1, Ordering::AcqRel);
        self.count.fetch_sub(1, Ordering::AcqRel);

        Some(value)
    }

    /// Pops the next published value, or `None` if nothing is ready.
    ///
    /// The exclusive borrow guarantees no other consumer context exists, so
    /// this is safe; it cannot run concurrently with producers either, which
    /// makes it suited to draining and single-threaded use.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        // Safety: `&mut self` excludes every other context.
        unsafe { self.try_pop() }
    }

    /// Returns an estimate of the number of elements in the queue, loaded
    /// with the given memory ordering.
    ///
    /// The value is instantaneously stale and may transiently exceed the
    /// capacity while producers race admission. Only the outcome of
    /// [`try_push`](Self::try_push) and [`try_pop`](Self::try_pop) is
    /// authoritative for fullness or emptiness.
    #[inline]
    pub fn len_with(&self, order: Ordering) -> usize {
        self.count.load(order) as usize
    }

    /// Returns an estimate of the number of elements in the queue.
    ///
    /// Equivalent to [`len_with`](Self::len_with) with `SeqCst`.
    #[inline]
    pub fn len(&self) -> usize {
        self.len_with(Ordering::SeqCst)
    }

    /// Returns `true` if the queue appears empty. An estimate, like
    /// [`len`](Self::len).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of elements the queue can hold, fixed at
    /// creation. The empty default queue reports 0.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Returns the allocator backing this queue.
    #[inline]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    // === Teardown ===

    /// Drops every live element and releases the backing region, leaving
    /// the queue in the empty (capacity 0) state.
    ///
    /// Not thread-safe; callable only with exclusive access, which `Drop`
    /// and move-assignment provide.
    fn clear(&mut self) {
        let Some(storage) = NonNull::new(self.storage) else {
            return;
        };
        let capacity = self.capacity as usize;

        // The bitmap is the authority on which slots hold live values.
        if mem::needs_drop::<T>() {
            for (word_index, word) in self.bitset_words().iter().enumerate() {
                let live = word.load(Ordering::Acquire);
                for bit in 0..bitset::WORD_BITS {
                    let index = word_index * bitset::WORD_BITS + bit;
                    if index >= capacity {
                        break;
                    }
                    if live & (1u64 << bit) != 0 {
                        unsafe { ptr::drop_in_place(self.slot_ptr(index)) };
                    }
                }
            }
        }

        let region = Self::region(capacity).expect("region layout validated at construction");
        unsafe { self.alloc.deallocate(storage, region.layout) };

        self.storage = ptr::null_mut();
        self.capacity = 0;
    }
}

impl<T, A: RawAlloc> Drop for RingBuffer<T, A> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// The empty queue: capacity 0, no storage, every operation fails cleanly.
///
/// This is the state a queue is left in by `mem::take`, standing in for a
/// moved-from source.
impl<T, A: RawAlloc + Default> Default for RingBuffer<T, A> {
    fn default() -> Self {
        Self {
            storage: ptr::null_mut(),
            capacity: 0,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            count: CachePadded::new(AtomicU64::new(0)),
            alloc: A::default(),
            _marker: PhantomData,
        }
    }
}

impl<T, A: RawAlloc> fmt::Debug for RingBuffer<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
