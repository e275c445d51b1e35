//! Atomic bitmap slot allocator.
//!
//! A flat array of atomic words used as a bitset: one bit per slot, `1`
//! meaning the slot is owned by someone. The bitset holds no data itself,
//! only ownership state. Claiming is a scan-and-CAS; releasing is a single
//! `fetch_and`. Both are built purely from lock-free primitives so they are
//! safe to call from interrupt context.

use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) const WORD_BITS: usize = u64::BITS as usize;

/// Number of words needed to track `bits` slots.
pub(crate) const fn words_for(bits: usize) -> usize {
    bits.div_ceil(WORD_BITS)
}

/// Scans for a clear bit and atomically sets it.
///
/// Words are visited left to right, loaded once each; within a word every
/// clear bit is attempted with a compare-exchange. A losing CAS hands back
/// the current word value, so the same bit is retried against that refreshed
/// value without another load. Returns the claimed bit index, or `None` once
/// every bit in range is set.
///
/// Lock-free but not wait-free: a caller's retries are unbounded under
/// sustained contention, though every failed CAS means some other caller
/// claimed or released a bit.
pub(crate) fn claim_first_free(words: &[AtomicU64], bits: usize) -> Option<usize> {
    for (word_index, word) in words.iter().enumerate() {
        let base = word_index * WORD_BITS;
        let mut current = word.load(Ordering::Acquire);

        let mut bit = 0;
        while bit < WORD_BITS && base + bit < bits {
            let mask = 1u64 << bit;
            if current & mask != 0 {
                bit += 1;
                continue;
            }

            match word.compare_exchange(current, current | mask, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(base + bit),
                // Retry the same bit against the value the CAS observed.
                Err(actual) => current = actual,
            }
        }
    }

    None
}

/// Clears a previously claimed bit.
///
/// Release ordering so everything done while owning the slot is visible to
/// the next claimant. Never retries.
pub(crate) fn release(words: &[AtomicU64], index: usize) {
    let mask = !(1u64 << (index % WORD_BITS));
    words[index / WORD_BITS].fetch_and(mask, Ordering::Release);
}
