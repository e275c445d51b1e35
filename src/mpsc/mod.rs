//! Multi-producer single-consumer queue.
//!
//! The core type is [`RingBuffer`], a fixed-capacity lock-free queue whose
//! producers stay safe even when reentrant (an interrupt handler preempting
//! a push on the same thread of control). For ordinary threaded use,
//! [`channel`] fronts a ring buffer with a cloneable [`Sender`] and a single
//! [`Receiver`] that track disconnection, so consumer exclusivity is
//! enforced by the type system rather than by contract.
//!
//! # Example
//!
//! ```
//! use bitring::mpsc;
//! use std::thread;
//!
//! let (tx, mut rx) = mpsc::channel::<u64>(1024);
//! let tx2 = tx.clone();
//!
//! let h1 = thread::spawn(move || {
//!     for i in 0..100 {
//!         while tx.try_send(i).is_err() {
//!             std::hint::spin_loop();
//!         }
//!     }
//! });
//! let h2 = thread::spawn(move || {
//!     for i in 100..200 {
//!         while tx2.try_send(i).is_err() {
//!             std::hint::spin_loop();
//!         }
//!     }
//! });
//!
//! let mut received = Vec::new();
//! while received.len() < 200 {
//!     if let Ok(value) = rx.try_recv() {
//!         received.push(value);
//!     }
//! }
//!
//! h1.join().unwrap();
//! h2.join().unwrap();
//! assert_eq!(received.len(), 200);
//! ```

mod ring;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub use ring::{CreateError, Full, RingBuffer, MAX_CAPACITY};

/// State shared by every handle of one channel.
struct Shared<T> {
    ring: RingBuffer<T>,
    /// Live `Sender` count; 0 means no push can ever arrive again.
    senders: AtomicUsize,
    receiver_gone: AtomicBool,
}

/// Creates an MPSC channel with the given capacity.
///
/// # Panics
///
/// Panics if `capacity` is zero or the backing allocation fails. Use
/// [`RingBuffer::with_capacity`] directly for a fallible construction.
///
/// # Example
///
/// ```
/// use bitring::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<u32>(8);
/// tx.try_send(7).unwrap();
/// assert_eq!(rx.try_recv().unwrap(), 7);
/// ```
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let ring = match RingBuffer::with_capacity(capacity) {
        Ok(ring) => ring,
        Err(err) => panic!("failed to create channel with capacity {capacity}: {err}"),
    };

    let shared = Arc::new(Shared {
        ring,
        senders: AtomicUsize::new(1),
        receiver_gone: AtomicBool::new(false),
    });

    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

/// The sending half of a channel. Clone it for additional producers.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Attempts to send a value without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(TrySendError::Full(value))` when the queue is at
    /// capacity, or `Err(TrySendError::Disconnected(value))` once the
    /// receiver has been dropped and the queue is full.
    #[inline]
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        match self.shared.ring.try_push(value) {
            Ok(()) => Ok(()),
            Err(Full(value)) => Err(self.reject(value)),
        }
    }

    #[cold]
    fn reject(&self, value: T) -> TrySendError<T> {
        if self.shared.receiver_gone.load(Ordering::Acquire) {
            TrySendError::Disconnected(value)
        } else {
            TrySendError::Full(value)
        }
    }

    /// Returns the channel capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    /// Returns an estimate of the number of queued elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.ring.len()
    }

    /// Returns `true` if the channel appears empty. An estimate.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shared.ring.is_empty()
    }

    /// Returns `true` if the receiver has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.shared.receiver_gone.load(Ordering::Acquire)
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::Relaxed);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.shared.senders.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.capacity())
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

/// The receiving half of a channel. There is exactly one; it cannot be
/// cloned, which is what upholds the ring buffer's single-consumer contract.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Attempts to receive a value without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(TryRecvError::Empty)` when nothing is published right
    /// now, and `Err(TryRecvError::Disconnected)` once every sender has been
    /// dropped and the queue is drained.
    #[inline]
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        // Safety: the sole Receiver is the sole consumer, and `&mut self`
        // keeps a single context inside try_pop at a time.
        match unsafe { self.shared.ring.try_pop() } {
            Some(value) => Ok(value),
            None => self.try_recv_slow(),
        }
    }

    #[cold]
    fn try_recv_slow(&mut self) -> Result<T, TryRecvError> {
        if self.shared.senders.load(Ordering::Acquire) != 0 {
            return Err(TryRecvError::Empty);
        }

        // A Sender can only be dropped between pushes, so with no senders
        // left nothing is mid-publish. One more pop closes the race where
        // the final push landed after our first attempt.
        match unsafe { self.shared.ring.try_pop() } {
            Some(value) => Ok(value),
            None => Err(TryRecvError::Disconnected),
        }
    }

    /// Returns the channel capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    /// Returns an estimate of the number of queued elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.ring.len()
    }

    /// Returns `true` if the channel appears empty. An estimate.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shared.ring.is_empty()
    }

    /// Returns `true` if every sender has been dropped.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.shared.senders.load(Ordering::Acquire) == 0
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.receiver_gone.store(true, Ordering::Release);
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("capacity", &self.capacity())
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

/// Error returned by [`Sender::try_send`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The queue is full. Contains the value that could not be sent.
    Full(T),
    /// The receiver has been dropped. Contains the value that could not be
    /// sent.
    Disconnected(T),
}

impl<T> TrySendError<T> {
    /// Returns the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Disconnected(value) => value,
        }
    }

    /// Returns `true` for the `Full` variant.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Returns `true` for the `Disconnected` variant.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "queue is full"),
            Self::Disconnected(_) => write!(f, "receiver disconnected"),
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<T> std::error::Error for TrySendError<T> {}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing is published right now.
    Empty,
    /// Every sender has been dropped and the queue is drained.
    Disconnected,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "queue is empty"),
            Self::Disconnected => write!(f, "all senders disconnected"),
        }
    }
}

impl std::error::Error for TryRecvError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn basic_send_recv() {
        let (tx, mut rx) = channel::<u64>(8);

        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        tx.try_send(3).unwrap();

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap(), 3);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn capacity_is_exact() {
        let (tx, _rx) = channel::<u64>(100);
        assert_eq!(tx.capacity(), 100);
    }

    #[test]
    #[should_panic(expected = "capacity")]
    fn zero_capacity_panics() {
        let _ = channel::<u64>(0);
    }

    #[test]
    fn queue_full() {
        let (tx, mut rx) = channel::<u64>(4);

        for i in 0..4 {
            tx.try_send(i).unwrap();
        }
        assert!(matches!(tx.try_send(4), Err(TrySendError::Full(4))));

        assert_eq!(rx.try_recv().unwrap(), 0);
        tx.try_send(4).unwrap();
    }

    #[test]
    fn sender_disconnect() {
        let (tx, mut rx) = channel::<u64>(8);

        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        drop(tx);

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
        assert!(rx.is_disconnected());
    }

    #[test]
    fn receiver_disconnect() {
        let (tx, rx) = channel::<u64>(4);
        drop(rx);

        // Disconnection is reported on the full path.
        for i in 0..4 {
            tx.try_send(i).unwrap();
        }
        assert!(matches!(tx.try_send(4), Err(TrySendError::Disconnected(4))));
        assert!(tx.is_disconnected());
    }

    #[test]
    fn clone_sender() {
        let (tx1, mut rx) = channel::<u64>(8);
        let tx2 = tx1.clone();

        tx1.try_send(1).unwrap();
        tx2.try_send(2).unwrap();

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
    }

    #[test]
    fn all_senders_drop() {
        let (tx1, mut rx) = channel::<u64>(8);
        let tx2 = tx1.clone();

        tx1.try_send(1).unwrap();
        drop(tx1);
        assert!(!rx.is_disconnected());

        drop(tx2);
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn error_accessors() {
        let err = TrySendError::Full(5u8);
        assert!(err.is_full());
        assert!(!err.is_disconnected());
        assert_eq!(err.into_inner(), 5);
    }

    #[test]
    fn multi_producer() {
        let (tx, mut rx) = channel::<u64>(1024);

        let handles: Vec<_> = (0..4)
            .map(|producer| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let value = producer * 1000 + i;
                        while tx.try_send(value).is_err() {
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        drop(tx);

        let mut received = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(value) => received.push(value),
                Err(TryRecvError::Empty) => std::hint::spin_loop(),
                Err(TryRecvError::Disconnected) => break,
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(received.len(), 400);
        received.sort_unstable();
        received.dedup();
        assert_eq!(received.len(), 400, "duplicated values");
    }

    #[test]
    fn no_message_loss_on_disconnect() {
        // Messages in flight when the last sender drops must still arrive.
        for _ in 0..100 {
            let (tx, mut rx) = channel::<u64>(64);
            const N: usize = 1000;
            const PRODUCERS: usize = 4;

            let handles: Vec<_> = (0..PRODUCERS)
                .map(|_| {
                    let tx = tx.clone();
                    thread::spawn(move || {
                        for i in 0..N {
                            while tx.try_send(i as u64).is_err() {
                                std::hint::spin_loop();
                            }
                        }
                    })
                })
                .collect();

            drop(tx);

            let mut count = 0;
            loop {
                match rx.try_recv() {
                    Ok(_) => count += 1,
                    Err(TryRecvError::Empty) => std::hint::spin_loop(),
                    Err(TryRecvError::Disconnected) => break,
                }
            }

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(count, N * PRODUCERS, "lost messages");
            assert_eq!(rx.len(), 0);
        }
    }
}
