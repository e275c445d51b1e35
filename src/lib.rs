//! # bitring
//!
//! A fixed-capacity, multi-producer single-consumer, lock-free, reentrant
//! ring buffer built on an atomic bitmap slot allocator.
//!
//! Most lock-free MPSC queues assume a producer, once it has claimed a
//! position, will finish its write promptly. That assumption breaks when a
//! producer can be an interrupt or signal handler preempting another push on
//! the same thread of control. Here, producers instead claim any free slot
//! from an atomic bitmap, construct into it, and only then publish the
//! slot's index into a ring of index cells, so no participant ever waits on
//! another's unbounded-latency step.
//!
//! ## Design Goals
//!
//! - Safe to push from interrupt/signal context: no locks, no unbounded
//!   spinning on another participant
//! - All operations are non-blocking `try` calls with immediate outcomes
//! - One contiguous allocation at construction, none afterwards
//! - Cache-line isolation of the contended counters
//! - Fallible, caller-supplied storage allocation
//!
//! ## Example
//!
//! ```
//! use bitring::RingBuffer;
//!
//! let mut queue = RingBuffer::<u64>::with_capacity(1024).unwrap();
//!
//! queue.try_push(42).unwrap();
//! assert_eq!(queue.pop(), Some(42));
//! assert_eq!(queue.pop(), None);
//! ```
//!
//! For threaded use the [`mpsc::channel`] constructor wraps the ring in
//! cloneable [`mpsc::Sender`] / single [`mpsc::Receiver`] handles with
//! disconnect tracking.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod alloc;
mod bitset;
pub mod mpsc;

pub use mpsc::{CreateError, Full, RingBuffer, MAX_CAPACITY};
