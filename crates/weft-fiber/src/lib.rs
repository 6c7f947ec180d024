//! # weft-fiber
//!
//! Cooperative fiber scheduling for the weft messaging substrate.
//!
//! This crate provides the per-OS-thread [`Scheduler`] that multiplexes
//! lightweight fibers, plus the wait primitives that let blocking code
//! suspend a *fiber* instead of its host thread:
//!
//! - [`Scheduler`]: owns one OS thread and dispatches fibers round-robin
//!   until every fiber has finished.
//! - [`Condition`]: a scheduler-aware condition variable. Waiting from
//!   fiber code parks the fiber; waiting from a plain thread parks the
//!   thread on an OS condvar. Both kinds share one FIFO queue.
//! - [`WaitQueue`]: the underlying mixed thread/fiber wait list, used by
//!   higher-level blocking structures (weft's channels build on it).
//!
//! # Example
//!
//! ```
//! use weft_fiber::Scheduler;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let ran = Arc::new(AtomicUsize::new(0));
//! let ran2 = ran.clone();
//!
//! let scheduler = Scheduler::new();
//! scheduler.start(move || {
//!     weft_fiber::spawn({
//!         let ran = ran2.clone();
//!         move || {
//!             ran.fetch_add(1, Ordering::SeqCst);
//!         }
//!     });
//!     ran2.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! assert_eq!(ran.load(Ordering::SeqCst), 2);
//! ```

mod condition;
mod scheduler;
mod waitq;

pub use condition::Condition;
pub use scheduler::{
    in_fiber, spawn, yield_now, FiberId, FiberState, Scheduler, SchedulerHandle,
};
pub use waitq::{Parker, WaitQueue};
