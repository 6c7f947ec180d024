//! Mixed thread/fiber wait queue.
//!
//! A [`WaitQueue`] is the parking lot behind every blocking primitive in
//! weft. Callers *enlist* before releasing the state they were inspecting,
//! then park on the returned [`Parker`]; wakers pop entries in FIFO order.
//! What "park" means depends on who is waiting: fiber code surrenders the
//! scheduler slot so the host thread can run other fibers, while a plain
//! thread blocks on an OS condvar. Wakers never need to care which kind
//! they are releasing.
//!
//! The enlist-then-park split makes the classic condition discipline work
//! without a shared mutex type: enlisting happens while the caller still
//! holds its state lock, so a waker that observes the new state after that
//! lock is released is guaranteed to find the waiter in the queue. A wake
//! that lands between enlist and park is not lost: the parker's permit is
//! already deposited and `park` returns immediately.

use crate::scheduler::{self, FiberCtx};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// One-shot token a plain thread parks on.
struct ThreadToken {
    woken: Mutex<bool>,
    cv: Condvar,
}

impl ThreadToken {
    fn new() -> Self {
        Self {
            woken: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn block(&self) {
        let mut woken = self.woken.lock();
        while !*woken {
            self.cv.wait(&mut woken);
        }
    }

    fn release(&self) {
        let mut woken = self.woken.lock();
        *woken = true;
        self.cv.notify_one();
    }
}

enum Waker {
    Thread(Arc<ThreadToken>),
    Fiber(FiberCtx),
}

impl Waker {
    fn wake(self) {
        match self {
            Waker::Thread(token) => token.release(),
            Waker::Fiber(ctx) => ctx.handle.make_ready(&ctx.slot),
        }
    }
}

/// Handle returned by [`WaitQueue::enlist`]; park on it after releasing
/// the lock that guarded the state you checked.
pub struct Parker(ParkerInner);

enum ParkerInner {
    Thread(Arc<ThreadToken>),
    Fiber,
}

impl Parker {
    /// Blocks until the matching queue entry is woken. For a fiber this
    /// parks the fiber; for a plain thread it parks the thread.
    pub fn park(self) {
        match self.0 {
            ParkerInner::Thread(token) => token.block(),
            ParkerInner::Fiber => scheduler::suspend_current(),
        }
    }
}

/// FIFO queue of parked waiters, fibers and plain threads alike.
pub struct WaitQueue {
    waiters: Mutex<VecDeque<Waker>>,
}

impl WaitQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Registers the calling context at the back of the queue and returns
    /// the parker to block on. Call this while still holding the lock that
    /// protects the awaited state.
    pub fn enlist(&self) -> Parker {
        match scheduler::current_fiber() {
            Some(ctx) => {
                self.waiters.lock().push_back(Waker::Fiber(ctx));
                Parker(ParkerInner::Fiber)
            }
            None => {
                let token = Arc::new(ThreadToken::new());
                self.waiters.lock().push_back(Waker::Thread(token.clone()));
                Parker(ParkerInner::Thread(token))
            }
        }
    }

    /// Wakes the oldest waiter. Returns `false` if the queue was empty.
    pub fn wake_one(&self) -> bool {
        let waker = self.waiters.lock().pop_front();
        match waker {
            Some(waker) => {
                waker.wake();
                true
            }
            None => false,
        }
    }

    /// Wakes every queued waiter, oldest first. Returns how many were woken.
    pub fn wake_all(&self) -> usize {
        let drained: Vec<Waker> = {
            let mut waiters = self.waiters.lock();
            waiters.drain(..).collect()
        };
        let count = drained.len();
        for waker in drained {
            waker.wake();
        }
        count
    }

    /// Number of currently queued waiters.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Whether no one is queued.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
