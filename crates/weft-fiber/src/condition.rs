//! Scheduler-aware condition variable.

use crate::waitq::WaitQueue;
use parking_lot::MutexGuard;

/// A condition variable whose `wait` suspends the current fiber instead of
/// the host thread, falling back to an OS-level park for plain threads.
///
/// Works with any `parking_lot` mutex: `wait` releases the given guard for
/// the duration of the park and re-acquires it before returning. As with
/// every condition variable, callers must re-check their predicate in a
/// loop; wakeups can be spurious from the predicate's point of view.
///
/// # Example
///
/// ```
/// use parking_lot::Mutex;
/// use weft_fiber::Condition;
///
/// let ready = Mutex::new(false);
/// let cond = Condition::new();
///
/// // Consumer side:
/// // let mut guard = ready.lock();
/// // while !*guard {
/// //     cond.wait(&mut guard);
/// // }
///
/// // Producer side:
/// *ready.lock() = true;
/// cond.notify_one();
/// ```
pub struct Condition {
    waiters: WaitQueue,
}

impl Condition {
    /// Creates a condition variable with no waiters.
    pub fn new() -> Self {
        Self {
            waiters: WaitQueue::new(),
        }
    }

    /// Atomically releases `guard`, parks the calling fiber (or thread)
    /// until notified, then re-acquires the lock.
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) {
        let parker = self.waiters.enlist();
        MutexGuard::unlocked(guard, || parker.park());
    }

    /// Wakes the oldest waiter. Returns `false` if nobody was waiting.
    pub fn notify_one(&self) -> bool {
        self.waiters.wake_one()
    }

    /// Wakes every waiter. Returns how many were woken.
    pub fn notify_all(&self) -> usize {
        self.waiters.wake_all()
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}
