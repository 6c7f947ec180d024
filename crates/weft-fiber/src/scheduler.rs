//! The per-thread cooperative scheduler.
//!
//! One [`Scheduler`] owns one OS thread for its whole lifetime:
//! [`Scheduler::start`] consumes the thread, dispatches fibers from a FIFO
//! ready queue, and returns once the root fiber and everything it spawned
//! have finished. Fibers suspend only at explicit points (yield, condition
//! wait, channel wait) and never migrate to another scheduler.
//!
//! Each fiber executes on a dedicated carrier thread that is gated so at
//! most one fiber of a scheduler runs at any instant. Handing the slot to a
//! fiber and getting it back both go through a condvar gate, which keeps the
//! whole mechanism in safe code while preserving the cooperative contract:
//! round-robin order, suspension only at declared points, no preemption.
//! When the ready queue is empty but fibers are still parked, the host
//! thread sleeps on an OS condvar until a cross-thread wake enqueues one;
//! it never spins.

use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

/// Identifier of a fiber, unique within its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(u64);

impl FiberId {
    /// Returns the raw numeric id.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for FiberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle states of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// Queued and waiting to be dispatched.
    Ready = 0,
    /// Currently holding the scheduler slot.
    Running = 1,
    /// Parked until a waker re-enqueues it.
    Waiting = 2,
    /// Done; will never run again.
    Finished = 3,
}

impl From<u8> for FiberState {
    fn from(v: u8) -> Self {
        match v {
            0 => FiberState::Ready,
            1 => FiberState::Running,
            2 => FiberState::Waiting,
            _ => FiberState::Finished,
        }
    }
}

/// A single-permit gate built on a mutex and condvar.
///
/// `open` deposits the permit; `pass` consumes it, blocking until one is
/// available. The permit may be deposited before the consumer arrives, so
/// no wakeup is ever lost.
struct Gate {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn open(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cv.notify_one();
    }

    fn pass(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.cv.wait(&mut flag);
        }
        *flag = false;
    }
}

/// Per-fiber bookkeeping shared between the dispatcher, the carrier thread
/// and any wakers holding a reference to the parked fiber.
pub(crate) struct FiberSlot {
    id: FiberId,
    gate: Gate,
    state: AtomicU8,
}

impl FiberSlot {
    pub(crate) fn state(&self) -> FiberState {
        FiberState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: FiberState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

struct SchedState {
    ready: VecDeque<Arc<FiberSlot>>,
    running: Option<FiberId>,
    live: usize,
}

struct Shared {
    state: Mutex<SchedState>,
    /// The host thread parks here when every live fiber is blocked.
    idle: Condvar,
    /// Handoff back from the running fiber to the dispatch loop.
    control: Gate,
    next_fiber: AtomicU64,
}

thread_local! {
    static SCHEDULER: RefCell<Option<SchedulerHandle>> = RefCell::new(None);
    static FIBER: RefCell<Option<FiberCtx>> = RefCell::new(None);
}

#[derive(Clone)]
pub(crate) struct FiberCtx {
    pub(crate) handle: SchedulerHandle,
    pub(crate) slot: Arc<FiberSlot>,
}

/// A cooperative fiber scheduler bound to one OS thread.
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Creates a scheduler. It does nothing until [`Scheduler::start`]
    /// consumes the calling thread.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedState {
                    ready: VecDeque::new(),
                    running: None,
                    live: 0,
                }),
                idle: Condvar::new(),
                control: Gate::new(),
                next_fiber: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a cloneable cross-thread handle to this scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Returns the scheduler installed on the current thread, if any.
    ///
    /// Inside `start` this is set on the host thread and on every fiber,
    /// so fiber code can spawn siblings without threading a handle around.
    pub fn current() -> Option<SchedulerHandle> {
        SCHEDULER.with(|s| s.borrow().clone())
    }

    /// Runs `entry` as the root fiber and dispatches until every fiber has
    /// finished, consuming the calling thread for the duration.
    ///
    /// Fibers spawned from inside (or from other threads holding a
    /// [`SchedulerHandle`]) join the same ready queue. When the queue is
    /// empty but parked fibers remain, the host thread blocks on a condvar
    /// until a cross-thread wake arrives.
    pub fn start<F>(self, entry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.handle();
        SCHEDULER.with(|s| *s.borrow_mut() = Some(handle.clone()));
        handle.spawn(entry);
        tracing::trace!("scheduler started");

        loop {
            let next = {
                let mut state = self.shared.state.lock();
                loop {
                    if let Some(slot) = state.ready.pop_front() {
                        break Some(slot);
                    }
                    if state.live == 0 {
                        break None;
                    }
                    self.shared.idle.wait(&mut state);
                }
            };
            let Some(slot) = next else { break };
            if slot.state() == FiberState::Finished {
                continue;
            }
            self.shared.state.lock().running = Some(slot.id);
            slot.gate.open();
            self.shared.control.pass();
        }

        SCHEDULER.with(|s| *s.borrow_mut() = None);
        tracing::trace!("scheduler drained");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable, cross-thread handle to a [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    /// Enqueues a new fiber. It runs when the dispatcher reaches it.
    ///
    /// Fibers enqueued after the scheduler has drained never run.
    pub fn spawn<F>(&self, f: F) -> FiberId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = FiberId(self.shared.next_fiber.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(FiberSlot {
            id,
            gate: Gate::new(),
            state: AtomicU8::new(FiberState::Ready as u8),
        });
        {
            let mut state = self.shared.state.lock();
            state.live += 1;
            state.ready.push_back(slot.clone());
        }
        self.shared.idle.notify_one();

        let handle = self.clone();
        thread::Builder::new()
            .name(format!("weft-fiber-{}", id.0))
            .spawn(move || carrier(handle, slot, f))
            .expect("failed to spawn fiber carrier thread");
        id
    }

    /// Id of the fiber currently holding the scheduler slot, if any.
    pub fn running(&self) -> Option<FiberId> {
        self.shared.state.lock().running
    }

    /// Re-enqueues a parked fiber. Safe to call from any thread; a fiber
    /// that already finished is ignored.
    pub(crate) fn make_ready(&self, slot: &Arc<FiberSlot>) {
        if slot.state() == FiberState::Finished {
            return;
        }
        slot.set_state(FiberState::Ready);
        {
            let mut state = self.shared.state.lock();
            state.ready.push_back(slot.clone());
        }
        self.shared.idle.notify_one();
    }
}

/// Body of a fiber's carrier thread: wait for the first dispatch, run the
/// closure, then report completion and hand the slot back.
fn carrier<F>(handle: SchedulerHandle, slot: Arc<FiberSlot>, f: F)
where
    F: FnOnce(),
{
    SCHEDULER.with(|s| *s.borrow_mut() = Some(handle.clone()));
    FIBER.with(|c| {
        *c.borrow_mut() = Some(FiberCtx {
            handle: handle.clone(),
            slot: slot.clone(),
        })
    });

    slot.gate.pass();
    slot.set_state(FiberState::Running);

    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(fiber = slot.id.as_u64(), "fiber panicked, terminating it");
    }

    slot.set_state(FiberState::Finished);
    {
        let mut state = handle.shared.state.lock();
        state.running = None;
        state.live -= 1;
    }
    handle.shared.control.open();
}

pub(crate) fn current_fiber() -> Option<FiberCtx> {
    FIBER.with(|c| c.borrow().clone())
}

/// Returns `true` when called from fiber code.
pub fn in_fiber() -> bool {
    FIBER.with(|c| c.borrow().is_some())
}

/// Spawns a fiber on the scheduler installed on the current thread.
///
/// # Panics
///
/// Panics if no scheduler is installed. Use a [`SchedulerHandle`] to spawn
/// onto a scheduler from an unrelated thread.
pub fn spawn<F>(f: F) -> FiberId
where
    F: FnOnce() + Send + 'static,
{
    Scheduler::current()
        .expect("no scheduler installed on this thread")
        .spawn(f)
}

/// Cooperatively yields: the current fiber moves to the back of the ready
/// queue and the dispatcher picks the next one.
///
/// On a thread without a scheduler this degrades to
/// [`std::thread::yield_now`], so code that interleaves polling with yields
/// behaves sensibly in both worlds.
pub fn yield_now() {
    let Some(ctx) = current_fiber() else {
        thread::yield_now();
        return;
    };
    ctx.slot.set_state(FiberState::Ready);
    {
        let mut state = ctx.handle.shared.state.lock();
        state.running = None;
        state.ready.push_back(ctx.slot.clone());
    }
    ctx.handle.shared.control.open();
    ctx.slot.gate.pass();
    ctx.slot.set_state(FiberState::Running);
}

/// Parks the current fiber until [`SchedulerHandle::make_ready`] re-enqueues
/// it. The caller must already have registered the fiber somewhere a waker
/// can find it, or the fiber sleeps forever.
pub(crate) fn suspend_current() {
    let ctx = current_fiber().expect("suspend_current called outside a fiber");
    ctx.slot.set_state(FiberState::Waiting);
    {
        let mut state = ctx.handle.shared.state.lock();
        state.running = None;
    }
    ctx.handle.shared.control.open();
    ctx.slot.gate.pass();
    ctx.slot.set_state(FiberState::Running);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[test]
    fn test_root_fiber_runs() {
        let ran = Arc::new(AtomicU64::new(0));
        let ran2 = ran.clone();

        let scheduler = Scheduler::new();
        scheduler.start(move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawned_fibers_all_run() {
        let count = Arc::new(AtomicU64::new(0));
        let count2 = count.clone();

        let scheduler = Scheduler::new();
        scheduler.start(move || {
            for _ in 0..10 {
                let count = count2.clone();
                spawn(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_yield_interleaves_round_robin() {
        let log: Arc<StdMutex<Vec<(char, u32)>>> = Arc::new(StdMutex::new(Vec::new()));
        let log2 = log.clone();

        let scheduler = Scheduler::new();
        scheduler.start(move || {
            for tag in ['a', 'b'] {
                let log = log2.clone();
                spawn(move || {
                    for round in 0..3 {
                        log.lock().unwrap().push((tag, round));
                        yield_now();
                    }
                });
            }
        });

        let log = log.lock().unwrap();
        // Both fibers yield each round, so rounds strictly alternate.
        assert_eq!(
            *log,
            vec![
                ('a', 0),
                ('b', 0),
                ('a', 1),
                ('b', 1),
                ('a', 2),
                ('b', 2)
            ]
        );
    }

    #[test]
    fn test_yield_outside_fiber_is_noop() {
        yield_now();
        assert!(!in_fiber());
    }

    #[test]
    fn test_in_fiber_inside() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen2 = seen.clone();

        let scheduler = Scheduler::new();
        scheduler.start(move || {
            if in_fiber() {
                seen2.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_fiber_does_not_kill_scheduler() {
        let survivor = Arc::new(AtomicU64::new(0));
        let survivor2 = survivor.clone();

        let scheduler = Scheduler::new();
        scheduler.start(move || {
            spawn(|| panic!("boom"));
            let survivor = survivor2.clone();
            spawn(move || {
                survivor.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(survivor.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cross_thread_wake_from_idle() {
        // A fiber parks with no ready siblings; the host thread must sleep
        // (not spin) and still pick the fiber up when an external thread
        // re-enqueues it.
        let woke = Arc::new(AtomicU64::new(0));
        let woke2 = woke.clone();

        let scheduler = Scheduler::new();
        let (ctx_tx, ctx_rx) = std::sync::mpsc::channel::<FiberCtx>();

        let waker = thread::spawn(move || {
            let ctx = ctx_rx.recv().unwrap();
            thread::sleep(Duration::from_millis(50));
            ctx.handle.make_ready(&ctx.slot);
        });

        scheduler.start(move || {
            ctx_tx.send(current_fiber().unwrap()).unwrap();
            suspend_current();
            woke2.fetch_add(1, Ordering::SeqCst);
        });

        waker.join().unwrap();
        assert_eq!(woke.load(Ordering::SeqCst), 1);
    }
}
