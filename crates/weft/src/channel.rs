//! Bounded, closable, fiber-aware message channels.
//!
//! A [`Channel`] is a FIFO queue of [`Envelope`]s with a hard capacity and
//! blocking `send`/`receive`. Capacity 0 selects rendezvous mode: a send
//! completes only once a receiver has taken the message.
//!
//! Blocking operations cooperate with the fiber scheduler: a wait issued
//! from fiber code parks the fiber (its scheduler keeps running other
//! fibers), while a wait from a plain thread parks the thread on an OS
//! condvar. Both waiter kinds line up in the same FIFO [`WaitQueue`], so
//! fairness and the broadcast-on-close guarantee hold uniformly.
//!
//! `Channel` is a handle: clones refer to the same underlying queue, and
//! handle equality is channel identity.

use crate::error::ChannelClosed;
use crate::message::Envelope;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use weft_fiber::WaitQueue;

static CHANNEL_IDS: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a channel, shared by all handle clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Returns the raw numeric id.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch:{}", self.0)
    }
}

struct State {
    buffer: VecDeque<Envelope>,
    closed: bool,
    /// Total messages taken so far. Rendezvous senders watch this counter
    /// to learn that their message was consumed.
    pops: u64,
}

struct Inner {
    id: ChannelId,
    capacity: usize,
    state: Mutex<State>,
    not_empty: WaitQueue,
    not_full: WaitQueue,
}

/// A bounded FIFO channel of [`Envelope`]s. Cheap to clone; all clones are
/// the same channel.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    /// Creates a channel. `capacity` 0 means rendezvous: each send blocks
    /// until a receiver takes the message.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ChannelId(CHANNEL_IDS.fetch_add(1, Ordering::Relaxed)),
                capacity,
                state: Mutex::new(State {
                    buffer: VecDeque::new(),
                    closed: false,
                    pops: 0,
                }),
                not_empty: WaitQueue::new(),
                not_full: WaitQueue::new(),
            }),
        }
    }

    /// This channel's stable identity.
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// The configured capacity (0 for rendezvous).
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of messages currently buffered.
    pub fn len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    /// Whether nothing is currently buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().buffer.is_empty()
    }

    /// Whether [`Channel::close`] has been called. The flag never clears.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Sends a message, blocking while the channel is full (or, in
    /// rendezvous mode, until a receiver takes it).
    ///
    /// Fails once the channel is closed; a rendezvous send whose message
    /// was not yet taken when the channel closed withdraws the message and
    /// fails too, so no send "succeeds" after close.
    pub fn send(&self, msg: Envelope) -> Result<(), ChannelClosed> {
        if self.inner.capacity == 0 {
            self.send_rendezvous(msg)
        } else {
            self.send_buffered(msg)
        }
    }

    fn send_buffered(&self, msg: Envelope) -> Result<(), ChannelClosed> {
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(ChannelClosed);
            }
            if state.buffer.len() < self.inner.capacity {
                state.buffer.push_back(msg);
                drop(state);
                self.inner.not_empty.wake_one();
                return Ok(());
            }
            self.wait(&self.inner.not_full, &mut state);
        }
    }

    fn send_rendezvous(&self, msg: Envelope) -> Result<(), ChannelClosed> {
        let mut state = self.inner.state.lock();
        // At most one message is in flight at a time; queue up for the slot.
        loop {
            if state.closed {
                return Err(ChannelClosed);
            }
            if state.buffer.is_empty() {
                break;
            }
            self.wait(&self.inner.not_full, &mut state);
        }
        state.buffer.push_back(msg);
        let taken_at = state.pops + 1;
        self.inner.not_empty.wake_one();
        while state.pops < taken_at && !state.closed {
            self.wait(&self.inner.not_full, &mut state);
        }
        if state.pops < taken_at {
            // Closed before any receiver took the message; withdraw it.
            state.buffer.pop_back();
            return Err(ChannelClosed);
        }
        Ok(())
    }

    /// Receives the next message, blocking while the channel is empty.
    ///
    /// After close, buffered messages are still delivered in order; once
    /// drained, every receive fails.
    pub fn receive(&self) -> Result<Envelope, ChannelClosed> {
        let mut state = self.inner.state.lock();
        let msg = loop {
            if let Some(msg) = state.buffer.pop_front() {
                state.pops += 1;
                break msg;
            }
            if state.closed {
                return Err(ChannelClosed);
            }
            self.wait(&self.inner.not_empty, &mut state);
        };
        drop(state);
        self.wake_senders();
        Ok(msg)
    }

    /// Non-blocking receive. Returns `None` when nothing is buffered,
    /// whether or not the channel is closed.
    pub fn try_receive(&self) -> Option<Envelope> {
        let mut state = self.inner.state.lock();
        let msg = state.buffer.pop_front()?;
        state.pops += 1;
        drop(state);
        self.wake_senders();
        Some(msg)
    }

    /// Closes the channel and wakes every blocked sender and receiver.
    /// Idempotent; buffered messages remain receivable.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        tracing::trace!(channel = %self.inner.id, "channel closed");
        self.inner.not_empty.wake_all();
        self.inner.not_full.wake_all();
    }

    /// Parks the calling context on `queue` with the state lock released,
    /// re-acquiring it before returning. Enlisting happens under the lock,
    /// so a waker that sees our state update also sees us queued.
    fn wait(&self, queue: &WaitQueue, state: &mut MutexGuard<'_, State>) {
        let parker = queue.enlist();
        MutexGuard::unlocked(state, || parker.park());
    }

    fn wake_senders(&self) {
        if self.inner.capacity == 0 {
            // The completed handoff must reach the sender whose message was
            // just taken as well as senders queued for the slot.
            self.inner.not_full.wake_all();
        } else {
            self.inner.not_full.wake_one();
        }
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Channel {}

impl std::hash::Hash for Channel {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
