//! Request/response pipelines over channel pairs.
//!
//! A [`MessagePipeline`] joins a client to a server: it references the
//! server's inbox (`root`) and owns a `consumer` channel (client → server)
//! and a `producer` channel (server → client). Opening the pipeline
//! announces it on `root` with [`Envelope::CreatePipe`]; the server is
//! expected to spawn a dispatch fiber that serves the pipeline's consumer
//! side until [`Envelope::DestroyPipe`] arrives.
//!
//! [`MessagePipeline::query`] is the client-side round trip: send a
//! command, poll the producer for the response with the matching id, give
//! the fiber up between polls, and synthesize a
//! [`Status::Timeout`](crate::Status::Timeout) response when the deadline
//! passes. One request is in flight at a time; anything else arriving on
//! the producer while a query runs is discarded.

mod registry;

pub use registry::PipelineRegistry;

use crate::channel::Channel;
use crate::error::ChannelClosed;
use crate::message::{Command, Envelope, Response};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Buffer depth of a pipeline's producer and consumer channels.
const PIPE_CAPACITY: usize = 16;

/// How long a non-fiber client sleeps between response polls.
const POLL_INTERVAL: Duration = Duration::from_micros(50);

static REQUEST_IDS: AtomicU64 = AtomicU64::new(0);

static THREAD_ORDINALS: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ORDINAL: u64 = THREAD_ORDINALS.fetch_add(1, Ordering::Relaxed);
}

/// Next process-wide request id.
///
/// A single monotone counter for the whole process, so ids never collide
/// across pipelines and a stale reply can never match a fresh request.
pub fn next_request_id() -> u64 {
    REQUEST_IDS.fetch_add(1, Ordering::Relaxed)
}

/// The pipeline name of the calling thread: its process-assigned ordinal
/// rendered in hex. Stable for the thread's lifetime.
pub fn current_thread_name() -> String {
    THREAD_ORDINAL.with(|ordinal| format!("{ordinal:x}"))
}

struct Lifecycle {
    closed: bool,
    closing_soon: bool,
    /// Set on first `open`; a closed pipeline never reopens.
    ever_opened: bool,
}

type CloseHook = Box<dyn FnOnce() + Send>;

/// A client's request/response conduit to one server.
///
/// Constructed closed; [`open`](MessagePipeline::open) makes it usable.
/// Calling [`query`](MessagePipeline::query) or
/// [`reply`](MessagePipeline::reply) on a closed pipeline is a programmer
/// error and panics.
pub struct MessagePipeline {
    /// Back-reference to the owning `Arc`, so `open` can put a handle to
    /// this pipeline inside the announcement envelope.
    this: Weak<MessagePipeline>,
    root: Channel,
    producer: Channel,
    consumer: Channel,
    name: String,
    lifecycle: Mutex<Lifecycle>,
    busy: AtomicBool,
    on_close: Mutex<Option<CloseHook>>,
}

impl MessagePipeline {
    /// Creates a pipeline bound to a server's inbox, named after the
    /// calling thread. The pipeline starts closed.
    pub fn new(root: Channel) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            root,
            producer: Channel::new(PIPE_CAPACITY),
            consumer: Channel::new(PIPE_CAPACITY),
            name: current_thread_name(),
            lifecycle: Mutex::new(Lifecycle {
                closed: true,
                closing_soon: false,
                ever_opened: false,
            }),
            busy: AtomicBool::new(false),
            on_close: Mutex::new(None),
        })
    }

    /// The pipeline's name (hex ordinal of the owning thread).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The server inbox this pipeline announces itself on.
    pub fn root(&self) -> &Channel {
        &self.root
    }

    /// Server → client channel. The server's dispatch fiber replies here.
    pub fn producer(&self) -> &Channel {
        &self.producer
    }

    /// Client → server channel. The server's dispatch fiber receives here.
    pub fn consumer(&self) -> &Channel {
        &self.consumer
    }

    /// Whether the pipeline is closed (its initial state).
    pub fn is_closed(&self) -> bool {
        self.lifecycle.lock().closed
    }

    /// Whether a query is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Advisory flag: the owner intends to close soon.
    pub fn is_closing_soon(&self) -> bool {
        self.lifecycle.lock().closing_soon
    }

    /// Sets the advisory closing-soon flag.
    pub fn set_closing_soon(&self, value: bool) {
        self.lifecycle.lock().closing_soon = value;
    }

    /// Reserves the next request id. See [`next_request_id`].
    pub fn next_id(&self) -> u64 {
        next_request_id()
    }

    /// Installs a hook invoked exactly once when the pipeline closes,
    /// replacing any previous hook.
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.on_close.lock() = Some(Box::new(hook));
    }

    /// Announces the pipeline on `root` and marks it open.
    ///
    /// The server reacts to the [`Envelope::CreatePipe`] by spawning a
    /// dispatch fiber bound to this pipeline. The announcement send happens
    /// outside the lifecycle lock and may block if `root` is full.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline is already open, or was closed: closed is a
    /// terminal state.
    pub fn open(&self) -> Result<(), ChannelClosed> {
        {
            let lifecycle = self.lifecycle.lock();
            assert!(
                lifecycle.closed,
                "pipeline {} is already open",
                self.name
            );
            assert!(
                !lifecycle.ever_opened,
                "pipeline {} cannot be reopened",
                self.name
            );
        }
        let this = self.this.upgrade().expect("pipeline outlived its Arc");
        self.root.send(Envelope::CreatePipe(this))?;
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.closed = false;
            lifecycle.ever_opened = true;
        }
        tracing::debug!(pipeline = %self.name, "pipeline opened");
        Ok(())
    }

    /// Marks the pipeline closed, tells the server's dispatch fiber to
    /// stand down, and runs the close hook. Idempotent.
    pub fn close(&self) -> Result<(), ChannelClosed> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.closed {
                return Ok(());
            }
            lifecycle.closed = true;
        }
        let result = self.consumer.send(Envelope::DestroyPipe);
        if let Some(hook) = self.on_close.lock().take() {
            hook();
        }
        tracing::debug!(pipeline = %self.name, "pipeline closed");
        result
    }

    /// Sends `req` to the server and waits for the response whose id
    /// matches `req.id`.
    ///
    /// A zero `timeout` waits forever. Otherwise the deadline is measured
    /// against a monotonic clock and, once it passes, a synthesized
    /// [`Response::timeout`] is returned; the pipeline stays open and the
    /// caller decides what to do. Envelopes that are not the awaited
    /// response are discarded; one request is in flight at a time. Between
    /// polls the calling fiber yields (a plain thread briefly sleeps).
    ///
    /// # Panics
    ///
    /// Panics when the pipeline is closed or another query is in flight.
    pub fn query(&self, req: Command, timeout: Duration) -> Result<Response, ChannelClosed> {
        assert!(!self.is_closed(), "query on closed pipeline {}", self.name);
        assert!(
            !self.busy.swap(true, Ordering::AcqRel),
            "pipeline {} already has a request in flight",
            self.name
        );
        let _busy = BusyGuard(&self.busy);

        let id = req.id;
        self.consumer.send(Envelope::Command(req))?;

        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        loop {
            while let Some(envelope) = self.producer.try_receive() {
                match envelope {
                    Envelope::Response(res) if res.id == id => return Ok(res),
                    other => {
                        tracing::trace!(
                            pipeline = %self.name,
                            id,
                            "discarding unmatched envelope: {other:?}"
                        );
                    }
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    tracing::warn!(pipeline = %self.name, id, "query timed out");
                    return Ok(Response::timeout(id));
                }
            }
            if weft_fiber::in_fiber() {
                weft_fiber::yield_now();
            } else {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    /// Sends a response back to the client. Called by the server's
    /// dispatch fiber.
    ///
    /// # Panics
    ///
    /// Panics when the pipeline is closed.
    pub fn reply(&self, res: Response) -> Result<(), ChannelClosed> {
        assert!(!self.is_closed(), "reply on closed pipeline {}", self.name);
        self.producer.send(Envelope::Response(res))
    }
}

impl fmt::Debug for MessagePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePipeline")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// Clears the busy flag when a query returns, panics included.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Status;
    use std::thread;

    #[test]
    fn test_request_ids_are_monotone() {
        let a = next_request_id();
        let b = next_request_id();
        let c = next_request_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_thread_names_are_stable_and_distinct() {
        let here = current_thread_name();
        assert_eq!(here, current_thread_name());
        let there = thread::spawn(current_thread_name).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_starts_closed_and_open_announces() {
        let root = Channel::new(4);
        let pipeline = MessagePipeline::new(root.clone());
        assert!(pipeline.is_closed());
        assert!(!pipeline.is_busy());

        pipeline.open().unwrap();
        assert!(!pipeline.is_closed());
        match root.receive().unwrap() {
            Envelope::CreatePipe(announced) => {
                assert!(Arc::ptr_eq(&announced, &pipeline));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_close_notifies_consumer_and_runs_hook() {
        let root = Channel::new(4);
        let pipeline = MessagePipeline::new(root);
        pipeline.open().unwrap();

        let hook_ran = Arc::new(AtomicBool::new(false));
        {
            let hook_ran = hook_ran.clone();
            pipeline.on_close(move || hook_ran.store(true, Ordering::SeqCst));
        }

        pipeline.close().unwrap();
        assert!(pipeline.is_closed());
        assert!(hook_ran.load(Ordering::SeqCst));
        assert!(matches!(
            pipeline.consumer().try_receive(),
            Some(Envelope::DestroyPipe)
        ));

        // Second close is a no-op: no second DestroyPipe, hook not re-run.
        pipeline.close().unwrap();
        assert!(pipeline.consumer().try_receive().is_none());
    }

    #[test]
    #[should_panic(expected = "query on closed pipeline")]
    fn test_query_on_closed_pipeline_panics() {
        let pipeline = MessagePipeline::new(Channel::new(1));
        let reply_to = Channel::new(1);
        let _ = pipeline.query(
            Command::new(reply_to, 0, "pow", "2"),
            Duration::from_millis(10),
        );
    }

    #[test]
    #[should_panic(expected = "reply on closed pipeline")]
    fn test_reply_on_closed_pipeline_panics() {
        let pipeline = MessagePipeline::new(Channel::new(1));
        let _ = pipeline.reply(Response::success(0, ""));
    }

    #[test]
    #[should_panic(expected = "already open")]
    fn test_double_open_panics() {
        let pipeline = MessagePipeline::new(Channel::new(4));
        pipeline.open().unwrap();
        let _ = pipeline.open();
    }

    #[test]
    #[should_panic(expected = "cannot be reopened")]
    fn test_reopen_after_close_panics() {
        let pipeline = MessagePipeline::new(Channel::new(4));
        pipeline.open().unwrap();
        pipeline.close().unwrap();
        let _ = pipeline.open();
    }

    #[test]
    fn test_query_matches_response_by_id() {
        let root = Channel::new(4);
        let pipeline = MessagePipeline::new(root);
        pipeline.open().unwrap();

        let server = {
            let pipeline = pipeline.clone();
            thread::spawn(move || {
                match pipeline.consumer().receive().unwrap() {
                    Envelope::Command(cmd) => {
                        // A stale response first; the query must skip it.
                        pipeline
                            .reply(Response::success(cmd.id.wrapping_add(1000), "stale"))
                            .unwrap();
                        pipeline.reply(Response::success(cmd.id, "fresh")).unwrap();
                    }
                    other => panic!("unexpected envelope: {other:?}"),
                }
            })
        };

        let id = pipeline.next_id();
        let reply_to = Channel::new(1);
        let res = pipeline
            .query(
                Command::new(reply_to, id, "pow", "2"),
                Duration::from_secs(2),
            )
            .unwrap();
        assert_eq!(res.id, id);
        assert_eq!(res.status, Status::Success);
        assert_eq!(res.data, "fresh");
        assert!(!pipeline.is_busy());
        server.join().unwrap();
    }

    #[test]
    fn test_query_timeout_synthesizes_response() {
        let root = Channel::new(4);
        let pipeline = MessagePipeline::new(root);
        pipeline.open().unwrap();

        let started = Instant::now();
        let reply_to = Channel::new(1);
        let res = pipeline
            .query(
                Command::new(reply_to, 42, "pow", "2"),
                Duration::from_millis(100),
            )
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(res.status, Status::Timeout);
        assert_eq!(res.id, 42);
        assert!(res.data.is_empty());
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(500));
        // A timed-out query leaves the pipeline open and idle.
        assert!(!pipeline.is_closed());
        assert!(!pipeline.is_busy());
    }
}
