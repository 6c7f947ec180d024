//! # weft: an in-process actor-style messaging substrate
//!
//! weft gives cooperatively scheduled workers a way to talk: bounded, typed,
//! closable channels whose blocking operations park *fibers* rather than OS
//! threads, a worker spawner that equips every thread with its own fiber
//! scheduler and inbox, process-wide name registries for discovery, and a
//! request/response pipeline with id-matched queries and timeouts.
//!
//! # Overview
//!
//! - [`Envelope`]: the tagged message union of commands, responses, and
//!   lifecycle signals ([`Envelope::Shutdown`], [`Envelope::CreatePipe`], …).
//! - [`Channel`]: a bounded FIFO with blocking `send`/`receive`, rendezvous
//!   mode at capacity 0, and broadcast wakeup on `close`.
//! - [`spawn_thread`]: starts a worker OS thread with a fresh
//!   [`fiber::Scheduler`] installed and hands back its inbox channel.
//! - [`ChannelRegistry`] / [`PipelineRegistry`]: name → handle directories,
//!   reachable process-wide through [`global`] after [`init`].
//! - [`MessagePipeline`]: couples a request and a response channel to one
//!   server, correlating replies by request id, with per-query timeouts.
//!
//! # Quick start
//!
//! ```
//! use weft::{spawn_thread, Channel, Command, Envelope, Response, Status};
//!
//! // A worker that squares numbers until told to shut down.
//! let inbox = spawn_thread(
//!     |inbox: Channel, ()| {
//!         while let Ok(envelope) = inbox.receive() {
//!             match envelope {
//!                 Envelope::Command(cmd) => {
//!                     let n: i64 = cmd.args.parse().unwrap_or(0);
//!                     let reply = Response::success(cmd.id, (n * n).to_string());
//!                     let _ = cmd.sender.send(Envelope::Response(reply));
//!                 }
//!                 Envelope::Shutdown => break,
//!                 _ => {}
//!             }
//!         }
//!     },
//!     (),
//! );
//!
//! let reply_to = Channel::new(8);
//! inbox
//!     .send(Envelope::Command(Command::new(reply_to.clone(), 0, "pow", "2")))
//!     .unwrap();
//!
//! match reply_to.receive().unwrap() {
//!     Envelope::Response(res) => {
//!         assert_eq!(res.status, Status::Success);
//!         assert_eq!(res.data, "4");
//!     }
//!     _ => unreachable!(),
//! }
//! inbox.send(Envelope::Shutdown).unwrap();
//! ```

pub mod channel;
pub mod error;
pub mod global;
pub mod message;
pub mod pipeline;
pub mod registry;
pub mod spawn;

/// The cooperative fiber scheduler, re-exported for direct use.
pub use weft_fiber as fiber;

pub use channel::{Channel, ChannelId};
pub use error::ChannelClosed;
pub use global::{init, locate, register, shutdown, unregister};
pub use message::{Command, Envelope, FilterSpec, Response, Status, TimeDirective};
pub use pipeline::{current_thread_name, next_request_id, MessagePipeline, PipelineRegistry};
pub use registry::ChannelRegistry;
pub use spawn::{spawn_thread, spawn_thread_with_capacity, DEFAULT_INBOX_CAPACITY};

/// Prelude module for convenient imports.
///
/// ```
/// use weft::prelude::*;
/// ```
pub mod prelude {
    pub use crate::channel::{Channel, ChannelId};
    pub use crate::error::ChannelClosed;
    pub use crate::message::{Command, Envelope, FilterSpec, Response, Status, TimeDirective};
    pub use crate::pipeline::{MessagePipeline, PipelineRegistry};
    pub use crate::registry::ChannelRegistry;
    pub use crate::spawn::{spawn_thread, spawn_thread_with_capacity};
    pub use weft_fiber::{Condition, Scheduler, SchedulerHandle};
}
