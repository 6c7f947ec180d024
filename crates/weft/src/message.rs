//! The message envelope and its payload types.
//!
//! Every value that travels through a [`Channel`](crate::Channel) is an
//! [`Envelope`]: a tagged union of commands, responses, and lifecycle
//! signals. Envelopes are plain values: cloned on send, owned by the
//! receiver afterwards. Handlers dispatch on the variant; the substrate
//! itself only ever inspects [`Envelope::Response`] (in the pipeline's
//! query loop) and treats everything else as opaque.

use crate::channel::Channel;
use crate::pipeline::MessagePipeline;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a request, carried in a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The handler ran and rejected or failed the request.
    Failed,
    /// No response arrived before the query deadline; synthesized by the
    /// pipeline, never sent by a handler.
    Timeout,
    /// The handler produced a result.
    Success,
}

/// A request addressed to a handler, with the channel to reply on.
#[derive(Debug, Clone)]
pub struct Command {
    /// Where the matching [`Response`] must be sent.
    pub sender: Channel,
    /// Correlation id, matched against [`Response::id`].
    pub id: u64,
    /// Handler-defined method name.
    pub method: String,
    /// Method arguments, encoded by the caller.
    pub args: String,
}

impl Command {
    /// Builds a command replying to `sender`.
    pub fn new(
        sender: Channel,
        id: u64,
        method: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            id,
            method: method.into(),
            args: args.into(),
        }
    }
}

/// The answer to a [`Command`], correlated through `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// How the request concluded.
    pub status: Status,
    /// Copied from the command this responds to.
    pub id: u64,
    /// Result payload, encoded by the handler. Empty on timeout.
    pub data: String,
}

impl Response {
    /// A successful response carrying `data`.
    pub fn success(id: u64, data: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            id,
            data: data.into(),
        }
    }

    /// A failed response carrying a handler-defined reason.
    pub fn failed(id: u64, data: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            id,
            data: data.into(),
        }
    }

    /// The response a pipeline synthesizes when a query deadline passes.
    pub fn timeout(id: u64) -> Self {
        Self {
            status: Status::Timeout,
            id,
            data: String::new(),
        }
    }
}

/// Maps a mangled method name to its presentation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    /// The name as it appears on the wire.
    pub mangled_name: String,
    /// The name to show to humans.
    pub pretty_name: String,
}

/// Tells a handler to stop processing for `duration`.
///
/// Commands arriving while the handler sleeps are queued and served when
/// the directive elapses, or discarded when `drop` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeDirective {
    /// How long the handler stays dormant.
    pub duration: Duration,
    /// Discard commands received while dormant instead of queueing them.
    pub drop: bool,
}

/// The tagged union carried by every channel.
#[derive(Debug, Clone)]
pub enum Envelope {
    /// A request for a handler.
    Command(Command),
    /// The answer to a request.
    Response(Response),
    /// Method-name mapping for the receiving side.
    Filter(FilterSpec),
    /// Suspend processing for a while, queueing or dropping input.
    Time(TimeDirective),
    /// Cooperative request to terminate the receive loop.
    Shutdown,
    /// A client opened this pipeline; spawn a dispatch fiber for it.
    CreatePipe(Arc<MessagePipeline>),
    /// The pipeline's client is gone; tear the dispatch fiber down.
    DestroyPipe,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_constructors() {
        let ok = Response::success(7, "42");
        assert_eq!(ok.status, Status::Success);
        assert_eq!(ok.id, 7);
        assert_eq!(ok.data, "42");

        let failed = Response::failed(8, "no such method");
        assert_eq!(failed.status, Status::Failed);

        let timed_out = Response::timeout(9);
        assert_eq!(timed_out.status, Status::Timeout);
        assert_eq!(timed_out.id, 9);
        assert!(timed_out.data.is_empty());
    }

    #[test]
    fn test_command_round_trips_through_envelope() {
        let reply_to = Channel::new(1);
        let cmd = Command::new(reply_to.clone(), 3, "pow", "2");
        let envelope = Envelope::Command(cmd);

        match envelope {
            Envelope::Command(cmd) => {
                assert_eq!(cmd.sender, reply_to);
                assert_eq!(cmd.id, 3);
                assert_eq!(cmd.method, "pow");
                assert_eq!(cmd.args, "2");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_envelopes_are_plain_values() {
        let directive = TimeDirective {
            duration: Duration::from_millis(200),
            drop: false,
        };
        let original = Envelope::Time(directive);
        let copy = original.clone();
        match (original, copy) {
            (Envelope::Time(a), Envelope::Time(b)) => assert_eq!(a, b),
            _ => panic!("clone changed the variant"),
        }
    }
}
