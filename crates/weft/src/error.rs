//! Error types for the messaging substrate.

use thiserror::Error;

/// The channel endpoint was closed; the caller must stop using it.
///
/// Returned by [`Channel::send`](crate::Channel::send) once the channel is
/// closed, and by [`Channel::receive`](crate::Channel::receive) once the
/// channel is closed *and* drained. Pipelines propagate it unchanged from
/// their underlying channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel closed")]
pub struct ChannelClosed;
