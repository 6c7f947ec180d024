//! Worker thread spawning.
//!
//! [`spawn_thread`] is how a node process comes to life: it allocates the
//! worker's inbox channel, starts an OS thread with a fresh fiber scheduler
//! installed, and runs the entry closure as the root fiber. The caller gets
//! the inbox handle back and talks to the worker exclusively through it.

use crate::channel::Channel;
use std::thread;
use weft_fiber::Scheduler;

/// Inbox capacity used by [`spawn_thread`].
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Spawns a worker thread with its own fiber scheduler and inbox.
///
/// The entry closure runs as the scheduler's root fiber and receives the
/// inbox plus `args`. Both bounds are `Send + 'static`, which is what keeps
/// a worker from aliasing the parent thread's local state through the
/// payload. The worker thread is detached: its lifetime is governed by its
/// receive loop, conventionally terminated by a
/// [`Shutdown`](crate::Envelope::Shutdown) message or by closing the inbox.
///
/// # Example
///
/// ```
/// use weft::{spawn_thread, Channel, Envelope};
///
/// let inbox = spawn_thread(
///     |inbox: Channel, greeting: String| {
///         while let Ok(envelope) = inbox.receive() {
///             if let Envelope::Shutdown = envelope {
///                 break;
///             }
///             let _ = greeting.as_str();
///         }
///     },
///     String::from("hello"),
/// );
///
/// inbox.send(Envelope::Shutdown).unwrap();
/// ```
pub fn spawn_thread<A, F>(entry: F, args: A) -> Channel
where
    A: Send + 'static,
    F: FnOnce(Channel, A) + Send + 'static,
{
    spawn_thread_with_capacity(DEFAULT_INBOX_CAPACITY, entry, args)
}

/// [`spawn_thread`] with an explicit inbox capacity.
pub fn spawn_thread_with_capacity<A, F>(capacity: usize, entry: F, args: A) -> Channel
where
    A: Send + 'static,
    F: FnOnce(Channel, A) + Send + 'static,
{
    let inbox = Channel::new(capacity);
    let worker_inbox = inbox.clone();
    thread::Builder::new()
        .name("weft-worker".to_string())
        .spawn(move || {
            tracing::trace!(inbox = %worker_inbox.id(), "worker thread starting");
            let scheduler = Scheduler::new();
            scheduler.start(move || entry(worker_inbox, args));
        })
        .expect("failed to spawn worker thread");
    inbox
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Command, Envelope, Response};
    use std::time::Duration;

    #[test]
    fn test_worker_receives_on_its_inbox() {
        let inbox = spawn_thread(
            |inbox: Channel, ()| {
                while let Ok(envelope) = inbox.receive() {
                    match envelope {
                        Envelope::Command(cmd) => {
                            let _ = cmd
                                .sender
                                .send(Envelope::Response(Response::success(cmd.id, "ack")));
                        }
                        Envelope::Shutdown => break,
                        _ => {}
                    }
                }
                inbox.close();
            },
            (),
        );

        let reply_to = Channel::new(4);
        inbox
            .send(Envelope::Command(Command::new(reply_to.clone(), 5, "ping", "")))
            .unwrap();
        match reply_to.receive().unwrap() {
            Envelope::Response(res) => {
                assert_eq!(res.id, 5);
                assert_eq!(res.data, "ack");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }

        inbox.send(Envelope::Shutdown).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while !inbox.is_closed() {
            assert!(std::time::Instant::now() < deadline, "worker did not stop");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_args_reach_the_entry() {
        let reply_to = Channel::new(1);
        let _inbox = spawn_thread(
            |_inbox: Channel, (reply, value): (Channel, u64)| {
                let _ = reply.send(Envelope::Response(Response::success(value, "")));
            },
            (reply_to.clone(), 99u64),
        );

        match reply_to.receive().unwrap() {
            Envelope::Response(res) => assert_eq!(res.id, 99),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
