//! Process-global registries with explicit lifecycle.
//!
//! The named channel registry and the pipeline registry are the two
//! unavoidable process-wide values in the substrate. They live here behind
//! an explicit [`init`] rather than springing into being on first touch:
//! a process that forgets to initialize fails loudly instead of silently
//! registering into a registry nobody else looks at.

use crate::pipeline::PipelineRegistry;
use crate::registry::ChannelRegistry;
use crate::Channel;
use std::sync::OnceLock;

struct Registries {
    channels: ChannelRegistry,
    pipelines: PipelineRegistry,
}

static REGISTRIES: OnceLock<Registries> = OnceLock::new();

/// Initializes the global registries. Idempotent; call once at startup.
pub fn init() {
    REGISTRIES.get_or_init(|| {
        tracing::debug!("global registries initialized");
        Registries {
            channels: ChannelRegistry::new(),
            pipelines: PipelineRegistry::new(),
        }
    });
}

/// Clears both registries. The handles they held are dropped; channels are
/// closed by their owners, not by the registry.
pub fn shutdown() {
    if let Some(registries) = REGISTRIES.get() {
        registries.channels.clear();
        registries.pipelines.clear();
        tracing::debug!("global registries cleared");
    }
}

fn registries() -> &'static Registries {
    REGISTRIES
        .get()
        .expect("weft not initialized; call weft::init() first")
}

/// The global named channel registry.
///
/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn channels() -> &'static ChannelRegistry {
    &registries().channels
}

/// The global pipeline registry.
///
/// # Panics
///
/// Panics if [`init`] has not been called.
pub fn pipelines() -> &'static PipelineRegistry {
    &registries().pipelines
}

/// Looks a name up in the global channel registry.
pub fn locate(name: &str) -> Option<Channel> {
    channels().locate(name)
}

/// Registers a name in the global channel registry.
pub fn register(name: impl Into<String>, channel: &Channel) -> bool {
    channels().register(name, channel)
}

/// Removes a name from the global channel registry.
pub fn unregister(name: &str) -> bool {
    channels().unregister(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test only: `shutdown` clears the whole process-global registry,
    // which would race against sibling tests registering names.
    #[test]
    fn test_lifecycle() {
        init();
        init();
        let ch = Channel::new(1);
        assert!(register("global-lifecycle-test", &ch));
        assert_eq!(locate("global-lifecycle-test"), Some(ch.clone()));
        assert!(unregister("global-lifecycle-test"));

        assert!(register("global-lifecycle-test", &ch));
        shutdown();
        assert_eq!(locate("global-lifecycle-test"), None);
    }
}
