//! Pipeline registry.
//!
//! Maps pipeline names (thread-derived, see
//! [`current_thread_name`](super::current_thread_name)) to live pipelines.
//! Guarded independently of the channel registry; the per-key atomicity of
//! the underlying concurrent map is all the consistency this one needs.

use crate::pipeline::{current_thread_name, MessagePipeline};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// A process-wide directory of open pipelines.
pub struct PipelineRegistry {
    pipelines: DashMap<String, Arc<MessagePipeline>>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            pipelines: DashMap::new(),
        }
    }

    /// Adds a pipeline under its own name. Returns `false` when the
    /// pipeline is closed or its name is already taken.
    pub fn register(&self, pipeline: &Arc<MessagePipeline>) -> bool {
        if pipeline.is_closed() {
            return false;
        }
        match self.pipelines.entry(pipeline.name().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                tracing::debug!(pipeline = %pipeline.name(), "pipeline registered");
                slot.insert(Arc::clone(pipeline));
                true
            }
        }
    }

    /// Removes a pipeline. Returns whether this exact pipeline was
    /// registered under its name.
    pub fn unregister(&self, pipeline: &Arc<MessagePipeline>) -> bool {
        self.pipelines
            .remove_if(pipeline.name(), |_, registered| {
                Arc::ptr_eq(registered, pipeline)
            })
            .is_some()
    }

    /// Looks a pipeline up by name.
    pub fn locate(&self, name: &str) -> Option<Arc<MessagePipeline>> {
        self.pipelines.get(name).map(|entry| entry.value().clone())
    }

    /// Looks up the pipeline named after the calling thread.
    pub fn locate_current(&self) -> Option<Arc<MessagePipeline>> {
        self.locate(&current_thread_name())
    }

    /// Number of registered pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.pipelines.clear();
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    #[test]
    fn test_register_locate_unregister() {
        let registry = PipelineRegistry::new();
        let pipeline = MessagePipeline::new(Channel::new(4));
        pipeline.open().unwrap();

        assert!(registry.register(&pipeline));
        let found = registry.locate(pipeline.name()).unwrap();
        assert!(Arc::ptr_eq(&found, &pipeline));
        assert!(Arc::ptr_eq(&registry.locate_current().unwrap(), &pipeline));

        assert!(registry.unregister(&pipeline));
        assert!(registry.locate(pipeline.name()).is_none());
        assert!(!registry.unregister(&pipeline));
    }

    #[test]
    fn test_rejects_closed_and_duplicate() {
        let registry = PipelineRegistry::new();

        let closed = MessagePipeline::new(Channel::new(4));
        assert!(!registry.register(&closed));

        // Two pipelines created on the same thread share a name; only the
        // first registration wins.
        let first = MessagePipeline::new(Channel::new(4));
        first.open().unwrap();
        let second = MessagePipeline::new(Channel::new(4));
        second.open().unwrap();

        assert!(registry.register(&first));
        assert!(!registry.register(&second));
        // Unregistering the loser must not evict the winner.
        assert!(!registry.unregister(&second));
        assert!(Arc::ptr_eq(&registry.locate(first.name()).unwrap(), &first));
    }
}
