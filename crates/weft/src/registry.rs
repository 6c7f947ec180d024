//! Named channel registry.
//!
//! Maps human-readable names to channel handles so workers can find each
//! other without passing handles around. One channel may carry several
//! names; a name points at exactly one channel. Forward (`name -> channel`)
//! and reverse (`channel -> names`) maps are kept consistent under a single
//! mutex.
//!
//! The registry never watches channels for closure: registering a closed
//! channel is rejected, but a channel that closes *after* registration
//! stays listed until someone unregisters it.

use crate::channel::{Channel, ChannelId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct Maps {
    by_name: HashMap<String, Channel>,
    names: HashMap<ChannelId, HashSet<String>>,
}

/// A process-wide name-to-channel directory.
///
/// Usually accessed through [`crate::global`], but freestanding instances
/// are handy in tests and embedded setups.
pub struct ChannelRegistry {
    maps: Mutex<Maps>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            maps: Mutex::new(Maps::default()),
        }
    }

    /// Looks a name up. Names are case-sensitive.
    pub fn locate(&self, name: &str) -> Option<Channel> {
        self.maps.lock().by_name.get(name).cloned()
    }

    /// Binds `name` to `channel`. Returns `false` when the name is empty,
    /// already bound, or the channel is closed.
    pub fn register(&self, name: impl Into<String>, channel: &Channel) -> bool {
        let name = name.into();
        if name.is_empty() || channel.is_closed() {
            return false;
        }
        let mut maps = self.maps.lock();
        if maps.by_name.contains_key(&name) {
            return false;
        }
        maps.names
            .entry(channel.id())
            .or_default()
            .insert(name.clone());
        tracing::debug!(name = %name, channel = %channel.id(), "channel registered");
        maps.by_name.insert(name, channel.clone());
        true
    }

    /// Removes a name binding. Returns whether the name existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut maps = self.maps.lock();
        let Some(channel) = maps.by_name.remove(name) else {
            return false;
        };
        if let Some(names) = maps.names.get_mut(&channel.id()) {
            names.remove(name);
            if names.is_empty() {
                maps.names.remove(&channel.id());
            }
        }
        tracing::debug!(name = %name, channel = %channel.id(), "channel unregistered");
        true
    }

    /// All names currently bound to `channel`, sorted.
    pub fn names_of(&self, channel: &Channel) -> Vec<String> {
        let maps = self.maps.lock();
        let mut names: Vec<String> = maps
            .names
            .get(&channel.id())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of bound names.
    pub fn len(&self) -> usize {
        self.maps.lock().by_name.len()
    }

    /// Whether no names are bound.
    pub fn is_empty(&self) -> bool {
        self.maps.lock().by_name.is_empty()
    }

    /// Drops every binding.
    pub fn clear(&self) {
        let mut maps = self.maps.lock();
        maps.by_name.clear();
        maps.names.clear();
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
