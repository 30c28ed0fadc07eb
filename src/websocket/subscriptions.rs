use std::collections::HashSet;

/// Channels the caller wants active. Survives reconnects; cleared only by
/// `disconnect()`.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    channels: HashSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the channel was not tracked before.
    pub fn insert(&mut self, channel: &str) -> bool {
        self.channels.insert(channel.to_string())
    }

    /// Returns `true` if the channel was tracked.
    pub fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(channel)
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    /// Snapshot of the tracked channels, sorted for stable output.
    pub fn snapshot(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.iter().cloned().collect();
        channels.sort();
        channels
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
