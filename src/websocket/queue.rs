use log::warn;
use std::collections::VecDeque;

/// Serialized messages the caller sent while the socket was not open.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<String>,
    max_len: Option<usize>,
}

impl OutboundQueue {
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            max_len,
        }
    }

    /// Appends a message, evicting the oldest one when the cap is reached.
    pub fn push(&mut self, text: String) {
        if let Some(max) = self.max_len {
            if max == 0 {
                warn!("Outbound queue disabled (cap 0); dropping message.");
                return;
            }
            while self.items.len() >= max {
                self.items.pop_front();
                warn!("Outbound queue full ({} messages); dropped oldest.", max);
            }
        }
        self.items.push_back(text);
    }

    /// Takes every queued message in FIFO order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<String> {
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_fifo_and_empties() {
        let mut queue = OutboundQueue::new(None);
        queue.push("a".into());
        queue.push("b".into());
        queue.push("c".into());
        assert_eq!(queue.drain(), vec!["a", "b", "c"]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_duplicates_are_kept() {
        let mut queue = OutboundQueue::new(None);
        queue.push("same".into());
        queue.push("same".into());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut queue = OutboundQueue::new(Some(2));
        queue.push("1".into());
        queue.push("2".into());
        queue.push("3".into());
        assert_eq!(queue.drain(), vec!["2", "3"]);
    }

    #[test]
    fn test_zero_cap_drops_everything() {
        let mut queue = OutboundQueue::new(Some(0));
        queue.push("x".into());
        assert!(queue.is_empty());
    }
}
