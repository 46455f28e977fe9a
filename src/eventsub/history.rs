use std::collections::VecDeque;

use crate::eventsub::proto::InboundMessage;

/// Bounded record of the most recent inbound messages.
#[derive(Debug)]
pub(crate) struct MessageHistory {
    capacity: usize,
    entries: VecDeque<InboundMessage>,
}

impl MessageHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, message: InboundMessage) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message);
    }

    /// Oldest first.
    pub(crate) fn snapshot(&self) -> Vec<InboundMessage> {
        self.entries.iter().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
