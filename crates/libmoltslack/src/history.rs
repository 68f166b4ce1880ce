use std::collections::VecDeque;

use moltslack_protocol::Event;

/// Ordered event history that evicts its oldest entries beyond `capacity`.
#[derive(Debug)]
pub struct EventHistory {
    events: VecDeque<Event>,
    capacity: usize,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
        while self.events.len() > self.capacity {
            let _ = self.events.pop_front();
        }
    }

    /// The last `limit` events, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<Event> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::EventHistory;
    use moltslack_protocol::{Event, EventPayload};

    fn output(n: u64) -> Event {
        Event::new(
            EventPayload::Output {
                text: n.to_string(),
            },
            n,
        )
    }

    #[test]
    fn evicts_oldest_first() {
        let mut history = EventHistory::new(2);
        history.push(output(1));
        history.push(output(2));
        history.push(output(3));

        assert_eq!(history.len(), 2);
        let all = history.tail(10);
        assert_eq!(all[0].timestamp_ms, 2);
        assert_eq!(all[1].timestamp_ms, 3);
    }

    #[test]
    fn tail_is_bounded_and_ordered() {
        let mut history = EventHistory::new(8);
        for n in 1..=5 {
            history.push(output(n));
        }
        let tail = history.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].timestamp_ms, 4);
        assert_eq!(tail[1].timestamp_ms, 5);
        assert!(history.tail(0).is_empty());
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut history = EventHistory::new(0);
        history.push(output(1));
        history.push(output(2));
        assert_eq!(history.len(), 1);
        assert_eq!(history.tail(5)[0].timestamp_ms, 2);
    }
}
