use homewave_core::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

/// Mesh-wide floor between consecutive polls, regardless of how many
/// nodes are enabled.
pub const MIN_POLL_SPACING: Duration = Duration::from_secs(1);

/// Round-robins the poll-enabled nodes so the whole set is visited once
/// per interval, never faster than one poll per second.
pub struct PollScheduler {
    interval: Duration,
    nodes: Vec<NodeId>,
    cursor: usize,
    next_due: Instant,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            nodes: Vec::new(),
            cursor: 0,
            next_due: Instant::now(),
        }
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn enable(&mut self, node: NodeId) -> bool {
        if self.nodes.contains(&node) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    pub fn disable(&mut self, node: NodeId) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| *n != node);
        if self.cursor >= self.nodes.len() {
            self.cursor = 0;
        }
        self.nodes.len() != before
    }

    pub fn is_enabled(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn is_active(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    /// Picks the node to poll now and schedules the next slot.
    pub fn tick(&mut self, now: Instant) -> Option<NodeId> {
        if self.nodes.is_empty() {
            return None;
        }
        let node = self.nodes[self.cursor % self.nodes.len()];
        self.cursor = (self.cursor + 1) % self.nodes.len();

        let spacing = self.interval / self.nodes.len() as u32;
        self.next_due = now + spacing.max(MIN_POLL_SPACING);
        Some(node)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_robin_and_rate_limit() {
        let mut poll = PollScheduler::new(Duration::from_secs(2));
        poll.enable(NodeId::new(2));
        poll.enable(NodeId::new(3));
        poll.enable(NodeId::new(4));
        assert!(!poll.enable(NodeId::new(2)));

        let start = Instant::now();
        assert_eq!(poll.tick(start), Some(NodeId::new(2)));
        // 2s / 3 nodes would be ~667ms; the 1s floor wins
        assert_eq!(poll.next_due() - start, MIN_POLL_SPACING);
        assert_eq!(poll.tick(start), Some(NodeId::new(3)));
        assert_eq!(poll.tick(start), Some(NodeId::new(4)));
        assert_eq!(poll.tick(start), Some(NodeId::new(2)));
    }

    #[test]
    fn test_disable() {
        let mut poll = PollScheduler::new(Duration::from_secs(30));
        poll.enable(NodeId::new(2));
        assert!(poll.disable(NodeId::new(2)));
        assert!(!poll.disable(NodeId::new(2)));
        assert!(!poll.is_active());
        assert_eq!(poll.tick(Instant::now()), None);
    }
}
