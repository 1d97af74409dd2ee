//! Queue for commands emitted while the channel is down.
//!
//! Every queued command is written exactly once, in emission order, on the
//! next successful connect. The queue is bounded so a long outage cannot
//! grow it without limit; a full queue is reported, never silently
//! truncated.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::protocol::Command;

// ============================================================================
// Outbox
// ============================================================================

/// Bounded FIFO of commands awaiting the next connect.
#[derive(Debug)]
pub struct Outbox {
    queue: VecDeque<Command>,
    capacity: usize,
}

impl Outbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends a command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutboxFull`] when the queue is at capacity.
    pub fn push(&mut self, command: Command) -> Result<()> {
        if self.queue.len() >= self.capacity {
            return Err(Error::outbox_full(self.capacity));
        }
        self.queue.push_back(command);
        Ok(())
    }

    /// Puts commands back at the front, ahead of anything queued since.
    ///
    /// These were already accepted once, so capacity is not enforced.
    pub fn requeue_front(&mut self, commands: Vec<Command>) {
        for command in commands.into_iter().rev() {
            self.queue.push_front(command);
        }
    }

    /// Removes and returns every queued command in order.
    pub fn drain(&mut self) -> Vec<Command> {
        self.queue.drain(..).collect()
    }

    /// Number of queued commands.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::StarId;

    fn claim(id: &str) -> Command {
        Command::ClaimStar {
            star_id: StarId::from(id),
        }
    }

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let mut outbox = Outbox::new(10);
        outbox.push(claim("a")).expect("push");
        outbox.push(claim("b")).expect("push");

        assert_eq!(outbox.drain(), vec![claim("a"), claim("b")]);
        assert!(outbox.is_empty());
        assert!(outbox.drain().is_empty());
    }

    #[test]
    fn test_capacity() {
        let mut outbox = Outbox::new(2);
        outbox.push(claim("a")).expect("push");
        outbox.push(claim("b")).expect("push");

        let err = outbox.push(claim("c")).expect_err("full");
        assert!(matches!(err, Error::OutboxFull { capacity: 2 }));
        assert_eq!(outbox.len(), 2);
    }

    #[test]
    fn test_requeue_front_goes_first() {
        let mut outbox = Outbox::new(2);
        outbox.push(claim("late")).expect("push");
        outbox.requeue_front(vec![claim("x"), claim("y")]);

        assert_eq!(outbox.drain(), vec![claim("x"), claim("y"), claim("late")]);
    }
}
