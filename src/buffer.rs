use std::collections::VecDeque;

/// Bounded FIFO that hands back its whole contents once it fills up.
///
/// This is a pure batch: there is no sliding window and no partial drain.
#[derive(Clone, Debug)]
pub struct ReplayBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> ReplayBuffer<T> {
    /// # Panics
    /// Panics if `capacity` is zero; `AgentConfig::validate` rejects that case.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "replay buffer capacity must be > 0");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `item`. Returns the full batch, in insertion order, exactly when the
    /// buffer reaches capacity; the buffer is empty afterwards.
    pub fn push_and_maybe_drain(&mut self, item: T) -> Option<Vec<T>> {
        self.items.push_back(item);
        if self.items.len() == self.capacity {
            Some(self.items.drain(..).collect())
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}
