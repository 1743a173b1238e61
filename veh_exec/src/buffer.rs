//! # Circular telemetry buffer
//!
//! Fixed capacity FIFO shared between a producer and a consumer running on different threads.
//! Writing to a full buffer evicts the oldest item, so the consumer always sees the freshest
//! data.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{collections::VecDeque, sync::Mutex};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct CircBuffer<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("The buffer is empty")]
pub struct BufferEmpty;

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T> CircBuffer<T> {
    /// Create a new buffer holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "CircBuffer capacity must be non-zero");

        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Write an item, evicting the oldest one if the buffer is full.
    pub fn write(&self, item: T) {
        let mut items = self.items.lock().expect("CircBuffer mutex poisoned");

        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    /// Remove and return the oldest unread item.
    pub fn read(&self) -> Result<T, BufferEmpty> {
        self.items
            .lock()
            .expect("CircBuffer mutex poisoned")
            .pop_front()
            .ok_or(BufferEmpty)
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("CircBuffer mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every unread item.
    pub fn clear(&self) {
        self.items.lock().expect("CircBuffer mutex poisoned").clear();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
