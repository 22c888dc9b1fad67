// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity circular history.

/// Keeps the most recent `capacity` values; once full, each push overwrites the oldest.
#[derive(Debug, Clone)]
pub struct Ring<T> {
    values: Vec<T>,
    capacity: usize,
    // Next slot to write. Equals the oldest slot once the ring has wrapped.
    head: usize,
}

impl<T: Clone> Ring<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Ring {
            values: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.values.len() < self.capacity {
            self.values.push(value);
        } else {
            self.values[self.head] = value;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    /// Returns the retained values, oldest first.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        if self.values.len() < self.capacity {
            return self.values.clone();
        }
        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&self.values[self.head..]);
        out.extend_from_slice(&self.values[..self.head]);
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
