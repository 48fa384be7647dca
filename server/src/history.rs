//! Bounded replay log of recent chat lines

use std::collections::VecDeque;

/// FIFO of the last `capacity` chat lines, oldest first
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a line, evicting the oldest one once the bound is reached
    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Every line terminated by a newline, in chat order.
    /// `None` when there is nothing to replay.
    pub fn render(&self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }

        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        Some(out)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
