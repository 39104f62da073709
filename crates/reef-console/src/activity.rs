use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const ACTIVITY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    InProgress,
    Warning,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::InProgress => "in_progress",
            Severity::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
}

/// Newest-first activity history. Entries are inserted at the head and the
/// oldest fall off once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::with_capacity(ACTIVITY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: ActivityEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn head(&self) -> Option<&ActivityEntry> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> ActivityEntry {
        ActivityEntry {
            timestamp: Utc::now(),
            message: format!("event {n}"),
            severity: Severity::Info,
        }
    }

    #[test_timeout::timeout]
    fn evicts_oldest_past_capacity() {
        let mut log = ActivityLog::new();
        for n in 0..(ACTIVITY_CAPACITY + 7) {
            log.push(entry(n));
        }
        assert_eq!(log.len(), ACTIVITY_CAPACITY);
        assert_eq!(log.head().unwrap().message, format!("event {}", ACTIVITY_CAPACITY + 6));
        assert_eq!(log.iter().last().unwrap().message, "event 7");
    }
}
