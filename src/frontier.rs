use serde::{Serialize, Serializer};
use std::collections::{HashSet, VecDeque};

/// A URL waiting to be processed, with its BFS distance from the seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub url: String,
    pub depth: usize,
}

impl QueueEntry {
    pub fn new(url: impl Into<String>, depth: usize) -> Self {
        Self {
            url: url.into(),
            depth,
        }
    }
}

/// FIFO backlog driving breadth-first order. Does not deduplicate.
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<QueueEntry>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueueEntry) {
        self.queue.push_back(entry);
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.queue.pop_front()
    }

    /// Entry that the next `pop` will return
    pub fn peek(&self) -> Option<&QueueEntry> {
        self.queue.front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Lowercased URLs already discovered during one crawl, in discovery order.
///
/// Grows monotonically; there is no removal.
#[derive(Debug, Default, Clone)]
pub struct VisitedSet {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(&url.to_lowercase())
    }

    /// Returns `false` if the URL was already present
    pub fn add(&mut self, url: &str) -> bool {
        let normalized = url.to_lowercase();
        if !self.seen.insert(normalized.clone()) {
            return false;
        }
        self.order.push(normalized);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.order.clone()
    }
}

impl Serialize for VisitedSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}
