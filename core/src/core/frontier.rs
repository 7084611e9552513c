use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Order in which queued pages are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Traversal {
    #[default]
    BreadthFirst,
    DepthFirst,
}

/// Deduplicating crawl work-queue. Each URL is admitted at most once per
/// crawl, so the set of seen URLs only grows and nothing is revisited.
pub struct Frontier {
    queue: VecDeque<(String, u32)>,
    seen: HashSet<String>,
    traversal: Traversal,
}

impl Frontier {
    pub fn new(traversal: Traversal) -> Self {
        Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
            traversal,
        }
    }

    /// Queues `url` at `depth` unless it was seen before. Returns whether it
    /// was admitted.
    pub fn push(&mut self, url: String, depth: u32) -> bool {
        if self.seen.insert(url.clone()) {
            self.queue.push_back((url, depth));
            true
        } else {
            false
        }
    }

    pub fn next(&mut self) -> Option<(String, u32)> {
        match self.traversal {
            Traversal::BreadthFirst => self.queue.pop_front(),
            Traversal::DepthFirst => self.queue.pop_back(),
        }
    }

    /// Number of URLs still queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
