//! Small bounded cache of recently visited tree nodes.
//!
//! Editors re-query nearby offsets and lines constantly (cursor motion,
//! repeated small edits at the same spot). Walking from the root every time
//! is still O(log N), but a node found a moment ago is very likely to be
//! useful again, so [`PieceTree`](crate::piece_tree::PieceTree) keeps a
//! short FIFO of `(node, node_start_offset, node_start_line)` entries and
//! tries them before falling back to a root-to-leaf search. This is purely
//! an optimization: every entry is re-validated against the current node
//! start bounds before use, and a miss is no worse than not having the
//! cache at all.

use crate::rb_tree::NodeId;

const CACHE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct CacheEntry {
    pub node: NodeId,
    pub node_start_offset: u32,
    pub node_start_line: u32,
}

/// FIFO cache of the last few nodes visited by offset/line lookups.
#[derive(Debug, Clone, Default)]
pub struct SearchCache {
    entries: Vec<CacheEntry>,
}

impl SearchCache {
    pub fn new() -> Self {
        SearchCache {
            entries: Vec::with_capacity(CACHE_CAPACITY),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the most-recently-inserted entry whose node covers `offset`,
    /// i.e. `node_start_offset <= offset < node_start_offset + node_length`.
    /// The caller passes `node_length` per candidate since the cache itself
    /// doesn't know piece lengths.
    pub fn get(&self, offset: u32, node_length_of: impl Fn(NodeId) -> u32) -> Option<CacheEntry> {
        self.entries.iter().rev().copied().find(|entry| {
            offset >= entry.node_start_offset
                && offset < entry.node_start_offset + node_length_of(entry.node)
        })
    }

    /// Returns the most-recently-inserted entry whose node covers `line`
    /// (1-based), i.e. `node_start_line <= line <= node_start_line +
    /// node_line_feed_count`.
    pub fn get2(&self, line: u32, node_line_feed_count_of: impl Fn(NodeId) -> u32) -> Option<CacheEntry> {
        self.entries.iter().rev().copied().find(|entry| {
            line >= entry.node_start_line
                && line <= entry.node_start_line + node_line_feed_count_of(entry.node)
        })
    }

    /// Records a freshly resolved node. Evicts the oldest entry once the
    /// cache is full (simple FIFO, not LRU: recency-of-insertion is a good
    /// enough proxy for recency-of-use here and costs nothing to track).
    pub fn set(&mut self, entry: CacheEntry) {
        if self.entries.len() == CACHE_CAPACITY {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    /// Drops every entry whose node id is no longer valid, i.e. any id at
    /// or past `first_invalid_node`. Called after an edit invalidates a
    /// contiguous tail of freshly allocated/removed arena slots so the
    /// cache never hands back a node whose piece has since been mutated
    /// out from under it.
    pub fn invalidate(&mut self) {
        self.entries.clear();
    }
}
