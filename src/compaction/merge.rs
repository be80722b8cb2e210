//! Multi-way merge of segment leaves.
//!
//! Executes a merge plan: for every task, the rows of all contributing leaves
//! are merged through a heap into one stream ordered by iid, newest system
//! time first. Among identical system times the later segment wins, then the
//! earlier position within its leaf.

use crate::error::Result;
use crate::segment::{Event, MergePlanner, Op, Segment};
use crate::trie::{Bucketer, TrieNode};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

/// Entry in the merge heap
struct MergeEntry {
    event: Event,
    segment: usize,
    position: usize,
    cursor: usize,
}

impl MergeEntry {
    fn merge_order(&self, other: &Self) -> Ordering {
        self.event
            .iid
            .cmp(&other.event.iid)
            .then_with(|| other.event.system_from.cmp(&self.event.system_from))
            .then_with(|| other.segment.cmp(&self.segment))
            .then_with(|| self.position.cmp(&other.position))
    }
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.merge_order(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap
        other.merge_order(self)
    }
}

/// Decoded data pages of one merge, keyed by segment and page index.
///
/// A disk leaf shallower than its neighbours feeds every task below it.
#[derive(Default)]
struct PageCache {
    pages: HashMap<(usize, u32), Arc<Vec<Event>>>,
    loads: usize,
}

impl PageCache {
    fn leaf_events(&mut self, segments: &[Segment], segment: usize, node: &TrieNode) -> Result<Arc<Vec<Event>>> {
        let page_idx = match node {
            TrieNode::Arrow(node) => node.page_idx(),
            TrieNode::Memory(_) => None,
        };
        let Some(page_idx) = page_idx else {
            self.loads += 1;
            return segments[segment].leaf_events(node).map(Arc::new);
        };

        if let Some(events) = self.pages.get(&(segment, page_idx)) {
            return Ok(events.clone());
        }
        self.loads += 1;
        let events = Arc::new(segments[segment].leaf_events(node)?);
        self.pages.insert((segment, page_idx), events.clone());
        Ok(events)
    }
}

/// Merges the rows of several segments.
pub struct SegmentMerge {
    bucketer: Bucketer,
}

impl SegmentMerge {
    /// Create a new segment merge
    pub fn new(bucketer: Bucketer) -> Self {
        Self { bucketer }
    }

    /// Merges every row of `segments` routed to `part`.
    ///
    /// `segments` must be in system-time order. Events of an iid older than
    /// an `Erase` of that iid are dropped.
    pub fn merge(&self, segments: &[Segment], part: &[u8]) -> Result<Vec<Event>> {
        self.merge_with_cache(segments, part, &mut PageCache::default())
    }

    fn merge_with_cache(&self, segments: &[Segment], part: &[u8], pages: &mut PageCache) -> Result<Vec<Event>> {
        let pred = MergePlanner::part_predicate(part);
        let tasks = MergePlanner::plan(segments, Some(&pred));

        let mut output = Vec::new();
        let mut erased: Option<[u8; 16]> = None;

        for task in tasks {
            let mut cursors = Vec::with_capacity(task.nodes.len());
            let mut heap = BinaryHeap::with_capacity(task.nodes.len());

            for mp_node in &task.nodes {
                let events: Vec<Event> = pages
                    .leaf_events(segments, mp_node.segment, &mp_node.node)?
                    .iter()
                    .filter(|e| {
                        self.bucketer.compare_to_path(&e.iid, &task.path) == Ordering::Equal
                            && self.bucketer.compare_to_path(&e.iid, part) == Ordering::Equal
                    })
                    .cloned()
                    .collect();

                let cursor = cursors.len();
                let mut iter = events.into_iter().enumerate();
                if let Some((position, event)) = iter.next() {
                    heap.push(MergeEntry { event, segment: mp_node.segment, position, cursor });
                }
                cursors.push(iter);
            }

            while let Some(entry) = heap.pop() {
                if let Some((position, event)) = cursors[entry.cursor].next() {
                    heap.push(MergeEntry { event, segment: entry.segment, position, cursor: entry.cursor });
                }

                let event = entry.event;
                if erased == Some(event.iid) {
                    continue;
                }
                erased = match event.op {
                    Op::Erase => Some(event.iid),
                    _ => None,
                };
                output.push(event);
            }
        }

        Ok(output)
    }
}
