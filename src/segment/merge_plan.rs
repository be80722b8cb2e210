//! Lock-step walk over several tries producing per-path merge tasks.

use crate::trie::{conj_path, HashTrieNode};

/// A segment taking part in a merge plan.
pub trait PlanSegment {
    /// Node type of the segment's trie.
    type Node: HashTrieNode;

    /// Partition of the segment, or `None` if unpartitioned.
    fn part(&self) -> Option<&[u8]>;

    /// Root of the segment's trie, `None` if it is empty.
    fn root_node(&self) -> Option<Self::Node>;
}

/// One segment's node contributing to a task.
#[derive(Debug, Clone)]
pub struct MergePlanNode<N> {
    /// Index of the segment in the planner's input.
    pub segment: usize,
    /// The contributing node, always a leaf in emitted tasks.
    pub node: N,
}

/// Leaves of every segment covering one trie path.
#[derive(Debug, Clone)]
pub struct MergePlanTask<N> {
    /// The trie path this task covers.
    pub path: Vec<u8>,
    /// Contributing nodes in input segment order.
    pub nodes: Vec<MergePlanNode<N>>,
}

/// Plans merges across segments.
pub struct MergePlanner;

impl MergePlanner {
    /// Walks the tries of `segments` in lock-step.
    ///
    /// `segments` must be in system-time order; emitted nodes keep that order.
    /// Tasks come out in path order. A branch in any segment splits the task
    /// by bucket, and a leaf in another segment is carried unchanged into
    /// every bucket. Paths rejected by `path_pred` are pruned, and segments
    /// whose partition it rejects are skipped.
    pub fn plan<S: PlanSegment>(
        segments: &[S],
        path_pred: Option<&dyn Fn(&[u8]) -> bool>,
    ) -> Vec<MergePlanTask<S::Node>> {
        let initial: Vec<MergePlanNode<S::Node>> = segments
            .iter()
            .enumerate()
            .filter(|(_, segment)| match (segment.part(), path_pred) {
                (Some(part), Some(pred)) => pred(part),
                _ => true,
            })
            .filter_map(|(idx, segment)| segment.root_node().map(|node| MergePlanNode { segment: idx, node }))
            .collect();

        let mut result = Vec::new();
        if initial.is_empty() {
            return result;
        }

        let mut stack = vec![MergePlanTask { path: Vec::new(), nodes: initial }];

        while let Some(task) = stack.pop() {
            if let Some(pred) = path_pred {
                if !pred(&task.path) {
                    continue;
                }
            }

            let node_children: Vec<_> = task.nodes.iter().map(|n| n.node.children()).collect();
            let width = node_children.iter().flatten().map(Vec::len).max();

            let Some(width) = width else {
                result.push(task);
                continue;
            };

            for bucket in (0..width).rev() {
                let nodes: Vec<_> = task
                    .nodes
                    .iter()
                    .zip(&node_children)
                    .filter_map(|(mp_node, children)| match children {
                        Some(children) => children
                            .get(bucket)
                            .cloned()
                            .flatten()
                            .map(|node| MergePlanNode { segment: mp_node.segment, node }),
                        None => Some(mp_node.clone()),
                    })
                    .collect();

                if !nodes.is_empty() {
                    stack.push(MergePlanTask { path: conj_path(&task.path, bucket as u8), nodes });
                }
            }
        }

        result
    }

    /// Path predicate accepting paths on the way to or below `part`.
    pub fn part_predicate(part: &[u8]) -> impl Fn(&[u8]) -> bool + '_ {
        move |path: &[u8]| {
            let len = path.len().min(part.len());
            path[..len] == part[..len]
        }
    }
}
