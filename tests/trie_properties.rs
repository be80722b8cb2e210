//! Property tests for the hash trie, key codec and merge planner

use proptest::prelude::*;
use triedb::segment::{MergePlanner, PlanSegment};
use triedb::trie::{
    compare_rows, path_slice, Bucketer, HashTrie, HashTrieNode, MemoryHashTrie, MemoryNode, TrieKey,
};
use triedb::parse_key;

fn build(keys: &Vec<[u8; 16]>, log_limit: usize, page_limit: usize) -> MemoryHashTrie {
    let mut trie = MemoryHashTrie::builder().log_limit(log_limit).page_limit(page_limit).build().unwrap();
    for idx in 0..keys.len() as u32 {
        trie = trie.add(keys, idx);
    }
    trie
}

fn iids(max_len: usize) -> impl Strategy<Value = Vec<[u8; 16]>> {
    prop::collection::vec(any::<[u8; 16]>(), 0..max_len)
}

/// Keys drawn from a small alphabet so that duplicates are common.
fn colliding_iids(max_len: usize) -> impl Strategy<Value = Vec<[u8; 16]>> {
    prop::collection::vec((0u8..6).prop_map(|b| [b.wrapping_mul(47); 16]), 0..max_len)
}

struct TrieSegment(MemoryHashTrie);

impl PlanSegment for TrieSegment {
    type Node = MemoryNode;

    fn part(&self) -> Option<&[u8]> {
        None
    }

    fn root_node(&self) -> Option<MemoryNode> {
        HashTrie::root_node(&self.0)
    }
}

proptest! {
    #[test]
    fn prop_every_row_routes_to_its_leaf(keys in iids(300), log_limit in 1usize..16, page_limit in 1usize..32) {
        let trie = build(&keys, log_limit, page_limit).compact_logs(&keys);

        for (idx, key) in keys.iter().enumerate() {
            let leaf = trie.leaf_for_key(key).expect("key routes to a leaf");
            prop_assert!(leaf.data().contains(&(idx as u32)));
        }
        prop_assert_eq!(trie.row_count(), keys.len());
    }

    #[test]
    fn prop_compact_matches_naive_sort(keys in colliding_iids(200), log_limit in 1usize..20) {
        let trie = build(&keys, log_limit, usize::MAX);
        let leaf = trie.root().as_leaf().expect("an unsplit trie is one leaf").clone();

        let mut naive: Vec<u32> = leaf.data().iter().chain(leaf.log()).copied().collect();
        naive.sort_by(|&l, &r| compare_rows(&keys, l, r));

        prop_assert_eq!(&leaf.merged_data(&keys)[..], &naive[..]);
        let compacted = trie.compact_logs(&keys);
        prop_assert_eq!(compacted.root().as_leaf().unwrap().data(), &naive[..]);
    }

    #[test]
    fn prop_compact_logs_is_idempotent(keys in iids(200), log_limit in 1usize..16, page_limit in 1usize..32) {
        let once = build(&keys, log_limit, page_limit).compact_logs(&keys);
        let twice = once.compact_logs(&keys);
        prop_assert_eq!(&twice, &once);
        prop_assert!(twice.root().ptr_eq(once.root()));
    }

    #[test]
    fn prop_add_leaves_snapshot_untouched(keys in iids(200), page_limit in 1usize..16) {
        prop_assume!(!keys.is_empty());
        let last = keys.len() as u32 - 1;
        let mut t0 = MemoryHashTrie::builder().log_limit(4).page_limit(page_limit).build().unwrap();
        for idx in 0..last {
            t0 = t0.add(&keys, idx);
        }

        let before = t0.clone();
        let nodes_before = before.root().leaves();
        let t1 = t0.add(&keys, last);

        prop_assert_eq!(&t0, &before);
        prop_assert!(t0.root().ptr_eq(before.root()));
        for (now, then) in t0.root().leaves().iter().zip(&nodes_before) {
            prop_assert!(now.ptr_eq(then));
        }

        if let (Some(old), Some(new)) = (t0.root().children(), t1.root().children()) {
            let touched = Bucketer::default().bucket_for(&keys[last as usize], 0) as usize;
            for (bucket, (old, new)) in old.iter().zip(&new).enumerate() {
                if bucket != touched {
                    match (old, new) {
                        (Some(old), Some(new)) => prop_assert!(old.ptr_eq(new)),
                        (None, None) => {}
                        _ => prop_assert!(false, "untouched bucket {} changed", bucket),
                    }
                }
            }
        }
    }

    #[test]
    fn prop_key_round_trip(
        level in 0u64..1_000,
        days in prop::option::of(-365i32..=3_652_059),
        part in prop::collection::vec(0u8..16, 0..6),
        block in any::<u64>(),
    ) {
        // Days from the common era, spanning 0000-01-01 to 9999-12-31
        let recency = days.map(|d| chrono::NaiveDate::from_num_days_from_ce_opt(d).unwrap());
        let key = TrieKey::new(level, recency, part, block);
        prop_assert_eq!(parse_key(&key.to_string()).unwrap(), key);
    }

    #[test]
    fn prop_key_string_order_matches_numeric_order(
        a in (0u64..300, any::<u64>()),
        b in (0u64..300, any::<u64>()),
        part in prop::collection::vec(0u8..4, 0..3),
    ) {
        let ka = TrieKey::new(a.0, None, part.clone(), a.1);
        let kb = TrieKey::new(b.0, None, part, b.1);
        prop_assert_eq!(ka.to_string().cmp(&kb.to_string()), a.cmp(&b));
    }

    #[test]
    fn prop_merge_plan_covers_every_row_once(
        keys in iids(300),
        page_limits in prop::collection::vec(1usize..64, 1..4),
    ) {
        let bucketer = Bucketer::default();
        let segments: Vec<TrieSegment> = page_limits
            .iter()
            .map(|&page_limit| TrieSegment(build(&keys, 8, page_limit).compact_logs(&keys)))
            .collect();

        let tasks = MergePlanner::plan(&segments, None);
        prop_assert!(tasks.windows(2).all(|w| w[0].path < w[1].path));

        let mut seen = vec![vec![0usize; keys.len()]; segments.len()];
        for task in &tasks {
            let order: Vec<usize> = task.nodes.iter().map(|n| n.segment).collect();
            prop_assert!(order.windows(2).all(|w| w[0] < w[1]));

            for mp_node in &task.nodes {
                let leaf = mp_node.node.as_leaf().expect("tasks carry leaves");
                let data = leaf.merged_data(&keys);
                for &idx in path_slice(&bucketer, &keys, &data, &task.path) {
                    seen[mp_node.segment][idx as usize] += 1;
                }
            }
        }

        for counts in &seen {
            prop_assert!(counts.iter().all(|&c| c == 1));
        }
    }
}
