//! Compaction job selection.
//!
//! Level 0 tries are rewritten one to one into level 1. From level 1 on, a
//! level-N trie covers a window of `W^(N-1)` blocks ending at its block
//! index, and `W` of them with the same recency and partition, ending an
//! aligned window of `W^N` blocks, merge into level N+1. Each merge is
//! sharded by the next trie bucket into `W` output partitions, one job each,
//! and only partitions missing from the catalog get a job.
//!
//! Current tries wait for the full run of `W` inputs. Historical tries merge
//! whatever exists once their window is closed: the table has reached the
//! window's last block and no live lower-level trie remains inside it.

use super::CompactionJob;
use crate::catalog::TableTries;
use crate::error::{Error, Result};
use crate::trie::TrieKey;
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Computes the compaction jobs a table needs.
#[derive(Debug, Clone)]
pub struct JobCalculator {
    level_width: u64,
}

impl JobCalculator {
    /// Creates a calculator for tries of fan-out `level_width`.
    ///
    /// Partition digits are single hex characters, so the fan-out is at most 16.
    pub fn new(level_width: usize) -> Result<Self> {
        if !(2..=16).contains(&level_width) {
            return Err(Error::invalid_config(format!(
                "compaction supports a fan-out of 2 to 16, got {}",
                level_width
            )));
        }
        Ok(Self { level_width: level_width as u64 })
    }

    /// Jobs for every trie of `table` that is ready and not yet compacted.
    pub fn available_jobs(&self, table: &str, tries: &TableTries) -> Vec<CompactionJob> {
        let mut jobs = Vec::new();

        for key in tries.live().iter().filter(|k| k.level == 0) {
            let output = TrieKey::new(1, None, Vec::new(), key.block_index);
            if !tries.contains(&output) {
                jobs.push(CompactionJob::new(table, vec![key.clone()], output));
            }
        }

        // (level, recency, part, window) -> live members
        let mut groups: BTreeMap<(u64, Option<NaiveDate>, Vec<u8>, u64), Vec<TrieKey>> = BTreeMap::new();
        for key in tries.live().iter().filter(|k| k.level > 0) {
            let Some(span) = self.span(key.level) else { continue };
            groups
                .entry((key.level, key.recency, key.part.clone(), key.block_index / span))
                .or_default()
                .push(key.clone());
        }

        for ((level, recency, part, window), members) in groups {
            let Some(span) = self.span(level) else { continue };
            let member_span = span / self.level_width;
            let window_start = window * span;
            let window_end = window_start + (span - 1);

            let mut inputs: Vec<TrieKey> = members
                .into_iter()
                .filter(|k| (k.block_index - window_start + 1) % member_span == 0)
                .collect();
            inputs.sort_by_key(|k| k.block_index);

            let ready = match recency {
                None => inputs.len() as u64 == self.level_width,
                Some(_) => {
                    !inputs.is_empty() && self.window_closed(tries, level, window_start, window_end)
                }
            };
            if !ready {
                continue;
            }

            for d in 0..self.level_width as u8 {
                let mut output_part = part.clone();
                output_part.push(d);
                let output = TrieKey::new(level + 1, recency, output_part, window_end);
                if !tries.contains(&output) {
                    jobs.push(CompactionJob::new(table, inputs.clone(), output));
                }
            }
        }

        if !jobs.is_empty() {
            log::debug!("{} compaction jobs available for table {}", jobs.len(), table);
        }
        jobs
    }

    /// Blocks covered by a merge out of `level`, `None` on overflow.
    fn span(&self, level: u64) -> Option<u64> {
        self.level_width.checked_pow(u32::try_from(level).ok()?)
    }

    fn window_closed(&self, tries: &TableTries, level: u64, start: u64, end: u64) -> bool {
        let reached = tries.max_block_index().is_some_and(|max| max >= end);
        let pending_below = tries
            .live()
            .iter()
            .any(|k| k.level < level && (start..=end).contains(&k.block_index));
        reached && !pending_below
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TrieCatalog;
    use crate::trie::parse_key;

    fn catalog(names: &[&str]) -> TrieCatalog {
        let catalog = TrieCatalog::new(4);
        let keys = names.iter().map(|n| parse_key(n).unwrap()).collect();
        catalog.add_tries("docs", keys).unwrap();
        catalog
    }

    fn outputs(catalog: &TrieCatalog) -> Vec<String> {
        let calculator = JobCalculator::new(4).unwrap();
        let mut names: Vec<String> = calculator
            .available_jobs("docs", &catalog.table_tries("docs"))
            .iter()
            .map(|j| j.output_key.to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_rejects_wide_fan_out() {
        assert!(matches!(JobCalculator::new(256), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_l0_jobs_one_to_one() {
        let catalog = catalog(&["l00-rc-b00", "l00-rc-b01", "l00-rc-b02"]);
        assert_eq!(outputs(&catalog), vec!["l01-rc-b00", "l01-rc-b01", "l01-rc-b02"]);
    }

    #[test]
    fn test_l1_run_shards_into_partitions() {
        let catalog = catalog(&["l01-rc-b00", "l01-rc-b01", "l01-rc-b02", "l01-rc-b03"]);
        let calculator = JobCalculator::new(4).unwrap();
        let jobs = calculator.available_jobs("docs", &catalog.table_tries("docs"));
        assert_eq!(jobs.len(), 4);
        for job in &jobs {
            let inputs: Vec<String> = job.input_keys.iter().map(|k| k.to_string()).collect();
            assert_eq!(inputs, vec!["l01-rc-b00", "l01-rc-b01", "l01-rc-b02", "l01-rc-b03"]);
        }
        assert_eq!(
            outputs(&catalog),
            vec!["l02-rc-p0-b03", "l02-rc-p1-b03", "l02-rc-p2-b03", "l02-rc-p3-b03"]
        );
    }

    #[test]
    fn test_incomplete_current_run_waits() {
        let catalog = catalog(&["l01-rc-b00", "l01-rc-b01", "l01-rc-b03", "l01-rc-b04"]);
        assert!(outputs(&catalog).is_empty());
    }

    #[test]
    fn test_gap_filling() {
        let catalog = catalog(&[
            "l01-rc-b00",
            "l01-rc-b01",
            "l01-rc-b02",
            "l01-rc-b03",
            "l02-rc-p0-b03",
            "l02-rc-p2-b03",
        ]);
        assert_eq!(outputs(&catalog), vec!["l02-rc-p1-b03", "l02-rc-p3-b03"]);
    }

    #[test]
    fn test_l2_run_nests_partitions() {
        let catalog = catalog(&["l02-rc-p1-b03", "l02-rc-p1-b07", "l02-rc-p1-b0b", "l02-rc-p1-b0f"]);
        assert_eq!(
            outputs(&catalog),
            vec!["l03-rc-p10-b0f", "l03-rc-p11-b0f", "l03-rc-p12-b0f", "l03-rc-p13-b0f"]
        );
    }

    #[test]
    fn test_historical_waits_for_closed_window() {
        let open = catalog(&["l01-r20240108-b00", "l01-r20240108-b02", "l00-rc-b03"]);
        let names = outputs(&open);
        assert_eq!(names, vec!["l01-rc-b03"]);

        let closed = catalog(&["l01-r20240108-b00", "l01-r20240108-b02", "l01-rc-b03"]);
        assert_eq!(
            outputs(&closed),
            vec![
                "l02-r20240108-p0-b03",
                "l02-r20240108-p1-b03",
                "l02-r20240108-p2-b03",
                "l02-r20240108-p3-b03",
            ]
        );
    }
}
