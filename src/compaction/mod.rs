//! Leveled compaction of sealed tries.
//!
//! ## Levels
//!
//! - Level 0: one trie per sealed log block
//! - Level 1: level 0 rewritten one to one, optionally split by recency
//! - Level N+1: `W` level-N tries merged, sharded by trie bucket into `W`
//!   partitions (`p0..p3` at level 2, `p00..p33` at level 3, ...)
//!
//! ## Process
//!
//! 1. Compute available jobs per table from the catalog (picker.rs)
//! 2. Merge the inputs through a merge plan (merge.rs)
//! 3. Write each output trie to the object store
//! 4. Register the outputs in the catalog, superseding covered inputs
//!
//! Jobs run in parallel. A failed job registers nothing.

pub mod merge;
pub mod picker;

pub use merge::SegmentMerge;
pub use picker::JobCalculator;

use crate::catalog::TrieCatalog;
use crate::config::Options;
use crate::error::{Error, Result};
use crate::segment::{put_trie, DiskSegment, Event, Segment, TrieWriter};
use crate::storage::ObjectStore;
use crate::trie::{Bucketer, TrieKey};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// One unit of compaction work: merge `input_keys` into `output_key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompactionJob {
    /// Table the tries belong to.
    pub table: String,
    /// Inputs in system-time order.
    pub input_keys: Vec<TrieKey>,
    /// The trie this job produces.
    pub output_key: TrieKey,
}

impl CompactionJob {
    /// Create a new compaction job
    pub fn new(table: impl Into<String>, input_keys: Vec<TrieKey>, output_key: TrieKey) -> Self {
        Self { table: table.into(), input_keys, output_key }
    }
}

/// Executes compaction jobs.
pub trait JobExecutor: Send + Sync {
    /// Runs `job`, returning the keys of every trie it wrote.
    ///
    /// Nothing may be registered by the executor itself; the caller commits
    /// the returned keys to the catalog.
    fn execute(&self, job: &CompactionJob) -> Result<Vec<TrieKey>>;
}

/// Executes jobs against segments in an object store.
pub struct SegmentJobExecutor {
    store: Arc<dyn ObjectStore>,
    options: Options,
    bucketer: Bucketer,
}

impl SegmentJobExecutor {
    /// Create a new executor
    pub fn new(store: Arc<dyn ObjectStore>, options: Options) -> Result<Self> {
        options.validate()?;
        let bucketer = options.bucketer()?;
        Ok(Self { store, options, bucketer })
    }

    /// Splits level-1 output rows into the current trie and one trie per
    /// historical recency bucket.
    fn split_outputs(&self, job: &CompactionJob, events: Vec<Event>) -> Vec<(TrieKey, Vec<Event>)> {
        let partition = match self.options.recency_partition {
            Some(partition) if job.output_key.level == 1 && job.output_key.is_current() => partition,
            _ => return vec![(job.output_key.clone(), events)],
        };

        let mut current = Vec::new();
        let mut historical = BTreeMap::new();
        for event in events {
            match event.recency(partition) {
                None => current.push(event),
                Some(date) => historical.entry(date).or_insert_with(Vec::new).push(event),
            }
        }

        let mut outputs = vec![(job.output_key.clone(), current)];
        for (date, events) in historical {
            let key = TrieKey::new(1, Some(date), Vec::new(), job.output_key.block_index);
            outputs.push((key, events));
        }
        outputs
    }
}

impl JobExecutor for SegmentJobExecutor {
    fn execute(&self, job: &CompactionJob) -> Result<Vec<TrieKey>> {
        log::info!(
            "Starting compaction of {}: {} inputs -> {}",
            job.table,
            job.input_keys.len(),
            job.output_key
        );

        let segments = job
            .input_keys
            .iter()
            .map(|key| {
                DiskSegment::open(self.store.as_ref(), &job.table, key, self.bucketer.level_width())
                    .map(Segment::from)
            })
            .collect::<Result<Vec<_>>>()?;

        let events = SegmentMerge::new(self.bucketer).merge(&segments, &job.output_key.part)?;

        let mut added = Vec::new();
        for (key, events) in self.split_outputs(job, events) {
            let written = TrieWriter::new(self.bucketer, self.options.compression).write_events(
                &events,
                &key.part,
                self.options.output_page_size,
            )?;
            put_trie(self.store.as_ref(), &job.table, &key, &written)?;

            log::info!(
                "Compaction wrote {}/{}: {} rows in {} pages",
                job.table,
                key,
                written.row_count,
                written.page_count
            );
            added.push(key);
        }

        Ok(added)
    }
}

/// Runs compaction until no table has work left.
pub struct Compactor {
    catalog: Arc<TrieCatalog>,
    executor: Arc<dyn JobExecutor>,
    calculator: JobCalculator,
    threads: usize,
    in_flight: Mutex<HashSet<(String, TrieKey)>>,
}

impl Compactor {
    /// Create a new compactor.
    ///
    /// Fails for fan-outs compaction does not support (`level_bits = 8`).
    pub fn new(catalog: Arc<TrieCatalog>, executor: Arc<dyn JobExecutor>, options: &Options) -> Result<Self> {
        options.validate()?;
        let level_width = options.bucketer()?.level_width();
        if level_width != catalog.level_width() {
            return Err(Error::invalid_config(format!(
                "catalog fan-out {} does not match configured fan-out {}",
                catalog.level_width(),
                level_width
            )));
        }

        Ok(Self {
            catalog,
            executor,
            calculator: JobCalculator::new(level_width)?,
            threads: options.compaction_threads,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Jobs available now across all tables, excluding jobs already running.
    pub fn available_jobs(&self) -> Vec<CompactionJob> {
        let in_flight = self.in_flight.lock();
        self.catalog
            .tables()
            .iter()
            .flat_map(|table| self.calculator.available_jobs(table, &self.catalog.table_tries(table)))
            .filter(|job| !in_flight.contains(&(job.table.clone(), job.output_key.clone())))
            .collect()
    }

    /// Claims available jobs, marking them in flight.
    fn claim_jobs(&self) -> Vec<CompactionJob> {
        let jobs = self.available_jobs();
        let mut in_flight = self.in_flight.lock();
        jobs.into_iter()
            .filter(|job| in_flight.insert((job.table.clone(), job.output_key.clone())))
            .collect()
    }

    /// Compacts every table until no more jobs are available.
    ///
    /// Each pass runs its jobs in parallel and registers every success. If
    /// any job fails, the pass still completes and the first error is
    /// returned.
    pub fn compact_all(&self) -> Result<()> {
        loop {
            let jobs = self.claim_jobs();
            if jobs.is_empty() {
                return Ok(());
            }

            log::info!("Compaction pass: {} jobs", jobs.len());
            let results = self.run_jobs(&jobs);

            let mut first_error = None;
            for (job, result) in results {
                let outcome = result.and_then(|keys| self.catalog.add_tries(&job.table, keys));
                self.in_flight.lock().remove(&(job.table.clone(), job.output_key.clone()));

                if let Err(e) = outcome {
                    log::error!("Compaction job {}/{} failed: {}", job.table, job.output_key, e);
                    first_error.get_or_insert(e);
                }
            }

            if let Some(e) = first_error {
                return Err(e);
            }
        }
    }

    fn run_jobs(&self, jobs: &[CompactionJob]) -> Vec<(CompactionJob, Result<Vec<TrieKey>>)> {
        let (job_tx, job_rx) = crossbeam::channel::unbounded::<CompactionJob>();
        let (result_tx, result_rx) = crossbeam::channel::unbounded();

        for job in jobs {
            // the receiver is alive until the scope below ends
            let _ = job_tx.send(job.clone());
        }
        drop(job_tx);

        let workers = self.threads.clamp(1, jobs.len().max(1));
        let scope = crossbeam::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let executor = &self.executor;
                s.spawn(move |_| {
                    for job in job_rx.iter() {
                        let result = executor.execute(&job);
                        if result_tx.send((job, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut results: Vec<_> = result_rx.try_iter().collect();
        if scope.is_err() {
            let finished: HashSet<_> = results.iter().map(|(job, _): &(CompactionJob, _)| job.clone()).collect();
            for job in jobs.iter().filter(|job| !finished.contains(*job)) {
                results.push((job.clone(), Err(Error::internal("compaction worker panicked"))));
            }
        }
        results
    }
}
