//! Stress runs for the dirdb backend.
//!
//! These runs hammer the sharded children counters and the attribute
//! indexes from several threads and compare the final state with the sum of
//! what was applied.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dirdb_core::{CoreResult, Entry, EntryContainer, EntryId, IndexType};
use dirdb_storage::Storage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct parent keys.
    pub keys: usize,
    /// Deltas applied per key.
    pub deltas_per_key: usize,
    /// Seed for the delta generator.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            keys: 64,
            deltas_per_key: 128,
            seed: 0x5EED,
        }
    }
}

/// Final counts next to what the applied deltas add up to.
#[derive(Debug, Clone)]
pub struct CountOutcome {
    /// Throughput and failures.
    pub result: StressTestResult,
    /// Sum of applied deltas per parent.
    pub expected: BTreeMap<EntryId, i64>,
    /// Counts read back per parent.
    pub actual: BTreeMap<EntryId, i64>,
    /// Sum of all applied deltas.
    pub expected_total: i64,
    /// Total count read back.
    pub actual_total: i64,
}

impl CountOutcome {
    /// Returns `true` if every count and the total converged.
    pub fn converged(&self) -> bool {
        self.result.failed_ops == 0
            && self.expected == self.actual
            && self.expected_total == self.actual_total
    }
}

/// Applies `config.keys × config.deltas_per_key` random deltas to the
/// children counts of parents `1..=keys`, spread over `config.threads`
/// threads. Each delta also moves the total count.
pub fn stress_children_counts<S: Storage>(
    container: &EntryContainer<S>,
    config: &StressConfig,
) -> CountOutcome {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut work: Vec<Vec<(EntryId, i64)>> = vec![Vec::new(); config.threads.max(1)];
    let mut expected: BTreeMap<EntryId, i64> = BTreeMap::new();
    let mut slot = 0;
    for _ in 0..config.deltas_per_key {
        for key in 1..=config.keys as u64 {
            let parent = EntryId::new(key);
            let delta = rng.gen_range(-2..=6);
            *expected.entry(parent).or_default() += delta;
            let idx = slot % work.len();
            work[idx].push((parent, delta));
            slot += 1;
        }
    }
    let expected_total = expected.values().sum();

    let counts = container.children_count();
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for deltas in &work {
            let (successful, failed) = (&successful, &failed);
            scope.spawn(move || {
                for &(parent, delta) in deltas {
                    let applied = container.storage().write(|txn| -> CoreResult<()> {
                        counts.update_count(txn, parent, delta)?;
                        counts.update_total_count(txn, delta)
                    });
                    match applied {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });
    let result = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );

    let (actual, actual_total) = container
        .storage()
        .read(|txn| -> CoreResult<_> {
            let mut actual = BTreeMap::new();
            for parent in expected.keys() {
                actual.insert(*parent, counts.get_count(txn, *parent)?);
            }
            Ok((actual, counts.get_total_count(txn)?))
        })
        .expect("Failed to read counts");

    CountOutcome {
        result,
        expected,
        actual,
        expected_total,
        actual_total,
    }
}

/// Adds `per_thread` entries below `parent` from each of `threads` threads,
/// then checks the children count and the `cn` presence index.
///
/// Returns the run statistics and whether the final state matched.
pub fn stress_concurrent_adds<S: Storage>(
    container: &EntryContainer<S>,
    parent: &str,
    threads: usize,
    per_thread: usize,
) -> (StressTestResult, bool) {
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for t in 0..threads {
            let (successful, failed) = (&successful, &failed);
            scope.spawn(move || {
                for i in 0..per_thread {
                    let entry = Entry::new(format!("cn=t{t}n{i},{parent}"))
                        .with_attribute("cn", [format!("t{t}n{i}")]);
                    match container.add_entry(entry) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });
    let result = StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    );

    let expected = (threads * per_thread) as i64;
    let parent = dirdb_core::Dn::parse(parent).expect("Invalid parent DN");
    let children = container.num_children(&parent).expect("Failed to count children");
    let present = container
        .index_candidates("cn", IndexType::Presence, "")
        .expect("Failed to read presence index");
    let consistent = children == expected && present.size() == expected as u64;
    (result, consistent)
}
