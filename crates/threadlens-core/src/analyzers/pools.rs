//! Thread-pool detection and utilization
//!
//! Pools are recognized from thread-name families: the generic executor
//! shape, the fork-join shape, and a heuristic for arbitrary named pools
//! (common alphabetic prefix, strictly-numeric suffix, at least three
//! members). Per pool and snapshot, state counts give a utilization figure;
//! full utilization is exhaustion, and exhaustion held over three or more
//! consecutive snapshots is chronic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::AnalysisContext;
use crate::engine::Analyzer;
use crate::model::{ThreadInfo, ThreadState};
use crate::patterns;
use crate::result::{AnalysisResult, Finding, ResultPayload};

/// Consecutive exhausted snapshots from which exhaustion is chronic.
const CHRONIC_SNAPSHOTS: usize = 3;

/// Minimum members for the named-pool heuristic.
const NAMED_POOL_MIN_MEMBERS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub name: String,
    pub runnable: usize,
    pub waiting: usize,
    pub blocked: usize,
    pub other: usize,
    pub utilization_percent: f64,
    pub exhausted: bool,
    pub idle: bool,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.runnable + self.waiting + self.blocked + self.other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub snapshot_index: usize,
    pub pools: Vec<PoolStats>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThreadPoolReport {
    pub snapshots: Vec<PoolSnapshot>,
    /// Pools exhausted in >= CHRONIC_SNAPSHOTS consecutive snapshots
    pub chronically_exhausted: Vec<String>,
}

pub struct ThreadPoolAnalyzer;

impl Analyzer for ThreadPoolAnalyzer {
    fn name(&self) -> &'static str {
        "thread-pools"
    }

    fn priority(&self) -> u32 {
        70
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());
        let mut report = ThreadPoolReport::default();

        for index in 0..ctx.snapshot_count() {
            if ctx.is_cancelled() {
                return super::cancelled(self.name());
            }
            let pools = detect_pools(&ctx.visible_threads(index));
            report.snapshots.push(PoolSnapshot {
                snapshot_index: index,
                pools,
            });
        }

        // Exhaustion findings come from the last snapshot; chronic exhaustion
        // needs the whole sequence.
        if let Some(last) = report.snapshots.last() {
            for pool in &last.pools {
                if pool.exhausted {
                    result.push_finding(
                        Finding::warning(
                            "pool-exhausted",
                            format!(
                                "pool {} fully utilized: all {} threads runnable",
                                pool.name,
                                pool.total()
                            ),
                        )
                        .with_detail("pool", pool.name.clone()),
                    );
                }
            }
        }

        for pool_name in chronic_pools(&report.snapshots) {
            result.push_finding(
                Finding::error(
                    "chronic-pool-exhaustion",
                    format!(
                        "pool {} exhausted across {} or more consecutive snapshots",
                        pool_name, CHRONIC_SNAPSHOTS
                    ),
                )
                .with_detail("pool", pool_name.clone()),
            );
            report.chronically_exhausted.push(pool_name);
        }

        let pool_count = report
            .snapshots
            .last()
            .map(|s| s.pools.len())
            .unwrap_or(0);
        result.summary = format!("{} pool(s) detected in last snapshot", pool_count);
        result.with_payload(ResultPayload::ThreadPools(report))
    }
}

/// Assign each thread to a pool name, then count states per pool.
fn detect_pools(threads: &[&ThreadInfo]) -> Vec<PoolStats> {
    let mut assignment: BTreeMap<String, Vec<&ThreadInfo>> = BTreeMap::new();
    let mut named_candidates: BTreeMap<String, Vec<&ThreadInfo>> = BTreeMap::new();

    for thread in threads {
        if let Some(caps) = patterns::EXECUTOR_POOL.captures(&thread.name) {
            assignment
                .entry(format!("pool-{}", &caps[1]))
                .or_default()
                .push(thread);
        } else if let Some(caps) = patterns::FORK_JOIN_POOL.captures(&thread.name) {
            let pool = match caps.get(1) {
                Some(n) => format!("ForkJoinPool-{}", n.as_str()),
                None => "ForkJoinPool.commonPool".to_string(),
            };
            assignment.entry(pool).or_default().push(thread);
        } else if let Some(caps) = patterns::NAMED_POOL.captures(&thread.name) {
            named_candidates
                .entry(caps[1].to_string())
                .or_default()
                .push(thread);
        }
    }

    for (prefix, members) in named_candidates {
        if members.len() >= NAMED_POOL_MIN_MEMBERS {
            assignment.entry(prefix).or_default().extend(members);
        }
    }

    assignment
        .into_iter()
        .map(|(name, members)| {
            let mut stats = PoolStats {
                name,
                runnable: 0,
                waiting: 0,
                blocked: 0,
                other: 0,
                utilization_percent: 0.0,
                exhausted: false,
                idle: false,
            };
            for member in &members {
                match member.state {
                    Some(ThreadState::Runnable) => stats.runnable += 1,
                    Some(ThreadState::Waiting) | Some(ThreadState::TimedWaiting) => {
                        stats.waiting += 1
                    }
                    Some(ThreadState::Blocked) => stats.blocked += 1,
                    _ => stats.other += 1,
                }
            }
            let total = stats.total();
            if total > 0 {
                stats.utilization_percent = stats.runnable as f64 / total as f64 * 100.0;
            }
            stats.exhausted = total > 0 && stats.runnable == total;
            stats.idle = stats.runnable == 0;
            stats
        })
        .collect()
}

/// Pools exhausted in some run of >= CHRONIC_SNAPSHOTS consecutive snapshots.
fn chronic_pools(snapshots: &[PoolSnapshot]) -> Vec<String> {
    let mut runs: BTreeMap<&str, (usize, usize)> = BTreeMap::new(); // name -> (current, best)
    for snapshot in snapshots {
        let mut exhausted_here: Vec<&str> = vec![];
        for pool in &snapshot.pools {
            if pool.exhausted {
                exhausted_here.push(&pool.name);
                let entry = runs.entry(&pool.name).or_insert((0, 0));
                entry.0 += 1;
                entry.1 = entry.1.max(entry.0);
            }
        }
        for (name, entry) in runs.iter_mut() {
            if !exhausted_here.contains(name) {
                entry.0 = 0;
            }
        }
    }
    runs.into_iter()
        .filter(|(_, (_, best))| *best >= CHRONIC_SNAPSHOTS)
        .map(|(name, _)| name.to_string())
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ThreadDump;
    use crate::options::AnalysisOptions;
    use crate::result::Severity;

    fn thread(name: &str, state: ThreadState) -> ThreadInfo {
        let mut t = ThreadInfo::new(name);
        t.state = Some(state);
        t
    }

    fn dump(threads: Vec<ThreadInfo>) -> ThreadDump {
        let mut d = ThreadDump::empty();
        d.threads = threads;
        d
    }

    fn run(snapshots: Vec<ThreadDump>) -> (ThreadPoolReport, AnalysisResult) {
        let ctx = AnalysisContext::new(snapshots, AnalysisOptions::default());
        let result = ThreadPoolAnalyzer.analyze(&ctx);
        let report = match result.payload.clone().unwrap() {
            ResultPayload::ThreadPools(r) => r,
            other => panic!("unexpected payload {:?}", other),
        };
        (report, result)
    }

    #[test]
    fn test_executor_pool_detection() {
        let (report, _) = run(vec![dump(vec![
            thread("pool-1-thread-1", ThreadState::Runnable),
            thread("pool-1-thread-2", ThreadState::Waiting),
            thread("pool-2-thread-1", ThreadState::Waiting),
        ])]);
        let pools = &report.snapshots[0].pools;
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].name, "pool-1");
        assert_eq!(pools[0].runnable, 1);
        assert_eq!(pools[0].waiting, 1);
        assert_eq!(pools[0].utilization_percent, 50.0);
    }

    #[test]
    fn test_fork_join_pool_names() {
        let (report, _) = run(vec![dump(vec![
            thread("ForkJoinPool-1-worker-1", ThreadState::Runnable),
            thread("ForkJoinPool.commonPool-worker-3", ThreadState::Waiting),
        ])]);
        let names: Vec<&str> = report.snapshots[0]
            .pools
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["ForkJoinPool-1", "ForkJoinPool.commonPool"]);
    }

    #[test]
    fn test_named_pool_needs_three_members() {
        let (report, _) = run(vec![dump(vec![
            thread("kafka-consumer-1", ThreadState::Runnable),
            thread("kafka-consumer-2", ThreadState::Runnable),
        ])]);
        assert!(report.snapshots[0].pools.is_empty());

        let (report, _) = run(vec![dump(vec![
            thread("kafka-consumer-1", ThreadState::Runnable),
            thread("kafka-consumer-2", ThreadState::Runnable),
            thread("kafka-consumer-3", ThreadState::Waiting),
        ])]);
        assert_eq!(report.snapshots[0].pools[0].name, "kafka-consumer");
    }

    #[test]
    fn test_exhaustion_warning() {
        let (_, result) = run(vec![dump(vec![
            thread("pool-1-thread-1", ThreadState::Runnable),
            thread("pool-1-thread-2", ThreadState::Runnable),
        ])]);
        assert_eq!(result.severity, Severity::Warning);
        assert!(result.findings.iter().any(|f| f.category == "pool-exhausted"));
    }

    #[test]
    fn test_chronic_exhaustion_error() {
        let snap = || {
            dump(vec![
                thread("pool-1-thread-1", ThreadState::Runnable),
                thread("pool-1-thread-2", ThreadState::Runnable),
            ])
        };
        let (report, result) = run(vec![snap(), snap(), snap()]);
        assert_eq!(result.severity, Severity::Error);
        assert_eq!(report.chronically_exhausted, vec!["pool-1"]);
    }

    #[test]
    fn test_interrupted_exhaustion_not_chronic() {
        let busy = || {
            dump(vec![
                thread("pool-1-thread-1", ThreadState::Runnable),
                thread("pool-1-thread-2", ThreadState::Runnable),
            ])
        };
        let calm = dump(vec![
            thread("pool-1-thread-1", ThreadState::Runnable),
            thread("pool-1-thread-2", ThreadState::Waiting),
        ]);
        let (report, _) = run(vec![busy(), busy(), calm, busy()]);
        assert!(report.chronically_exhausted.is_empty());
    }

    #[test]
    fn test_idle_pool() {
        let (report, result) = run(vec![dump(vec![
            thread("pool-1-thread-1", ThreadState::Waiting),
            thread("pool-1-thread-2", ThreadState::Waiting),
        ])]);
        assert!(report.snapshots[0].pools[0].idle);
        assert_eq!(result.severity, Severity::Ok);
    }
}
