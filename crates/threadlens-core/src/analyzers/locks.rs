//! Lock contention
//!
//! Per snapshot, aggregates every lock address into owner plus waiter set.
//! A lock with any waiter is contended; at or above the soft waiter threshold
//! it is hot; at or above the hard threshold (or hot with I/O on the owner's
//! stack) the snapshot is in error territory. Across snapshots, a lock kept
//! by one owner long enough becomes a long-held finding.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::analyzers::io_block;
use crate::context::AnalysisContext;
use crate::engine::Analyzer;
use crate::model::LockRelation;
use crate::result::{AnalysisResult, Finding, ResultPayload, Severity};

/// One contended lock in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContendedLock {
    pub identity: String,
    pub type_name: String,
    pub owner: Option<String>,
    pub waiters: Vec<String>,
    pub hot: bool,
    /// Owner's stack sits in I/O while others wait
    pub io_associated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub snapshot_index: usize,
    pub contended: Vec<ContendedLock>,
}

/// A lock owned by the same thread across consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongHeldLock {
    pub identity: String,
    pub owner: String,
    pub snapshots: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LockContentionReport {
    pub snapshots: Vec<LockSnapshot>,
    pub long_held: Vec<LongHeldLock>,
    /// Largest waiter set seen on any lock in any snapshot
    pub max_waiters: usize,
    /// Hot locks in the most recent snapshot
    pub hot_lock_count: usize,
}

pub struct LockContentionAnalyzer;

impl Analyzer for LockContentionAnalyzer {
    fn name(&self) -> &'static str {
        "lock-contention"
    }

    fn priority(&self) -> u32 {
        80
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());
        let mut report = LockContentionReport::default();
        let soft = ctx.options().hot_lock_waiter_threshold;
        let hard = ctx.options().hot_lock_error_threshold;

        // (owner name per lock per snapshot) for the long-held pass
        let mut owners_by_snapshot: Vec<BTreeMap<String, String>> = vec![];

        for (index, _) in ctx.snapshots().iter().enumerate() {
            if ctx.is_cancelled() {
                return super::cancelled(self.name());
            }
            let threads = ctx.visible_threads(index);

            let mut owners: BTreeMap<String, (String, &str)> = BTreeMap::new();
            let mut waiters: BTreeMap<String, (BTreeSet<String>, String)> = BTreeMap::new();
            let mut io_owner: BTreeSet<String> = BTreeSet::new();

            for thread in &threads {
                for lock in &thread.locks {
                    let Some(identity) = lock.identity.as_deref() else {
                        continue;
                    };
                    match lock.relation {
                        LockRelation::Locked => {
                            owners
                                .entry(identity.to_string())
                                .or_insert_with(|| (thread.name.clone(), lock.type_name.as_str()));
                            if io_block::classify_stack(&thread.stack).is_some() {
                                io_owner.insert(identity.to_string());
                            }
                        }
                        LockRelation::WaitingToLock => {
                            let entry = waiters
                                .entry(identity.to_string())
                                .or_insert_with(|| (BTreeSet::new(), lock.type_name.clone()));
                            entry.0.insert(thread.name.clone());
                        }
                        _ => {}
                    }
                }
                // Tolerate model-built dumps that only set the waiting identity
                if let Some(identity) = thread.waiting_on_lock_identity.as_deref() {
                    let entry = waiters
                        .entry(identity.to_string())
                        .or_insert_with(|| (BTreeSet::new(), String::from("unknown")));
                    entry.0.insert(thread.name.clone());
                }
            }

            let mut contended: Vec<ContendedLock> = vec![];
            for (identity, (waiter_set, type_name)) in waiters {
                if waiter_set.is_empty() {
                    continue;
                }
                report.max_waiters = report.max_waiters.max(waiter_set.len());
                let owner = owners.get(&identity);
                let lock = ContendedLock {
                    hot: waiter_set.len() >= soft,
                    io_associated: io_owner.contains(&identity),
                    type_name: owner
                        .map(|(_, ty)| ty.to_string())
                        .unwrap_or(type_name),
                    owner: owner.map(|(name, _)| name.clone()),
                    waiters: waiter_set.into_iter().collect(),
                    identity,
                };
                contended.push(lock);
            }
            contended.sort_by(|a, b| {
                b.waiters
                    .len()
                    .cmp(&a.waiters.len())
                    .then(a.identity.cmp(&b.identity))
            });

            for lock in &contended {
                if lock.hot {
                    let severity = if lock.waiters.len() >= hard || lock.io_associated {
                        Severity::Error
                    } else {
                        Severity::Warning
                    };
                    result.push_finding(
                        Finding::new(
                            "hot-lock",
                            severity,
                            format!(
                                "lock {} ({}) has {} waiters{}",
                                lock.identity,
                                lock.type_name,
                                lock.waiters.len(),
                                lock.owner
                                    .as_deref()
                                    .map(|o| format!(", held by {}", o))
                                    .unwrap_or_default(),
                            ),
                        )
                        .with_detail("snapshot", index.to_string())
                        .with_detail("waiters", lock.waiters.len().to_string()),
                    );
                } else {
                    result.push_finding(
                        Finding::info(
                            "contended-lock",
                            format!(
                                "lock {} ({}) has {} waiter(s)",
                                lock.identity,
                                lock.type_name,
                                lock.waiters.len()
                            ),
                        )
                        .with_detail("snapshot", index.to_string()),
                    );
                }
            }

            if index + 1 == ctx.snapshot_count() {
                report.hot_lock_count = contended.iter().filter(|l| l.hot).count();
            }
            owners_by_snapshot.push(
                owners
                    .into_iter()
                    .map(|(id, (name, _))| (id, name))
                    .collect(),
            );
            report.snapshots.push(LockSnapshot {
                snapshot_index: index,
                contended,
            });
        }

        long_held_locks(&owners_by_snapshot, ctx.options().long_held_lock_min_snapshots)
            .into_iter()
            .for_each(|long_held| {
                result.push_finding(
                    Finding::warning(
                        "long-held-lock",
                        format!(
                            "lock {} held by {} across {} consecutive snapshots",
                            long_held.identity, long_held.owner, long_held.snapshots
                        ),
                    )
                    .with_detail("owner", long_held.owner.clone()),
                );
                report.long_held.push(long_held);
            });

        result.summary = if report.max_waiters == 0 {
            "no lock contention".to_string()
        } else {
            format!(
                "max {} waiters on one lock, {} hot lock(s) in last snapshot",
                report.max_waiters, report.hot_lock_count
            )
        };
        result.with_payload(ResultPayload::LockContention(report))
    }
}

/// Longest run of consecutive snapshots with the same owner, per lock.
fn long_held_locks(
    owners_by_snapshot: &[BTreeMap<String, String>],
    min_snapshots: usize,
) -> Vec<LongHeldLock> {
    let mut all_locks: BTreeSet<&String> = BTreeSet::new();
    for owners in owners_by_snapshot {
        all_locks.extend(owners.keys());
    }

    let mut out = vec![];
    for lock in all_locks {
        let mut best: Option<(usize, &String)> = None;
        let mut run: Option<(usize, &String)> = None;
        for owners in owners_by_snapshot {
            run = match (owners.get(lock), run) {
                (Some(owner), Some((len, prev))) if owner == prev => Some((len + 1, prev)),
                (Some(owner), _) => Some((1, owner)),
                (None, _) => None,
            };
            if let Some((len, owner)) = run {
                if best.map_or(true, |(b, _)| len > b) {
                    best = Some((len, owner));
                }
            }
        }
        if let Some((len, owner)) = best {
            if len >= min_snapshots {
                out.push(LongHeldLock {
                    identity: lock.clone(),
                    owner: owner.clone(),
                    snapshots: len,
                });
            }
        }
    }
    out
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LockInfo, ThreadDump, ThreadInfo, ThreadState};
    use crate::options::AnalysisOptions;

    fn owner(name: &str, lock: &str) -> ThreadInfo {
        let mut t = ThreadInfo::new(name);
        t.state = Some(ThreadState::Runnable);
        t.locks =
            vec![LockInfo::new(LockRelation::Locked, "java.lang.Object").with_identity(lock)];
        t
    }

    fn waiter(name: &str, lock: &str) -> ThreadInfo {
        let mut t = ThreadInfo::new(name);
        t.state = Some(ThreadState::Blocked);
        t.waiting_on_lock_identity = Some(lock.to_string());
        t.locks = vec![
            LockInfo::new(LockRelation::WaitingToLock, "java.lang.Object").with_identity(lock),
        ];
        t
    }

    fn dump(threads: Vec<ThreadInfo>) -> ThreadDump {
        let mut d = ThreadDump::empty();
        d.threads = threads;
        d
    }

    fn run(snapshots: Vec<ThreadDump>) -> (LockContentionReport, AnalysisResult) {
        let ctx = AnalysisContext::new(snapshots, AnalysisOptions::default());
        let result = LockContentionAnalyzer.analyze(&ctx);
        let report = match result.payload.clone().unwrap() {
            ResultPayload::LockContention(r) => r,
            other => panic!("unexpected payload {:?}", other),
        };
        (report, result)
    }

    #[test]
    fn test_uncontended_is_ok() {
        let (report, result) = run(vec![dump(vec![owner("main", "0xa")])]);
        assert_eq!(result.severity, Severity::Ok);
        assert_eq!(report.max_waiters, 0);
    }

    #[test]
    fn test_single_waiter_is_info() {
        let (report, result) = run(vec![dump(vec![
            owner("main", "0xa"),
            waiter("w1", "0xa"),
        ])]);
        assert_eq!(result.severity, Severity::Info);
        assert_eq!(report.max_waiters, 1);
        assert!(result.findings.iter().any(|f| f.category == "contended-lock"));
    }

    #[test]
    fn test_hot_lock_is_warning() {
        let mut threads = vec![owner("main", "0xc")];
        threads.extend((1..=3).map(|i| waiter(&format!("w{}", i), "0xc")));
        let (report, result) = run(vec![dump(threads)]);
        assert_eq!(result.severity, Severity::Warning);
        assert_eq!(report.hot_lock_count, 1);
        assert_eq!(report.snapshots[0].contended[0].owner.as_deref(), Some("main"));
    }

    #[test]
    fn test_seven_waiters_is_error() {
        let mut threads = vec![owner("main", "0xc")];
        threads.extend((1..=10).map(|i| waiter(&format!("w{:02}", i), "0xc")));
        let (report, result) = run(vec![dump(threads)]);
        assert_eq!(result.severity, Severity::Error);
        assert_eq!(report.max_waiters, 10);
    }

    #[test]
    fn test_long_held_lock() {
        let snap = || dump(vec![owner("hog", "0xa"), waiter("w", "0xa")]);
        let (report, result) = run(vec![snap(), snap(), snap()]);
        assert_eq!(report.long_held.len(), 1);
        assert_eq!(report.long_held[0].owner, "hog");
        assert_eq!(report.long_held[0].snapshots, 3);
        assert!(result.findings.iter().any(|f| f.category == "long-held-lock"));
    }

    #[test]
    fn test_owner_change_resets_long_held_run() {
        let (report, _) = run(vec![
            dump(vec![owner("a", "0xa")]),
            dump(vec![owner("b", "0xa")]),
            dump(vec![owner("a", "0xa")]),
        ]);
        assert!(report.long_held.is_empty());
    }

    #[test]
    fn test_io_associated_hot_lock_is_error() {
        let mut io_owner = owner("io-hog", "0xc");
        io_owner.stack = vec![crate::model::StackFrame::new(
            "java.net.SocketInputStream",
            "read",
        )];
        let mut threads = vec![io_owner];
        threads.extend((1..=3).map(|i| waiter(&format!("w{}", i), "0xc")));
        let (report, result) = run(vec![dump(threads)]);
        assert_eq!(result.severity, Severity::Error);
        assert!(report.snapshots[0].contended[0].io_associated);
    }
}
