//! Deadlock detection
//!
//! Highest-priority pass. Per snapshot: use the runtime's own deadlock
//! section when present, otherwise build the waits-for graph and enumerate
//! elementary cycles. Each cycle is one deadlock, participants in canonical
//! rotation (smallest thread name first). With several snapshots, a
//! participant set recurring across two or more snapshots is additionally
//! reported as persistent.
//!
//! Overlapping cycles are deliberately reported separately, one finding per
//! elementary cycle; a shared participant appears in each.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::context::AnalysisContext;
use crate::engine::Analyzer;
use crate::graph::{EdgeAnomaly, WaitsForGraph};
use crate::model::{ThreadDump, ThreadKey};
use crate::result::{AnalysisResult, Finding, ResultPayload};

/// One detected deadlock cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedDeadlock {
    pub snapshot_index: usize,
    /// Thread names in canonical rotation (smallest first)
    pub participants: Vec<String>,
    /// Lock addresses along the cycle, when discoverable
    pub locks: Vec<String>,
    /// True when taken from the runtime's own deadlock section
    pub reported_by_runtime: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeadlockReport {
    pub deadlocks: Vec<DetectedDeadlock>,
    /// Participant sets seen in two or more snapshots
    pub persistent: Vec<Vec<String>>,
}

pub struct DeadlockAnalyzer;

impl Analyzer for DeadlockAnalyzer {
    fn name(&self) -> &'static str {
        "deadlock"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());
        let mut report = DeadlockReport::default();

        for (index, dump) in ctx.snapshots().iter().enumerate() {
            if ctx.is_cancelled() {
                return super::cancelled(self.name());
            }
            analyze_snapshot(index, dump, &mut report, &mut result);
        }

        // Persistent deadlocks: same participant name-set in >= 2 snapshots
        let mut seen: BTreeMap<BTreeSet<String>, BTreeSet<usize>> = BTreeMap::new();
        for deadlock in &report.deadlocks {
            seen.entry(deadlock.participants.iter().cloned().collect())
                .or_default()
                .insert(deadlock.snapshot_index);
        }
        for (participants, snapshots) in seen {
            if snapshots.len() >= 2 {
                let names: Vec<String> = participants.into_iter().collect();
                result.push_finding(
                    Finding::critical(
                        "persistent-deadlock",
                        format!(
                            "deadlock between {} persists across {} snapshots",
                            names.join(", "),
                            snapshots.len()
                        ),
                    )
                    .with_detail("snapshots", format!("{}", snapshots.len())),
                );
                report.persistent.push(names);
            }
        }

        result.summary = match report.deadlocks.len() {
            0 => "no deadlocks detected".to_string(),
            1 => "1 deadlock detected".to_string(),
            n => format!("{} deadlocks detected", n),
        };
        result.with_payload(ResultPayload::Deadlocks(report))
    }
}

fn analyze_snapshot(
    index: usize,
    dump: &ThreadDump,
    report: &mut DeadlockReport,
    result: &mut AnalysisResult,
) {
    if !dump.deadlocks.is_empty() {
        for info in &dump.deadlocks {
            let mut participants: Vec<String> =
                info.threads.iter().map(|t| t.name.clone()).collect();
            rotate_to_smallest(&mut participants);
            let locks: Vec<String> = info
                .threads
                .iter()
                .filter_map(|t| t.waiting_for_object.clone())
                .collect();
            push_deadlock(report, result, DetectedDeadlock {
                snapshot_index: index,
                participants,
                locks,
                reported_by_runtime: true,
            });
        }
        return;
    }

    let graph = WaitsForGraph::from_snapshot(dump);
    let names: BTreeMap<ThreadKey, &str> = dump
        .threads
        .iter()
        .map(|t| (t.key(), t.name.as_str()))
        .collect();

    for cycle in graph.cycles() {
        let mut locks: Vec<String> = vec![];
        for (i, waiter) in cycle.iter().enumerate() {
            let owner = &cycle[(i + 1) % cycle.len()];
            if let Some(lock) = graph.edge_lock(waiter, owner) {
                locks.push(lock.to_string());
            }
        }
        let mut participants: Vec<String> = cycle
            .iter()
            .map(|k| names.get(k).map(|n| n.to_string()).unwrap_or_else(|| k.to_string()))
            .collect();
        rotate_to_smallest(&mut participants);
        push_deadlock(report, result, DetectedDeadlock {
            snapshot_index: index,
            participants,
            locks,
            reported_by_runtime: false,
        });
    }

    for anomaly in &graph.anomalies {
        let finding = match anomaly {
            EdgeAnomaly::SelfWait { thread, lock } => Finding::warning(
                "self-wait",
                format!("thread {} waits on lock {} it holds itself", thread, lock),
            ),
            EdgeAnomaly::OrphanWait { thread, lock } => Finding::warning(
                "orphan-wait",
                format!("thread {} waits on lock {} with no visible owner", thread, lock),
            ),
            EdgeAnomaly::AmbiguousOwner { lock, owner_count } => Finding::warning(
                "lock-ownership",
                format!("lock {} appears held by {} threads at once", lock, owner_count),
            ),
        };
        result.push_finding(finding.with_detail("snapshot", index.to_string()));
    }
}

fn push_deadlock(
    report: &mut DeadlockReport,
    result: &mut AnalysisResult,
    deadlock: DetectedDeadlock,
) {
    result.push_finding(
        Finding::critical(
            "deadlock",
            format!(
                "deadlock between {} threads: {}",
                deadlock.participants.len(),
                deadlock.participants.join(" -> "),
            ),
        )
        .with_detail("snapshot", deadlock.snapshot_index.to_string())
        .with_detail("locks", deadlock.locks.join(", ")),
    );
    report.deadlocks.push(deadlock);
}

/// Rotate a cycle so the lexicographically smallest participant leads,
/// preserving cycle order.
fn rotate_to_smallest(cycle: &mut Vec<String>) {
    if let Some(min_index) = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
    {
        cycle.rotate_left(min_index);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        DeadlockInfo, DeadlockedThread, LockInfo, LockRelation, ThreadInfo, ThreadState,
    };
    use crate::options::AnalysisOptions;
    use crate::result::Severity;

    fn blocked(name: &str, waits_on: &str, holds: &str) -> ThreadInfo {
        let mut t = ThreadInfo::new(name);
        t.state = Some(ThreadState::Blocked);
        t.waiting_on_lock_identity = Some(waits_on.to_string());
        t.locks = vec![
            LockInfo::new(LockRelation::WaitingToLock, "java.lang.Object").with_identity(waits_on),
            LockInfo::new(LockRelation::Locked, "java.lang.Object").with_identity(holds),
        ];
        t
    }

    fn dump(threads: Vec<ThreadInfo>) -> ThreadDump {
        let mut d = ThreadDump::empty();
        d.threads = threads;
        d
    }

    fn run(snapshots: Vec<ThreadDump>) -> AnalysisResult {
        let ctx = AnalysisContext::new(snapshots, AnalysisOptions::default());
        DeadlockAnalyzer.analyze(&ctx)
    }

    fn report(result: &AnalysisResult) -> &DeadlockReport {
        match result.payload.as_ref().unwrap() {
            ResultPayload::Deadlocks(r) => r,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_two_way_deadlock_from_graph() {
        let result = run(vec![dump(vec![
            blocked("T2", "0xb", "0xa"),
            blocked("T1", "0xa", "0xb"),
        ])]);
        assert_eq!(result.severity, Severity::Critical);
        let report = report(&result);
        assert_eq!(report.deadlocks.len(), 1);
        assert_eq!(report.deadlocks[0].participants, vec!["T1", "T2"]);
        assert!(!report.deadlocks[0].reported_by_runtime);
        assert_eq!(report.deadlocks[0].locks.len(), 2);
    }

    #[test]
    fn test_runtime_section_preferred() {
        let mut d = dump(vec![]);
        let mut info = DeadlockInfo::default();
        let mut a = DeadlockedThread::new("B-thread");
        a.held_by = Some("A-thread".to_string());
        a.waiting_for_object = Some("0x1".to_string());
        let mut b = DeadlockedThread::new("A-thread");
        b.held_by = Some("B-thread".to_string());
        b.waiting_for_object = Some("0x2".to_string());
        info.threads = vec![a, b];
        d.deadlocks = vec![info];

        let result = run(vec![d]);
        let report = report(&result);
        assert_eq!(report.deadlocks.len(), 1);
        assert!(report.deadlocks[0].reported_by_runtime);
        assert_eq!(
            report.deadlocks[0].participants,
            vec!["A-thread", "B-thread"]
        );
    }

    #[test]
    fn test_no_deadlock_is_ok() {
        let mut t = ThreadInfo::new("main");
        t.state = Some(ThreadState::Runnable);
        let result = run(vec![dump(vec![t])]);
        assert_eq!(result.severity, Severity::Ok);
        assert!(report(&result).deadlocks.is_empty());
        assert_eq!(result.summary, "no deadlocks detected");
    }

    #[test]
    fn test_self_wait_is_warning() {
        let result = run(vec![dump(vec![blocked("T1", "0xa", "0xa")])]);
        assert_eq!(result.severity, Severity::Warning);
        assert!(result.findings.iter().any(|f| f.category == "self-wait"));
        assert!(report(&result).deadlocks.is_empty());
    }

    #[test]
    fn test_orphan_wait_is_warning() {
        let result = run(vec![dump(vec![blocked("T1", "0xdead", "0xbeef")])]);
        assert!(result.findings.iter().any(|f| f.category == "orphan-wait"));
    }

    #[test]
    fn test_persistent_deadlock_across_snapshots() {
        let snap = || {
            dump(vec![
                blocked("T1", "0xa", "0xb"),
                blocked("T2", "0xb", "0xa"),
            ])
        };
        let result = run(vec![snap(), snap()]);
        assert!(result
            .findings
            .iter()
            .any(|f| f.category == "persistent-deadlock"));
        assert_eq!(report(&result).persistent, vec![vec!["T1", "T2"]]);
    }

    #[test]
    fn test_single_snapshot_deadlock_not_persistent() {
        let result = run(vec![dump(vec![
            blocked("T1", "0xa", "0xb"),
            blocked("T2", "0xb", "0xa"),
        ])]);
        assert!(report(&result).persistent.is_empty());
    }
}
