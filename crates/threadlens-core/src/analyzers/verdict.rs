//! Verdict consolidation
//!
//! Runs after every other analyzer and reads their results plus the context.
//! Produces the final status, the last snapshot's time distribution, a
//! bounded [0, 100] health score per snapshot with per-category tracking,
//! and (with two or more snapshots) the health evolution: trend, first
//! critical drop, and which categories moved.
//!
//! Status precedence:
//! 1. any deadlock (or any CRITICAL analyzer result) → DEADLOCK
//! 2. stall indicated, chronic pool exhaustion, stuck I/O, or a long-held
//!    lock → SUSPECTED_STALL
//! 3. any warning → MINOR_ISSUES
//! 4. otherwise → HEALTHY

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::analyzers::io_block;
use crate::context::AnalysisContext;
use crate::model::{ThreadDump, ThreadState};
use crate::patterns;
use crate::result::{AnalysisResult, Finding, ResultPayload, Severity};

/// Scoring category names, reported independently.
const CATEGORY_THREAD_STATES: &str = "Thread States";
const CATEGORY_LOCKS: &str = "Lock Contention";
const CATEGORY_IO: &str = "I/O";
const CATEGORY_GC: &str = "GC";
const CATEGORY_POOLS: &str = "Thread Pool";

/// Category score movement that counts as degrading/improving.
const CATEGORY_DELTA: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Healthy,
    MinorIssues,
    SuspectedStall,
    Deadlock,
}

impl VerdictStatus {
    pub fn severity(self) -> Severity {
        match self {
            VerdictStatus::Healthy => Severity::Ok,
            VerdictStatus::MinorIssues => Severity::Warning,
            VerdictStatus::SuspectedStall => Severity::Error,
            VerdictStatus::Deadlock => Severity::Critical,
        }
    }
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let word = match self {
            VerdictStatus::Healthy => "HEALTHY",
            VerdictStatus::MinorIssues => "MINOR_ISSUES",
            VerdictStatus::SuspectedStall => "SUSPECTED_STALL",
            VerdictStatus::Deadlock => "DEADLOCK",
        };
        write!(f, "{}", word)
    }
}

/// Where the last snapshot's threads spend their time, in percent with one
/// decimal, summing to 100 (rounding residual absorbed by the largest
/// bucket).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeDistribution {
    pub running: f64,
    pub blocked: f64,
    pub waiting: f64,
    pub io: f64,
    pub gc: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub name: String,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHealth {
    pub snapshot_index: usize,
    pub score: i32,
    pub categories: Vec<CategoryScore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthTrend {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthEvolution {
    pub trend: HealthTrend,
    /// Last snapshot score minus first snapshot score
    pub score_change: i32,
    /// Index of the first snapshot whose score dropped by at least the
    /// critical threshold against its predecessor
    pub first_critical_change: Option<usize>,
    pub degrading_categories: Vec<String>,
    pub improving_categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictReport {
    pub status: VerdictStatus,
    pub time_distribution: TimeDistribution,
    pub health: Vec<SnapshotHealth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evolution: Option<HealthEvolution>,
    /// Key findings feeding the verdict, most severe first
    pub items: Vec<String>,
}

pub struct VerdictAnalyzer;

impl VerdictAnalyzer {
    pub fn name(&self) -> &'static str {
        "verdict"
    }

    /// Consolidate the other analyzers' results into the final verdict.
    pub fn consolidate(&self, ctx: &AnalysisContext, results: &[AnalysisResult]) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());

        let signals = Signals::gather(results);
        let health = score_snapshots(ctx, &signals);
        let status = decide_status(&signals);

        let time_distribution = ctx
            .snapshots()
            .last()
            .map(time_distribution)
            .unwrap_or_default();

        let evolution = if health.len() >= 2 {
            Some(evolve(ctx, &health))
        } else {
            None
        };

        let mut items: Vec<(Severity, String)> = results
            .iter()
            .flat_map(|r| r.all_findings())
            .filter(|f| f.severity >= Severity::Warning)
            .map(|f| (f.severity, f.message.clone()))
            .collect();
        items.sort_by(|(sa, ma), (sb, mb)| sb.cmp(sa).then(ma.cmp(mb)));
        items.truncate(10);
        let items: Vec<String> = items.into_iter().map(|(_, m)| m).collect();

        result.severity = status.severity();
        result.summary = match status {
            VerdictStatus::Healthy => "process looks healthy".to_string(),
            VerdictStatus::MinorIssues => "minor issues, no stall".to_string(),
            VerdictStatus::SuspectedStall => "suspected stall".to_string(),
            VerdictStatus::Deadlock => "deadlock detected".to_string(),
        };
        result.push_finding(Finding::new(
            "verdict",
            status.severity(),
            result.summary.clone(),
        ));

        result.with_payload(ResultPayload::Verdict(VerdictReport {
            status,
            time_distribution,
            health,
            evolution,
            items,
        }))
    }
}

// =============================================================================
// SIGNAL EXTRACTION
// =============================================================================

/// What the other analyzers contributed, reduced to scoring inputs.
#[derive(Debug, Default)]
struct Signals {
    deadlock_snapshots: BTreeSet<usize>,
    any_critical: bool,
    stall_indicated: bool,
    stallish_findings: bool,
    any_warning: bool,
    /// Hot lock count per snapshot index
    hot_locks: Vec<(usize, usize)>,
    /// (first, last) snapshot index covered by each io-stuck run
    io_stuck_runs: Vec<(usize, usize)>,
}

impl Signals {
    fn gather(results: &[AnalysisResult]) -> Self {
        let mut signals = Signals::default();
        for result in results {
            if result.severity >= Severity::Critical {
                signals.any_critical = true;
            }
            if result.severity >= Severity::Warning {
                signals.any_warning = true;
            }
            match &result.payload {
                Some(ResultPayload::Deadlocks(report)) => {
                    signals
                        .deadlock_snapshots
                        .extend(report.deadlocks.iter().map(|d| d.snapshot_index));
                }
                Some(ResultPayload::Progress(_)) => {
                    // The progress analyzer already applied the threshold
                    signals.stall_indicated |= result.has_category("stall");
                }
                Some(ResultPayload::LockContention(report)) => {
                    for snapshot in &report.snapshots {
                        let hot = snapshot.contended.iter().filter(|l| l.hot).count();
                        signals.hot_locks.push((snapshot.snapshot_index, hot));
                    }
                }
                Some(ResultPayload::IoBlock(report)) => {
                    for stuck in &report.stuck {
                        let first = stuck.last_index + 1 - stuck.run_length;
                        signals.io_stuck_runs.push((first, stuck.last_index));
                    }
                }
                _ => {}
            }
            for finding in result.all_findings() {
                if matches!(
                    finding.category.as_str(),
                    "chronic-pool-exhaustion" | "io-stuck" | "long-held-lock"
                ) {
                    signals.stallish_findings = true;
                }
                if finding.severity >= Severity::Warning {
                    signals.any_warning = true;
                }
            }
        }
        signals
    }

    fn hot_locks_at(&self, index: usize) -> usize {
        self.hot_locks
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, hot)| *hot)
            .unwrap_or(0)
    }

    fn io_stuck_at(&self, index: usize) -> usize {
        self.io_stuck_runs
            .iter()
            .filter(|(first, last)| (*first..=*last).contains(&index))
            .count()
    }
}

fn decide_status(signals: &Signals) -> VerdictStatus {
    if !signals.deadlock_snapshots.is_empty() || signals.any_critical {
        return VerdictStatus::Deadlock;
    }
    if signals.stall_indicated || signals.stallish_findings {
        return VerdictStatus::SuspectedStall;
    }
    if signals.any_warning {
        return VerdictStatus::MinorIssues;
    }
    VerdictStatus::Healthy
}

// =============================================================================
// TIME DISTRIBUTION
// =============================================================================

/// Bucket every thread of the dump: gc by name, then I/O by stack, then
/// state. Percentages in tenths so the rounding residual can be absorbed
/// exactly by the largest bucket.
fn time_distribution(dump: &ThreadDump) -> TimeDistribution {
    let mut counts = [0usize; 5]; // running, blocked, waiting, io, gc
    for thread in &dump.threads {
        let bucket = if patterns::is_gc_thread(&thread.name) {
            4
        } else if io_block::classify_stack(&thread.stack).is_some() {
            3
        } else {
            match thread.state {
                Some(ThreadState::Blocked) => 1,
                Some(ThreadState::Waiting) | Some(ThreadState::TimedWaiting) => 2,
                _ => 0,
            }
        };
        counts[bucket] += 1;
    }
    let total: usize = counts.iter().sum();
    if total == 0 {
        return TimeDistribution::default();
    }

    let mut tenths: [i64; 5] = [0; 5];
    for (i, count) in counts.iter().enumerate() {
        tenths[i] = ((*count as f64 / total as f64) * 1000.0).round() as i64;
    }
    let residual = 1000 - tenths.iter().sum::<i64>();
    if residual != 0 {
        let largest = (0..5).max_by_key(|&i| (tenths[i], -(i as i64))).unwrap_or(0);
        tenths[largest] += residual;
    }

    TimeDistribution {
        running: tenths[0] as f64 / 10.0,
        blocked: tenths[1] as f64 / 10.0,
        waiting: tenths[2] as f64 / 10.0,
        io: tenths[3] as f64 / 10.0,
        gc: tenths[4] as f64 / 10.0,
    }
}

impl TimeDistribution {
    pub fn sum(&self) -> f64 {
        self.running + self.blocked + self.waiting + self.io + self.gc
    }
}

// =============================================================================
// HEALTH SCORING
// =============================================================================

fn score_snapshots(ctx: &AnalysisContext, signals: &Signals) -> Vec<SnapshotHealth> {
    ctx.snapshots()
        .iter()
        .enumerate()
        .map(|(index, dump)| score_snapshot(index, dump, signals))
        .collect()
}

fn score_snapshot(index: usize, dump: &ThreadDump, signals: &Signals) -> SnapshotHealth {
    let total = dump.threads.len().max(1) as f64;
    let blocked_pct = dump
        .threads
        .iter()
        .filter(|t| t.state == Some(ThreadState::Blocked))
        .count() as f64
        / total
        * 100.0;
    let waiting_threads: Vec<_> = dump
        .threads
        .iter()
        .filter(|t| {
            matches!(
                t.state,
                Some(ThreadState::Waiting) | Some(ThreadState::TimedWaiting)
            )
        })
        .collect();
    let waiting_pct = waiting_threads.len() as f64 / total * 100.0;
    let pool_heavy = !waiting_threads.is_empty()
        && waiting_threads
            .iter()
            .filter(|t| patterns::POOL_IDLE.is_match(&t.name))
            .count() as f64
            > waiting_threads.len() as f64 / 2.0;

    let mut thread_states = 0i32;
    if blocked_pct >= 10.0 {
        thread_states += 10;
    }
    if blocked_pct >= 25.0 {
        thread_states += 15;
    }
    if waiting_pct >= 50.0 && pool_heavy {
        // Expected idleness of a pooled service
    } else if waiting_pct >= 70.0 {
        thread_states += 5;
    }

    let deadlocked = signals.deadlock_snapshots.contains(&index);
    let mut lock_contention = 0i32;
    if deadlocked {
        lock_contention += 60;
    }
    lock_contention += (5 * signals.hot_locks_at(index) as i32).min(20);

    let io = (2 * signals.io_stuck_at(index) as i32).min(10);

    let overall = if deadlocked {
        // A deadlocked process is not partially healthy
        0
    } else {
        (100 - thread_states - lock_contention - io).clamp(0, 100)
    };

    SnapshotHealth {
        snapshot_index: index,
        score: overall,
        categories: vec![
            CategoryScore {
                name: CATEGORY_THREAD_STATES.to_string(),
                score: (100 - thread_states).clamp(0, 100),
            },
            CategoryScore {
                name: CATEGORY_LOCKS.to_string(),
                score: (100 - lock_contention).clamp(0, 100),
            },
            CategoryScore {
                name: CATEGORY_IO.to_string(),
                score: (100 - io).clamp(0, 100),
            },
            CategoryScore {
                name: CATEGORY_GC.to_string(),
                score: 100,
            },
            CategoryScore {
                name: CATEGORY_POOLS.to_string(),
                score: 100,
            },
        ],
    }
}

fn evolve(ctx: &AnalysisContext, health: &[SnapshotHealth]) -> HealthEvolution {
    let first = &health[0];
    let last = &health[health.len() - 1];
    let score_change = last.score - first.score;

    let trend = if score_change.abs() <= ctx.options().degrading_score_delta {
        HealthTrend::Stable
    } else if score_change < 0 {
        HealthTrend::Degrading
    } else {
        HealthTrend::Improving
    };

    // Drops only; improvements never flag a critical change
    let first_critical_change = health.windows(2).enumerate().find_map(|(i, w)| {
        let delta = w[1].score - w[0].score;
        (delta <= -ctx.options().critical_score_drop).then_some(i + 1)
    });

    let mut degrading_categories = vec![];
    let mut improving_categories = vec![];
    for (first_cat, last_cat) in first.categories.iter().zip(last.categories.iter()) {
        let diff = last_cat.score - first_cat.score;
        if diff < -CATEGORY_DELTA {
            degrading_categories.push(first_cat.name.clone());
        } else if diff > CATEGORY_DELTA {
            improving_categories.push(first_cat.name.clone());
        }
    }

    HealthEvolution {
        trend,
        score_change,
        first_critical_change,
        degrading_categories,
        improving_categories,
    }
}

// =============================================================================
// TESTS
// =============================================================================
