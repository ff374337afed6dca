//! Per-thread progress classification
//!
//! Follows each logical thread (by identity tuple) through the snapshot
//! sequence and classifies whether it is making progress. Classification
//! precedence, most specific first:
//!
//! 1. `Ignored` — name matched an ignore pattern
//! 2. `Terminated` — present earlier, absent in the last snapshot
//! 3. `New` — absent in every prior snapshot, present in the last
//! 4. `Restarted` — elapsed time dropped between consecutive sightings
//! 5. By last-seen state: blocked, expected idleness, stuck, active,
//!    runnable-without-progress
//!
//! The aggregate `problem_percentage` drives the stall verdict.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::context::AnalysisContext;
use crate::engine::Analyzer;
use crate::model::{ThreadInfo, ThreadKey, ThreadState};
use crate::patterns;
use crate::result::{AnalysisResult, Finding, ResultPayload, Severity};

/// Per-thread progress classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressClass {
    Active,
    RunnableNoProgress,
    BlockedOnLock,
    WaitingExpected,
    TimedWaitingExpected,
    Stuck,
    Restarted,
    New,
    Terminated,
    Ignored,
    Unknown,
}

impl ProgressClass {
    /// Classes that count toward the problem percentage
    pub fn is_problem(self) -> bool {
        matches!(
            self,
            ProgressClass::BlockedOnLock | ProgressClass::Stuck | ProgressClass::RunnableNoProgress
        )
    }
}

/// One logical thread's classification over the whole sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadProgress {
    pub key: ThreadKey,
    pub name: String,
    pub classification: ProgressClass,
}

/// Aggregate counts over all classified threads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Classified threads, ignored and terminated excluded
    pub total: usize,
    pub active: usize,
    pub runnable_no_progress: usize,
    pub blocked_on_lock: usize,
    pub waiting_expected: usize,
    pub timed_waiting_expected: usize,
    pub stuck: usize,
    pub restarted: usize,
    pub new_threads: usize,
    pub terminated: usize,
    pub ignored: usize,
    pub unknown: usize,
    pub problem_percentage: f64,
}

impl ProgressSummary {
    pub fn problem_count(&self) -> usize {
        self.blocked_on_lock + self.stuck + self.runnable_no_progress
    }

    pub fn indicates_stall(&self, threshold_percent: f64) -> bool {
        self.total > 0 && self.problem_percentage >= threshold_percent
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressReport {
    pub threads: Vec<ThreadProgress>,
    pub summary: ProgressSummary,
}

pub struct ProgressAnalyzer;

impl Analyzer for ProgressAnalyzer {
    fn name(&self) -> &'static str {
        "thread-progress"
    }

    fn priority(&self) -> u32 {
        90
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());
        let snapshot_count = ctx.snapshot_count();

        // Identity-keyed sightings per snapshot, ignored threads kept so they
        // can be classified (hidden gc/vm/daemon threads are not).
        let mut sightings: Vec<BTreeMap<ThreadKey, &ThreadInfo>> = vec![];
        for dump in ctx.snapshots() {
            let mut map = BTreeMap::new();
            for thread in &dump.threads {
                let hidden_not_ignored =
                    ctx.is_hidden(thread) && !ctx.options().is_ignored(&thread.name);
                if hidden_not_ignored {
                    continue;
                }
                map.entry(thread.key()).or_insert(thread);
            }
            sightings.push(map);
        }

        let mut keys: BTreeSet<ThreadKey> = BTreeSet::new();
        for map in &sightings {
            keys.extend(map.keys().cloned());
        }

        let mut report = ProgressReport::default();
        for key in keys {
            if ctx.is_cancelled() {
                return super::cancelled(self.name());
            }
            let occurrences: Vec<(usize, &ThreadInfo)> = sightings
                .iter()
                .enumerate()
                .filter_map(|(i, map)| map.get(&key).map(|t| (i, *t)))
                .collect();
            let classification = classify(ctx, snapshot_count, &occurrences);
            let name = occurrences
                .last()
                .map(|(_, t)| t.name.clone())
                .unwrap_or_default();
            tally(&mut report.summary, classification);
            report.threads.push(ThreadProgress {
                key,
                name,
                classification,
            });
        }

        let summary = &mut report.summary;
        summary.problem_percentage = if summary.total == 0 {
            0.0
        } else {
            summary.problem_count() as f64 / summary.total as f64 * 100.0
        };

        emit_findings(ctx, &report, &mut result);

        result.summary = format!(
            "{} threads: {} active, {} problem ({:.1}%)",
            report.summary.total,
            report.summary.active,
            report.summary.problem_count(),
            report.summary.problem_percentage,
        );
        result.with_payload(ResultPayload::Progress(report))
    }
}

fn tally(summary: &mut ProgressSummary, class: ProgressClass) {
    match class {
        ProgressClass::Active => summary.active += 1,
        ProgressClass::RunnableNoProgress => summary.runnable_no_progress += 1,
        ProgressClass::BlockedOnLock => summary.blocked_on_lock += 1,
        ProgressClass::WaitingExpected => summary.waiting_expected += 1,
        ProgressClass::TimedWaitingExpected => summary.timed_waiting_expected += 1,
        ProgressClass::Stuck => summary.stuck += 1,
        ProgressClass::Restarted => summary.restarted += 1,
        ProgressClass::New => summary.new_threads += 1,
        ProgressClass::Terminated => summary.terminated += 1,
        ProgressClass::Ignored => summary.ignored += 1,
        ProgressClass::Unknown => summary.unknown += 1,
    }
    // Terminated and ignored threads are not part of the current population
    if !matches!(class, ProgressClass::Terminated | ProgressClass::Ignored) {
        summary.total += 1;
    }
}

fn classify(
    ctx: &AnalysisContext,
    snapshot_count: usize,
    occurrences: &[(usize, &ThreadInfo)],
) -> ProgressClass {
    let Some(&(last_index, last)) = occurrences.last() else {
        return ProgressClass::Unknown;
    };

    if ctx.options().is_ignored(&last.name) {
        return ProgressClass::Ignored;
    }
    if snapshot_count >= 2 {
        if last_index + 1 != snapshot_count {
            return ProgressClass::Terminated;
        }
        if occurrences.len() == 1 && last_index == snapshot_count - 1 && snapshot_count > 1 {
            return ProgressClass::New;
        }
        if restarted(occurrences) {
            return ProgressClass::Restarted;
        }
    }

    match last.state {
        Some(ThreadState::Blocked) => ProgressClass::BlockedOnLock,
        Some(ThreadState::Runnable) => classify_runnable(occurrences),
        Some(ThreadState::Waiting) => {
            if patterns::POOL_IDLE.is_match(&last.name) {
                ProgressClass::WaitingExpected
            } else if stuck(occurrences) {
                ProgressClass::Stuck
            } else {
                ProgressClass::Unknown
            }
        }
        Some(ThreadState::TimedWaiting) => {
            if patterns::SCHEDULER.is_match(&last.name) || patterns::POOL_IDLE.is_match(&last.name)
            {
                ProgressClass::TimedWaitingExpected
            } else if stuck(occurrences) {
                ProgressClass::Stuck
            } else {
                ProgressClass::Unknown
            }
        }
        _ => {
            if stuck(occurrences) {
                ProgressClass::Stuck
            } else {
                ProgressClass::Unknown
            }
        }
    }
}

fn classify_runnable(occurrences: &[(usize, &ThreadInfo)]) -> ProgressClass {
    if occurrences.len() == 1 {
        return ProgressClass::Active;
    }
    let (_, first) = occurrences[0];
    let (_, last) = occurrences[occurrences.len() - 1];

    let cpu_increased = match (first.cpu_time_ms, last.cpu_time_ms) {
        (Some(a), Some(b)) => b > a,
        _ => false,
    };
    let stack_changed = first.stack != last.stack;
    if cpu_increased || stack_changed {
        return ProgressClass::Active;
    }

    let runnable_throughout = occurrences
        .iter()
        .all(|(_, t)| t.state == Some(ThreadState::Runnable));
    let stack_constant = occurrences.iter().all(|(_, t)| t.stack == first.stack);
    let cpu_constant = occurrences
        .iter()
        .all(|(_, t)| t.cpu_time_ms == first.cpu_time_ms);
    if runnable_throughout && stack_constant && cpu_constant {
        return ProgressClass::RunnableNoProgress;
    }
    ProgressClass::Unknown
}

/// Same non-runnable state and identical stack across at least three
/// consecutive sightings ending at the last one.
fn stuck(occurrences: &[(usize, &ThreadInfo)]) -> bool {
    if occurrences.len() < 3 {
        return false;
    }
    let tail = &occurrences[occurrences.len() - 3..];
    let (_, reference) = tail[tail.len() - 1];
    if reference.state == Some(ThreadState::Runnable) || reference.state.is_none() {
        return false;
    }
    tail.windows(2).all(|w| w[0].0 + 1 == w[1].0)
        && tail
            .iter()
            .all(|(_, t)| t.state == reference.state && t.stack == reference.stack)
}

fn restarted(occurrences: &[(usize, &ThreadInfo)]) -> bool {
    occurrences.windows(2).any(|w| {
        let (i_a, a) = w[0];
        let (i_b, b) = w[1];
        i_a + 1 == i_b
            && matches!((a.elapsed_ms, b.elapsed_ms), (Some(ea), Some(eb)) if eb < ea)
    })
}

fn emit_findings(ctx: &AnalysisContext, report: &ProgressReport, result: &mut AnalysisResult) {
    let summary = &report.summary;
    for thread in &report.threads {
        let finding = match thread.classification {
            ProgressClass::Stuck => Finding::warning(
                "stuck-thread",
                format!("thread {} is stuck (same state and stack)", thread.name),
            ),
            ProgressClass::RunnableNoProgress => Finding::warning(
                "no-progress",
                format!(
                    "thread {} is runnable but made no progress (cpu and stack unchanged)",
                    thread.name
                ),
            ),
            ProgressClass::Restarted => Finding::info(
                "thread-restarted",
                format!("thread {} restarted (elapsed time dropped)", thread.name),
            ),
            _ => continue,
        };
        result.push_finding(finding.with_detail("thread", thread.name.clone()));
    }
    if summary.blocked_on_lock > 0 {
        result.push_finding(Finding::info(
            "blocked-threads",
            format!("{} threads blocked on locks", summary.blocked_on_lock),
        ));
    }

    let stalled = summary.indicates_stall(ctx.options().stall_threshold_percent);
    if stalled {
        result.push_finding(Finding::error(
            "stall",
            format!(
                "{:.1}% of threads show no progress (threshold {:.0}%)",
                summary.problem_percentage,
                ctx.options().stall_threshold_percent
            ),
        ));
    }

    // Severity ladder independent of individual finding severities
    let floor = if stalled {
        Severity::Error
    } else if summary.problem_count() >= 3 {
        Severity::Warning
    } else if summary.problem_count() > 0 {
        Severity::Info
    } else {
        Severity::Ok
    };
    result.severity = result.severity.max(floor);
}

// =============================================================================
// TESTS
// =============================================================================
