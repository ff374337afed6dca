//! GC activity
//!
//! Watches the runtime's GC worker threads (always read from the raw
//! snapshot; the visibility options hide them from other analyzers by
//! design). Trends the worker count and the RUNNABLE fraction across the
//! sequence; the first snapshot is the baseline and more than twice the
//! baseline activity is surfaced as a warning.

use serde::{Deserialize, Serialize};

use crate::context::AnalysisContext;
use crate::engine::Analyzer;
use crate::model::ThreadState;
use crate::patterns;
use crate::result::{AnalysisResult, Finding, ResultPayload};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GcSnapshot {
    pub snapshot_index: usize,
    pub gc_thread_count: usize,
    pub runnable_count: usize,
    pub runnable_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GcActivityReport {
    pub snapshots: Vec<GcSnapshot>,
}

pub struct GcActivityAnalyzer;

impl Analyzer for GcActivityAnalyzer {
    fn name(&self) -> &'static str {
        "gc-activity"
    }

    fn priority(&self) -> u32 {
        35
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());
        let mut report = GcActivityReport::default();

        for (index, dump) in ctx.snapshots().iter().enumerate() {
            let gc_threads: Vec<_> = dump
                .threads
                .iter()
                .filter(|t| patterns::is_gc_thread(&t.name))
                .collect();
            let runnable = gc_threads
                .iter()
                .filter(|t| t.state == Some(ThreadState::Runnable))
                .count();
            let fraction = if gc_threads.is_empty() {
                0.0
            } else {
                runnable as f64 / gc_threads.len() as f64
            };
            report.snapshots.push(GcSnapshot {
                snapshot_index: index,
                gc_thread_count: gc_threads.len(),
                runnable_count: runnable,
                runnable_fraction: fraction,
            });
        }

        let baseline = report
            .snapshots
            .first()
            .map(|s| s.runnable_fraction)
            .unwrap_or(0.0);
        let current = report
            .snapshots
            .last()
            .map(|s| s.runnable_fraction)
            .unwrap_or(0.0);

        if baseline > 0.0 && current > 2.0 * baseline {
            result.push_finding(
                Finding::warning(
                    "gc-pressure",
                    format!(
                        "GC worker activity grew from {:.0}% to {:.0}% runnable",
                        baseline * 100.0,
                        current * 100.0
                    ),
                )
                .with_detail("baseline", format!("{:.2}", baseline))
                .with_detail("current", format!("{:.2}", current)),
            );
        } else if report.snapshots.iter().any(|s| s.gc_thread_count > 0) {
            result.push_finding(Finding::info(
                "gc-activity",
                format!(
                    "{} GC worker(s), {:.0}% runnable in last snapshot",
                    report.snapshots.last().map(|s| s.gc_thread_count).unwrap_or(0),
                    current * 100.0
                ),
            ));
        }

        result.summary = format!(
            "GC workers runnable fraction {:.0}% (baseline {:.0}%)",
            current * 100.0,
            baseline * 100.0
        );
        result.with_payload(ResultPayload::GcActivity(report))
    }
}

// =============================================================================
// TESTS
// =============================================================================
