//! Profiling hotspots
//!
//! The one pass that reads the profiling facade. Skipped entirely by the
//! engine when no recording is attached. Surfaces the hottest threads and
//! methods as informational findings and cross-references hot threads against
//! dump threads by name.

use serde::{Deserialize, Serialize};

use crate::context::AnalysisContext;
use crate::engine::Analyzer;
use crate::profiling::{AllocationSite, HotMethod, HotThread};
use crate::result::{AnalysisResult, Finding, ResultPayload};

/// How many entries each top-N list carries.
const TOP_N: usize = 5;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HotspotReport {
    pub threads: Vec<HotThread>,
    pub methods: Vec<HotMethod>,
    pub allocations: Vec<AllocationSite>,
    /// Hot threads that also appear in the last snapshot
    pub matched_threads: Vec<String>,
}

pub struct HotspotAnalyzer;

impl Analyzer for HotspotAnalyzer {
    fn name(&self) -> &'static str {
        "hotspots"
    }

    fn priority(&self) -> u32 {
        30
    }

    fn requires_profiling(&self) -> bool {
        true
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());
        let Some(profiling) = ctx.profiling() else {
            // The engine skips without a summary; tolerate direct calls
            result.summary = "no profiling recording attached".to_string();
            return result;
        };

        let mut report = HotspotReport {
            threads: profiling.hottest_threads(TOP_N),
            methods: profiling.hottest_methods(TOP_N),
            allocations: profiling.allocation_hotspots(TOP_N),
            matched_threads: vec![],
        };

        if let Some(last) = ctx.snapshots().last() {
            for hot in &report.threads {
                if last.thread_by_name(&hot.name).is_some() {
                    report.matched_threads.push(hot.name.clone());
                }
            }
        }

        for hot in &report.threads {
            result.push_finding(
                Finding::info(
                    "hot-thread",
                    format!(
                        "thread {} took {:.1}% of samples ({})",
                        hot.name, hot.percentage, hot.sample_count
                    ),
                )
                .with_detail("thread", hot.name.clone()),
            );
        }
        for hot in &report.methods {
            result.push_finding(Finding::info(
                "hot-method",
                format!(
                    "method {} took {:.1}% of samples",
                    hot.qualified_name, hot.percentage
                ),
            ));
        }

        result.summary = format!(
            "{} hot thread(s), {} hot method(s) from profiling",
            report.threads.len(),
            report.methods.len()
        );
        result.with_payload(ResultPayload::Hotspots(report))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ThreadDump, ThreadInfo};
    use crate::options::AnalysisOptions;
    use crate::profiling::testing::FixedSummary;
    use crate::result::Severity;

    fn summary_with_thread(name: &str) -> FixedSummary {
        FixedSummary {
            threads: vec![HotThread {
                name: name.to_string(),
                sample_count: 420,
                percentage: 42.0,
            }],
            methods: vec![HotMethod {
                qualified_name: "com.example.Hot.spin".to_string(),
                sample_count: 300,
                percentage: 30.0,
            }],
            ..FixedSummary::default()
        }
    }

    #[test]
    fn test_hotspots_reported() {
        let mut dump = ThreadDump::empty();
        dump.threads.push(ThreadInfo::new("cruncher"));
        let ctx = AnalysisContext::new(vec![dump], AnalysisOptions::default())
            .with_profiling(Box::new(summary_with_thread("cruncher")));
        let result = HotspotAnalyzer.analyze(&ctx);
        assert_eq!(result.severity, Severity::Info);
        let report = match result.payload.unwrap() {
            ResultPayload::Hotspots(r) => r,
            other => panic!("unexpected payload {:?}", other),
        };
        assert_eq!(report.matched_threads, vec!["cruncher"]);
        assert_eq!(report.methods.len(), 1);
    }

    #[test]
    fn test_unmatched_hot_thread() {
        let ctx = AnalysisContext::new(vec![ThreadDump::empty()], AnalysisOptions::default())
            .with_profiling(Box::new(summary_with_thread("gone")));
        let result = HotspotAnalyzer.analyze(&ctx);
        let report = match result.payload.unwrap() {
            ResultPayload::Hotspots(r) => r,
            other => panic!("unexpected payload {:?}", other),
        };
        assert!(report.matched_threads.is_empty());
    }
}
