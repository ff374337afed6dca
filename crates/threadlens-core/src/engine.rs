//! Analysis engine
//!
//! Ordered registry of independent, side-effect-free analyzers. The engine
//! owns the failure policy: an analyzer that panics becomes a WARNING finding
//! and never aborts the run; analyzers whose preconditions are unmet are
//! skipped silently. Results are re-ordered by declared priority so a
//! parallelizing implementation could not change the output.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::analyzers;
use crate::analyzers::verdict::VerdictAnalyzer;
use crate::context::AnalysisContext;
use crate::result::{AnalysisResult, Finding};

/// One independent analysis pass.
///
/// `analyze` must be pure with respect to the context: same context, same
/// result. The engine enforces the failure policy around it.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher runs earlier in the composite output
    fn priority(&self) -> u32 {
        0
    }

    /// Skipped (not an error) when fewer than two snapshots are supplied
    fn requires_multiple_snapshots(&self) -> bool {
        false
    }

    /// Skipped (not an error) when the context has no profiling summary
    fn requires_profiling(&self) -> bool {
        false
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult;
}

/// The engine: a populated-once registry plus the run loop.
pub struct AnalysisEngine {
    analyzers: Vec<Box<dyn Analyzer>>,
    consolidator: Option<VerdictAnalyzer>,
}

impl AnalysisEngine {
    /// An engine with no analyzers registered
    pub fn empty() -> Self {
        Self {
            analyzers: vec![],
            consolidator: None,
        }
    }

    /// The full pipeline in default configuration
    pub fn with_default_analyzers() -> Self {
        let mut engine = Self::empty();
        engine.register(Box::new(analyzers::deadlock::DeadlockAnalyzer));
        engine.register(Box::new(analyzers::progress::ProgressAnalyzer));
        engine.register(Box::new(analyzers::locks::LockContentionAnalyzer));
        engine.register(Box::new(analyzers::pools::ThreadPoolAnalyzer));
        engine.register(Box::new(analyzers::io_block::IoBlockAnalyzer));
        engine.register(Box::new(analyzers::stack_group::StackGroupAnalyzer));
        engine.register(Box::new(analyzers::similar_stack::SimilarStackAnalyzer));
        engine.register(Box::new(analyzers::churn::ChurnAnalyzer));
        engine.register(Box::new(analyzers::gc::GcActivityAnalyzer));
        engine.register(Box::new(analyzers::hotspot::HotspotAnalyzer));
        engine.consolidator = Some(VerdictAnalyzer);
        engine
    }

    pub fn register(&mut self, analyzer: Box<dyn Analyzer>) {
        self.analyzers.push(analyzer);
    }

    pub fn set_consolidator(&mut self, consolidator: VerdictAnalyzer) {
        self.consolidator = Some(consolidator);
    }

    /// Run every registered analyzer and consolidate into one composite.
    ///
    /// Never fails: tolerance is expressed inside the result tree.
    pub fn analyze_all(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let timestamp = ctx.snapshots().last().and_then(|d| d.timestamp);
        let mut results: Vec<(u32, AnalysisResult)> = vec![];

        for analyzer in &self.analyzers {
            if analyzer.requires_multiple_snapshots() && ctx.snapshot_count() < 2 {
                debug!(analyzer = analyzer.name(), "skipped: needs multiple snapshots");
                continue;
            }
            if analyzer.requires_profiling() && ctx.profiling().is_none() {
                debug!(analyzer = analyzer.name(), "skipped: no profiling summary");
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| analyzer.analyze(ctx)));
            let result = match outcome {
                Ok(mut result) => {
                    result.timestamp = timestamp;
                    result
                }
                Err(panic) => {
                    warn!(analyzer = analyzer.name(), "analyzer failed");
                    let reason = panic_message(&panic);
                    let mut failed = AnalysisResult::new(analyzer.name())
                        .with_summary(format!("{} failed", analyzer.name()));
                    failed.timestamp = timestamp;
                    failed.push_finding(
                        Finding::warning(
                            "analyzer-error",
                            format!("analyzer {} failed: {}", analyzer.name(), reason),
                        )
                        .with_detail("analyzer", analyzer.name()),
                    );
                    failed
                }
            };
            results.push((analyzer.priority(), result));
        }

        // Deterministic presentation order regardless of execution order
        results.sort_by(|(pa, ra), (pb, rb)| pb.cmp(pa).then(ra.analyzer.cmp(&rb.analyzer)));
        let mut children: Vec<AnalysisResult> = results.into_iter().map(|(_, r)| r).collect();

        if let Some(consolidator) = &self.consolidator {
            let mut verdict = consolidator.consolidate(ctx, &children);
            verdict.timestamp = timestamp;
            children.push(verdict);
        }

        let mut composite = AnalysisResult::composite("engine", children);
        composite.timestamp = timestamp;
        composite.summary = format!(
            "{} snapshots, {} analyzer results",
            ctx.snapshot_count(),
            composite.children.len()
        );

        // Invalid configuration surfaces as warnings on the composite itself
        for (pattern, reason) in &ctx.options().invalid_patterns {
            composite.push_finding(
                Finding::warning(
                    "invalid-config",
                    format!("ignoring unparsable ignore pattern '{}': {}", pattern, reason),
                )
                .with_detail("pattern", pattern.clone()),
            );
        }
        composite
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
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

    struct PanickingAnalyzer;

    impl Analyzer for PanickingAnalyzer {
        fn name(&self) -> &'static str {
            "boom"
        }

        fn analyze(&self, _ctx: &AnalysisContext) -> AnalysisResult {
            panic!("intentional test failure");
        }
    }

    struct MultiOnlyAnalyzer;

    impl Analyzer for MultiOnlyAnalyzer {
        fn name(&self) -> &'static str {
            "multi-only"
        }

        fn requires_multiple_snapshots(&self) -> bool {
            true
        }

        fn analyze(&self, _ctx: &AnalysisContext) -> AnalysisResult {
            AnalysisResult::new("multi-only").with_summary("ran")
        }
    }

    fn single_snapshot_ctx() -> AnalysisContext {
        AnalysisContext::new(vec![ThreadDump::empty()], AnalysisOptions::default())
    }

    #[test]
    fn test_panicking_analyzer_becomes_warning() {
        let mut engine = AnalysisEngine::empty();
        engine.register(Box::new(PanickingAnalyzer));
        let result = engine.analyze_all(&single_snapshot_ctx());
        assert_eq!(result.children.len(), 1);
        assert_eq!(result.children[0].severity, Severity::Warning);
        assert!(result.has_category("analyzer-error"));
        assert!(result.children[0].findings[0]
            .message
            .contains("intentional test failure"));
    }

    #[test]
    fn test_precondition_skip_is_silent() {
        let mut engine = AnalysisEngine::empty();
        engine.register(Box::new(MultiOnlyAnalyzer));
        let result = engine.analyze_all(&single_snapshot_ctx());
        assert!(result.children.is_empty());
        assert_eq!(result.severity, Severity::Ok);
    }

    #[test]
    fn test_invalid_config_surfaces_as_warning() {
        let options = AnalysisOptions::builder().ignore_pattern("([bad").build();
        let ctx = AnalysisContext::new(vec![ThreadDump::empty()], options);
        let result = AnalysisEngine::empty().analyze_all(&ctx);
        assert!(result.has_category("invalid-config"));
        assert_eq!(result.severity, Severity::Warning);
    }

    #[test]
    fn test_cancellation_yields_partial_results() {
        use crate::context::CancelToken;

        let token = CancelToken::new();
        token.cancel();
        let dump = crate::parser::parse("\"main\" #1 nid=0x1 runnable\n");
        let ctx = AnalysisContext::new(vec![dump], AnalysisOptions::default())
            .with_cancel_token(token);
        let result = AnalysisEngine::with_default_analyzers().analyze_all(&ctx);
        assert!(result.has_category("cancelled"));
        assert!(result.severity >= Severity::Warning);
    }

    #[test]
    fn test_default_pipeline_is_deterministic() {
        let engine = AnalysisEngine::with_default_analyzers();
        let dump = crate::parser::parse(
            "\"main\" #1 nid=0x1 cpu=5ms elapsed=1s runnable\n   java.lang.Thread.State: RUNNABLE\n\tat com.example.A.run(A.java:1)\n",
        );
        let ctx = AnalysisContext::new(vec![dump], AnalysisOptions::default());
        let a = engine.analyze_all(&ctx);
        let b = engine.analyze_all(&ctx);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
