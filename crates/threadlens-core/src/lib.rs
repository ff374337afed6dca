//! threadlens-core: thread-dump parser, model, and analysis pipeline
//!
//! This crate contains the pure analysis logic with NO I/O dependencies:
//! - Immutable dump model (threads, stacks, lock relations, deadlock section)
//! - Lenient line-oriented parser for the two dump dialects
//! - Analysis framework (options, context, result tree, engine)
//! - The analyzers: deadlock, progress, lock contention, stack grouping,
//!   thread pools, I/O, churn, GC, profiling hotspots, verdict
//! - Renderer dispatch for pluggable output
//!
//! File reading, process capture, and the CLI remain in the `threadlens`
//! binary crate; the profiling-recording parser is an external collaborator
//! consumed through the [`profiling::ProfilingSummary`] facade.
//!
//! ## Pipeline
//!
//! ```text
//! raw text → parser → Vec<ThreadDump> → AnalysisContext
//!     → AnalysisEngine (independent analyzers) → CompositeResult
//!     → verdict consolidation → renderer
//! ```
//!
//! Every entry point is total: the parser never errors on text, and
//! `AnalysisEngine::analyze_all` expresses every failure inside the result
//! tree.

pub mod analyzers;
pub mod context;
pub mod engine;
pub mod graph;
pub mod model;
pub mod options;
pub mod parser;
pub mod patterns;
pub mod profiling;
pub mod render;
pub mod result;

// Re-export commonly used types
pub use context::{AnalysisContext, CancelToken};
pub use engine::{AnalysisEngine, Analyzer};
pub use profiling::ProfilingSummary;
pub use model::{
    DeadlockInfo, JniInfo, LockInfo, LockRelation, SourceType, StackFrame, ThreadDump, ThreadInfo,
    ThreadKey, ThreadState,
};
pub use options::AnalysisOptions;
pub use parser::{parse, parse_all, parse_bytes};
pub use render::{RenderFormat, Renderer, RendererRegistry};
pub use result::{AnalysisResult, Finding, ResultPayload, Severity};

/// Run the default pipeline over an ordered snapshot sequence in one call.
///
/// Equivalent to building an [`AnalysisContext`] and handing it to
/// [`AnalysisEngine::with_default_analyzers`]. Never fails; tolerance lives
/// inside the returned tree.
pub fn analyze(
    snapshots: Vec<ThreadDump>,
    options: AnalysisOptions,
    profiling: Option<Box<dyn ProfilingSummary>>,
) -> AnalysisResult {
    let mut ctx = AnalysisContext::new(snapshots, options);
    if let Some(profiling) = profiling {
        ctx = ctx.with_profiling(profiling);
    }
    AnalysisEngine::with_default_analyzers().analyze_all(&ctx)
}
