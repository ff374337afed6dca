//! The analysis passes
//!
//! Each analyzer is an independent, side-effect-free pass over the
//! [`AnalysisContext`](crate::context::AnalysisContext). Order of execution
//! never matters; the engine re-orders results by priority for presentation.
//! The verdict consolidator is the one exception: it runs after the others
//! and reads their results.

pub mod churn;
pub mod deadlock;
pub mod gc;
pub mod hotspot;
pub mod io_block;
pub mod locks;
pub mod pools;
pub mod progress;
pub mod similar_stack;
pub mod stack_group;
pub mod verdict;

use crate::result::{AnalysisResult, Finding};

/// Partial result for a cooperatively cancelled pass.
pub(crate) fn cancelled(name: &str) -> AnalysisResult {
    AnalysisResult::new(name)
        .with_summary(format!("{} cancelled before completion", name))
        .with_finding(Finding::warning(
            "cancelled",
            "analysis cancelled; partial result",
        ))
}
