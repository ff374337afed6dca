//! Thread churn
//!
//! Over each consecutive snapshot pair, counts identities that appeared,
//! disappeared, restarted, or stayed. Sustained creation/termination volume
//! relative to the stable population signals thread leakage or a pool that
//! keeps replacing its workers.

use serde::{Deserialize, Serialize};

use crate::context::AnalysisContext;
use crate::engine::Analyzer;
use crate::result::{AnalysisResult, Finding, ResultPayload};

/// Churn volume relative to the stable population that raises the alert.
const CHURN_RATIO: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChurnPair {
    /// Index of the later snapshot of the pair
    pub snapshot_index: usize,
    pub created: usize,
    pub terminated: usize,
    pub restarted: usize,
    pub stable: usize,
}

impl ChurnPair {
    /// True when created + terminated outweigh a quarter of the stable set
    pub fn is_noisy(&self) -> bool {
        (self.created + self.terminated) as f64 > CHURN_RATIO * self.stable as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChurnReport {
    pub pairs: Vec<ChurnPair>,
}

pub struct ChurnAnalyzer;

impl Analyzer for ChurnAnalyzer {
    fn name(&self) -> &'static str {
        "thread-churn"
    }

    fn priority(&self) -> u32 {
        40
    }

    fn requires_multiple_snapshots(&self) -> bool {
        true
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());
        let mut report = ChurnReport::default();

        for index in 1..ctx.snapshot_count() {
            if ctx.is_cancelled() {
                return super::cancelled(self.name());
            }
            let before = ctx.visible_by_key(index - 1);
            let after = ctx.visible_by_key(index);

            let mut pair = ChurnPair {
                snapshot_index: index,
                ..ChurnPair::default()
            };
            for (key, thread) in &after {
                match before.get(key) {
                    None => pair.created += 1,
                    Some(prev) => {
                        let restarted = matches!(
                            (prev.elapsed_ms, thread.elapsed_ms),
                            (Some(a), Some(b)) if b < a
                        );
                        if restarted {
                            pair.restarted += 1;
                        } else {
                            pair.stable += 1;
                        }
                    }
                }
            }
            pair.terminated = before.keys().filter(|k| !after.contains_key(*k)).count();
            report.pairs.push(pair);
        }

        let mut noisy_streak = 0usize;
        let mut alerted = false;
        for pair in &report.pairs {
            if pair.is_noisy() {
                noisy_streak += 1;
                if noisy_streak >= 2 && !alerted {
                    result.push_finding(
                        Finding::warning(
                            "thread-churn",
                            format!(
                                "sustained thread churn: {} created, {} terminated against {} stable in the latest pair",
                                pair.created, pair.terminated, pair.stable
                            ),
                        )
                        .with_detail("snapshot", pair.snapshot_index.to_string()),
                    );
                    alerted = true;
                }
            } else {
                noisy_streak = 0;
                alerted = false;
            }
        }

        let total_created: usize = report.pairs.iter().map(|p| p.created).sum();
        let total_terminated: usize = report.pairs.iter().map(|p| p.terminated).sum();
        result.summary = format!(
            "{} created, {} terminated over {} pair(s)",
            total_created,
            total_terminated,
            report.pairs.len()
        );
        result.with_payload(ResultPayload::Churn(report))
    }
}

// =============================================================================
// TESTS
// =============================================================================
