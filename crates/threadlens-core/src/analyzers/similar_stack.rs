//! Similar-stack grouping
//!
//! Groups the last snapshot's threads by the longest common top-of-stack
//! prefix (deepest frame first). Threads agglomerate around a shared first
//! frame; the group's prefix is the longest run of frames every member
//! shares from the top. Exact grouping answers "who is in the same spot",
//! this pass answers "who is on the same path".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::AnalysisContext;
use crate::engine::Analyzer;
use crate::model::{StackFrame, ThreadInfo};
use crate::result::{AnalysisResult, Finding, ResultPayload};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarGroup {
    pub size: usize,
    pub prefix_length: usize,
    /// Qualified names of the shared prefix, top first (truncated for display)
    pub prefix_frames: Vec<String>,
    pub thread_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimilarStackReport {
    pub snapshot_index: usize,
    pub groups: Vec<SimilarGroup>,
}

pub struct SimilarStackAnalyzer;

impl Analyzer for SimilarStackAnalyzer {
    fn name(&self) -> &'static str {
        "similar-stacks"
    }

    fn priority(&self) -> u32 {
        45
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());
        let last = ctx.snapshot_count().saturating_sub(1);

        // Agglomerate by shared first frame, then take the common prefix
        let mut by_top: BTreeMap<&StackFrame, Vec<&ThreadInfo>> = BTreeMap::new();
        for thread in ctx.visible_threads(last) {
            if let Some(top) = thread.stack.first() {
                by_top.entry(top).or_default().push(thread);
            }
        }

        let mut groups: Vec<SimilarGroup> = vec![];
        for (_, members) in by_top {
            if members.len() < 2 {
                continue;
            }
            let prefix_length = common_prefix_length(&members);
            let reference = &members[0].stack;
            groups.push(SimilarGroup {
                size: members.len(),
                prefix_length,
                prefix_frames: reference[..prefix_length]
                    .iter()
                    .take(3)
                    .map(|f| f.qualified_name())
                    .collect(),
                thread_names: members.iter().map(|t| t.name.clone()).collect(),
            });
        }
        groups.sort_by(|a, b| {
            b.size
                .cmp(&a.size)
                .then(b.prefix_length.cmp(&a.prefix_length))
                .then(a.thread_names.first().cmp(&b.thread_names.first()))
        });

        for group in &groups {
            result.push_finding(
                Finding::info(
                    "similar-stacks",
                    format!(
                        "{} threads share a {}-frame prefix from {}",
                        group.size,
                        group.prefix_length,
                        group.prefix_frames.first().map(String::as_str).unwrap_or("?"),
                    ),
                )
                .with_detail("size", group.size.to_string())
                .with_detail("prefix_length", group.prefix_length.to_string()),
            );
        }

        result.summary = format!("{} similar-stack group(s)", groups.len());
        result.with_payload(ResultPayload::SimilarStacks(SimilarStackReport {
            snapshot_index: last,
            groups,
        }))
    }
}

/// Longest prefix (from the top of stack) shared by every member.
fn common_prefix_length(members: &[&ThreadInfo]) -> usize {
    let shortest = members.iter().map(|t| t.stack.len()).min().unwrap_or(0);
    let reference = &members[0].stack;
    for depth in 0..shortest {
        if !members.iter().all(|t| t.stack[depth] == reference[depth]) {
            return depth;
        }
    }
    shortest
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ThreadDump, ThreadState};
    use crate::options::AnalysisOptions;

    fn with_stack(name: &str, frames: &[(&str, &str)]) -> ThreadInfo {
        let mut t = ThreadInfo::new(name);
        t.state = Some(ThreadState::Runnable);
        t.stack = frames
            .iter()
            .map(|(c, m)| StackFrame::new(*c, *m))
            .collect();
        t
    }

    fn run(threads: Vec<ThreadInfo>) -> SimilarStackReport {
        let mut dump = ThreadDump::empty();
        dump.threads = threads;
        let ctx = AnalysisContext::new(vec![dump], AnalysisOptions::default());
        let result = SimilarStackAnalyzer.analyze(&ctx);
        match result.payload.unwrap() {
            ResultPayload::SimilarStacks(r) => r,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_common_prefix_grouping() {
        let report = run(vec![
            with_stack("a", &[("Q", "take"), ("W", "run"), ("X", "one")]),
            with_stack("b", &[("Q", "take"), ("W", "run"), ("Y", "two")]),
            with_stack("c", &[("Other", "run")]),
        ]);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].size, 2);
        assert_eq!(report.groups[0].prefix_length, 2);
        assert_eq!(report.groups[0].prefix_frames, vec!["Q.take", "W.run"]);
    }

    #[test]
    fn test_identical_stacks_full_prefix() {
        let frames = [("Q", "take"), ("W", "run")];
        let report = run(vec![with_stack("a", &frames), with_stack("b", &frames)]);
        assert_eq!(report.groups[0].prefix_length, 2);
    }

    #[test]
    fn test_different_tops_not_grouped() {
        let report = run(vec![
            with_stack("a", &[("A", "x")]),
            with_stack("b", &[("B", "x")]),
        ]);
        assert!(report.groups.is_empty());
    }

    #[test]
    fn test_sorted_by_size_then_prefix() {
        let mut threads = vec![
            with_stack("p1", &[("P", "x"), ("P", "y")]),
            with_stack("p2", &[("P", "x"), ("P", "y")]),
        ];
        threads.extend(
            (0..3).map(|i| with_stack(&format!("q{}", i), &[("Z", "z")])),
        );
        let report = run(threads);
        assert_eq!(report.groups[0].size, 3);
        assert_eq!(report.groups[1].prefix_length, 2);
    }
}
