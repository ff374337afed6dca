//! Exact stack grouping
//!
//! Groups the last snapshot's threads by frame-for-frame stack equality.
//! Groups smaller than the configured minimum are dropped; output is ranked
//! by size, then by first thread name. A large group parked on an I/O
//! primitive is the classic symptom of a saturated downstream dependency and
//! is raised to a warning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analyzers::io_block;
use crate::context::AnalysisContext;
use crate::engine::Analyzer;
use crate::model::StackFrame;
use crate::result::{AnalysisResult, Finding, ResultPayload};

/// Group size from which an I/O-parked group is a warning.
const IO_GROUP_WARNING_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackGroup {
    pub size: usize,
    pub thread_names: Vec<String>,
    /// Top frames of the shared stack, qualified names
    pub top_frames: Vec<String>,
    pub on_io: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StackGroupReport {
    pub snapshot_index: usize,
    pub groups: Vec<StackGroup>,
}

pub struct StackGroupAnalyzer;

impl Analyzer for StackGroupAnalyzer {
    fn name(&self) -> &'static str {
        "stack-groups"
    }

    fn priority(&self) -> u32 {
        50
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());
        let last = ctx.snapshot_count().saturating_sub(1);
        let min_size = ctx.options().min_stack_group_size;

        let mut by_stack: BTreeMap<&[StackFrame], Vec<String>> = BTreeMap::new();
        for thread in ctx.visible_threads(last) {
            if thread.stack.is_empty() {
                continue;
            }
            by_stack
                .entry(thread.stack.as_slice())
                .or_default()
                .push(thread.name.clone());
        }

        let mut groups: Vec<StackGroup> = by_stack
            .into_iter()
            .filter(|(_, names)| names.len() >= min_size)
            .map(|(stack, thread_names)| StackGroup {
                size: thread_names.len(),
                on_io: io_block::classify_stack(stack).is_some(),
                top_frames: stack
                    .iter()
                    .take(3)
                    .map(|f| f.qualified_name())
                    .collect(),
                thread_names,
            })
            .collect();
        groups.sort_by(|a, b| {
            b.size
                .cmp(&a.size)
                .then(a.thread_names.first().cmp(&b.thread_names.first()))
        });

        for group in &groups {
            if group.on_io && group.size >= IO_GROUP_WARNING_SIZE {
                result.push_finding(
                    Finding::warning(
                        "stack-group-io",
                        format!(
                            "{} threads share one stack on {} ({} ...)",
                            group.size,
                            group.top_frames.first().map(String::as_str).unwrap_or("?"),
                            group.thread_names[..group.thread_names.len().min(3)].join(", "),
                        ),
                    )
                    .with_detail("size", group.size.to_string()),
                );
            } else {
                result.push_finding(
                    Finding::info(
                        "stack-group",
                        format!(
                            "{} threads share one stack starting at {}",
                            group.size,
                            group.top_frames.first().map(String::as_str).unwrap_or("?"),
                        ),
                    )
                    .with_detail("size", group.size.to_string()),
                );
            }
        }

        result.summary = format!("{} stack group(s) of size >= {}", groups.len(), min_size);
        result.with_payload(ResultPayload::StackGroups(StackGroupReport {
            snapshot_index: last,
            groups,
        }))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ThreadDump, ThreadInfo, ThreadState};
    use crate::options::AnalysisOptions;
    use crate::result::Severity;

    fn with_stack(name: &str, frames: &[(&str, &str)]) -> ThreadInfo {
        let mut t = ThreadInfo::new(name);
        t.state = Some(ThreadState::Runnable);
        t.stack = frames
            .iter()
            .map(|(c, m)| StackFrame::new(*c, *m))
            .collect();
        t
    }

    fn run(threads: Vec<ThreadInfo>) -> (StackGroupReport, AnalysisResult) {
        let mut dump = ThreadDump::empty();
        dump.threads = threads;
        let ctx = AnalysisContext::new(vec![dump], AnalysisOptions::default());
        let result = StackGroupAnalyzer.analyze(&ctx);
        let report = match result.payload.clone().unwrap() {
            ResultPayload::StackGroups(r) => r,
            other => panic!("unexpected payload {:?}", other),
        };
        (report, result)
    }

    #[test]
    fn test_groups_by_exact_stack() {
        let frames = [("Queue", "take"), ("Worker", "run")];
        let (report, _) = run(vec![
            with_stack("w1", &frames),
            with_stack("w2", &frames),
            with_stack("solo", &[("Other", "run")]),
        ]);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].size, 2);
        assert_eq!(report.groups[0].thread_names, vec!["w1", "w2"]);
    }

    #[test]
    fn test_singletons_dropped() {
        let (report, result) = run(vec![
            with_stack("a", &[("A", "run")]),
            with_stack("b", &[("B", "run")]),
        ]);
        assert!(report.groups.is_empty());
        assert_eq!(result.severity, Severity::Ok);
    }

    #[test]
    fn test_ranking_by_size_then_name() {
        let big = [("Big", "work")];
        let small = [("Small", "work")];
        let mut threads: Vec<ThreadInfo> = (0..3)
            .map(|i| with_stack(&format!("big-{}", i), &big))
            .collect();
        threads.push(with_stack("aaa-1", &small));
        threads.push(with_stack("aaa-2", &small));
        let (report, _) = run(threads);
        assert_eq!(report.groups[0].size, 3);
        assert_eq!(report.groups[1].thread_names[0], "aaa-1");
    }

    #[test]
    fn test_large_io_group_is_warning() {
        let frames = [
            ("java.net.SocketInputStream", "read"),
            ("com.example.Http", "get"),
        ];
        let threads: Vec<ThreadInfo> = (0..10)
            .map(|i| with_stack(&format!("w{:02}", i), &frames))
            .collect();
        let (report, result) = run(threads);
        assert!(report.groups[0].on_io);
        assert_eq!(result.severity, Severity::Warning);
        assert!(result.findings.iter().any(|f| f.category == "stack-group-io"));
    }

    #[test]
    fn test_empty_stacks_not_grouped() {
        let (report, _) = run(vec![
            ThreadInfo::new("bare-1"),
            ThreadInfo::new("bare-2"),
        ]);
        assert!(report.groups.is_empty());
    }
}
