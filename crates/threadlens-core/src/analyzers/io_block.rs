//! I/O classification
//!
//! Classifies threads by whether their top-of-stack frames sit in a known
//! I/O API. Driver frames above a socket read become a database wait. Across
//! snapshots, a thread frozen in the same I/O spot long enough becomes an
//! io-stuck warning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::context::AnalysisContext;
use crate::engine::Analyzer;
use crate::model::{StackFrame, ThreadKey};
use crate::result::{AnalysisResult, Finding, ResultPayload};

/// How many top frames participate in classification.
const TOP_FRAMES: usize = 5;

/// Database driver package prefixes recognized above a socket read.
const DB_PREFIXES: &[&str] = &[
    "com.mysql.",
    "org.mariadb.jdbc.",
    "org.postgresql.",
    "oracle.jdbc.",
    "com.microsoft.sqlserver.",
    "com.ibm.db2.",
    "org.h2.",
    "org.sqlite.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IoType {
    SocketRead,
    SocketWrite,
    FileRead,
    FileWrite,
    Database,
    NativeOther,
}

impl std::fmt::Display for IoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let word = match self {
            IoType::SocketRead => "socket read",
            IoType::SocketWrite => "socket write",
            IoType::FileRead => "file read",
            IoType::FileWrite => "file write",
            IoType::Database => "database",
            IoType::NativeOther => "native",
        };
        write!(f, "{}", word)
    }
}

/// Classify a stack (top first) by its top frames. `None` means not I/O.
pub fn classify_stack(stack: &[StackFrame]) -> Option<IoType> {
    let top = &stack[..stack.len().min(TOP_FRAMES)];

    let socket_read = top.iter().any(|f| {
        let name = f.qualified_name();
        name.contains("SocketInputStream.read")
            || name.contains("SocketInputStream.socketRead")
            || name.contains("SocketChannelImpl.read")
            || name.contains("NioSocketImpl.read")
            || (f.is_native && f.method_name.contains("recv"))
    });
    if socket_read {
        // Driver frames anywhere above the read make it a database wait
        if stack
            .iter()
            .any(|f| DB_PREFIXES.iter().any(|p| f.class_name.starts_with(p)))
        {
            return Some(IoType::Database);
        }
        return Some(IoType::SocketRead);
    }

    let socket_write = top.iter().any(|f| {
        let name = f.qualified_name();
        name.contains("SocketOutputStream.write")
            || name.contains("SocketOutputStream.socketWrite")
            || name.contains("SocketChannelImpl.write")
            || name.contains("NioSocketImpl.write")
            || (f.is_native && f.method_name.contains("send"))
    });
    if socket_write {
        return Some(IoType::SocketWrite);
    }

    if top
        .iter()
        .any(|f| f.qualified_name().contains("FileInputStream.read"))
    {
        return Some(IoType::FileRead);
    }
    if top
        .iter()
        .any(|f| f.qualified_name().contains("FileOutputStream.write"))
    {
        return Some(IoType::FileWrite);
    }

    // Other native waits, park excluded (that is idleness, not I/O)
    let native_other = top.iter().any(|f| {
        f.is_native
            && !f.class_name.ends_with("Unsafe")
            && ["read", "write", "poll", "select", "accept", "connect", "wait0"]
                .iter()
                .any(|m| f.method_name.contains(m))
    });
    if native_other {
        return Some(IoType::NativeOther);
    }
    None
}

/// One I/O-classified thread in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoThread {
    pub name: String,
    pub io_type: IoType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSnapshot {
    pub snapshot_index: usize,
    pub threads: Vec<IoThread>,
}

/// A thread frozen in the same I/O spot across consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StuckIo {
    pub name: String,
    pub io_type: IoType,
    /// Length of the identical-stack run
    pub run_length: usize,
    /// Index of the last snapshot of the run
    pub last_index: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IoBlockReport {
    pub snapshots: Vec<IoSnapshot>,
    pub stuck: Vec<StuckIo>,
}

pub struct IoBlockAnalyzer;

impl Analyzer for IoBlockAnalyzer {
    fn name(&self) -> &'static str {
        "io-block"
    }

    fn priority(&self) -> u32 {
        60
    }

    fn analyze(&self, ctx: &AnalysisContext) -> AnalysisResult {
        let mut result = AnalysisResult::new(self.name());
        let mut report = IoBlockReport::default();

        // Per-identity (io_type, stack) sighting per snapshot
        let mut sightings: BTreeMap<ThreadKey, Vec<(usize, IoType, Vec<StackFrame>, String)>> =
            BTreeMap::new();

        for index in 0..ctx.snapshot_count() {
            if ctx.is_cancelled() {
                return super::cancelled(self.name());
            }
            let mut snapshot = IoSnapshot {
                snapshot_index: index,
                threads: vec![],
            };
            for thread in ctx.visible_threads(index) {
                if let Some(io_type) = classify_stack(&thread.stack) {
                    snapshot.threads.push(IoThread {
                        name: thread.name.clone(),
                        io_type,
                    });
                    sightings.entry(thread.key()).or_default().push((
                        index,
                        io_type,
                        thread.stack.clone(),
                        thread.name.clone(),
                    ));
                }
            }
            report.snapshots.push(snapshot);
        }

        for (_, runs) in sightings {
            let Some(stuck) = longest_identical_run(&runs) else {
                continue;
            };
            if stuck.run_length >= 3 {
                result.push_finding(
                    Finding::warning(
                        "io-stuck",
                        format!(
                            "thread {} stuck in {} with an identical stack for {} snapshots",
                            stuck.name, stuck.io_type, stuck.run_length
                        ),
                    )
                    .with_detail("io_type", stuck.io_type.to_string()),
                );
                report.stuck.push(stuck);
            }
        }

        let classified: usize = report.snapshots.iter().map(|s| s.threads.len()).sum();
        if classified > 0 && result.findings.is_empty() {
            result.push_finding(Finding::info(
                "io-activity",
                format!("{} thread sightings in I/O", classified),
            ));
        }
        result.summary = format!(
            "{} I/O sightings, {} stuck thread(s)",
            classified,
            report.stuck.len()
        );
        result.with_payload(ResultPayload::IoBlock(report))
    }
}

/// Longest run of consecutive snapshots with the same io type and byte-equal
/// stack.
fn longest_identical_run(runs: &[(usize, IoType, Vec<StackFrame>, String)]) -> Option<StuckIo> {
    let mut best: Option<StuckIo> = None;
    let mut current: Option<StuckIo> = None;
    for window_start in 0..runs.len() {
        let (index, io_type, stack, name) = &runs[window_start];
        current = match current {
            Some(prev)
                if prev.last_index + 1 == *index
                    && prev.io_type == *io_type
                    && runs[window_start - 1].2 == *stack =>
            {
                Some(StuckIo {
                    name: name.clone(),
                    io_type: *io_type,
                    run_length: prev.run_length + 1,
                    last_index: *index,
                })
            }
            _ => Some(StuckIo {
                name: name.clone(),
                io_type: *io_type,
                run_length: 1,
                last_index: *index,
            }),
        };
        if let Some(c) = &current {
            if best.as_ref().map_or(true, |b| c.run_length > b.run_length) {
                best = Some(c.clone());
            }
        }
    }
    best
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

    fn frame(class: &str, method: &str) -> StackFrame {
        StackFrame::new(class, method)
    }

    #[test]
    fn test_classify_socket_read() {
        let stack = vec![
            frame("java.net.SocketInputStream", "socketRead0").native(),
            frame("java.net.SocketInputStream", "read"),
            frame("com.example.Client", "receive"),
        ];
        assert_eq!(classify_stack(&stack), Some(IoType::SocketRead));
    }

    #[test]
    fn test_classify_database_over_socket_read() {
        let stack = vec![
            frame("java.net.SocketInputStream", "read"),
            frame("com.mysql.cj.protocol.a.SimplePacketReader", "readHeader"),
            frame("com.example.Dao", "query"),
        ];
        assert_eq!(classify_stack(&stack), Some(IoType::Database));
    }

    #[test]
    fn test_classify_file_write() {
        let stack = vec![
            frame("java.io.FileOutputStream", "writeBytes").native(),
            frame("java.io.FileOutputStream", "write"),
        ];
        assert_eq!(classify_stack(&stack), Some(IoType::FileWrite));
    }

    #[test]
    fn test_park_is_not_io() {
        let stack = vec![
            frame("jdk.internal.misc.Unsafe", "park").native(),
            frame("java.util.concurrent.locks.LockSupport", "park"),
        ];
        assert_eq!(classify_stack(&stack), None);
    }

    #[test]
    fn test_native_other() {
        let stack = vec![frame("sun.nio.ch.EPoll", "wait0").native()];
        assert_eq!(classify_stack(&stack), Some(IoType::NativeOther));
    }

    #[test]
    fn test_top_frames_limit() {
        let mut stack: Vec<StackFrame> = (0..6)
            .map(|i| frame("com.example.App", &format!("level{}", i)))
            .collect();
        stack.push(frame("java.net.SocketInputStream", "read"));
        assert_eq!(classify_stack(&stack), None);
    }

    fn io_thread(name: &str) -> ThreadInfo {
        let mut t = ThreadInfo::new(name);
        t.state = Some(ThreadState::Runnable);
        t.stack = vec![
            frame("java.net.SocketInputStream", "read"),
            frame("com.example.Client", "receive"),
        ];
        t
    }

    fn dump(threads: Vec<ThreadInfo>) -> ThreadDump {
        let mut d = ThreadDump::empty();
        d.threads = threads;
        d
    }

    fn run(snapshots: Vec<ThreadDump>) -> (IoBlockReport, AnalysisResult) {
        let ctx = AnalysisContext::new(snapshots, AnalysisOptions::default());
        let result = IoBlockAnalyzer.analyze(&ctx);
        let report = match result.payload.clone().unwrap() {
            ResultPayload::IoBlock(r) => r,
            other => panic!("unexpected payload {:?}", other),
        };
        (report, result)
    }

    #[test]
    fn test_io_stuck_after_three_snapshots() {
        let snap = || dump(vec![io_thread("stuck")]);
        let (report, result) = run(vec![snap(), snap(), snap()]);
        assert_eq!(report.stuck.len(), 1);
        assert_eq!(report.stuck[0].run_length, 3);
        assert_eq!(report.stuck[0].io_type, IoType::SocketRead);
        assert_eq!(result.severity, Severity::Warning);
        assert!(result.findings.iter().any(|f| f.category == "io-stuck"));
    }

    #[test]
    fn test_changing_stack_is_not_stuck() {
        let mut third = io_thread("busy");
        third.stack.push(frame("com.example.Other", "call"));
        let (report, result) = run(vec![
            dump(vec![io_thread("busy")]),
            dump(vec![io_thread("busy")]),
            dump(vec![third]),
        ]);
        assert!(report.stuck.is_empty());
        assert_eq!(result.severity, Severity::Info);
    }

    #[test]
    fn test_two_snapshots_not_stuck() {
        let snap = || dump(vec![io_thread("reader")]);
        let (report, _) = run(vec![snap(), snap()]);
        assert!(report.stuck.is_empty());
    }
}
