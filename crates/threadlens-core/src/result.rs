//! Analysis result tree
//!
//! Single result shape used by every analyzer: a severity, a one-line
//! summary, a flat list of [`Finding`]s, an optional typed payload, and
//! children for composite results. The tree serializes to JSON with the
//! stable top-level field set `analyzer` / `severity` / `summary` /
//! `findings` / `children`.
//!
//! Results are values: analyzers build them locally and hand them back;
//! nothing here is shared or mutated after construction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzers::churn::ChurnReport;
use crate::analyzers::deadlock::DeadlockReport;
use crate::analyzers::gc::GcActivityReport;
use crate::analyzers::hotspot::HotspotReport;
use crate::analyzers::io_block::IoBlockReport;
use crate::analyzers::locks::LockContentionReport;
use crate::analyzers::pools::ThreadPoolReport;
use crate::analyzers::progress::ProgressReport;
use crate::analyzers::similar_stack::SimilarStackReport;
use crate::analyzers::stack_group::StackGroupReport;
use crate::analyzers::verdict::VerdictReport;

// =============================================================================
// SEVERITY
// =============================================================================

/// Severity ladder. Derived `Ord` follows declaration order, so
/// `Severity::Critical` is the maximum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Ok,
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let word = match self {
            Severity::Ok => "OK",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{}", word)
    }
}

// =============================================================================
// FINDINGS
// =============================================================================

/// One atomic observation: category slug, severity, message, and a small
/// deterministic detail map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl Finding {
    pub fn new(category: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            severity,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn info(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(category, Severity::Info, message)
    }

    pub fn warning(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(category, Severity::Warning, message)
    }

    pub fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(category, Severity::Error, message)
    }

    pub fn critical(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(category, Severity::Critical, message)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// TYPED PAYLOADS
// =============================================================================

/// Per-analyzer typed payload. The `kind` tag is what the renderer registry
/// dispatches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPayload {
    Deadlocks(DeadlockReport),
    Progress(ProgressReport),
    LockContention(LockContentionReport),
    StackGroups(StackGroupReport),
    SimilarStacks(SimilarStackReport),
    ThreadPools(ThreadPoolReport),
    IoBlock(IoBlockReport),
    Churn(ChurnReport),
    GcActivity(GcActivityReport),
    Hotspots(HotspotReport),
    Verdict(VerdictReport),
}

impl ResultPayload {
    /// The tag used for renderer dispatch
    pub fn kind(&self) -> &'static str {
        match self {
            ResultPayload::Deadlocks(_) => "deadlocks",
            ResultPayload::Progress(_) => "progress",
            ResultPayload::LockContention(_) => "lock_contention",
            ResultPayload::StackGroups(_) => "stack_groups",
            ResultPayload::SimilarStacks(_) => "similar_stacks",
            ResultPayload::ThreadPools(_) => "thread_pools",
            ResultPayload::IoBlock(_) => "io_block",
            ResultPayload::Churn(_) => "churn",
            ResultPayload::GcActivity(_) => "gc_activity",
            ResultPayload::Hotspots(_) => "hotspots",
            ResultPayload::Verdict(_) => "verdict",
        }
    }
}

// =============================================================================
// RESULT TREE
// =============================================================================

/// One analyzer's result, or a composite grouping several.
///
/// `timestamp` is the last analyzed snapshot's capture time, not wall clock:
/// re-running the same context must produce a byte-identical tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analyzer: String,
    pub severity: Severity,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ResultPayload>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AnalysisResult>,
}

impl AnalysisResult {
    pub fn new(analyzer: impl Into<String>) -> Self {
        Self {
            analyzer: analyzer.into(),
            severity: Severity::Ok,
            summary: String::new(),
            timestamp: None,
            findings: vec![],
            payload: None,
            children: vec![],
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_payload(mut self, payload: ResultPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.push_finding(finding);
        self
    }

    /// Add a finding and lift the result severity to at least the finding's
    pub fn push_finding(&mut self, finding: Finding) {
        self.severity = self.severity.max(finding.severity);
        self.findings.push(finding);
    }

    /// Group results under a composite whose severity is the maximum child
    /// severity.
    pub fn composite(analyzer: impl Into<String>, children: Vec<AnalysisResult>) -> Self {
        let severity = children
            .iter()
            .map(|c| c.severity)
            .max()
            .unwrap_or(Severity::Ok);
        let summary = format!("{} analyzer results", children.len());
        Self {
            analyzer: analyzer.into(),
            severity,
            summary,
            timestamp: None,
            findings: vec![],
            payload: None,
            children,
        }
    }

    /// The dispatch tag: payload kind when typed, `"composite"` for grouping
    /// nodes, `"findings"` otherwise.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            Some(payload) => payload.kind(),
            None if !self.children.is_empty() => "composite",
            None => "findings",
        }
    }

    /// Depth-first iteration over this result and all descendants
    pub fn walk(&self) -> Vec<&AnalysisResult> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }

    /// All findings of this result and its descendants
    pub fn all_findings(&self) -> impl Iterator<Item = &Finding> {
        self.walk().into_iter().flat_map(|r| r.findings.iter())
    }

    /// True when any finding in the tree carries the given category
    pub fn has_category(&self, category: &str) -> bool {
        self.all_findings().any(|f| f.category == category)
    }
}

// =============================================================================
// TESTS
// =============================================================================
