//! Analysis context
//!
//! Everything an analyzer may look at: the ordered snapshot sequence, the
//! options, the optional profiling summary, and the cooperative cancellation
//! token. The context is read-only for analyzers; helpers here implement the
//! shared visibility and identity rules so every analyzer filters the same
//! way.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::model::{ThreadDump, ThreadInfo, ThreadKey};
use crate::options::AnalysisOptions;
use crate::patterns;
use crate::profiling::ProfilingSummary;

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cooperative cancellation signal checked at coarse loop boundaries.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CancelToken")
            .field(&self.is_cancelled())
            .finish()
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Immutable input of one engine run.
pub struct AnalysisContext {
    snapshots: Vec<ThreadDump>,
    options: AnalysisOptions,
    profiling: Option<Box<dyn ProfilingSummary>>,
    cancel: CancelToken,
}

impl AnalysisContext {
    pub fn new(snapshots: Vec<ThreadDump>, options: AnalysisOptions) -> Self {
        Self {
            snapshots,
            options,
            profiling: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_profiling(mut self, profiling: Box<dyn ProfilingSummary>) -> Self {
        self.profiling = Some(profiling);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn snapshots(&self) -> &[ThreadDump] {
        &self.snapshots
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    pub fn profiling(&self) -> Option<&dyn ProfilingSummary> {
        self.profiling.as_deref()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The stable identity tuple for a thread
    pub fn thread_key(&self, thread: &ThreadInfo) -> ThreadKey {
        thread.key()
    }

    /// True when the thread is hidden from analyzers by the options.
    /// Ignore-pattern matches are also hidden but keep their own
    /// classification (`Ignored`), so they are reported separately.
    pub fn is_hidden(&self, thread: &ThreadInfo) -> bool {
        if !self.options.include_daemon && thread.daemon == Some(true) {
            return true;
        }
        if !self.options.include_gc && patterns::is_gc_thread(&thread.name) {
            return true;
        }
        if !self.options.include_vm && patterns::is_vm_thread(&thread.name) {
            return true;
        }
        self.options.is_ignored(&thread.name)
    }

    /// Threads of one snapshot visible under the current options, dump order
    /// preserved.
    pub fn visible_threads(&self, snapshot_index: usize) -> Vec<&ThreadInfo> {
        let Some(snapshot) = self.snapshots.get(snapshot_index) else {
            return vec![];
        };
        snapshot
            .threads
            .iter()
            .filter(|t| !self.is_hidden(t))
            .collect()
    }

    /// Identity-keyed view of one snapshot's visible threads. First
    /// occurrence wins when a key collides (duplicate names without ids).
    pub fn visible_by_key(&self, snapshot_index: usize) -> BTreeMap<ThreadKey, &ThreadInfo> {
        let mut map = BTreeMap::new();
        for thread in self.visible_threads(snapshot_index) {
            map.entry(thread.key()).or_insert(thread);
        }
        map
    }

    /// Consecutive snapshot pairs, for diff analyzers
    pub fn paired_snapshots(&self) -> impl Iterator<Item = (&ThreadDump, &ThreadDump)> {
        self.snapshots.windows(2).map(|w| (&w[0], &w[1]))
    }
}

impl std::fmt::Debug for AnalysisContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisContext")
            .field("snapshots", &self.snapshots.len())
            .field("profiling", &self.profiling.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
