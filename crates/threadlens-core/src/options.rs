//! Analysis configuration
//!
//! [`AnalysisOptions`] is an immutable value consumed by every analyzer.
//! Construction is lenient the same way the parser is: an ignore pattern that
//! fails to compile does not fail the build, it is recorded and surfaced as a
//! configuration warning by the engine.

use regex::Regex;
use thiserror::Error;

/// Invalid configuration input.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidIgnorePattern { pattern: String, reason: String },
}

/// Compile one ignore pattern. Strict form used by callers that want to
/// reject bad configuration up front; the builder wraps this leniently.
pub fn compile_ignore_pattern(pattern: &str) -> Result<Regex, OptionsError> {
    Regex::new(pattern).map_err(|err| OptionsError::InvalidIgnorePattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })
}

/// Immutable analyzer configuration with the documented defaults.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Show daemon threads to analyzers
    pub include_daemon: bool,
    /// Show runtime GC worker threads to analyzers
    pub include_gc: bool,
    /// Show runtime-internal VM threads to analyzers
    pub include_vm: bool,
    /// Threads whose name matches any pattern are classified `Ignored` and
    /// hidden from analyzers; they stay in the raw snapshot.
    pub ignore_patterns: Vec<Regex>,
    /// Patterns that failed to compile, with the compiler's reason
    pub invalid_patterns: Vec<(String, String)>,
    /// Progress problem percentage at which the dump indicates a stall
    pub stall_threshold_percent: f64,
    /// Waiter count from which a contended lock is hot (soft threshold)
    pub hot_lock_waiter_threshold: usize,
    /// Waiter count from which a hot lock is an error (hard threshold)
    pub hot_lock_error_threshold: usize,
    /// Consecutive snapshots a lock must keep one owner to be long-held
    pub long_held_lock_min_snapshots: usize,
    /// Minimum thread count for an exact stack group to be reported
    pub min_stack_group_size: usize,
    /// Score change magnitude within which the trend is stable
    pub degrading_score_delta: i32,
    /// Snapshot-to-snapshot score drop that flags a critical change
    pub critical_score_drop: i32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            include_daemon: true,
            include_gc: false,
            include_vm: false,
            ignore_patterns: vec![],
            invalid_patterns: vec![],
            stall_threshold_percent: 90.0,
            hot_lock_waiter_threshold: 3,
            hot_lock_error_threshold: 7,
            long_held_lock_min_snapshots: 3,
            min_stack_group_size: 2,
            degrading_score_delta: 10,
            critical_score_drop: 20,
        }
    }
}

impl AnalysisOptions {
    pub fn builder() -> AnalysisOptionsBuilder {
        AnalysisOptionsBuilder::default()
    }

    /// True when the thread name matches an ignore pattern
    pub fn is_ignored(&self, thread_name: &str) -> bool {
        self.ignore_patterns.iter().any(|p| p.is_match(thread_name))
    }
}

/// Builder with the lenient ignore-pattern policy.
#[derive(Debug, Default)]
pub struct AnalysisOptionsBuilder {
    options: AnalysisOptions,
}

impl AnalysisOptionsBuilder {
    pub fn include_daemon(mut self, include: bool) -> Self {
        self.options.include_daemon = include;
        self
    }

    pub fn include_gc(mut self, include: bool) -> Self {
        self.options.include_gc = include;
        self
    }

    pub fn include_vm(mut self, include: bool) -> Self {
        self.options.include_vm = include;
        self
    }

    /// Add an ignore pattern. Invalid regexes are kept aside and surfaced as
    /// configuration warnings; they never fail the build.
    pub fn ignore_pattern(mut self, pattern: &str) -> Self {
        match compile_ignore_pattern(pattern) {
            Ok(regex) => self.options.ignore_patterns.push(regex),
            Err(OptionsError::InvalidIgnorePattern { pattern, reason }) => {
                self.options.invalid_patterns.push((pattern, reason))
            }
        }
        self
    }

    pub fn stall_threshold_percent(mut self, percent: f64) -> Self {
        self.options.stall_threshold_percent = percent;
        self
    }

    pub fn hot_lock_waiter_threshold(mut self, waiters: usize) -> Self {
        self.options.hot_lock_waiter_threshold = waiters;
        self
    }

    pub fn hot_lock_error_threshold(mut self, waiters: usize) -> Self {
        self.options.hot_lock_error_threshold = waiters;
        self
    }

    pub fn long_held_lock_min_snapshots(mut self, snapshots: usize) -> Self {
        self.options.long_held_lock_min_snapshots = snapshots;
        self
    }

    pub fn min_stack_group_size(mut self, size: usize) -> Self {
        self.options.min_stack_group_size = size;
        self
    }

    pub fn degrading_score_delta(mut self, delta: i32) -> Self {
        self.options.degrading_score_delta = delta;
        self
    }

    pub fn critical_score_drop(mut self, drop: i32) -> Self {
        self.options.critical_score_drop = drop;
        self
    }

    pub fn build(self) -> AnalysisOptions {
        self.options
    }
}
