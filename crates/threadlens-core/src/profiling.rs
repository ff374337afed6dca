//! Profiling-recording facade
//!
//! The binary sampling-trace parser is an external collaborator. The core
//! consumes its output through this narrow interface only; absence of a
//! recording is signaled by `None` on the context and dependent analyzers are
//! skipped by the engine.

use serde::{Deserialize, Serialize};

/// One sampled thread with its share of total samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotThread {
    pub name: String,
    pub sample_count: u64,
    pub percentage: f64,
}

/// One sampled method with its share of total samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotMethod {
    pub qualified_name: String,
    pub sample_count: u64,
    pub percentage: f64,
}

/// Aggregate lock contention seen by the profiler.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LockProfile {
    pub contended_lock_count: u64,
    pub total_blocked_ms: f64,
    /// Worst lock type by accumulated block time
    pub worst_lock_type: Option<String>,
}

/// Aggregate I/O activity seen by the profiler.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IoProfile {
    pub socket_read_ms: f64,
    pub socket_write_ms: f64,
    pub file_read_ms: f64,
    pub file_write_ms: f64,
}

/// One allocation site by sampled bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSite {
    pub type_name: String,
    pub sampled_bytes: u64,
}

/// One recurring sampled stack with its share of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackProfile {
    pub frames: Vec<String>,
    pub sample_count: u64,
}

/// The narrow facade over a parsed profiling recording.
///
/// Implementations live with the recording parser; the core only reads.
pub trait ProfilingSummary {
    fn hottest_threads(&self, n: usize) -> Vec<HotThread>;
    fn hottest_methods(&self, n: usize) -> Vec<HotMethod>;
    fn lock_contention_summary(&self) -> LockProfile;
    fn io_summary(&self) -> IoProfile;
    fn allocation_hotspots(&self, n: usize) -> Vec<AllocationSite>;
    fn stack_profiles(&self, n: usize) -> Vec<StackProfile>;
}

pub mod testing {
    //! In-memory summary for tests of profiling-dependent analyzers.

    use super::*;

    #[derive(Debug, Default)]
    pub struct FixedSummary {
        pub threads: Vec<HotThread>,
        pub methods: Vec<HotMethod>,
        pub locks: LockProfile,
        pub io: IoProfile,
        pub allocations: Vec<AllocationSite>,
        pub stacks: Vec<StackProfile>,
    }

    impl ProfilingSummary for FixedSummary {
        fn hottest_threads(&self, n: usize) -> Vec<HotThread> {
            self.threads.iter().take(n).cloned().collect()
        }

        fn hottest_methods(&self, n: usize) -> Vec<HotMethod> {
            self.methods.iter().take(n).cloned().collect()
        }

        fn lock_contention_summary(&self) -> LockProfile {
            self.locks.clone()
        }

        fn io_summary(&self) -> IoProfile {
            self.io.clone()
        }

        fn allocation_hotspots(&self, n: usize) -> Vec<AllocationSite> {
            self.allocations.iter().take(n).cloned().collect()
        }

        fn stack_profiles(&self, n: usize) -> Vec<StackProfile> {
            self.stacks.iter().take(n).cloned().collect()
        }
    }
}
