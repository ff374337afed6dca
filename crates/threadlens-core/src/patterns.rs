//! Thread-name heuristics shared across analyzers
//!
//! Compiled once; every table here matches on thread *names* only. Frame-level
//! heuristics (I/O classification) live with the io-block analyzer.

use once_cell::sync::Lazy;
use regex::Regex;

/// Runtime GC worker threads.
pub static GC_THREAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(GC Thread#\d+|GC task thread#\d+ \(ParallelGC\)|G1 (Main |Refine#|Conc#|Service).*|Parallel GC Threads?.*|CMS Main Thread|Concurrent Mark-Sweep GC Thread|ZGC\w*|ZWorker#\d+|Shenandoah.*)$",
    )
    .expect("GC thread pattern")
});

/// Runtime-internal VM threads (not GC, not application).
pub static VM_THREAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(VM Thread|VM Periodic Task Thread|Signal Dispatcher|Attach Listener|Notification Thread|Reference Handler|Finalizer|Sweeper thread|C[12] CompilerThread\d+|JFR .*|Service Thread|Common-Cleaner)$",
    )
    .expect("VM thread pattern")
});

/// Executor-style pool workers that idle in WAITING by design.
pub static POOL_IDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(pool-\d+-thread-\d+|ForkJoinPool(-\d+|\.commonPool)-worker-\d+|.*[Ee]xecutor.*|.*[Ww]orker[-_]?\d+|http-nio-.*|qtp\d+-\d+.*|grpc-default-executor-\d+|OkHttp .*)$",
    )
    .expect("pool idle pattern")
});

/// Timer/scheduler threads that idle in TIMED_WAITING by design.
pub static SCHEDULER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*[Ss]cheduler.*|.*[Tt]imer.*|.*-scheduler-\d+|pool-\d+-thread-\d+)$")
        .expect("scheduler pattern")
});

/// Generic executor pools: `pool-<N>-thread-<M>`.
pub static EXECUTOR_POOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^pool-(\d+)-thread-(\d+)$").expect("executor pool pattern"));

/// Fork-join pools: `ForkJoinPool-<N>-worker-<M>` or `ForkJoinPool.commonPool-worker-<M>`.
pub static FORK_JOIN_POOL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ForkJoinPool(?:-(\d+)|\.commonPool)-worker-(\d+)$").expect("fork join pattern")
});

/// Named-pool heuristic: alphabetic prefix, separator, strictly-numeric suffix.
/// The prefix capture is what groups members into one pool.
pub static NAMED_POOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z .#/_-]*[A-Za-z])[-_](\d+)$").expect("named pool pattern"));

pub fn is_gc_thread(name: &str) -> bool {
    GC_THREAD.is_match(name)
}

pub fn is_vm_thread(name: &str) -> bool {
    VM_THREAD.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gc_thread_names() {
        assert!(is_gc_thread("GC Thread#0"));
        assert!(is_gc_thread("G1 Conc#0"));
        assert!(is_gc_thread("ZWorker#3"));
        assert!(!is_gc_thread("main"));
        assert!(!is_gc_thread("gc-uploader-1"));
    }

    #[test]
    fn test_vm_thread_names() {
        assert!(is_vm_thread("VM Thread"));
        assert!(is_vm_thread("C2 CompilerThread0"));
        assert!(is_vm_thread("Reference Handler"));
        assert!(!is_vm_thread("worker-1"));
    }

    #[test]
    fn test_pool_idle_names() {
        assert!(POOL_IDLE.is_match("pool-2-thread-7"));
        assert!(POOL_IDLE.is_match("ForkJoinPool.commonPool-worker-3"));
        assert!(POOL_IDLE.is_match("http-nio-8080-exec-1"));
        assert!(!POOL_IDLE.is_match("main"));
    }

    #[test]
    fn test_scheduler_names() {
        assert!(SCHEDULER.is_match("mytimer"));
        assert!(SCHEDULER.is_match("quartz-scheduler-3"));
        assert!(!SCHEDULER.is_match("main"));
    }

    #[test]
    fn test_named_pool_prefix() {
        let caps = NAMED_POOL.captures("kafka-consumer-12").unwrap();
        assert_eq!(&caps[1], "kafka-consumer");
        assert_eq!(&caps[2], "12");
        assert!(NAMED_POOL.captures("main").is_none());
        assert!(NAMED_POOL.captures("worker-").is_none());
    }
}
