//! Typed thread-dump model
//!
//! Immutable value objects produced once by the parser and never mutated by
//! analyzers. The design separates three concerns:
//! - **Per-thread facts**: name, ids, state, stack, lock relations
//! - **Per-snapshot facts**: banner, timestamp, JNI counters, deadlock section
//! - **Cross-snapshot identity**: the [`ThreadKey`] tuple used to follow one
//!   logical thread through a sequence of dumps
//!
//! ## Identity and address churn
//!
//! Hex addresses (`tid=`, `nid=`, lock identities) are unstable across
//! processes and sometimes across dumps. Equality used for cross-dump joins
//! therefore comes in two flavors:
//! - `==` (derived `PartialEq`): full structural equality, addresses included
//! - [`ThreadInfo::hex_equals`] / [`ThreadDump::hex_equals`]: equality that
//!   ignores every address-valued field
//!
//! Analyzers join snapshots on [`ThreadKey`], never on raw addresses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// STACK FRAMES
// =============================================================================

/// One frame of a thread's stack, top-of-stack first in `ThreadInfo::stack`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StackFrame {
    /// Fully qualified class name, e.g. `java.net.SocketInputStream`
    pub class_name: String,
    /// Method name, e.g. `read` or `<init>`
    pub method_name: String,
    /// Source file when the dump supplies one
    pub file_name: Option<String>,
    /// Source line when the dump supplies one
    pub line_number: Option<u32>,
    /// True iff the frame is a foreign/native call (`(Native Method)`)
    pub is_native: bool,
}

impl StackFrame {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            file_name: None,
            line_number: None,
            is_native: false,
        }
    }

    pub fn with_location(mut self, file_name: impl Into<String>, line_number: u32) -> Self {
        self.file_name = Some(file_name.into());
        self.line_number = Some(line_number);
        self
    }

    pub fn native(mut self) -> Self {
        self.is_native = true;
        self
    }

    /// `class.method`, the form used in findings and group labels
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class_name, self.method_name)
    }
}

// =============================================================================
// LOCK RELATIONS
// =============================================================================

/// How a thread relates to one lock object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockRelation {
    /// The thread holds the monitor
    Locked,
    /// `Object.wait()` on the monitor
    WaitingOn,
    /// Contending to enter a synchronized region
    WaitingToLock,
    /// `LockSupport.park` on a synchronizer
    ParkingToWait,
    /// Monitor elided by the runtime (scalar replacement / lock elision)
    Eliminated,
}

/// One lock relation of a thread.
///
/// `identity` is the textual hex address of the lock object. It may be absent
/// (eliminated monitors, some parking lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub identity: Option<String>,
    pub type_name: String,
    pub relation: LockRelation,
}

impl LockInfo {
    pub fn new(relation: LockRelation, type_name: impl Into<String>) -> Self {
        Self {
            identity: None,
            type_name: type_name.into(),
            relation,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Equality ignoring the address field
    pub fn hex_equals(&self, other: &LockInfo) -> bool {
        self.type_name == other.type_name && self.relation == other.relation
    }
}

// =============================================================================
// THREADS
// =============================================================================

/// The six `java.lang.Thread.State` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadState {
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
}

impl ThreadState {
    /// Parse the state word as printed by `java.lang.Thread.State:` lines
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "NEW" => Some(Self::New),
            "RUNNABLE" => Some(Self::Runnable),
            "BLOCKED" => Some(Self::Blocked),
            "WAITING" => Some(Self::Waiting),
            "TIMED_WAITING" => Some(Self::TimedWaiting),
            "TERMINATED" => Some(Self::Terminated),
            _ => None,
        }
    }
}

/// One thread as captured by a single dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub name: String,
    /// `#N` runtime-assigned thread id
    pub runtime_id: Option<u64>,
    /// `nid=` OS-level thread id
    pub os_id: Option<u64>,
    /// `prio=` value
    pub priority: Option<i32>,
    pub daemon: Option<bool>,
    pub state: Option<ThreadState>,
    /// `cpu=` normalized to milliseconds
    pub cpu_time_ms: Option<f64>,
    /// `elapsed=` normalized to milliseconds
    pub elapsed_ms: Option<f64>,
    /// Top-of-stack first
    pub stack: Vec<StackFrame>,
    pub locks: Vec<LockInfo>,
    /// Address of the lock this thread is blocked on, when any
    pub waiting_on_lock_identity: Option<String>,
    /// Unrecognized trailing header text, kept verbatim
    pub extra: Option<String>,
}

impl ThreadInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime_id: None,
            os_id: None,
            priority: None,
            daemon: None,
            state: None,
            cpu_time_ms: None,
            elapsed_ms: None,
            stack: vec![],
            locks: vec![],
            waiting_on_lock_identity: None,
            extra: None,
        }
    }

    /// The stable cross-snapshot identity tuple: `os_id ?? runtime_id ?? name`
    pub fn key(&self) -> ThreadKey {
        if let Some(os_id) = self.os_id {
            ThreadKey::Os(os_id)
        } else if let Some(runtime_id) = self.runtime_id {
            ThreadKey::Runtime(runtime_id)
        } else {
            ThreadKey::Name(self.name.clone())
        }
    }

    /// Lock identities this thread holds (`Locked` relations with an address)
    pub fn held_lock_identities(&self) -> impl Iterator<Item = &str> {
        self.locks
            .iter()
            .filter(|l| l.relation == LockRelation::Locked)
            .filter_map(|l| l.identity.as_deref())
    }

    /// Equality that ignores every address-valued field: `runtime_id`,
    /// `os_id`, `waiting_on_lock_identity`, and per-lock identities.
    pub fn hex_equals(&self, other: &ThreadInfo) -> bool {
        self.name == other.name
            && self.priority == other.priority
            && self.daemon == other.daemon
            && self.state == other.state
            && self.cpu_time_ms == other.cpu_time_ms
            && self.elapsed_ms == other.elapsed_ms
            && self.stack == other.stack
            && self.extra == other.extra
            && self.locks.len() == other.locks.len()
            && self
                .locks
                .iter()
                .zip(other.locks.iter())
                .all(|(a, b)| a.hex_equals(b))
    }
}

/// Stable cross-snapshot handle for one logical thread.
///
/// Ordered preference: OS id, then runtime id, then name. The `Ord` derive
/// gives analyzers a deterministic iteration order over identity maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKey {
    Os(u64),
    Runtime(u64),
    Name(String),
}

impl std::fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreadKey::Os(id) => write!(f, "nid:{:#x}", id),
            ThreadKey::Runtime(id) => write!(f, "#{}", id),
            ThreadKey::Name(name) => write!(f, "{:?}", name),
        }
    }
}

// =============================================================================
// DEADLOCK SECTION
// =============================================================================

/// One participant of a runtime-reported deadlock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlockedThread {
    pub name: String,
    /// Monitor address the thread is waiting for
    pub waiting_for_monitor: Option<String>,
    /// Object address behind the monitor
    pub waiting_for_object: Option<String>,
    /// Type of the object behind the monitor
    pub waiting_for_object_type: Option<String>,
    /// Name of the thread holding what this one waits for
    pub held_by: Option<String>,
    pub stack: Vec<StackFrame>,
    pub locks: Vec<LockInfo>,
}

impl DeadlockedThread {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            waiting_for_monitor: None,
            waiting_for_object: None,
            waiting_for_object_type: None,
            held_by: None,
            stack: vec![],
            locks: vec![],
        }
    }
}

/// A deadlock as reported by the runtime's own `Found ... deadlock` section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeadlockInfo {
    pub threads: Vec<DeadlockedThread>,
}

impl DeadlockInfo {
    pub fn participant_names(&self) -> Vec<&str> {
        self.threads.iter().map(|t| t.name.as_str()).collect()
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// JNI reference counters from the dump footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JniInfo {
    pub global_refs: Option<u64>,
    pub weak_refs: Option<u64>,
    pub global_refs_bytes: Option<u64>,
    pub weak_refs_bytes: Option<u64>,
}

/// Which textual dialect produced the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Compact stack-dumper output
    StackDump,
    /// Verbose diagnostic-command output
    DiagCmd,
    Unknown,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::StackDump => write!(f, "stackdump"),
            SourceType::DiagCmd => write!(f, "diagcmd"),
            SourceType::Unknown => write!(f, "unknown"),
        }
    }
}

/// One parsed thread dump. The unit of analysis input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadDump {
    pub timestamp: Option<DateTime<Utc>>,
    pub runtime_banner: Option<String>,
    pub threads: Vec<ThreadInfo>,
    pub jni_info: Option<JniInfo>,
    pub source_type: SourceType,
    pub deadlocks: Vec<DeadlockInfo>,
}

impl ThreadDump {
    pub fn empty() -> Self {
        Self {
            timestamp: None,
            runtime_banner: None,
            threads: vec![],
            jni_info: None,
            source_type: SourceType::Unknown,
            deadlocks: vec![],
        }
    }

    /// Find a thread by name (first match; dump order)
    pub fn thread_by_name(&self, name: &str) -> Option<&ThreadInfo> {
        self.threads.iter().find(|t| t.name == name)
    }

    /// Find the thread holding the given lock address, when exactly one does.
    ///
    /// Returns `Err(count)` when the address is held by more than one thread,
    /// which violates the ownership invariant and is surfaced as a warning by
    /// the deadlock analyzer.
    pub fn lock_owner(&self, identity: &str) -> Result<Option<&ThreadInfo>, usize> {
        let mut owners = self
            .threads
            .iter()
            .filter(|t| t.held_lock_identities().any(|id| id == identity));
        match (owners.next(), owners.count()) {
            (None, _) => Ok(None),
            (Some(t), 0) => Ok(Some(t)),
            (Some(_), rest) => Err(rest + 1),
        }
    }

    /// Equality ignoring every address-valued field, pairwise over threads.
    pub fn hex_equals(&self, other: &ThreadDump) -> bool {
        self.timestamp == other.timestamp
            && self.runtime_banner == other.runtime_banner
            && self.source_type == other.source_type
            && self.jni_info == other.jni_info
            && self.threads.len() == other.threads.len()
            && self
                .threads
                .iter()
                .zip(other.threads.iter())
                .all(|(a, b)| a.hex_equals(b))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked_thread(name: &str, os_id: u64, waiting_on: &str, holds: &str) -> ThreadInfo {
        let mut t = ThreadInfo::new(name);
        t.os_id = Some(os_id);
        t.state = Some(ThreadState::Blocked);
        t.waiting_on_lock_identity = Some(waiting_on.to_string());
        t.locks = vec![
            LockInfo::new(LockRelation::WaitingToLock, "java.lang.Object").with_identity(waiting_on),
            LockInfo::new(LockRelation::Locked, "java.lang.Object").with_identity(holds),
        ];
        t
    }

    #[test]
    fn test_key_prefers_os_id() {
        let mut t = ThreadInfo::new("worker");
        t.runtime_id = Some(12);
        assert_eq!(t.key(), ThreadKey::Runtime(12));
        t.os_id = Some(0x1f);
        assert_eq!(t.key(), ThreadKey::Os(0x1f));
    }

    #[test]
    fn test_key_falls_back_to_name() {
        let t = ThreadInfo::new("worker");
        assert_eq!(t.key(), ThreadKey::Name("worker".to_string()));
    }

    #[test]
    fn test_hex_equals_ignores_addresses() {
        let a = blocked_thread("T1", 0x10, "0xaaaa", "0xbbbb");
        let mut b = blocked_thread("T1", 0x999, "0xcccc", "0xdddd");
        assert_ne!(a, b);
        assert!(a.hex_equals(&b));

        b.state = Some(ThreadState::Runnable);
        assert!(!a.hex_equals(&b));
    }

    #[test]
    fn test_hex_equals_sees_stack_changes() {
        let mut a = blocked_thread("T1", 1, "0xa", "0xb");
        let b = blocked_thread("T1", 1, "0xa", "0xb");
        a.stack = vec![StackFrame::new("A", "run")];
        assert!(!a.hex_equals(&b));
    }

    #[test]
    fn test_lock_owner_unique() {
        let mut dump = ThreadDump::empty();
        dump.threads = vec![
            blocked_thread("T1", 1, "0xa", "0xb"),
            blocked_thread("T2", 2, "0xb", "0xa"),
        ];
        let owner = dump.lock_owner("0xa").unwrap().unwrap();
        assert_eq!(owner.name, "T2");
        assert!(dump.lock_owner("0xff").unwrap().is_none());
    }

    #[test]
    fn test_lock_owner_violation_reports_count() {
        let mut dump = ThreadDump::empty();
        dump.threads = vec![
            blocked_thread("T1", 1, "0xa", "0xb"),
            blocked_thread("T2", 2, "0xa", "0xb"),
        ];
        assert_eq!(dump.lock_owner("0xb"), Err(2));
    }

    #[test]
    fn test_state_parse() {
        assert_eq!(ThreadState::parse("RUNNABLE"), Some(ThreadState::Runnable));
        assert_eq!(
            ThreadState::parse("TIMED_WAITING"),
            Some(ThreadState::TimedWaiting)
        );
        assert_eq!(ThreadState::parse("SLEEPING"), None);
    }
}
