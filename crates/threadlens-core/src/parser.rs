//! Lenient thread-dump parser
//!
//! Turns free-form dump text into a typed [`ThreadDump`]. The parser is a
//! total function: it accepts partial or malformed input, extracts whatever it
//! can recognize, and never returns an error. Empty input yields a snapshot
//! with zero threads.
//!
//! ## Pipeline
//!
//! ```text
//! bytes → parse_bytes (UTF-8 with replacement) → parse
//! text  → parse_all  (split on dump banners)   → Vec<ThreadDump>
//! text  → parse      (single dump)             → ThreadDump
//! ```
//!
//! The line loop drives small per-line recognizers that each return `Option`;
//! a line nobody recognizes is dropped. A malformed thread header mid-dump
//! abandons the block and skips to the next blank line.
//!
//! Two textual dialects are distinguished by preamble shape: a bare process-id
//! line ahead of the banner marks diagnostic-command output, a bare
//! `Full thread dump` banner marks compact stack-dumper output.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

use crate::model::{
    DeadlockInfo, DeadlockedThread, JniInfo, LockInfo, LockRelation, SourceType, StackFrame,
    ThreadDump, ThreadInfo, ThreadState,
};

// =============================================================================
// COMPILED LINE PATTERNS
// =============================================================================

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})[ T](\d{2}:\d{2}:\d{2})(?:[.,]\d+)?\s*$").expect("timestamp")
});

static PID_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+):?\s*$").expect("pid line"));

static BANNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Full thread dump (.*?):?\s*$").expect("banner"));

static THREAD_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^"(.*)"\s*(.*)$"#).expect("thread header"));

static STATE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+java\.lang\.Thread\.State:\s+(\w+)").expect("state line")
});

static FRAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+at\s+([^\s(]+)\(([^)]*)\)\s*$").expect("frame"));

static LOCKED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+- locked\s+<(0x[0-9a-fA-F]+)>\s+\(a (.+)\)\s*$").expect("locked")
});

static WAITING_TO_LOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+- waiting to lock\s+<(0x[0-9a-fA-F]+)>\s+\(a (.+)\)\s*$")
        .expect("waiting to lock")
});

static WAITING_ON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+- waiting on\s+<(0x[0-9a-fA-F]+)>\s+\(a (.+)\)\s*$").expect("waiting on")
});

static PARKING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+- parking to wait for\s+<(0x[0-9a-fA-F]+)>\s+\(a (.+)\)\s*$")
        .expect("parking")
});

static ELIMINATED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+- eliminated\s+<(?:(0x[0-9a-fA-F]+)|[^>]*)>\s+\(a (.+)\)\s*$")
        .expect("eliminated")
});

/// Owned-synchronizer bullet inside a `Locked ownable synchronizers:` list.
static SYNCHRONIZER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+- <(0x[0-9a-fA-F]+)>\s+\(a (.+)\)\s*$").expect("synchronizer")
});

static DEADLOCK_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Found (?:one|\d+) Java-level deadlocks?:\s*$").expect("deadlock"));

static DEADLOCK_PARTICIPANT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^"(.*)":\s*$"#).expect("deadlock participant"));

static DEADLOCK_MONITOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s+waiting to lock monitor (0x[0-9a-fA-F]+) \(object (0x[0-9a-fA-F]+), a (.+)\),?\s*$",
    )
    .expect("deadlock monitor")
});

static DEADLOCK_SYNCHRONIZER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s+waiting for ownable synchronizer (0x[0-9a-fA-F]+), \(a (.+)\),?\s*$")
        .expect("deadlock synchronizer")
});

static DEADLOCK_HELD_BY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s+which is held by "(.*)"\s*$"#).expect("held by"));

static DEADLOCK_STACK_INFO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Java stack information for the threads listed above:\s*$").expect("stack info")
});

static DEADLOCK_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Found \d+ deadlocks?\.\s*$").expect("deadlock end"));

static JNI_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^JNI global refs: (\d+)(?: \((\d+) bytes\))?, weak(?: global)? refs: (\d+)(?: \((\d+) bytes\))?\s*$",
    )
    .expect("jni line")
});

// =============================================================================
// PUBLIC API
// =============================================================================

/// Parse raw bytes as one dump. Invalid UTF-8 is replaced, never rejected.
pub fn parse_bytes(bytes: &[u8]) -> ThreadDump {
    parse(&String::from_utf8_lossy(bytes))
}

/// Parse one dump from text. Total: never fails, never panics on text input.
pub fn parse(text: &str) -> ThreadDump {
    let mut p = DumpParser::new();
    for line in text.lines() {
        p.feed(line.strip_suffix('\r').unwrap_or(line));
    }
    p.finish()
}

/// Parse a blob that may contain several concatenated dumps.
///
/// Segments are split ahead of each `Full thread dump` banner (pulling in up
/// to two immediately preceding preamble lines: timestamp and/or pid). The
/// result is ordered by header timestamp when every dump carries one,
/// otherwise input order is kept.
pub fn parse_all(text: &str) -> Vec<ThreadDump> {
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();

    let mut starts: Vec<usize> = vec![];
    for (i, line) in lines.iter().enumerate() {
        if BANNER.is_match(line) {
            let mut start = i;
            // Pull the dump's own preamble (timestamp / pid / blank) into the segment
            for _ in 0..2 {
                let Some(prev) = start.checked_sub(1) else { break };
                let candidate = lines[prev];
                let owned = TIMESTAMP.is_match(candidate)
                    || PID_LINE.is_match(candidate)
                    || candidate.trim().is_empty();
                if owned && starts.last().map_or(true, |&s| prev > s) {
                    start = prev;
                } else {
                    break;
                }
            }
            starts.push(start);
        }
    }

    if starts.is_empty() {
        return vec![parse(text)];
    }
    if starts[0] != 0 {
        starts.insert(0, 0);
    }

    let mut dumps: Vec<ThreadDump> = vec![];
    for (idx, &start) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).copied().unwrap_or(lines.len());
        let segment = lines[start..end].join("\n");
        let dump = parse(&segment);
        // A leading segment with no banner and no threads is stray preamble
        if dump.threads.is_empty() && dump.runtime_banner.is_none() && dumps.is_empty() {
            continue;
        }
        dumps.push(dump);
    }

    if dumps.iter().all(|d| d.timestamp.is_some()) {
        dumps.sort_by_key(|d| d.timestamp);
    }
    debug!(count = dumps.len(), "parsed dump sequence");
    dumps
}

// =============================================================================
// DURATION TOKENS
// =============================================================================

/// Parse a duration token (`4.56ms`, `12s`, `3m`, bare number = ms) to
/// milliseconds. Unknown units are rejected, the line loop drops them.
pub fn parse_duration_ms(token: &str) -> Option<f64> {
    let token = token.trim();
    let split = token
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
        .unwrap_or(token.len());
    let (number, unit) = token.split_at(split);
    let value: f64 = number.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    let factor = match unit {
        "ns" => 1e-6,
        "us" | "µs" => 1e-3,
        "ms" | "" => 1.0,
        "s" => 1e3,
        "m" => 60e3,
        _ => return None,
    };
    Some(value * factor)
}

// =============================================================================
// LINE LOOP
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    /// Banner / timestamp / anything ahead of the first thread
    Preamble,
    /// Inside a thread block
    Thread,
    /// Skipping a malformed thread block until the next blank line
    SkipToBlank,
    /// Inside `Found ... deadlock:` participant descriptions
    Deadlock,
    /// Inside `Java stack information for the threads listed above:`
    DeadlockStacks,
}

struct DumpParser {
    dump: ThreadDump,
    current: Option<ThreadInfo>,
    section: Section,
    saw_pid: bool,
    /// Name of the deadlock participant whose stack lines are being read
    stack_info_target: Option<String>,
}

impl DumpParser {
    fn new() -> Self {
        Self {
            dump: ThreadDump::empty(),
            current: None,
            section: Section::Preamble,
            saw_pid: false,
            stack_info_target: None,
        }
    }

    fn finish(mut self) -> ThreadDump {
        self.flush_thread();
        self.dump
    }

    fn flush_thread(&mut self) {
        if let Some(thread) = self.current.take() {
            trace!(name = %thread.name, frames = thread.stack.len(), "thread parsed");
            self.dump.threads.push(thread);
        }
    }

    fn feed(&mut self, line: &str) {
        // Top-level section starts win over any state
        if DEADLOCK_START.is_match(line) {
            self.flush_thread();
            self.dump.deadlocks.push(DeadlockInfo::default());
            self.section = Section::Deadlock;
            return;
        }
        if DEADLOCK_STACK_INFO.is_match(line) {
            self.flush_thread();
            self.section = Section::DeadlockStacks;
            self.stack_info_target = None;
            return;
        }
        if DEADLOCK_END.is_match(line) {
            self.section = Section::Preamble;
            return;
        }
        if let Some(caps) = JNI_LINE.captures(line) {
            self.flush_thread();
            self.section = Section::Preamble;
            self.dump.jni_info = Some(JniInfo {
                global_refs: caps.get(1).and_then(|m| m.as_str().parse().ok()),
                global_refs_bytes: caps.get(2).and_then(|m| m.as_str().parse().ok()),
                weak_refs: caps.get(3).and_then(|m| m.as_str().parse().ok()),
                weak_refs_bytes: caps.get(4).and_then(|m| m.as_str().parse().ok()),
            });
            return;
        }
        if let Some(caps) = BANNER.captures(line) {
            self.flush_thread();
            self.dump.runtime_banner = Some(caps[1].to_string());
            if self.dump.source_type == SourceType::Unknown {
                self.dump.source_type = if self.saw_pid {
                    SourceType::DiagCmd
                } else {
                    SourceType::StackDump
                };
            }
            self.section = Section::Preamble;
            return;
        }

        match self.section {
            Section::Preamble => self.feed_preamble(line),
            Section::Thread => self.feed_thread(line),
            Section::SkipToBlank => {
                if line.trim().is_empty() {
                    self.section = Section::Preamble;
                }
            }
            Section::Deadlock => self.feed_deadlock(line),
            Section::DeadlockStacks => self.feed_deadlock_stacks(line),
        }
    }

    fn feed_preamble(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if self.dump.timestamp.is_none() {
            if let Some(caps) = TIMESTAMP.captures(line) {
                let raw = format!("{} {}", &caps[1], &caps[2]);
                if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S") {
                    self.dump.timestamp = Some(DateTime::<Utc>::from_naive_utc_and_offset(
                        naive,
                        Utc,
                    ));
                    return;
                }
            }
        }
        if self.dump.runtime_banner.is_none() && self.dump.threads.is_empty() {
            if PID_LINE.is_match(line) {
                self.saw_pid = true;
                return;
            }
        }
        self.try_thread_header(line);
    }

    fn feed_thread(&mut self, line: &str) {
        if line.trim().is_empty() {
            // Blank lines separate blocks but also precede the ownable
            // synchronizers list; the block only ends at the next header or
            // top-level section line.
            return;
        }
        if line.starts_with('"') {
            self.try_thread_header(line);
            return;
        }
        if !line.starts_with(' ') && !line.starts_with('\t') {
            // Unindented, unrecognized: the thread block is over
            self.flush_thread();
            self.section = Section::Preamble;
            return;
        }

        let Some(current) = self.current.as_mut() else {
            return;
        };

        if let Some(caps) = STATE_LINE.captures(line) {
            if let Some(state) = ThreadState::parse(&caps[1]) {
                current.state = Some(state);
            }
            return;
        }
        if let Some(frame) = parse_frame(line) {
            current.stack.push(frame);
            return;
        }
        if let Some(caps) = WAITING_TO_LOCK.captures(line) {
            current.waiting_on_lock_identity = Some(caps[1].to_string());
            current.locks.push(
                LockInfo::new(LockRelation::WaitingToLock, &caps[2]).with_identity(&caps[1]),
            );
            return;
        }
        if let Some(caps) = LOCKED.captures(line) {
            current
                .locks
                .push(LockInfo::new(LockRelation::Locked, &caps[2]).with_identity(&caps[1]));
            return;
        }
        if let Some(caps) = WAITING_ON.captures(line) {
            current
                .locks
                .push(LockInfo::new(LockRelation::WaitingOn, &caps[2]).with_identity(&caps[1]));
            return;
        }
        if let Some(caps) = PARKING.captures(line) {
            current.locks.push(
                LockInfo::new(LockRelation::ParkingToWait, &caps[2]).with_identity(&caps[1]),
            );
            return;
        }
        if let Some(caps) = ELIMINATED.captures(line) {
            let mut lock = LockInfo::new(LockRelation::Eliminated, &caps[2]);
            if let Some(identity) = caps.get(1) {
                lock = lock.with_identity(identity.as_str());
            }
            current.locks.push(lock);
            return;
        }
        if let Some(caps) = SYNCHRONIZER.captures(line) {
            current
                .locks
                .push(LockInfo::new(LockRelation::Locked, &caps[2]).with_identity(&caps[1]));
        }
        // `Locked ownable synchronizers:` headers, `- None`, and anything else
        // indented fall through and are dropped.
    }

    fn feed_deadlock(&mut self, line: &str) {
        if line.trim().is_empty() || line.starts_with('=') {
            return;
        }
        let Some(deadlock) = self.dump.deadlocks.last_mut() else {
            return;
        };
        if let Some(caps) = DEADLOCK_PARTICIPANT.captures(line) {
            deadlock.threads.push(DeadlockedThread::new(&caps[1]));
            return;
        }
        let Some(participant) = deadlock.threads.last_mut() else {
            return;
        };
        if let Some(caps) = DEADLOCK_MONITOR.captures(line) {
            participant.waiting_for_monitor = Some(caps[1].to_string());
            participant.waiting_for_object = Some(caps[2].to_string());
            participant.waiting_for_object_type = Some(caps[3].to_string());
            return;
        }
        if let Some(caps) = DEADLOCK_SYNCHRONIZER.captures(line) {
            participant.waiting_for_object = Some(caps[1].to_string());
            participant.waiting_for_object_type = Some(caps[2].to_string());
            return;
        }
        if let Some(caps) = DEADLOCK_HELD_BY.captures(line) {
            participant.held_by = Some(caps[1].to_string());
        }
    }

    fn feed_deadlock_stacks(&mut self, line: &str) {
        if line.trim().is_empty() || line.starts_with('=') {
            return;
        }
        if let Some(caps) = DEADLOCK_PARTICIPANT.captures(line) {
            self.stack_info_target = Some(caps[1].to_string());
            return;
        }
        let Some(target) = self.stack_info_target.clone() else {
            return;
        };
        let Some(participant) = self
            .dump
            .deadlocks
            .iter_mut()
            .rev()
            .flat_map(|d| d.threads.iter_mut())
            .find(|t| t.name == target)
        else {
            return;
        };
        if let Some(frame) = parse_frame(line) {
            participant.stack.push(frame);
            return;
        }
        if let Some(caps) = WAITING_TO_LOCK.captures(line) {
            participant.locks.push(
                LockInfo::new(LockRelation::WaitingToLock, &caps[2]).with_identity(&caps[1]),
            );
            return;
        }
        if let Some(caps) = LOCKED.captures(line) {
            participant
                .locks
                .push(LockInfo::new(LockRelation::Locked, &caps[2]).with_identity(&caps[1]));
        }
    }

    fn try_thread_header(&mut self, line: &str) {
        if !line.starts_with('"') {
            return;
        }
        match parse_thread_header(line) {
            Some(thread) => {
                self.flush_thread();
                self.current = Some(thread);
                self.section = Section::Thread;
            }
            None => {
                debug!(line, "malformed thread header, skipping block");
                self.flush_thread();
                self.section = Section::SkipToBlank;
            }
        }
    }
}

// =============================================================================
// HEADER AND FRAME RECOGNIZERS
// =============================================================================

/// Parse a `"name" #1 daemon prio=5 cpu=1.2ms elapsed=3s tid=0x.. nid=0x.. runnable`
/// header. Tokens are tolerated in any order; unknown trailing words become
/// the state descriptor kept in `extra`.
fn parse_thread_header(line: &str) -> Option<ThreadInfo> {
    let caps = THREAD_HEADER.captures(line)?;
    let name = caps[1].to_string();
    if name.is_empty() {
        return None;
    }
    let mut thread = ThreadInfo::new(name);
    let mut descriptor: Vec<&str> = vec![];

    for token in caps[2].split_whitespace() {
        if let Some(rid) = token.strip_prefix('#') {
            if let Ok(rid) = rid.parse() {
                thread.runtime_id = Some(rid);
                continue;
            }
        }
        if token == "daemon" {
            thread.daemon = Some(true);
            continue;
        }
        if let Some(prio) = token.strip_prefix("prio=") {
            thread.priority = prio.parse().ok();
            continue;
        }
        if token.starts_with("os_prio=") || token.starts_with("tid=") {
            // Recognized but not modeled
            continue;
        }
        if let Some(cpu) = token.strip_prefix("cpu=") {
            thread.cpu_time_ms = parse_duration_ms(cpu);
            continue;
        }
        if let Some(elapsed) = token.strip_prefix("elapsed=") {
            thread.elapsed_ms = parse_duration_ms(elapsed);
            continue;
        }
        if let Some(nid) = token.strip_prefix("nid=") {
            thread.os_id = parse_id(nid);
            continue;
        }
        descriptor.push(token);
    }

    if !descriptor.is_empty() {
        let text = descriptor.join(" ");
        thread.state = header_state(&text);
        thread.extra = Some(text);
    }
    Some(thread)
}

/// Map the descriptive header state text to a coarse state. The
/// `java.lang.Thread.State:` line, when present, overwrites this.
fn header_state(descriptor: &str) -> Option<ThreadState> {
    if descriptor.starts_with("runnable") {
        Some(ThreadState::Runnable)
    } else if descriptor.starts_with("waiting for monitor entry") {
        Some(ThreadState::Blocked)
    } else if descriptor.starts_with("sleeping") {
        Some(ThreadState::TimedWaiting)
    } else if descriptor.starts_with("waiting on condition")
        || descriptor.starts_with("in Object.wait()")
    {
        Some(ThreadState::Waiting)
    } else {
        None
    }
}

fn parse_id(token: &str) -> Option<u64> {
    if let Some(hex) = token.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}

/// Parse an `at class.method(source)` frame line.
fn parse_frame(line: &str) -> Option<StackFrame> {
    let caps = FRAME.captures(line)?;
    let mut qualified = &caps[1];

    // Strip a `module@version/` prefix (keeps `$$Lambda$N/0x...` intact:
    // those have no `@` ahead of the slash)
    if let Some(slash) = qualified.find('/') {
        if qualified[..slash].contains('@') {
            qualified = &qualified[slash + 1..];
        }
    }

    let dot = qualified.rfind('.')?;
    let (class_name, method_name) = qualified.split_at(dot);
    let method_name = &method_name[1..];
    if class_name.is_empty() || method_name.is_empty() {
        return None;
    }

    let mut frame = StackFrame::new(class_name, method_name);
    match caps[2].trim() {
        "Native Method" => frame.is_native = true,
        "Unknown Source" | "" => {}
        source => {
            // A `module@version/` prefix can appear here too (compact dialect)
            let source = match source.find('/') {
                Some(slash) if source[..slash].contains('@') => &source[slash + 1..],
                _ => source,
            };
            if source == "Native Method" {
                frame.is_native = true;
            } else if let Some((file, lineno)) = source.rsplit_once(':') {
                match lineno.parse() {
                    Ok(n) => {
                        frame.file_name = Some(file.to_string());
                        frame.line_number = Some(n);
                    }
                    Err(_) => frame.file_name = Some(source.to_string()),
                }
            } else {
                frame.file_name = Some(source.to_string());
            }
        }
    }
    Some(frame)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"2024-03-18 10:15:30
Full thread dump OpenJDK 64-Bit Server VM (17.0.2+8 mixed mode, sharing):

"main" #1 prio=5 os_prio=0 cpu=312.50ms elapsed=12.18s tid=0x00007f2c48028af0 nid=0x2e07 runnable  [0x00007f2c4f1fd000]
   java.lang.Thread.State: RUNNABLE
	at java.net.SocketInputStream.socketRead0(java.base@17.0.2/Native Method)
	at java.net.SocketInputStream.read(java.base@17.0.2/SocketInputStream.java:168)
	at com.example.Client.receive(Client.java:42)
	- locked <0x000000076ab3c8a0> (a java.io.BufferedInputStream)

"worker-1" #12 daemon prio=5 os_prio=0 cpu=1.02ms elapsed=11.95s tid=0x00007f2c48200800 nid=0x2e15 waiting on condition  [0x00007f2c2d7fa000]
   java.lang.Thread.State: TIMED_WAITING (parking)
	at jdk.internal.misc.Unsafe.park(java.base@17.0.2/Native Method)
	- parking to wait for  <0x000000076ab3f060> (a java.util.concurrent.locks.AbstractQueuedSynchronizer$ConditionObject)
	at java.util.concurrent.locks.LockSupport.parkNanos(java.base@17.0.2/LockSupport.java:252)

   Locked ownable synchronizers:
	- None

"blocked-1" #13 prio=5 os_prio=0 cpu=0.20ms elapsed=11.90s tid=0x00007f2c48202000 nid=0x2e16 waiting for monitor entry  [0x00007f2c2d6f9000]
   java.lang.Thread.State: BLOCKED (on object monitor)
	at com.example.Shared.update(Shared.java:17)
	- waiting to lock <0x000000076ab3c8a0> (a java.io.BufferedInputStream)
	at com.example.Worker.run(Worker.java:9)

JNI global refs: 18, weak refs: 0
"#;

    #[test]
    fn test_parse_sample_dump() {
        let dump = parse(SAMPLE);
        assert_eq!(dump.source_type, SourceType::StackDump);
        assert_eq!(
            dump.runtime_banner.as_deref(),
            Some("OpenJDK 64-Bit Server VM (17.0.2+8 mixed mode, sharing)")
        );
        assert!(dump.timestamp.is_some());
        assert_eq!(dump.threads.len(), 3);

        let main = dump.thread_by_name("main").unwrap();
        assert_eq!(main.runtime_id, Some(1));
        assert_eq!(main.os_id, Some(0x2e07));
        assert_eq!(main.priority, Some(5));
        assert_eq!(main.daemon, None);
        assert_eq!(main.state, Some(ThreadState::Runnable));
        assert_eq!(main.cpu_time_ms, Some(312.5));
        assert_eq!(main.elapsed_ms, Some(12_180.0));
        assert_eq!(main.stack.len(), 3);
        assert!(main.stack[0].is_native);
        assert_eq!(main.stack[0].class_name, "java.net.SocketInputStream");
        assert_eq!(main.stack[0].method_name, "socketRead0");
        assert_eq!(main.stack[1].file_name.as_deref(), Some("SocketInputStream.java"));
        assert_eq!(main.stack[1].line_number, Some(168));
        assert_eq!(main.locks.len(), 1);
        assert_eq!(main.locks[0].relation, LockRelation::Locked);

        let worker = dump.thread_by_name("worker-1").unwrap();
        assert_eq!(worker.daemon, Some(true));
        assert_eq!(worker.state, Some(ThreadState::TimedWaiting));
        assert_eq!(worker.locks[0].relation, LockRelation::ParkingToWait);

        let blocked = dump.thread_by_name("blocked-1").unwrap();
        assert_eq!(blocked.state, Some(ThreadState::Blocked));
        assert_eq!(
            blocked.waiting_on_lock_identity.as_deref(),
            Some("0x000000076ab3c8a0")
        );

        let jni = dump.jni_info.unwrap();
        assert_eq!(jni.global_refs, Some(18));
        assert_eq!(jni.weak_refs, Some(0));
    }

    #[test]
    fn test_parse_empty_input() {
        let dump = parse("");
        assert!(dump.threads.is_empty());
        assert_eq!(dump.source_type, SourceType::Unknown);
    }

    #[test]
    fn test_parse_garbage_never_fails() {
        let dump = parse("not a dump\nat all\n\"\n- locked garbage\n");
        assert!(dump.threads.is_empty());
    }

    #[test]
    fn test_crlf_line_endings() {
        let text = SAMPLE.replace('\n', "\r\n");
        let dump = parse(&text);
        assert_eq!(dump.threads.len(), 3);
    }

    #[test]
    fn test_idempotent_reparse() {
        let a = parse(SAMPLE);
        let b = parse(SAMPLE);
        assert_eq!(a, b);
        assert!(a.hex_equals(&b));
    }

    #[test]
    fn test_diagcmd_dialect_detection() {
        let text = "12345:\n2024-03-18 10:15:30\nFull thread dump OpenJDK 64-Bit Server VM:\n";
        assert_eq!(parse(text).source_type, SourceType::DiagCmd);
    }

    #[test]
    fn test_malformed_header_skips_to_blank_line() {
        let text = concat!(
            "Full thread dump Test VM:\n",
            "\"\" #99 prio=5 runnable\n",
            "\tat com.example.Lost.run(Lost.java:1)\n",
            "\n",
            "\"survivor\" #2 prio=5 runnable\n",
            "   java.lang.Thread.State: RUNNABLE\n",
            "\tat com.example.Kept.run(Kept.java:2)\n",
        );
        let dump = parse(text);
        assert_eq!(dump.threads.len(), 1);
        assert_eq!(dump.threads[0].name, "survivor");
        assert_eq!(dump.threads[0].stack.len(), 1);
    }

    #[test]
    fn test_header_tokens_in_any_order() {
        let text = "\"odd\" nid=0x10 cpu=5ms #7 daemon prio=9 runnable\n";
        let dump = parse(text);
        let t = &dump.threads[0];
        assert_eq!(t.runtime_id, Some(7));
        assert_eq!(t.os_id, Some(0x10));
        assert_eq!(t.cpu_time_ms, Some(5.0));
        assert_eq!(t.daemon, Some(true));
        assert_eq!(t.priority, Some(9));
        assert_eq!(t.state, Some(ThreadState::Runnable));
        assert_eq!(t.extra.as_deref(), Some("runnable"));
    }

    #[test]
    fn test_header_state_without_state_line() {
        let text = "\"b\" #3 waiting for monitor entry\n";
        assert_eq!(parse(text).threads[0].state, Some(ThreadState::Blocked));
    }

    #[test]
    fn test_deadlock_section() {
        let text = concat!(
            "Found one Java-level deadlock:\n",
            "=============================\n",
            "\"Thread-1\":\n",
            "  waiting to lock monitor 0x00007f2c4c01b300 (object 0x000000076ab3c8a0, a java.lang.Object),\n",
            "  which is held by \"Thread-2\"\n",
            "\"Thread-2\":\n",
            "  waiting to lock monitor 0x00007f2c4c018e00 (object 0x000000076ab3c8b0, a java.lang.Object),\n",
            "  which is held by \"Thread-1\"\n",
            "\n",
            "Java stack information for the threads listed above:\n",
            "===================================================\n",
            "\"Thread-1\":\n",
            "\tat com.example.Deadlock$1.run(Deadlock.java:12)\n",
            "\t- waiting to lock <0x000000076ab3c8a0> (a java.lang.Object)\n",
            "\t- locked <0x000000076ab3c8b0> (a java.lang.Object)\n",
            "\"Thread-2\":\n",
            "\tat com.example.Deadlock$2.run(Deadlock.java:24)\n",
            "\t- waiting to lock <0x000000076ab3c8b0> (a java.lang.Object)\n",
            "\t- locked <0x000000076ab3c8a0> (a java.lang.Object)\n",
            "\n",
            "Found 1 deadlock.\n",
        );
        let dump = parse(text);
        assert_eq!(dump.deadlocks.len(), 1);
        let dl = &dump.deadlocks[0];
        assert_eq!(dl.participant_names(), vec!["Thread-1", "Thread-2"]);
        assert_eq!(dl.threads[0].held_by.as_deref(), Some("Thread-2"));
        assert_eq!(
            dl.threads[0].waiting_for_object.as_deref(),
            Some("0x000000076ab3c8a0")
        );
        assert_eq!(
            dl.threads[0].waiting_for_object_type.as_deref(),
            Some("java.lang.Object")
        );
        assert_eq!(dl.threads[0].stack.len(), 1);
        assert_eq!(dl.threads[0].locks.len(), 2);
    }

    #[test]
    fn test_parse_all_splits_on_banners() {
        let two = format!("{}\n{}", SAMPLE, SAMPLE.replace("10:15:30", "10:15:35"));
        let dumps = parse_all(&two);
        assert_eq!(dumps.len(), 2);
        assert_eq!(dumps[0].threads.len(), 3);
        assert_eq!(dumps[1].threads.len(), 3);
        assert!(dumps[0].timestamp < dumps[1].timestamp);
    }

    #[test]
    fn test_parse_all_orders_by_timestamp() {
        let later = SAMPLE.replace("10:15:30", "10:15:40");
        let blob = format!("{}\n{}", later, SAMPLE);
        let dumps = parse_all(&blob);
        assert_eq!(dumps.len(), 2);
        assert!(dumps[0].timestamp < dumps[1].timestamp);
    }

    #[test]
    fn test_parse_all_single_dump() {
        assert_eq!(parse_all(SAMPLE).len(), 1);
    }

    #[test]
    fn test_duration_units() {
        assert_eq!(parse_duration_ms("250ms"), Some(250.0));
        assert_eq!(parse_duration_ms("1.5s"), Some(1500.0));
        assert_eq!(parse_duration_ms("2m"), Some(120_000.0));
        assert_eq!(parse_duration_ms("1500us"), Some(1.5));
        assert_eq!(parse_duration_ms("500000ns"), Some(0.5));
        assert_eq!(parse_duration_ms("42"), Some(42.0));
        assert_eq!(parse_duration_ms("3h"), None);
        assert_eq!(parse_duration_ms("abc"), None);
    }

    #[test]
    fn test_frame_variants() {
        let f = parse_frame("\tat com.example.App.main(App.java:5)").unwrap();
        assert_eq!(f.class_name, "com.example.App");
        assert_eq!(f.line_number, Some(5));

        let f = parse_frame("\tat com.example.Native.poll(Native Method)").unwrap();
        assert!(f.is_native);
        assert!(f.file_name.is_none());

        let f = parse_frame("\tat com.example.Gen.call(Unknown Source)").unwrap();
        assert!(!f.is_native);
        assert!(f.file_name.is_none());

        let f = parse_frame("\tat com.example.Old.work(Old.java)").unwrap();
        assert_eq!(f.file_name.as_deref(), Some("Old.java"));
        assert_eq!(f.line_number, None);

        let f = parse_frame(
            "\tat com.example.Fn$$Lambda$53/0x00000008000d4440.run(Unknown Source)",
        )
        .unwrap();
        assert_eq!(f.class_name, "com.example.Fn$$Lambda$53/0x00000008000d4440");
        assert_eq!(f.method_name, "run");

        assert!(parse_frame("\tat nonsense").is_none());
    }

    #[test]
    fn test_parse_bytes_replaces_invalid_utf8() {
        let mut bytes = b"\"t\" #1 runnable\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        let dump = parse_bytes(&bytes);
        assert_eq!(dump.threads.len(), 1);
    }
}
