//! Waits-for graph
//!
//! Directed graph with an edge `waiter → owner` whenever a thread is blocked
//! on a lock owned by another thread. Built once per snapshot from the model;
//! model types never carry back-edges. `BTreeMap`/`BTreeSet` keep iteration
//! deterministic, which keeps cycle reports deterministic.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ThreadDump, ThreadKey};

/// Why a blocked thread contributed no edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeAnomaly {
    /// Thread waits on a lock it owns itself
    SelfWait { thread: ThreadKey, lock: String },
    /// Thread waits on a lock no visible thread owns
    OrphanWait { thread: ThreadKey, lock: String },
    /// Lock address held by more than one thread (ownership invariant broken)
    AmbiguousOwner { lock: String, owner_count: usize },
}

/// The per-snapshot waits-for graph plus the anomalies met while building it.
#[derive(Debug, Default)]
pub struct WaitsForGraph {
    edges: BTreeMap<ThreadKey, BTreeSet<ThreadKey>>,
    /// Lock address annotating each edge, keyed by (waiter, owner)
    edge_locks: BTreeMap<(ThreadKey, ThreadKey), String>,
    pub anomalies: Vec<EdgeAnomaly>,
}

impl WaitsForGraph {
    /// Build from one snapshot: join each `waiting_on_lock_identity` to the
    /// unique thread holding that address.
    pub fn from_snapshot(dump: &ThreadDump) -> Self {
        let mut graph = WaitsForGraph::default();
        for thread in &dump.threads {
            let Some(lock) = thread.waiting_on_lock_identity.as_deref() else {
                continue;
            };
            let waiter = thread.key();
            match dump.lock_owner(lock) {
                Err(owner_count) => graph.anomalies.push(EdgeAnomaly::AmbiguousOwner {
                    lock: lock.to_string(),
                    owner_count,
                }),
                Ok(None) => graph.anomalies.push(EdgeAnomaly::OrphanWait {
                    thread: waiter,
                    lock: lock.to_string(),
                }),
                Ok(Some(owner)) if owner.key() == waiter => {
                    graph.anomalies.push(EdgeAnomaly::SelfWait {
                        thread: waiter,
                        lock: lock.to_string(),
                    })
                }
                Ok(Some(owner)) => graph.add_edge(waiter, owner.key(), lock),
            }
        }
        graph
    }

    pub fn add_edge(&mut self, waiter: ThreadKey, owner: ThreadKey, lock: &str) {
        self.edge_locks
            .insert((waiter.clone(), owner.clone()), lock.to_string());
        self.edges.entry(waiter).or_default().insert(owner);
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edge_lock(&self, waiter: &ThreadKey, owner: &ThreadKey) -> Option<&str> {
        self.edge_locks
            .get(&(waiter.clone(), owner.clone()))
            .map(|s| s.as_str())
    }

    /// All elementary cycles, each in canonical rotation (smallest node
    /// first), sorted for deterministic output.
    ///
    /// The search from each start node only visits nodes `>= start`, so every
    /// cycle is found exactly once, from its smallest member.
    pub fn cycles(&self) -> Vec<Vec<ThreadKey>> {
        let mut found: Vec<Vec<ThreadKey>> = vec![];
        for start in self.edges.keys() {
            let mut path = vec![start.clone()];
            let mut on_path: BTreeSet<ThreadKey> = BTreeSet::from([start.clone()]);
            self.search(start, start, &mut path, &mut on_path, &mut found);
        }
        found.sort();
        found.dedup();
        found
    }

    fn search(
        &self,
        start: &ThreadKey,
        node: &ThreadKey,
        path: &mut Vec<ThreadKey>,
        on_path: &mut BTreeSet<ThreadKey>,
        found: &mut Vec<Vec<ThreadKey>>,
    ) {
        let Some(next_nodes) = self.edges.get(node) else {
            return;
        };
        for next in next_nodes {
            if next == start {
                found.push(path.clone());
                continue;
            }
            // Nodes smaller than the start belong to cycles already found
            // from their own smallest member
            if next < start || on_path.contains(next) {
                continue;
            }
            path.push(next.clone());
            on_path.insert(next.clone());
            self.search(start, next, path, on_path, found);
            on_path.remove(next);
            path.pop();
        }
    }
}
