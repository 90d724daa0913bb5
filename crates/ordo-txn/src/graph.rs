//! Wait-for graph for deadlock detection.
//!
//! The graph tracks which transactions are waiting for which:
//! ```text
//! T1 waits for T2:  T1 -> T2
//! T2 waits for T3:  T2 -> T3
//! T3 waits for T1:  T3 -> T1 (cycle = deadlock!)
//! ```
//!
//! An edge `w -> h` exists only while `w` is polling for a resource held by
//! `h`. All edges live behind one coarse lock with short critical sections.
//! Traversals run on a borrowed edge map with locally owned visited/path
//! state, so concurrent callers never share traversal state.

use std::collections::{HashMap, HashSet};
use std::fmt;

use ordo_common::TxnId;
use parking_lot::Mutex;

/// Edges: waiter -> set of holders it's waiting for.
pub type EdgeMap = HashMap<TxnId, HashSet<TxnId>>;

/// The wait-for graph.
pub struct WaitForGraph {
    edges: Mutex<EdgeMap>,
}

impl WaitForGraph {
    /// Creates a new empty wait-for graph.
    pub fn new() -> Self {
        Self {
            edges: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a wait-for edge: waiter is waiting for holder.
    pub fn add_edge(&self, waiter: TxnId, holder: TxnId) {
        self.edges.lock().entry(waiter).or_default().insert(holder);
    }

    /// Removes exactly the edge `waiter -> holder`.
    pub fn remove_edge(&self, waiter: TxnId, holder: TxnId) {
        let mut edges = self.edges.lock();
        if let Some(holders) = edges.get_mut(&waiter) {
            holders.remove(&holder);
            if holders.is_empty() {
                edges.remove(&waiter);
            }
        }
    }

    /// Removes every edge out of `txn` and every edge into it.
    ///
    /// Used when `txn` aborts or terminates: it may be waiting on others and
    /// be waited on at the same time.
    pub fn remove_all_for(&self, txn: TxnId) {
        let mut edges = self.edges.lock();
        edges.remove(&txn);
        edges.retain(|_, holders| {
            holders.remove(&txn);
            !holders.is_empty()
        });
    }

    /// Returns true if the graph contains a cycle.
    pub fn has_cycle(&self) -> bool {
        has_cycle_in(&self.edges.lock())
    }

    /// Returns the transactions on cycles, or an empty set if there is none.
    ///
    /// The result is a superset of at least one minimal cycle; with
    /// overlapping cycles it may include nodes outside the minimal one.
    pub fn cycle_members(&self) -> HashSet<TxnId> {
        cycle_members_in(&self.edges.lock())
    }

    /// Returns a copy of the edge map.
    pub fn snapshot(&self) -> EdgeMap {
        self.edges.lock().clone()
    }

    /// Returns what a transaction is waiting for.
    pub fn holders_of(&self, waiter: TxnId) -> Vec<TxnId> {
        self.edges
            .lock()
            .get(&waiter)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Checks if a transaction is waiting.
    pub fn is_waiting(&self, txn: TxnId) -> bool {
        self.edges.lock().contains_key(&txn)
    }

    /// Returns the number of wait edges.
    pub fn edge_count(&self) -> usize {
        self.edges.lock().values().map(HashSet::len).sum()
    }

    /// Returns true if there are no edges.
    pub fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }
}

impl Default for WaitForGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitForGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitForGraph")
            .field("edge_count", &self.edge_count())
            .finish()
    }
}

/// Depth-first search for a back-edge to a node on the active path.
pub fn has_cycle_in(edges: &EdgeMap) -> bool {
    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();

    edges
        .keys()
        .any(|&node| !visited.contains(&node) && detect(node, edges, &mut visited, &mut on_path))
}

fn detect(
    node: TxnId,
    edges: &EdgeMap,
    visited: &mut HashSet<TxnId>,
    on_path: &mut HashSet<TxnId>,
) -> bool {
    if on_path.contains(&node) {
        return true;
    }
    if !visited.insert(node) {
        return false;
    }

    on_path.insert(node);
    if let Some(holders) = edges.get(&node) {
        for &holder in holders {
            if detect(holder, edges, visited, on_path) {
                return true;
            }
        }
    }
    on_path.remove(&node);
    false
}

/// Collects every path suffix closed by a back-edge during a full traversal.
pub fn cycle_members_in(edges: &EdgeMap) -> HashSet<TxnId> {
    let mut members = HashSet::new();
    if !has_cycle_in(edges) {
        return members;
    }

    let mut visited = HashSet::new();
    let mut path = Vec::new();
    for &node in edges.keys() {
        if !visited.contains(&node) {
            collect(node, edges, &mut visited, &mut path, &mut members);
        }
    }
    members
}

fn collect(
    node: TxnId,
    edges: &EdgeMap,
    visited: &mut HashSet<TxnId>,
    path: &mut Vec<TxnId>,
    members: &mut HashSet<TxnId>,
) {
    if let Some(start) = path.iter().position(|&p| p == node) {
        members.extend(path[start..].iter().copied());
        return;
    }
    if !visited.insert(node) {
        return;
    }

    path.push(node);
    if let Some(holders) = edges.get(&node) {
        for &holder in holders {
            collect(holder, edges, visited, path, members);
        }
    }
    path.pop();
}
