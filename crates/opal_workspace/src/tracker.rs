//! Cycle detection for depth-first import graph traversal.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// What the caller should do after pushing a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The path was never seen before. Traverse into it and call
    /// [`CircularLoopTracker::pop`] when done.
    NonCircular,
    /// The push closed (or joined) an import cycle. Do not traverse.
    Circular,
    /// The path was fully handled earlier. Do not traverse.
    AlreadyVisited,
}

/// Tracks the current path of a depth-first traversal and records every
/// import cycle it crosses.
///
/// The tracker mirrors the traversal's recursion: `push` on entry to a
/// file, `pop` on exit, but only after a [`PushOutcome::NonCircular`]
/// push. A single pass over the graph discovers all cycles, including
/// ones rejoined through a node that already left the stack: pushing a
/// visited node whose cycle still has a member on the stack folds the
/// intervening stack segment into that cycle.
#[derive(Debug, Default)]
pub struct CircularLoopTracker {
    visited: HashSet<PathBuf>,
    stack: Vec<PathBuf>,
    group_index: HashMap<PathBuf, usize>,
    // Superseded groups are left empty rather than removed so older
    // indices in `group_index` stay valid until remapped.
    groups: Vec<BTreeSet<PathBuf>>,
}

impl CircularLoopTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records entry into `path` and reports how the traversal should
    /// proceed.
    pub fn push(&mut self, path: &Path) -> PushOutcome {
        if !self.visited.contains(path) {
            self.visited.insert(path.to_owned());
            self.stack.push(path.to_owned());
            return PushOutcome::NonCircular;
        }
        if let Some(index) = self.stack.iter().position(|p| p.as_path() == path) {
            self.merge_from(index, path);
            return PushOutcome::Circular;
        }
        // Off the stack, but one of its known cycle mates may still be on
        // it. If so, everything between that mate and the top belongs to
        // the same cycle.
        if let Some(&group) = self.group_index.get(path) {
            let mates = &self.groups[group];
            if let Some(index) = self.stack.iter().position(|p| mates.contains(p)) {
                self.merge_from(index, path);
                return PushOutcome::Circular;
            }
        }
        PushOutcome::AlreadyVisited
    }

    /// Records exit from the most recently entered file. Call only after
    /// a push that returned [`PushOutcome::NonCircular`].
    pub fn pop(&mut self) {
        self.stack.pop();
    }

    /// The full membership of the cycle `path` belongs to, if any,
    /// ordered by path.
    pub fn cycle_members(&self, path: &Path) -> Option<&BTreeSet<PathBuf>> {
        self.group_index.get(path).map(|&group| &self.groups[group])
    }

    /// All cycles discovered so far, each sorted by path, de-duplicated.
    pub fn resolved_cycles(&self) -> Vec<Vec<PathBuf>> {
        let mut cycles: Vec<Vec<PathBuf>> = self
            .groups
            .iter()
            .filter(|group| !group.is_empty())
            .map(|group| group.iter().cloned().collect())
            .collect();
        cycles.sort();
        cycles.dedup();
        cycles
    }

    /// Merges the stack segment starting at `index`, plus `extra`, plus
    /// any pre-existing groups of those members, into one new group.
    fn merge_from(&mut self, index: usize, extra: &Path) {
        let mut members: Vec<PathBuf> = self.stack[index..].to_vec();
        members.push(extra.to_owned());

        let mut merged = BTreeSet::new();
        for member in &members {
            if let Some(&group) = self.group_index.get(member) {
                merged.append(&mut std::mem::take(&mut self.groups[group]));
            }
            merged.insert(member.clone());
        }

        let id = self.groups.len();
        for member in &merged {
            self.group_index.insert(member.clone(), id);
        }
        self.groups.push(merged);
    }
}
