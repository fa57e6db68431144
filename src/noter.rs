//! Accumulation of per-node share events before they become alerts.
//!
//! Node add/remove/update events arrive one node at a time from the sync
//! layer but must surface as one alert per (actor, container) carrying the
//! whole set of affected nodes. Entries are "noted" here and periodically
//! converted by the store. Removals can additionally be stashed aside while
//! a whole-share removal decision is still in flight, so the same nodes are
//! not counted twice.

use crate::model::{AlertType, NodeHandle, NodeKind, SyncNode, UserHandle, UNDEF_HANDLE};
use std::collections::BTreeMap;
use tracing::debug;

/// (actor, container) key of a noted entry.
pub type NotedKey = (UserHandle, NodeHandle);

/// Nodes noted for one (actor, container), split files/folders, each tagged
/// with its own sub-action (new, removed or updated).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotedEntry {
    pub timestamp: i64,
    pub files: BTreeMap<NodeHandle, AlertType>,
    pub folders: BTreeMap<NodeHandle, AlertType>,
}

impl NotedEntry {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    /// Handles of either map carrying the given sub-action tag.
    pub fn handles_with(&self, sub_type: AlertType) -> (Vec<NodeHandle>, Vec<NodeHandle>) {
        let pick = |m: &BTreeMap<NodeHandle, AlertType>| {
            m.iter()
                .filter(|(_, t)| **t == sub_type)
                .map(|(h, _)| *h)
                .collect()
        };
        (pick(&self.files), pick(&self.folders))
    }
}

#[derive(Debug, Default)]
pub struct SharedNodeNoter {
    noting: bool,
    noted: BTreeMap<NotedKey, NotedEntry>,
    stash: BTreeMap<NotedKey, NotedEntry>,
    /// Container whose per-node churn is currently suppressed; one-shot,
    /// armed by `ignore_next_under` while a whole-share change is processed.
    ignore_under: NodeHandle,
}

impl SharedNodeNoter {
    pub fn new() -> Self {
        SharedNodeNoter {
            ignore_under: UNDEF_HANDLE,
            ..Default::default()
        }
    }

    /// Open a noting window for the next batch of node events.
    pub fn begin(&mut self) {
        self.noting = true;
    }

    pub fn is_noting(&self) -> bool {
        self.noting
    }

    pub fn ignore_next_under(&mut self, container: NodeHandle) {
        self.ignore_under = container;
    }

    /// Record one node event. Dropped when the node sits in the container
    /// currently being ignored.
    pub fn note(
        &mut self,
        actor: UserHandle,
        sub_type: AlertType,
        timestamp: i64,
        node: &SyncNode,
    ) {
        if self.ignore_under != UNDEF_HANDLE && node.parent == self.ignore_under {
            debug!(container = node.parent, "ignoring noted node under removed share");
            return;
        }
        self.noting = true;
        // a node showing up again cancels any stashed pending removal of it,
        // so it lives in at most one of the two maps
        remove_from(&mut self.stash, node.handle);
        let entry = self.noted.entry((actor, node.parent)).or_default();
        entry.timestamp = entry.timestamp.max(timestamp);
        match node.kind {
            NodeKind::File => entry.files.insert(node.handle, sub_type),
            NodeKind::Folder => entry.folders.insert(node.handle, sub_type),
        };
    }

    /// Drain one actor's (or all) noted entries for conversion, closing the
    /// noting window and disarming the container ignore.
    pub fn take_noted(&mut self, actor: Option<UserHandle>) -> Vec<(NotedKey, NotedEntry)> {
        self.noting = false;
        self.ignore_under = UNDEF_HANDLE;
        match actor {
            None => std::mem::take(&mut self.noted).into_iter().collect(),
            Some(user) => {
                let keys: Vec<NotedKey> = self
                    .noted
                    .keys()
                    .filter(|(u, _)| *u == user)
                    .copied()
                    .collect();
                keys.into_iter()
                    .filter_map(|k| self.noted.remove(&k).map(|e| (k, e)))
                    .collect()
            }
        }
    }

    /// Move the actor's noted removal entries into the stash instead of
    /// converting them now. A node lives in at most one of the two maps.
    pub fn stash_deleted(&mut self, actor: UserHandle) {
        let keys: Vec<NotedKey> = self
            .noted
            .keys()
            .filter(|(u, _)| *u == actor)
            .copied()
            .collect();
        for key in keys {
            let Some(entry) = self.noted.get_mut(&key) else { continue };
            let mut moved = NotedEntry {
                timestamp: entry.timestamp,
                ..Default::default()
            };
            let removal = |t: &AlertType| *t == AlertType::RemovedSharedNode;
            moved.files = split_off_matching(&mut entry.files, removal);
            moved.folders = split_off_matching(&mut entry.folders, removal);
            if entry.is_empty() {
                self.noted.remove(&key);
            }
            if !moved.is_empty() {
                let stashed = self.stash.entry(key).or_default();
                stashed.timestamp = stashed.timestamp.max(moved.timestamp);
                stashed.files.extend(moved.files);
                stashed.folders.extend(moved.folders);
            }
        }
    }

    pub fn take_stash(&mut self) -> Vec<(NotedKey, NotedEntry)> {
        std::mem::take(&mut self.stash).into_iter().collect()
    }

    pub fn stash_is_empty(&self) -> bool {
        self.stash.is_empty()
    }

    /// Drop a node from both maps, e.g. when it is permanently deleted.
    /// Returns whether anything was removed.
    pub fn remove_node(&mut self, handle: NodeHandle) -> bool {
        remove_from(&mut self.noted, handle) | remove_from(&mut self.stash, handle)
    }

    /// Whether the node is currently noted (or stashed) as a removal.
    pub fn is_noted_as_removed(&self, handle: NodeHandle) -> bool {
        let tagged_removed = |entries: &BTreeMap<NotedKey, NotedEntry>| {
            entries.values().any(|e| {
                e.files.get(&handle) == Some(&AlertType::RemovedSharedNode)
                    || e.folders.get(&handle) == Some(&AlertType::RemovedSharedNode)
            })
        };
        tagged_removed(&self.noted) || tagged_removed(&self.stash)
    }

    /// Reclassify a noted node to "updated", used when a node changes state
    /// before its original alert was ever surfaced. Returns whether a noted
    /// entry was found.
    pub fn set_noted_to_update(&mut self, node: &SyncNode) -> bool {
        let mut hit = false;
        for map in [&mut self.noted, &mut self.stash] {
            for entry in map.values_mut() {
                let slot = match node.kind {
                    NodeKind::File => entry.files.get_mut(&node.handle),
                    NodeKind::Folder => entry.folders.get_mut(&node.handle),
                };
                if let Some(sub_type) = slot {
                    *sub_type = AlertType::UpdatedSharedNode;
                    hit = true;
                }
            }
        }
        hit
    }

    pub fn clear(&mut self) {
        self.noting = false;
        self.noted.clear();
        self.stash.clear();
        self.ignore_under = UNDEF_HANDLE;
    }
}

fn split_off_matching(
    map: &mut BTreeMap<NodeHandle, AlertType>,
    pred: impl Fn(&AlertType) -> bool,
) -> BTreeMap<NodeHandle, AlertType> {
    let keys: Vec<NodeHandle> = map
        .iter()
        .filter(|(_, t)| pred(t))
        .map(|(h, _)| *h)
        .collect();
    keys.into_iter()
        .filter_map(|k| map.remove(&k).map(|t| (k, t)))
        .collect()
}

fn remove_from(entries: &mut BTreeMap<NotedKey, NotedEntry>, handle: NodeHandle) -> bool {
    let mut removed = false;
    entries.retain(|_, entry| {
        removed |= entry.files.remove(&handle).is_some();
        removed |= entry.folders.remove(&handle).is_some();
        !entry.is_empty()
    });
    removed
}
