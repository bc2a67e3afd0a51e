// src/store/change_set.rs
//
// Pending change set: staged mutations between two flushes, in staging order.

use std::collections::HashMap;

use super::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "insert"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub kind: ChangeKind,
    pub collection: String,
    pub key: String,
    /// `None` for deletes
    pub body: Option<serde_json::Value>,
}

impl PendingChange {
    pub fn insert(record: Record) -> Self {
        Self {
            kind: ChangeKind::Insert,
            collection: record.collection,
            key: record.key,
            body: Some(record.body),
        }
    }

    pub fn update(record: Record) -> Self {
        Self {
            kind: ChangeKind::Update,
            collection: record.collection,
            key: record.key,
            body: Some(record.body),
        }
    }

    pub fn delete(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            collection: collection.into(),
            key: key.into(),
            body: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ChangeSet {
    changes: Vec<PendingChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: PendingChange) {
        self.changes.push(change);
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.changes.iter()
    }

    /// Net effect of the staged changes, one entry per record where the
    /// changes compose, in order of first staging.
    ///
    /// - insert + update -> insert with the latest body
    /// - insert + delete -> nothing
    /// - update + update -> last update
    /// - update + delete -> delete
    /// - delete + insert -> update with the new body
    ///
    /// Anything else (insert + insert, delete + delete, delete + update) is
    /// kept as separate entries so the flush reports it.
    pub fn coalesced(&self) -> Vec<PendingChange> {
        let mut slots: Vec<Option<PendingChange>> = Vec::with_capacity(self.changes.len());
        let mut latest: HashMap<(&str, &str), usize> = HashMap::new();

        for change in &self.changes {
            let id = (change.collection.as_str(), change.key.as_str());
            let previous = latest
                .get(&id)
                .and_then(|&index| slots[index].as_ref().map(|prev| (index, prev.kind)));

            let merged = previous.and_then(|(index, prev)| {
                let kind = match (prev, change.kind) {
                    (ChangeKind::Insert, ChangeKind::Update) => Some(ChangeKind::Insert),
                    (ChangeKind::Insert, ChangeKind::Delete) => None,
                    (ChangeKind::Update, ChangeKind::Update | ChangeKind::Delete) => {
                        Some(change.kind)
                    }
                    (ChangeKind::Delete, ChangeKind::Insert) => Some(ChangeKind::Update),
                    _ => return None,
                };
                Some((index, kind))
            });

            match merged {
                Some((index, Some(kind))) => {
                    slots[index] = Some(PendingChange {
                        kind,
                        ..change.clone()
                    });
                }
                Some((index, None)) => slots[index] = None,
                None => {
                    latest.insert(id, slots.len());
                    slots.push(Some(change.clone()));
                }
            }
        }

        slots.into_iter().flatten().collect()
    }

    /// Apply staged changes for `collection` on top of persisted records.
    ///
    /// - insert appends, unless the key is already visible (the flush will
    ///   reject the duplicate)
    /// - update replaces the body in place, no-op for unknown keys
    /// - delete removes the key
    pub fn overlay(&self, collection: &str, mut records: Vec<Record>) -> Vec<Record> {
        for change in self.changes.iter().filter(|c| c.collection == collection) {
            let position = records.iter().position(|r| r.key == change.key);
            match (change.kind, position) {
                (ChangeKind::Insert, None) => {
                    if let Some(body) = &change.body {
                        records.push(Record::new(collection, change.key.clone(), body.clone()));
                    }
                }
                (ChangeKind::Update, Some(index)) => {
                    if let Some(body) = &change.body {
                        records[index].body = body.clone();
                    }
                }
                (ChangeKind::Delete, Some(index)) => {
                    records.remove(index);
                }
                _ => {}
            }
        }
        records
    }
}
