// Bounded ring of named content snapshots.
//
// Snapshots are coarse restore points (conflicts, agent drafts, restores),
// not a keystroke undo stack. The store is bounded by entry count and total
// content bytes; eviction always removes the oldest entry first and never
// removes the last remaining one.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MAX_SNAPSHOTS: usize = 50;
pub const DEFAULT_MAX_BYTES: usize = 8 * 1024 * 1024;

/// Why a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotReason {
    /// Unsaved local buffer displaced by an external disk change.
    Conflict,
    /// Buffer content right before an agent draft replaced it.
    PreDraft,
    /// Buffer content right before a snapshot restore replaced it.
    PreRestore,
    /// Unsaved edits of a session replaced by a new open, kept because the
    /// old file had also changed on disk.
    Superseded,
}

impl SnapshotReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::PreDraft => "pre-draft",
            Self::PreRestore => "pre-restore",
            Self::Superseded => "superseded",
        }
    }
}

/// An immutable point-in-time copy of document content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    id: Uuid,
    created_at: DateTime<Utc>,
    reason: SnapshotReason,
    content: String,
}

impl HistorySnapshot {
    pub fn new(reason: SnapshotReason, content: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), created_at: Utc::now(), reason, content: content.into() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn reason(&self) -> SnapshotReason {
        self.reason
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn byte_len(&self) -> usize {
        self.content.len()
    }
}

/// Size limits for a [`HistoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_count: usize,
    pub max_bytes: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self { max_count: DEFAULT_MAX_SNAPSHOTS, max_bytes: DEFAULT_MAX_BYTES }
    }
}

/// Result of [`HistoryStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Stored(Uuid),
    /// Content matched the newest snapshot; that snapshot's id is returned.
    Deduplicated(Uuid),
}

impl AppendOutcome {
    /// Id of the snapshot that now holds the appended content.
    pub fn snapshot_id(self) -> Uuid {
        match self {
            Self::Stored(id) | Self::Deduplicated(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub count: usize,
    pub total_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    limits: HistoryLimits,
    entries: VecDeque<HistorySnapshot>,
    total_bytes: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(HistoryLimits::default())
    }
}

impl HistoryStore {
    pub fn new(limits: HistoryLimits) -> Self {
        Self { limits, entries: VecDeque::new(), total_bytes: 0 }
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    /// Append a snapshot in call order, then trim by count and by bytes.
    pub fn append(&mut self, snapshot: HistorySnapshot) -> AppendOutcome {
        if let Some(latest) = self.entries.back() {
            if latest.content == snapshot.content {
                return AppendOutcome::Deduplicated(latest.id);
            }
        }

        let id = snapshot.id;
        self.total_bytes += snapshot.byte_len();
        self.entries.push_back(snapshot);

        while self.entries.len() > self.limits.max_count.max(1) {
            self.evict_oldest();
        }
        while self.total_bytes > self.limits.max_bytes && self.entries.len() > 1 {
            self.evict_oldest();
        }

        AppendOutcome::Stored(id)
    }

    /// Most recent snapshot with the given id.
    pub fn find(&self, id: Uuid) -> Option<&HistorySnapshot> {
        self.entries.iter().rev().find(|snapshot| snapshot.id == id)
    }

    pub fn latest(&self) -> Option<&HistorySnapshot> {
        self.entries.back()
    }

    /// Snapshots oldest → newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HistorySnapshot> {
        self.entries.iter()
    }

    pub fn stats(&self) -> HistoryStats {
        HistoryStats { count: self.entries.len(), total_bytes: self.total_bytes }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    fn evict_oldest(&mut self) {
        if let Some(evicted) = self.entries.pop_front() {
            self.total_bytes -= evicted.byte_len();
        }
    }
}
