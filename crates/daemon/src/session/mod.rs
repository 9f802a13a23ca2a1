// Editor session: one open document's buffer, disk revision, conflict state,
// and snapshot history.
//
// `EditorSession` is synchronous and owns all of its state. Serializing
// access to it (single writer, concurrent readers) is the job of
// [`slot::SessionSlot`].

pub mod revision;
pub mod slot;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use redraft_common::protocol::jsonrpc::{
    DISK_IO, SESSION_MISMATCH, SESSION_NOT_OPEN, SESSION_SUPERSEDED, SNAPSHOT_NOT_FOUND,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::history::{HistoryLimits, HistorySnapshot, HistoryStats, HistoryStore, SnapshotReason};
pub use revision::Revision;

const CONFLICT_MESSAGE: &str =
    "The file changed on disk while you had unsaved edits. Your version was saved to history.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session is open")]
    NotOpen,
    #[error("session `{requested}` is not the open session")]
    Mismatch { requested: String },
    #[error("session `{session_id}` was superseded by a newer open")]
    Superseded { session_id: Uuid },
    #[error("snapshot `{0}` was not found in history")]
    SnapshotNotFound(Uuid),
    #[error("failed to access `{}`: {source}", path.display())]
    DiskIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotOpen => "session_not_open",
            Self::Mismatch { .. } => "session_mismatch",
            Self::Superseded { .. } => "session_superseded",
            Self::SnapshotNotFound(_) => "snapshot_not_found",
            Self::DiskIo { .. } => "disk_io",
        }
    }

    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::NotOpen => SESSION_NOT_OPEN,
            Self::Mismatch { .. } => SESSION_MISMATCH,
            Self::Superseded { .. } => SESSION_SUPERSEDED,
            Self::SnapshotNotFound(_) => SNAPSHOT_NOT_FOUND,
            Self::DiskIo { .. } => DISK_IO,
        }
    }

    fn disk(path: &Path, source: std::io::Error) -> Self {
        Self::DiskIo { path: path.to_path_buf(), source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Clean,
    Dirty,
    ConflictPending,
}

/// Disk content diverged while the buffer held unsaved edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub message: String,
    /// Snapshot holding the displaced local buffer.
    pub snapshot_id: Uuid,
    /// New disk content, now also the buffer.
    pub content: String,
    pub disk_revision: Revision,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalChange {
    Unchanged,
    /// Clean buffer reloaded from disk.
    Refreshed(Revision),
    Conflict(ConflictInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Written(Revision),
    /// Buffer already matched disk; nothing written.
    AlreadyClean(Revision),
    /// Disk changed under a clean buffer; the buffer was reloaded instead.
    Refreshed(Revision),
    /// Disk changed under unsaved edits; the conflict path ran instead of a write.
    Conflict(ConflictInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub path: PathBuf,
    pub state: SessionState,
    pub dirty: bool,
    pub revision: Revision,
    pub disk_revision: Revision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictInfo>,
    pub history: HistoryStats,
}

#[derive(Debug)]
pub struct EditorSession {
    id: Uuid,
    path: PathBuf,
    buffer: String,
    disk_revision: Revision,
    pending_conflict: Option<ConflictInfo>,
    history: HistoryStore,
}

impl EditorSession {
    /// Load `path` into a fresh clean session. A missing file opens as an
    /// empty buffer and is created on first save.
    pub fn open(path: impl Into<PathBuf>, limits: HistoryLimits) -> Result<Self, SessionError> {
        let path = path.into();
        let buffer = read_disk(&path)?.unwrap_or_default();
        let disk_revision = Revision::of_text(&buffer);
        let session = Self {
            id: Uuid::new_v4(),
            path,
            buffer,
            disk_revision,
            pending_conflict: None,
            history: HistoryStore::new(limits),
        };
        info!(session_id = %session.id, path = %session.path.display(), "session opened");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn revision(&self) -> Revision {
        Revision::of_text(&self.buffer)
    }

    pub fn disk_revision(&self) -> &Revision {
        &self.disk_revision
    }

    pub fn is_dirty(&self) -> bool {
        self.revision() != self.disk_revision
    }

    pub fn state(&self) -> SessionState {
        if self.pending_conflict.is_some() {
            SessionState::ConflictPending
        } else if self.is_dirty() {
            SessionState::Dirty
        } else {
            SessionState::Clean
        }
    }

    pub fn pending_conflict(&self) -> Option<&ConflictInfo> {
        self.pending_conflict.as_ref()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Replace the buffer with user text. Clears any pending conflict banner.
    pub fn update_buffer(&mut self, text: impl Into<String>) -> Revision {
        self.buffer = text.into();
        self.pending_conflict = None;
        self.revision()
    }

    /// Reconcile with the file on disk.
    pub fn apply_external_disk_change(&mut self) -> Result<ExternalChange, SessionError> {
        let Some(disk) = read_disk(&self.path)? else {
            debug!(path = %self.path.display(), "file missing on disk, keeping buffer");
            return Ok(ExternalChange::Unchanged);
        };
        Ok(self.reconcile(disk))
    }

    fn reconcile(&mut self, disk: String) -> ExternalChange {
        let disk_revision = Revision::of_text(&disk);
        if disk_revision == self.disk_revision {
            return ExternalChange::Unchanged;
        }

        let local_revision = self.revision();
        let had_unsaved_edits = local_revision != self.disk_revision;
        if !had_unsaved_edits || local_revision == disk_revision {
            self.buffer = disk;
            self.disk_revision = disk_revision.clone();
            debug!(session_id = %self.id, revision = %disk_revision, "buffer refreshed from disk");
            return ExternalChange::Refreshed(disk_revision);
        }

        let local = std::mem::replace(&mut self.buffer, disk);
        let snapshot_id =
            self.history.append(HistorySnapshot::new(SnapshotReason::Conflict, local)).snapshot_id();
        self.disk_revision = disk_revision.clone();

        let conflict = ConflictInfo {
            message: CONFLICT_MESSAGE.to_string(),
            snapshot_id,
            content: self.buffer.clone(),
            disk_revision,
        };
        self.pending_conflict = Some(conflict.clone());
        warn!(session_id = %self.id, %snapshot_id, "external change conflicted with unsaved edits");
        ExternalChange::Conflict(conflict)
    }

    /// Replace the buffer with an agent rewrite, keeping the prior content as
    /// a `pre-draft` snapshot. Returns the snapshot id.
    pub fn apply_agent_draft(&mut self, text: impl Into<String>) -> Uuid {
        let previous = std::mem::replace(&mut self.buffer, text.into());
        self.pending_conflict = None;
        let snapshot_id =
            self.history.append(HistorySnapshot::new(SnapshotReason::PreDraft, previous)).snapshot_id();
        info!(session_id = %self.id, %snapshot_id, "agent draft applied");
        snapshot_id
    }

    /// Write the buffer unless disk diverged from the last-known revision.
    pub fn save(&mut self) -> Result<SaveOutcome, SessionError> {
        if let Some(disk) = read_disk(&self.path)? {
            match self.reconcile(disk) {
                ExternalChange::Unchanged => {}
                ExternalChange::Refreshed(revision) => return Ok(SaveOutcome::Refreshed(revision)),
                ExternalChange::Conflict(conflict) => return Ok(SaveOutcome::Conflict(conflict)),
            }
        }

        let revision = self.revision();
        if revision == self.disk_revision && self.path.exists() {
            return Ok(SaveOutcome::AlreadyClean(revision));
        }

        std::fs::write(&self.path, self.buffer.as_bytes())
            .map_err(|error| SessionError::disk(&self.path, error))?;
        self.disk_revision = revision.clone();
        info!(session_id = %self.id, %revision, "session saved");
        Ok(SaveOutcome::Written(revision))
    }

    /// Load a snapshot into the buffer. The current buffer is kept as a
    /// `pre-restore` snapshot whose id is returned.
    pub fn restore(&mut self, snapshot_id: Uuid) -> Result<Uuid, SessionError> {
        let content = self
            .history
            .find(snapshot_id)
            .map(|snapshot| snapshot.content().to_string())
            .ok_or(SessionError::SnapshotNotFound(snapshot_id))?;

        let previous = std::mem::replace(&mut self.buffer, content);
        let pre_restore = self
            .history
            .append(HistorySnapshot::new(SnapshotReason::PreRestore, previous))
            .snapshot_id();
        self.pending_conflict = None;
        info!(session_id = %self.id, %snapshot_id, "snapshot restored");
        Ok(pre_restore)
    }

    /// Keep content from outside this session (a superseded session's
    /// displaced edits) as a snapshot. Returns the snapshot id.
    pub fn keep_snapshot(&mut self, reason: SnapshotReason, content: impl Into<String>) -> Uuid {
        self.history.append(HistorySnapshot::new(reason, content)).snapshot_id()
    }

    pub fn dismiss_conflict(&mut self) -> bool {
        self.pending_conflict.take().is_some()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id,
            path: self.path.clone(),
            state: self.state(),
            dirty: self.is_dirty(),
            revision: self.revision(),
            disk_revision: self.disk_revision.clone(),
            conflict: self.pending_conflict.clone(),
            history: self.history.stats(),
        }
    }
}

/// File content, or `None` if the file does not exist.
fn read_disk(path: &Path) -> Result<Option<String>, SessionError> {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8(bytes).map(Some).map_err(|error| {
            SessionError::disk(path, std::io::Error::new(ErrorKind::InvalidData, error))
        }),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(SessionError::disk(path, error)),
    }
}
