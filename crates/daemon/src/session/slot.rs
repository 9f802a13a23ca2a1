// The daemon's single session slot.
//
// At most one `EditorSession` is live. Mutations take the write lock, status
// and history reads share the read lock. A `watch` channel publishes the
// slot lifecycle as `{epoch, session_id}`; `epoch` increments on every open,
// which lets waiters tell "superseded by a new open" apart from "closed".

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    ConflictInfo, EditorSession, ExternalChange, Revision, SaveOutcome, SessionError,
    SessionState, SessionStatus,
};
use crate::config::DaemonConfig;
use crate::history::{HistoryLimits, HistoryStats, SnapshotReason};
use crate::watcher::debounce::{Debouncer, WATCH_DEBOUNCE_MS};
use crate::watcher::DiskWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifecycle {
    pub epoch: u64,
    pub session_id: Option<Uuid>,
    /// The most recently released session and how it ended.
    pub last_ended: Option<(Uuid, WaitOutcome)>,
}

/// How a `wait_until_closed` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitOutcome {
    Closed,
    Superseded,
    Timeout,
}

impl WaitOutcome {
    pub fn completed(self) -> bool {
        !matches!(self, Self::Timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotConfig {
    pub autosave_delay: Duration,
    pub history: HistoryLimits,
    pub watch_external_changes: bool,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

impl From<&DaemonConfig> for SlotConfig {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            autosave_delay: config.autosave_debounce().window,
            history: config.history.limits(),
            watch_external_changes: config.watch_external_changes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedSession {
    pub session_id: Uuid,
    pub path: PathBuf,
    pub revision: Revision,
    pub content: String,
    pub state: SessionState,
    /// Set when the replaced session had unsaved edits that could not be
    /// written back to its file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_conflict: Option<SupersededConflict>,
}

/// Where the displaced edits of a superseded session were kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupersededConflict {
    /// File the edits belonged to.
    pub path: PathBuf,
    /// Snapshot in the new session's history holding the edits.
    pub snapshot_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    pub revision: Revision,
    pub dirty: bool,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub revision: Revision,
    pub dirty: bool,
    pub state: SessionState,
    pub pre_restore_snapshot_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub reason: SnapshotReason,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryListing {
    pub items: Vec<HistoryItem>,
    #[serde(flatten)]
    pub stats: HistoryStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseOutcome {
    pub closed: bool,
    pub saved_before_close: bool,
    /// Set when saving before close hit a conflict; the session stays open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictInfo>,
}

/// Input for an agent draft, captured under the read lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftSource {
    pub session_id: Uuid,
    pub content: String,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftApplied {
    pub snapshot_id: Uuid,
    pub revision: Revision,
}

#[derive(Default)]
struct SlotState {
    session: Option<EditorSession>,
    watcher: Option<DiskWatcher>,
}

pub struct SessionSlot {
    state: RwLock<SlotState>,
    lifecycle: watch::Sender<Lifecycle>,
    autosave: Debouncer,
    config: SlotConfig,
}

impl SessionSlot {
    pub fn new(config: SlotConfig) -> Arc<Self> {
        let (lifecycle, _) = watch::channel(Lifecycle::default());
        Arc::new(Self {
            state: RwLock::new(SlotState::default()),
            lifecycle,
            autosave: Debouncer::new(),
            config,
        })
    }

    pub fn config(&self) -> &SlotConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Open `path`, replacing any live session and releasing its waiters.
    pub async fn open(self: &Arc<Self>, path: PathBuf) -> Result<OpenedSession, SessionError> {
        let mut session = EditorSession::open(path, self.config.history)?;
        let session_id = session.id();

        let mut state = self.state.write().await;
        self.autosave.cancel();
        state.watcher = None;
        let mut superseded = None;
        let mut superseded_conflict = None;
        if let Some(mut previous) = state.session.take() {
            if let Some(displaced) = flush_before_release(&mut previous) {
                let snapshot_id = session.keep_snapshot(SnapshotReason::Superseded, displaced);
                warn!(
                    session_id = %previous.id(),
                    %snapshot_id,
                    "superseded session could not be flushed, edits kept in new session history"
                );
                superseded_conflict = Some(SupersededConflict {
                    path: previous.path().to_path_buf(),
                    snapshot_id,
                });
            }
            info!(session_id = %previous.id(), superseded_by = %session_id, "session superseded");
            superseded = Some((previous.id(), WaitOutcome::Superseded));
        }

        if self.config.watch_external_changes {
            state.watcher = self.start_watcher(session.path(), session_id);
        }

        let opened = OpenedSession {
            session_id,
            path: session.path().to_path_buf(),
            revision: session.revision(),
            content: session.buffer().to_string(),
            state: session.state(),
            superseded_conflict,
        };
        state.session = Some(session);
        self.lifecycle.send_modify(|lifecycle| {
            lifecycle.epoch += 1;
            lifecycle.session_id = Some(session_id);
            if superseded.is_some() {
                lifecycle.last_ended = superseded;
            }
        });
        Ok(opened)
    }

    /// Replace the buffer and re-arm autosave.
    pub async fn edit(
        self: &Arc<Self>,
        requested: Option<&str>,
        text: String,
    ) -> Result<EditOutcome, SessionError> {
        let mut state = self.state.write().await;
        let session = live_mut(&mut state, requested)?;
        let revision = session.update_buffer(text);
        let outcome =
            EditOutcome { revision, dirty: session.is_dirty(), state: session.state() };
        if outcome.dirty {
            self.arm_autosave(session.id());
        }
        Ok(outcome)
    }

    /// Save now. `content`, if given, replaces the buffer first.
    pub async fn save(
        &self,
        requested: Option<&str>,
        content: Option<String>,
    ) -> Result<SaveOutcome, SessionError> {
        let mut state = self.state.write().await;
        let session = live_mut(&mut state, requested)?;
        self.autosave.cancel();
        if let Some(content) = content {
            session.update_buffer(content);
        }
        session.save()
    }

    /// Reconcile with disk now. Returns the change and the resulting buffer revision.
    pub async fn external_change_check(
        &self,
        requested: Option<&str>,
    ) -> Result<(ExternalChange, Revision), SessionError> {
        let mut state = self.state.write().await;
        let session = live_mut(&mut state, requested)?;
        let change = session.apply_external_disk_change()?;
        Ok((change, session.revision()))
    }

    pub async fn status(&self, requested: Option<&str>) -> Result<SessionStatus, SessionError> {
        let state = self.state.read().await;
        Ok(live(&state, requested)?.status())
    }

    pub async fn history(&self, requested: Option<&str>) -> Result<HistoryListing, SessionError> {
        let state = self.state.read().await;
        let history = live(&state, requested)?.history();
        let items = history
            .iter()
            .rev()
            .map(|snapshot| HistoryItem {
                id: snapshot.id(),
                created_at: snapshot.created_at(),
                reason: snapshot.reason(),
                bytes: snapshot.byte_len(),
            })
            .collect();
        Ok(HistoryListing { items, stats: history.stats() })
    }

    pub async fn restore(
        self: &Arc<Self>,
        requested: Option<&str>,
        snapshot_id: Uuid,
    ) -> Result<RestoreOutcome, SessionError> {
        let mut state = self.state.write().await;
        let session = live_mut(&mut state, requested)?;
        let pre_restore_snapshot_id = session.restore(snapshot_id)?;
        let outcome = RestoreOutcome {
            revision: session.revision(),
            dirty: session.is_dirty(),
            state: session.state(),
            pre_restore_snapshot_id,
        };
        if outcome.dirty {
            self.arm_autosave(session.id());
        }
        Ok(outcome)
    }

    pub async fn dismiss_conflict(
        &self,
        requested: Option<&str>,
    ) -> Result<SessionState, SessionError> {
        let mut state = self.state.write().await;
        let session = live_mut(&mut state, requested)?;
        session.dismiss_conflict();
        Ok(session.state())
    }

    /// Snapshot of what an agent draft should rewrite.
    pub async fn draft_source(&self, requested: Option<&str>) -> Result<DraftSource, SessionError> {
        let state = self.state.read().await;
        let session = live(&state, requested)?;
        Ok(DraftSource {
            session_id: session.id(),
            content: session.buffer().to_string(),
            cwd: session.path().parent().map(Path::to_path_buf),
        })
    }

    /// Apply an agent rewrite to the session it was produced for.
    pub async fn apply_draft(
        self: &Arc<Self>,
        session_id: Uuid,
        text: String,
    ) -> Result<DraftApplied, SessionError> {
        let mut state = self.state.write().await;
        let session = match state.session.as_mut() {
            Some(session) if session.id() == session_id => session,
            _ => return Err(SessionError::Superseded { session_id }),
        };
        let snapshot_id = session.apply_agent_draft(text);
        if session.is_dirty() {
            self.arm_autosave(session_id);
        }
        Ok(DraftApplied { snapshot_id, revision: session.revision() })
    }

    pub async fn close(
        &self,
        requested: Option<&str>,
        save: bool,
    ) -> Result<CloseOutcome, SessionError> {
        let mut state = self.state.write().await;
        let session = live_mut(&mut state, requested)?;
        self.autosave.cancel();

        let mut saved_before_close = false;
        if save {
            match session.save()? {
                SaveOutcome::Written(_) => saved_before_close = true,
                SaveOutcome::Conflict(conflict) => {
                    return Ok(CloseOutcome {
                        closed: false,
                        saved_before_close: false,
                        conflict: Some(conflict),
                    });
                }
                SaveOutcome::AlreadyClean(_) | SaveOutcome::Refreshed(_) => {}
            }
        }

        let closed_id = session.id();
        info!(session_id = %closed_id, dirty = session.is_dirty(), "session closed");
        state.watcher = None;
        state.session = None;
        self.lifecycle.send_modify(|lifecycle| {
            lifecycle.session_id = None;
            lifecycle.last_ended = Some((closed_id, WaitOutcome::Closed));
        });
        Ok(CloseOutcome { closed: true, saved_before_close, conflict: None })
    }

    /// Wait until `session_id` is closed or superseded, or `timeout` elapses.
    /// All waiters on a session are released by the same lifecycle change. A
    /// session that is no longer live completes immediately.
    pub async fn wait_until_closed(&self, session_id: Uuid, timeout: Duration) -> WaitOutcome {
        let mut rx = self.lifecycle.subscribe();
        let registered = *rx.borrow_and_update();
        if registered.session_id != Some(session_id) {
            return match registered.last_ended {
                Some((ended, outcome)) if ended == session_id => outcome,
                _ => WaitOutcome::Closed,
            };
        }

        let released =
            tokio::time::timeout(timeout, rx.wait_for(|lc| lc.session_id != Some(session_id)))
                .await
                .map(|changed| changed.map(|current| *current));
        match released {
            Ok(Ok(current)) => match current.last_ended {
                Some((ended, outcome)) if ended == session_id => outcome,
                _ if current.epoch > registered.epoch => WaitOutcome::Superseded,
                _ => WaitOutcome::Closed,
            },
            Ok(Err(_)) => WaitOutcome::Closed,
            Err(_) => WaitOutcome::Timeout,
        }
    }

    // ── background work ────────────────────────────────────────────

    fn arm_autosave(self: &Arc<Self>, session_id: Uuid) {
        let slot = Arc::downgrade(self);
        self.autosave.schedule(self.config.autosave_delay, move || async move {
            if let Some(slot) = slot.upgrade() {
                slot.autosave(session_id).await;
            }
        });
    }

    async fn autosave(&self, session_id: Uuid) {
        let mut state = self.state.write().await;
        let Some(session) = state.session.as_mut().filter(|s| s.id() == session_id) else {
            debug!(%session_id, "autosave skipped, session no longer open");
            return;
        };
        if !session.is_dirty() {
            return;
        }
        match session.save() {
            Ok(SaveOutcome::Written(revision)) => info!(%session_id, %revision, "autosaved"),
            Ok(SaveOutcome::Conflict(conflict)) => {
                warn!(%session_id, snapshot_id = %conflict.snapshot_id, "autosave hit a conflict")
            }
            Ok(other) => debug!(%session_id, ?other, "autosave wrote nothing"),
            Err(error) => warn!(%session_id, %error, "autosave failed"),
        }
    }

    fn start_watcher(self: &Arc<Self>, path: &Path, session_id: Uuid) -> Option<DiskWatcher> {
        let (watcher, mut ticks) = match DiskWatcher::start(path) {
            Ok(started) => started,
            Err(error) => {
                warn!(?error, path = %path.display(), "external change watching disabled");
                return None;
            }
        };

        let slot: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let debouncer = Debouncer::new();
            while ticks.recv().await.is_some() {
                let slot = slot.clone();
                debouncer.schedule(Duration::from_millis(WATCH_DEBOUNCE_MS), move || async move {
                    if let Some(slot) = slot.upgrade() {
                        slot.on_disk_event(session_id).await;
                    }
                });
            }
            debouncer.cancel();
        });
        Some(watcher)
    }

    async fn on_disk_event(&self, session_id: Uuid) {
        let mut state = self.state.write().await;
        let Some(session) = state.session.as_mut().filter(|s| s.id() == session_id) else {
            return;
        };
        match session.apply_external_disk_change() {
            Ok(ExternalChange::Unchanged) => {}
            Ok(ExternalChange::Refreshed(revision)) => {
                info!(%session_id, %revision, "reloaded external change")
            }
            Ok(ExternalChange::Conflict(conflict)) => {
                info!(%session_id, snapshot_id = %conflict.snapshot_id, "conflict pending")
            }
            Err(error) => warn!(%session_id, %error, "external change check failed"),
        }
    }
}

/// Best-effort save of a session about to be replaced. Returns the unsaved
/// buffer when the save hit a conflict, since the session's own history goes
/// away with it.
fn flush_before_release(session: &mut EditorSession) -> Option<String> {
    if !session.is_dirty() {
        return None;
    }
    match session.save() {
        Ok(SaveOutcome::Conflict(conflict)) => session
            .history()
            .find(conflict.snapshot_id)
            .map(|snapshot| snapshot.content().to_string()),
        Ok(outcome) => {
            debug!(session_id = %session.id(), ?outcome, "flushed superseded session");
            None
        }
        Err(error) => {
            warn!(session_id = %session.id(), %error, "failed to flush superseded session");
            Some(session.buffer().to_string())
        }
    }
}

fn live<'a>(
    state: &'a SlotState,
    requested: Option<&str>,
) -> Result<&'a EditorSession, SessionError> {
    let session = state.session.as_ref().ok_or(SessionError::NotOpen)?;
    check_requested(session, requested)?;
    Ok(session)
}

fn live_mut<'a>(
    state: &'a mut SlotState,
    requested: Option<&str>,
) -> Result<&'a mut EditorSession, SessionError> {
    let session = state.session.as_mut().ok_or(SessionError::NotOpen)?;
    check_requested(session, requested)?;
    Ok(session)
}

fn check_requested(session: &EditorSession, requested: Option<&str>) -> Result<(), SessionError> {
    match requested {
        Some(requested) if Uuid::parse_str(requested).ok() != Some(session.id()) => {
            Err(SessionError::Mismatch { requested: requested.to_string() })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn quiet_config() -> SlotConfig {
        SlotConfig {
            autosave_delay: Duration::from_millis(50),
            history: HistoryLimits::default(),
            watch_external_changes: false,
        }
    }

    fn file(tmp: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = tmp.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    // ── waitUntilClosed ────────────────────────────────────────────

    #[tokio::test]
    async fn waiter_is_released_by_reopen_as_superseded() {
        let tmp = TempDir::new().unwrap();
        let slot = SessionSlot::new(quiet_config());
        let first = slot.open(file(&tmp, "a.md", "a")).await.unwrap();

        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                slot.wait_until_closed(first.session_id, Duration::from_secs(10)).await
            })
        };
        tokio::task::yield_now().await;
        slot.open(file(&tmp, "b.md", "b")).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Superseded);
        assert!(outcome.completed());
    }

    #[tokio::test]
    async fn all_waiters_release_on_close() {
        let tmp = TempDir::new().unwrap();
        let slot = SessionSlot::new(quiet_config());
        let opened = slot.open(file(&tmp, "a.md", "a")).await.unwrap();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let slot = Arc::clone(&slot);
                tokio::spawn(async move {
                    slot.wait_until_closed(opened.session_id, Duration::from_secs(10)).await
                })
            })
            .collect();
        tokio::task::yield_now().await;
        slot.close(None, false).await.unwrap();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), WaitOutcome::Closed);
        }
    }

    #[tokio::test]
    async fn close_then_open_before_waiter_runs_reports_closed() {
        let tmp = TempDir::new().unwrap();
        let slot = SessionSlot::new(quiet_config());
        let opened = slot.open(file(&tmp, "a.md", "a")).await.unwrap();

        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                slot.wait_until_closed(opened.session_id, Duration::from_secs(10)).await
            })
        };
        // Let the waiter park, then close and reopen without yielding.
        while slot.lifecycle.receiver_count() == 0 {
            tokio::task::yield_now().await;
        }
        slot.close(None, false).await.unwrap();
        slot.open(file(&tmp, "b.md", "b")).await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Closed);
    }

    #[tokio::test]
    async fn waiter_times_out_when_nothing_happens() {
        let tmp = TempDir::new().unwrap();
        let slot = SessionSlot::new(quiet_config());
        let opened = slot.open(file(&tmp, "a.md", "a")).await.unwrap();

        let outcome = slot.wait_until_closed(opened.session_id, Duration::from_millis(50)).await;
        assert_eq!(outcome, WaitOutcome::Timeout);
        assert!(!outcome.completed());
    }

    #[tokio::test]
    async fn waiting_on_unknown_session_returns_immediately() {
        let slot = SessionSlot::new(quiet_config());
        let outcome = slot.wait_until_closed(Uuid::new_v4(), Duration::from_secs(10)).await;
        assert_eq!(outcome, WaitOutcome::Closed);
    }

    // ── session routing ────────────────────────────────────────────

    #[tokio::test]
    async fn operations_without_session_fail_not_open() {
        let slot = SessionSlot::new(quiet_config());
        let error = slot.status(None).await.unwrap_err();
        assert!(matches!(error, SessionError::NotOpen));
    }

    #[tokio::test]
    async fn mismatched_session_id_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let slot = SessionSlot::new(quiet_config());
        let opened = slot.open(file(&tmp, "a.md", "a")).await.unwrap();

        let error = slot.edit(Some("not-a-session"), "x".into()).await.unwrap_err();
        assert!(matches!(error, SessionError::Mismatch { .. }));

        let id = opened.session_id.to_string();
        assert!(slot.edit(Some(&id), "x".into()).await.is_ok());
    }

    #[tokio::test]
    async fn reopen_flushes_dirty_previous_session() {
        let tmp = TempDir::new().unwrap();
        let slot = SessionSlot::new(SlotConfig {
            autosave_delay: Duration::from_secs(60),
            ..quiet_config()
        });
        let a = file(&tmp, "a.md", "a");
        slot.open(a.clone()).await.unwrap();
        slot.edit(None, "unsaved".into()).await.unwrap();

        slot.open(file(&tmp, "b.md", "b")).await.unwrap();
        assert_eq!(fs::read_to_string(&a).unwrap(), "unsaved");
    }

    #[tokio::test]
    async fn reopen_keeps_conflicting_edits_in_new_session_history() {
        let tmp = TempDir::new().unwrap();
        let slot = SessionSlot::new(SlotConfig {
            autosave_delay: Duration::from_secs(60),
            ..quiet_config()
        });
        let a = file(&tmp, "a.md", "a");
        slot.open(a.clone()).await.unwrap();
        slot.edit(None, "precious-local-edit".into()).await.unwrap();
        fs::write(&a, "disk-edit").unwrap();

        let opened = slot.open(file(&tmp, "b.md", "b")).await.unwrap();
        assert_eq!(fs::read_to_string(&a).unwrap(), "disk-edit");

        let kept = opened.superseded_conflict.expect("displaced edits should be reported");
        assert_eq!(kept.path, a);
        let listing = slot.history(None).await.unwrap();
        assert_eq!(listing.stats.count, 1);
        assert_eq!(listing.items[0].id, kept.snapshot_id);
        assert_eq!(listing.items[0].reason, SnapshotReason::Superseded);

        slot.restore(None, kept.snapshot_id).await.unwrap();
        assert_eq!(
            slot.status(None).await.unwrap().revision,
            Revision::of_text("precious-local-edit")
        );
    }

    #[tokio::test]
    async fn clean_reopen_reports_no_displaced_edits() {
        let tmp = TempDir::new().unwrap();
        let slot = SessionSlot::new(quiet_config());
        slot.open(file(&tmp, "a.md", "a")).await.unwrap();
        let opened = slot.open(file(&tmp, "b.md", "b")).await.unwrap();
        assert!(opened.superseded_conflict.is_none());
        assert_eq!(opened.state, SessionState::Clean);
    }

    // ── autosave ───────────────────────────────────────────────────

    #[tokio::test]
    async fn rapid_edits_autosave_once_with_last_text() {
        let tmp = TempDir::new().unwrap();
        let path = file(&tmp, "a.md", "a");
        let slot = SessionSlot::new(quiet_config());
        slot.open(path.clone()).await.unwrap();

        for text in ["a1", "a12", "a123"] {
            slot.edit(None, text.into()).await.unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "a");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fs::read_to_string(&path).unwrap(), "a123");
        assert_eq!(slot.status(None).await.unwrap().state, SessionState::Clean);
    }

    #[tokio::test]
    async fn autosave_takes_conflict_path_when_disk_diverged() {
        let tmp = TempDir::new().unwrap();
        let path = file(&tmp, "a.md", "a");
        let slot = SessionSlot::new(quiet_config());
        slot.open(path.clone()).await.unwrap();

        slot.edit(None, "local-edit".into()).await.unwrap();
        fs::write(&path, "disk-edit").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fs::read_to_string(&path).unwrap(), "disk-edit");
        let status = slot.status(None).await.unwrap();
        assert_eq!(status.state, SessionState::ConflictPending);
        assert_eq!(status.history.count, 1);
    }

    // ── drafts ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn draft_for_superseded_session_is_not_applied() {
        let tmp = TempDir::new().unwrap();
        let slot = SessionSlot::new(quiet_config());
        slot.open(file(&tmp, "a.md", "a")).await.unwrap();
        let source = slot.draft_source(None).await.unwrap();
        assert_eq!(source.content, "a");

        slot.open(file(&tmp, "b.md", "b")).await.unwrap();
        let error = slot.apply_draft(source.session_id, "rewrite".into()).await.unwrap_err();
        assert!(matches!(error, SessionError::Superseded { .. }));
        assert_eq!(slot.status(None).await.unwrap().history.count, 0);
    }

    #[tokio::test]
    async fn history_lists_newest_first() {
        let tmp = TempDir::new().unwrap();
        let slot = SessionSlot::new(SlotConfig {
            autosave_delay: Duration::from_secs(60),
            ..quiet_config()
        });
        let opened = slot.open(file(&tmp, "a.md", "v1")).await.unwrap();
        let first = slot.apply_draft(opened.session_id, "v2".into()).await.unwrap();
        let second = slot.apply_draft(opened.session_id, "v3".into()).await.unwrap();

        let listing = slot.history(None).await.unwrap();
        assert_eq!(listing.stats.count, 2);
        assert_eq!(listing.items[0].id, second.snapshot_id);
        assert_eq!(listing.items[1].id, first.snapshot_id);

        // v2 differs from disk, so the restored buffer is dirty.
        let restored = slot.restore(None, second.snapshot_id).await.unwrap();
        assert!(restored.dirty);
        assert_eq!(restored.state, SessionState::Dirty);
        assert_eq!(slot.status(None).await.unwrap().revision, Revision::of_text("v2"));

        // v1 is what disk holds, so restoring it leaves the session clean.
        let restored = slot.restore(None, first.snapshot_id).await.unwrap();
        assert!(!restored.dirty);
        assert_eq!(slot.status(None).await.unwrap().revision, Revision::of_text("v1"));
    }

    // ── disk watcher ───────────────────────────────────────────────

    #[tokio::test]
    async fn watcher_marks_conflict_pending_on_external_write() {
        let tmp = TempDir::new().unwrap();
        let path = file(&tmp, "a.md", "a");
        let slot = SessionSlot::new(SlotConfig {
            autosave_delay: Duration::from_secs(60),
            watch_external_changes: true,
            ..quiet_config()
        });
        slot.open(path.clone()).await.unwrap();
        slot.edit(None, "local-edit".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::write(&path, "disk-edit").unwrap();
        let mut state = SessionState::Dirty;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            state = slot.status(None).await.unwrap().state;
            if state == SessionState::ConflictPending {
                break;
            }
        }
        assert_eq!(state, SessionState::ConflictPending);
    }
}
