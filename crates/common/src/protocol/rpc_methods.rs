// RPC method name constants: derived from contracts/jsonrpc-methods.json.

// ── Daemon ─────────────────────────────────────────────────────────
pub const HELLO: &str = "hello";
pub const DAEMON_SHUTDOWN: &str = "daemon.shutdown";

// ── Session ────────────────────────────────────────────────────────
pub const SESSION_OPEN: &str = "session.open";
pub const SESSION_EDIT: &str = "session.edit";
pub const SESSION_SAVE: &str = "session.save";
pub const SESSION_STATUS: &str = "session.status";
pub const SESSION_EXTERNAL_CHANGE_CHECK: &str = "session.externalChangeCheck";
pub const SESSION_REQUEST_DRAFT: &str = "session.requestDraft";
pub const SESSION_HISTORY: &str = "session.history";
pub const SESSION_RESTORE: &str = "session.restore";
pub const SESSION_DISMISS_CONFLICT: &str = "session.dismissConflict";
pub const SESSION_WAIT: &str = "session.wait";
pub const SESSION_CLOSE: &str = "session.close";

/// All methods the daemon currently dispatches.
pub const IMPLEMENTED_METHODS: &[&str] = &[
    HELLO,
    DAEMON_SHUTDOWN,
    SESSION_OPEN,
    SESSION_EDIT,
    SESSION_SAVE,
    SESSION_STATUS,
    SESSION_EXTERNAL_CHANGE_CHECK,
    SESSION_REQUEST_DRAFT,
    SESSION_HISTORY,
    SESSION_RESTORE,
    SESSION_DISMISS_CONFLICT,
    SESSION_WAIT,
    SESSION_CLOSE,
];

/// Methods whose response is written out-of-band once the work completes.
pub const DEFERRED_METHODS: &[&str] = &[SESSION_REQUEST_DRAFT, SESSION_WAIT];
