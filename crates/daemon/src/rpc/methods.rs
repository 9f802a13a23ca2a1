use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use redraft_common::protocol::jsonrpc::{
    is_supported_protocol_version, Request, RequestId, Response, RpcError,
    CURRENT_PROTOCOL_VERSION, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, PARSE_ERROR, AGENT_DISABLED,
};
use redraft_common::protocol::rpc_methods::{self as methods, DEFERRED_METHODS, IMPLEMENTED_METHODS};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{
    AgentDraftResult, AgentError, AgentInvoker, AgentRequest, CommandResolver, DraftPipeline,
    SearchPathResolver,
};
use crate::config::DaemonConfig;
use crate::session::slot::{SessionSlot, SlotConfig};
use crate::session::{ConflictInfo, ExternalChange, Revision, SaveOutcome, SessionError};

/// Deferred responses are written here by the connection that issued them.
pub type ResponseSink = mpsc::UnboundedSender<Response>;

const SERVER_NAME: &str = "redraftd";
/// `session.wait` without `timeoutMs`.
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 60 * 60 * 1000;

#[derive(Clone)]
pub struct RpcServerState {
    slot: Arc<SessionSlot>,
    invoker: Arc<AgentInvoker>,
    pipeline: DraftPipeline,
    agent_enabled: bool,
    shutdown_notifier: Option<broadcast::Sender<()>>,
}

impl Default for RpcServerState {
    fn default() -> Self {
        Self::new(&DaemonConfig::default(), Arc::new(SearchPathResolver::from_env()))
    }
}

impl RpcServerState {
    pub fn new(config: &DaemonConfig, resolver: Arc<dyn CommandResolver>) -> Self {
        Self {
            slot: SessionSlot::new(SlotConfig::from(config)),
            invoker: Arc::new(AgentInvoker::new(config.agent.clone(), resolver)),
            pipeline: DraftPipeline::new(config.agent.max_repair_attempts),
            agent_enabled: config.agent.enabled,
            shutdown_notifier: None,
        }
    }

    pub fn with_shutdown_notifier(mut self, shutdown_notifier: broadcast::Sender<()>) -> Self {
        self.shutdown_notifier = Some(shutdown_notifier);
        self
    }

    pub fn slot(&self) -> &Arc<SessionSlot> {
        &self.slot
    }
}

// ── Params / results ───────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HelloParams {
    #[serde(default)]
    client: Option<String>,
    #[serde(default)]
    protocol_version: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenParams {
    path: PathBuf,
    #[serde(default)]
    cwd: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditParams {
    #[serde(default)]
    session_id: Option<String>,
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveParams {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DraftParams {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    instruction: Option<String>,
    #[serde(default)]
    images: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreParams {
    #[serde(default)]
    session_id: Option<String>,
    snapshot_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaitParams {
    session_id: Uuid,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseParams {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default = "default_close_save")]
    save: bool,
}

impl Default for CloseParams {
    fn default() -> Self {
        Self { session_id: None, save: default_close_save() }
    }
}

fn default_close_save() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveResult {
    saved: bool,
    revision: Revision,
    #[serde(skip_serializing_if = "Option::is_none")]
    conflict: Option<ConflictInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExternalChangeResult {
    outcome: &'static str,
    revision: Revision,
    #[serde(skip_serializing_if = "Option::is_none")]
    conflict: Option<ConflictInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftResult {
    #[serde(flatten)]
    draft: AgentDraftResult,
    /// `None` when nothing was applied.
    snapshot_id: Option<Uuid>,
    revision: Revision,
}

// ── Entry points ───────────────────────────────────────────────────

/// Decode and handle one frame body. Returns the response to write now, or
/// `None` for notifications and for deferred methods, whose response is sent
/// to `sink` when ready.
pub async fn handle_raw_request(
    raw: &[u8],
    state: &RpcServerState,
    sink: &ResponseSink,
) -> Option<Response> {
    let value = match serde_json::from_slice::<Value>(raw) {
        Ok(value) => value,
        Err(error) => {
            return Some(Response::error(
                None,
                RpcError::new(PARSE_ERROR, "Parse error")
                    .with_data(json!({ "reason": error.to_string() })),
            ));
        }
    };

    let recovered_id = recover_id(&value);
    let request = match serde_json::from_value::<Request>(value) {
        Ok(request) => match envelope_problem(&request) {
            None => request,
            Some(reason) => {
                return Some(Response::error(
                    recovered_id,
                    RpcError::new(INVALID_REQUEST, "Invalid Request")
                        .with_data(json!({ "reason": reason })),
                ));
            }
        },
        Err(error) => {
            return Some(Response::error(
                recovered_id,
                RpcError::new(INVALID_REQUEST, "Invalid Request")
                    .with_data(json!({ "reason": error.to_string() })),
            ));
        }
    };

    let notification = request.is_notification();
    if DEFERRED_METHODS.contains(&request.method.as_str()) {
        let state = state.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            let response = dispatch_guarded(request, state).await;
            if !notification && sink.send(response).is_err() {
                debug!("connection closed before deferred response was ready");
            }
        });
        return None;
    }

    let response = dispatch_guarded(request, state.clone()).await;
    (!notification).then_some(response)
}

/// Run a request on its own task so a panicking handler becomes an
/// INTERNAL_ERROR response instead of tearing down the connection.
async fn dispatch_guarded(request: Request, state: RpcServerState) -> Response {
    let id = request.id.clone();
    let method = request.method.clone();
    match tokio::spawn(async move { dispatch_request(request, &state).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(%method, error = %join_error, "rpc handler failed");
            Response::error(
                id,
                RpcError::new(INTERNAL_ERROR, "Internal error")
                    .with_data(json!({ "kind": "handler_panicked", "method": method })),
            )
        }
    }
}

pub async fn dispatch_request(request: Request, state: &RpcServerState) -> Response {
    match request.method.as_str() {
        methods::HELLO => handle_hello(request, state),
        methods::DAEMON_SHUTDOWN => {
            if let Some(notifier) = &state.shutdown_notifier {
                let _ = notifier.send(());
            }
            info!("shutdown requested over rpc");
            Response::success(request.id, json!({ "ok": true }))
        }
        methods::SESSION_OPEN => handle_session_open(request, state).await,
        methods::SESSION_EDIT => handle_session_edit(request, state).await,
        methods::SESSION_SAVE => handle_session_save(request, state).await,
        methods::SESSION_STATUS => handle_session_status(request, state).await,
        methods::SESSION_EXTERNAL_CHANGE_CHECK => handle_external_change_check(request, state).await,
        methods::SESSION_REQUEST_DRAFT => handle_request_draft(request, state).await,
        methods::SESSION_HISTORY => handle_session_history(request, state).await,
        methods::SESSION_RESTORE => handle_session_restore(request, state).await,
        methods::SESSION_DISMISS_CONFLICT => handle_dismiss_conflict(request, state).await,
        methods::SESSION_WAIT => handle_session_wait(request, state).await,
        methods::SESSION_CLOSE => handle_session_close(request, state).await,
        _ => Response::error(
            request.id,
            RpcError::new(METHOD_NOT_FOUND, "Method not found")
                .with_data(json!({ "method": request.method })),
        ),
    }
}

// ── Handlers ───────────────────────────────────────────────────────

fn handle_hello(request: Request, state: &RpcServerState) -> Response {
    let params = match parse_optional_params::<HelloParams>(request.params, &request.id, "hello") {
        Ok(params) => params,
        Err(response) => return response,
    };
    if let Some(version) = params.protocol_version {
        if !is_supported_protocol_version(version) {
            return invalid_params_response(
                request.id,
                format!("unsupported protocolVersion {version}"),
            );
        }
    }
    debug!(client = params.client.as_deref().unwrap_or("unknown"), "hello");

    Response::success(
        request.id,
        json!({
            "server": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "protocolVersion": CURRENT_PROTOCOL_VERSION,
            "capabilities": IMPLEMENTED_METHODS,
            "agentEnabled": state.agent_enabled,
        }),
    )
}

async fn handle_session_open(request: Request, state: &RpcServerState) -> Response {
    let params = match parse_params::<OpenParams>(request.params, &request.id, "session.open") {
        Ok(params) => params,
        Err(response) => return response,
    };
    let path = match resolve_path(&params.path, params.cwd.as_deref()) {
        Ok(path) => path,
        Err(reason) => return invalid_params_response(request.id, reason),
    };

    respond(request.id, state.slot.open(path).await)
}

async fn handle_session_edit(request: Request, state: &RpcServerState) -> Response {
    let params = match parse_params::<EditParams>(request.params, &request.id, "session.edit") {
        Ok(params) => params,
        Err(response) => return response,
    };
    respond(request.id, state.slot.edit(params.session_id.as_deref(), params.text).await)
}

async fn handle_session_save(request: Request, state: &RpcServerState) -> Response {
    let params =
        match parse_optional_params::<SaveParams>(request.params, &request.id, "session.save") {
            Ok(params) => params,
            Err(response) => return response,
        };
    let outcome = state.slot.save(params.session_id.as_deref(), params.content).await;
    respond(
        request.id,
        outcome.map(|outcome| match outcome {
            SaveOutcome::Written(revision) => {
                SaveResult { saved: true, revision, conflict: None }
            }
            SaveOutcome::AlreadyClean(revision) | SaveOutcome::Refreshed(revision) => {
                SaveResult { saved: false, revision, conflict: None }
            }
            SaveOutcome::Conflict(conflict) => SaveResult {
                saved: false,
                revision: conflict.disk_revision.clone(),
                conflict: Some(conflict),
            },
        }),
    )
}

async fn handle_session_status(request: Request, state: &RpcServerState) -> Response {
    let params = match parse_optional_params::<SessionParams>(
        request.params,
        &request.id,
        "session.status",
    ) {
        Ok(params) => params,
        Err(response) => return response,
    };
    respond(request.id, state.slot.status(params.session_id.as_deref()).await)
}

async fn handle_external_change_check(request: Request, state: &RpcServerState) -> Response {
    let params = match parse_optional_params::<SessionParams>(
        request.params,
        &request.id,
        "session.externalChangeCheck",
    ) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let checked = state.slot.external_change_check(params.session_id.as_deref()).await;
    respond(
        request.id,
        checked.map(|(change, revision)| match change {
            ExternalChange::Unchanged => {
                ExternalChangeResult { outcome: "unchanged", revision, conflict: None }
            }
            ExternalChange::Refreshed(revision) => {
                ExternalChangeResult { outcome: "refreshed", revision, conflict: None }
            }
            ExternalChange::Conflict(conflict) => {
                ExternalChangeResult { outcome: "conflict", revision, conflict: Some(conflict) }
            }
        }),
    )
}

async fn handle_request_draft(request: Request, state: &RpcServerState) -> Response {
    let params = match parse_optional_params::<DraftParams>(
        request.params,
        &request.id,
        "session.requestDraft",
    ) {
        Ok(params) => params,
        Err(response) => return response,
    };
    if !state.agent_enabled {
        return Response::error(
            request.id,
            RpcError::new(AGENT_DISABLED, "the rewrite agent is disabled in config")
                .with_data(json!({ "kind": "agent_disabled" })),
        );
    }

    let source = match state.slot.draft_source(params.session_id.as_deref()).await {
        Ok(source) => source,
        Err(error) => return session_error_response(request.id, &error),
    };
    let images = params
        .images
        .iter()
        .filter_map(|image| resolve_path(image, source.cwd.as_deref()).ok())
        .collect();
    let agent_request = AgentRequest {
        draft: source.content.clone(),
        instruction: params.instruction,
        images,
        effort: state.invoker.config().reasoning_effort,
        repair_notes: Vec::new(),
        cwd: source.cwd.clone(),
    };

    info!(session_id = %source.session_id, "draft requested");
    let mut draft = match state.pipeline.run(&state.invoker, agent_request).await {
        Ok(draft) => draft,
        Err(error) => return agent_error_response(request.id, &error),
    };

    if draft.output.trim().is_empty() {
        warn!(session_id = %source.session_id, "agent returned empty output, buffer left as is");
        draft.warnings.push("agent returned empty output; the buffer was left unchanged".into());
        let revision = Revision::of_text(&source.content);
        return respond(request.id, Ok(DraftResult { draft, snapshot_id: None, revision }));
    }

    let applied = state.slot.apply_draft(source.session_id, draft.output.clone()).await;
    respond(
        request.id,
        applied.map(|applied| DraftResult {
            draft,
            snapshot_id: Some(applied.snapshot_id),
            revision: applied.revision,
        }),
    )
}

async fn handle_session_history(request: Request, state: &RpcServerState) -> Response {
    let params = match parse_optional_params::<SessionParams>(
        request.params,
        &request.id,
        "session.history",
    ) {
        Ok(params) => params,
        Err(response) => return response,
    };
    respond(request.id, state.slot.history(params.session_id.as_deref()).await)
}

async fn handle_session_restore(request: Request, state: &RpcServerState) -> Response {
    let params =
        match parse_params::<RestoreParams>(request.params, &request.id, "session.restore") {
            Ok(params) => params,
            Err(response) => return response,
        };
    respond(
        request.id,
        state.slot.restore(params.session_id.as_deref(), params.snapshot_id).await,
    )
}

async fn handle_dismiss_conflict(request: Request, state: &RpcServerState) -> Response {
    let params = match parse_optional_params::<SessionParams>(
        request.params,
        &request.id,
        "session.dismissConflict",
    ) {
        Ok(params) => params,
        Err(response) => return response,
    };
    let dismissed = state.slot.dismiss_conflict(params.session_id.as_deref()).await;
    respond(request.id, dismissed.map(|state| json!({ "state": state })))
}

async fn handle_session_wait(request: Request, state: &RpcServerState) -> Response {
    let params = match parse_params::<WaitParams>(request.params, &request.id, "session.wait") {
        Ok(params) => params,
        Err(response) => return response,
    };
    let timeout = Duration::from_millis(params.timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS));
    let outcome = state.slot.wait_until_closed(params.session_id, timeout).await;
    debug!(session_id = %params.session_id, ?outcome, "wait finished");
    Response::success(request.id, json!({ "closed": outcome.completed(), "reason": outcome }))
}

async fn handle_session_close(request: Request, state: &RpcServerState) -> Response {
    let params =
        match parse_optional_params::<CloseParams>(request.params, &request.id, "session.close") {
            Ok(params) => params,
            Err(response) => return response,
        };
    respond(request.id, state.slot.close(params.session_id.as_deref(), params.save).await)
}

// ── Helpers ────────────────────────────────────────────────────────

fn parse_params<T: for<'de> Deserialize<'de>>(
    params: Option<Value>,
    request_id: &Option<RequestId>,
    method: &str,
) -> Result<T, Response> {
    let Some(params) = params else {
        return Err(invalid_params_response(request_id.clone(), format!("{method} requires params")));
    };
    serde_json::from_value::<T>(params).map_err(|error| {
        invalid_params_response(
            request_id.clone(),
            format!("failed to decode {method} params: {error}"),
        )
    })
}

fn parse_optional_params<T: for<'de> Deserialize<'de> + Default>(
    params: Option<Value>,
    request_id: &Option<RequestId>,
    method: &str,
) -> Result<T, Response> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        params => parse_params(params, request_id, method),
    }
}

fn respond<T: Serialize>(request_id: Option<RequestId>, result: Result<T, SessionError>) -> Response {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Response::success(request_id, value),
            Err(error) => Response::error(
                request_id,
                RpcError::new(INTERNAL_ERROR, "Internal error")
                    .with_data(json!({ "kind": "serialize", "reason": error.to_string() })),
            ),
        },
        Err(error) => session_error_response(request_id, &error),
    }
}

fn session_error_response(request_id: Option<RequestId>, error: &SessionError) -> Response {
    debug!(%error, "session call failed");
    Response::error(
        request_id,
        RpcError::new(error.rpc_code(), error.to_string()).with_data(json!({ "kind": error.kind() })),
    )
}

fn agent_error_response(request_id: Option<RequestId>, error: &AgentError) -> Response {
    warn!(%error, "draft failed");
    Response::error(
        request_id,
        RpcError::new(error.rpc_code(), error.to_string()).with_data(json!({ "kind": error.kind() })),
    )
}

fn invalid_params_response(request_id: Option<RequestId>, reason: String) -> Response {
    Response::error(
        request_id,
        RpcError::new(INVALID_PARAMS, "Invalid params").with_data(json!({ "reason": reason })),
    )
}

/// The id of a request that decoded as JSON but not as a request, if usable.
fn recover_id(value: &Value) -> Option<RequestId> {
    value.get("id").cloned().and_then(|id| serde_json::from_value(id).ok())
}

fn envelope_problem(request: &Request) -> Option<&'static str> {
    if request.jsonrpc != JSONRPC_VERSION {
        Some("jsonrpc must be \"2.0\"")
    } else if request.method.is_empty() {
        Some("method must be a non-empty string")
    } else {
        None
    }
}

fn resolve_path(path: &Path, cwd: Option<&Path>) -> Result<PathBuf, String> {
    if path.as_os_str().is_empty() {
        return Err("path must not be empty".to_string());
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    match cwd {
        Some(cwd) if cwd.is_absolute() => Ok(cwd.join(path)),
        Some(cwd) => Err(format!("cwd `{}` must be absolute", cwd.display())),
        None => Err(format!("relative path `{}` requires cwd", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;

    use redraft_common::protocol::jsonrpc::{
        Request, RequestId, Response, AGENT_COMMAND_NOT_FOUND, AGENT_DISABLED, INVALID_PARAMS,
        INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR, SESSION_MISMATCH, SESSION_NOT_OPEN,
    };
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio::sync::{broadcast, mpsc};

    use super::{dispatch_request, handle_raw_request, resolve_path, RpcServerState};
    use crate::agent::SearchPathResolver;
    use crate::config::DaemonConfig;

    fn quiet_state() -> RpcServerState {
        let mut config = DaemonConfig::default();
        config.watch_external_changes = false;
        config.autosave_debounce_ms = 10_000;
        RpcServerState::new(&config, Arc::new(SearchPathResolver::new(Vec::new())))
    }

    async fn call(state: &RpcServerState, method: &str, params: Value) -> Response {
        dispatch_request(Request::new(method, Some(params), RequestId::Number(1)), state).await
    }

    fn result(response: Response) -> Value {
        assert!(response.error.is_none(), "expected success: {response:?}");
        response.result.expect("result should be present")
    }

    fn error_code(response: &Response) -> i32 {
        response.error.as_ref().expect("expected error response").code
    }

    // ── envelope handling ──────────────────────────────────────────

    #[tokio::test]
    async fn malformed_json_is_parse_error_with_null_id() {
        let (sink, _rx) = mpsc::unbounded_channel();
        let response = handle_raw_request(b"{nope", &quiet_state(), &sink).await.unwrap();
        assert_eq!(error_code(&response), PARSE_ERROR);
        assert_eq!(response.id, None);
    }

    #[tokio::test]
    async fn wrong_version_keeps_recoverable_id() {
        let (sink, _rx) = mpsc::unbounded_channel();
        let raw = br#"{"jsonrpc":"1.0","method":"hello","id":9}"#;
        let response = handle_raw_request(raw, &quiet_state(), &sink).await.unwrap();
        assert_eq!(error_code(&response), INVALID_REQUEST);
        assert_eq!(response.id, Some(RequestId::Number(9)));
    }

    #[tokio::test]
    async fn empty_method_is_invalid_request() {
        let (sink, _rx) = mpsc::unbounded_channel();
        let raw = br#"{"jsonrpc":"2.0","method":"","id":3}"#;
        let response = handle_raw_request(raw, &quiet_state(), &sink).await.unwrap();
        assert_eq!(error_code(&response), INVALID_REQUEST);
        assert_eq!(response.id, Some(RequestId::Number(3)));
        let data = response.error.and_then(|error| error.data).unwrap();
        assert_eq!(data["reason"], "method must be a non-empty string");
    }

    #[tokio::test]
    async fn notification_gets_no_response() {
        let (sink, _rx) = mpsc::unbounded_channel();
        let raw = br#"{"jsonrpc":"2.0","method":"hello"}"#;
        assert!(handle_raw_request(raw, &quiet_state(), &sink).await.is_none());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let response = call(&quiet_state(), "session.teleport", json!({})).await;
        assert_eq!(error_code(&response), METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn hello_reports_capabilities_and_rejects_unknown_versions() {
        let state = quiet_state();
        let hello = result(call(&state, "hello", json!({ "client": "test" })).await);
        assert_eq!(hello["server"], "redraftd");
        assert_eq!(hello["protocolVersion"], 1);
        assert!(hello["capabilities"].as_array().unwrap().contains(&json!("session.wait")));

        let rejected = call(&state, "hello", json!({ "protocolVersion": 99 })).await;
        assert_eq!(error_code(&rejected), INVALID_PARAMS);
    }

    // ── session methods ────────────────────────────────────────────

    #[tokio::test]
    async fn session_calls_without_open_session_fail() {
        let response = call(&quiet_state(), "session.status", json!({})).await;
        assert_eq!(error_code(&response), SESSION_NOT_OPEN);
        assert_eq!(response.error.unwrap().data.unwrap()["kind"], "session_not_open");
    }

    #[tokio::test]
    async fn open_edit_save_round_trip() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("prompt.md"), "hello").unwrap();
        let state = quiet_state();

        let opened = result(
            call(
                &state,
                "session.open",
                json!({ "path": "prompt.md", "cwd": tmp.path() }),
            )
            .await,
        );
        assert_eq!(opened["content"], "hello");
        assert_eq!(opened["state"], "clean");
        let session_id = opened["sessionId"].as_str().unwrap().to_string();

        let edited = result(
            call(&state, "session.edit", json!({ "sessionId": session_id, "text": "hello!" }))
                .await,
        );
        assert_eq!(edited["dirty"], true);
        assert_eq!(edited["state"], "dirty");

        let saved = result(call(&state, "session.save", json!({})).await);
        assert_eq!(saved["saved"], true);
        assert_eq!(fs::read_to_string(tmp.path().join("prompt.md")).unwrap(), "hello!");
    }

    #[tokio::test]
    async fn mismatched_session_id_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let state = quiet_state();
        result(call(&state, "session.open", json!({ "path": tmp.path().join("a.md") })).await);

        let response = call(
            &state,
            "session.edit",
            json!({ "sessionId": "00000000-0000-0000-0000-000000000000", "text": "x" }),
        )
        .await;
        assert_eq!(error_code(&response), SESSION_MISMATCH);
    }

    #[tokio::test]
    async fn external_change_check_reports_conflict() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.md");
        fs::write(&path, "v1").unwrap();
        let state = quiet_state();
        result(call(&state, "session.open", json!({ "path": path })).await);
        result(call(&state, "session.edit", json!({ "text": "local" })).await);
        fs::write(&path, "disk").unwrap();

        let checked = result(call(&state, "session.externalChangeCheck", json!({})).await);
        assert_eq!(checked["outcome"], "conflict");
        let snapshot_id = checked["conflict"]["snapshotId"].clone();

        let status = result(call(&state, "session.status", json!({})).await);
        assert_eq!(status["state"], "conflictPending");
        assert_eq!(status["history"]["count"], 1);

        let restored =
            result(call(&state, "session.restore", json!({ "snapshotId": snapshot_id })).await);
        assert_eq!(restored["dirty"], true);
        assert_eq!(restored["state"], "dirty");

        let history = result(call(&state, "session.history", json!({})).await);
        assert_eq!(history["count"], 2);
        assert_eq!(history["items"][0]["reason"], "pre-restore");
    }

    #[tokio::test]
    async fn relative_path_without_cwd_is_invalid_params() {
        let response = call(&quiet_state(), "session.open", json!({ "path": "a.md" })).await;
        assert_eq!(error_code(&response), INVALID_PARAMS);
    }

    #[tokio::test]
    async fn close_releases_session() {
        let tmp = TempDir::new().unwrap();
        let state = quiet_state();
        result(call(&state, "session.open", json!({ "path": tmp.path().join("a.md") })).await);

        let closed = result(call(&state, "session.close", json!({ "save": false })).await);
        assert_eq!(closed["closed"], true);
        assert_eq!(error_code(&call(&state, "session.status", json!({})).await), SESSION_NOT_OPEN);
    }

    // ── drafts ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn draft_with_disabled_agent_fails_fast() {
        let tmp = TempDir::new().unwrap();
        let mut config = DaemonConfig::default();
        config.watch_external_changes = false;
        config.agent.enabled = false;
        let state = RpcServerState::new(&config, Arc::new(SearchPathResolver::new(Vec::new())));
        result(call(&state, "session.open", json!({ "path": tmp.path().join("a.md") })).await);

        let response = call(&state, "session.requestDraft", json!({})).await;
        assert_eq!(error_code(&response), AGENT_DISABLED);
    }

    #[tokio::test]
    async fn draft_with_missing_command_reports_kind() {
        let tmp = TempDir::new().unwrap();
        let state = quiet_state();
        result(call(&state, "session.open", json!({ "path": tmp.path().join("a.md") })).await);

        let response = call(&state, "session.requestDraft", json!({})).await;
        assert_eq!(error_code(&response), AGENT_COMMAND_NOT_FOUND);
        assert_eq!(response.error.unwrap().data.unwrap()["kind"], "command_not_found");
    }

    #[tokio::test]
    async fn deferred_wait_answers_through_sink() {
        let tmp = TempDir::new().unwrap();
        let state = quiet_state();
        let opened =
            result(call(&state, "session.open", json!({ "path": tmp.path().join("a.md") })).await);

        let (sink, mut rx) = mpsc::unbounded_channel();
        let raw = serde_json::to_vec(&Request::new(
            "session.wait",
            Some(json!({ "sessionId": opened["sessionId"], "timeoutMs": 5000 })),
            RequestId::Number(7),
        ))
        .unwrap();
        assert!(handle_raw_request(&raw, &state, &sink).await.is_none());

        result(call(&state, "session.open", json!({ "path": tmp.path().join("b.md") })).await);
        let response = rx.recv().await.unwrap();
        assert_eq!(response.id, Some(RequestId::Number(7)));
        let waited = result(response);
        assert_eq!(waited["closed"], true);
        assert_eq!(waited["reason"], "superseded");
    }

    #[tokio::test]
    async fn shutdown_notifies_runtime() {
        let (tx, mut rx) = broadcast::channel(1);
        let state = quiet_state().with_shutdown_notifier(tx);
        let response = result(call(&state, "daemon.shutdown", Value::Null).await);
        assert_eq!(response["ok"], true);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn resolve_path_rules() {
        assert_eq!(resolve_path(PathBuf::from("/a/b.md").as_path(), None).unwrap(), PathBuf::from("/a/b.md"));
        assert_eq!(
            resolve_path(PathBuf::from("b.md").as_path(), Some(PathBuf::from("/a").as_path()))
                .unwrap(),
            PathBuf::from("/a/b.md")
        );
        assert!(resolve_path(PathBuf::from("b.md").as_path(), Some(PathBuf::from("rel").as_path()))
            .is_err());
        assert!(resolve_path(PathBuf::from("").as_path(), None).is_err());
    }
}
