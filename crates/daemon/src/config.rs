// Daemon configuration: `~/.redraft/config.toml`.
//
// `REDRAFT_CONFIG` points at an alternate config file and `REDRAFT_SOCKET`
// overrides the socket path. A missing or unreadable file yields defaults.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::agent::guard::ReasoningEffort;
use crate::history::{HistoryLimits, DEFAULT_MAX_BYTES, DEFAULT_MAX_SNAPSHOTS};
use crate::security::{ensure_owner_only_dir, ensure_owner_only_file};
use crate::watcher::debounce::{DebounceConfig, DEFAULT_AUTOSAVE_MS};

pub const CONFIG_PATH_ENV: &str = "REDRAFT_CONFIG";
pub const SOCKET_PATH_ENV: &str = "REDRAFT_SOCKET";

const DEFAULT_AGENT_COMMAND: &str = "codex";
const DEFAULT_AGENT_MODEL: &str = "gpt-5.3-codex-spark";
const DEFAULT_AGENT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
const DEFAULT_MAX_REPAIR_ATTEMPTS: u32 = 2;
const MIN_AGENT_TIMEOUT_MS: u64 = 1_000;

/// Root directory for redraft state: `~/.redraft/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".redraft"))
}

/// `$REDRAFT_CONFIG`, else `~/.redraft/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    config_path_with(|key| std::env::var_os(key))
}

fn config_path_with(lookup: impl Fn(&str) -> Option<OsString>) -> Option<PathBuf> {
    lookup(CONFIG_PATH_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| global_dir().map(|d| d.join("config.toml")))
}

// ── Daemon config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Socket path override. Defaults to `~/.redraft/redraftd.sock`.
    pub socket_path: Option<PathBuf>,
    /// Quiet period after the last edit before autosave runs.
    pub autosave_debounce_ms: u64,
    /// Watch the open file for changes made by other tools.
    pub watch_external_changes: bool,
    pub history: HistoryConfig,
    pub agent: AgentConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            autosave_debounce_ms: DEFAULT_AUTOSAVE_MS,
            watch_external_changes: true,
            history: HistoryConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load the effective config: file (or defaults), then env overrides.
    pub fn load() -> Self {
        Self::load_with(|key| std::env::var_os(key))
    }

    fn load_with(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let from_file = match config_path_with(&lookup) {
            Some(path) => match Self::load_from(&path) {
                Ok(config) => {
                    debug!(path = %path.display(), "loaded config");
                    config
                }
                Err(ConfigError::Io(error)) if error.kind() == std::io::ErrorKind::NotFound => {
                    Self::default()
                }
                Err(error) => {
                    warn!(%error, path = %path.display(), "ignoring unreadable config, using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };
        from_file.with_env_overrides(lookup)
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config.normalized())
    }

    /// Save to a specific path (creates owner-only parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            ensure_owner_only_dir(parent).map_err(ConfigError::Permissions)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        ensure_owner_only_file(path).map_err(ConfigError::Permissions)
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        if let Some(socket) = lookup(SOCKET_PATH_ENV).filter(|value| !value.is_empty()) {
            self.socket_path = Some(PathBuf::from(socket));
        }
        self
    }

    /// Clamp out-of-range values into their usable range.
    pub fn normalized(mut self) -> Self {
        self.autosave_debounce_ms = self.autosave_debounce().window.as_millis() as u64;
        self.history.max_snapshots = self.history.max_snapshots.max(1);
        self.agent.timeout_ms = self.agent.timeout_ms.max(MIN_AGENT_TIMEOUT_MS);
        self.agent.max_output_bytes = self.agent.max_output_bytes.max(1);
        self
    }

    pub fn autosave_debounce(&self) -> DebounceConfig {
        DebounceConfig::with_millis(self.autosave_debounce_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_snapshots: usize,
    pub max_bytes: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_snapshots: DEFAULT_MAX_SNAPSHOTS, max_bytes: DEFAULT_MAX_BYTES }
    }
}

impl HistoryConfig {
    pub fn limits(&self) -> HistoryLimits {
        HistoryLimits { max_count: self.max_snapshots, max_bytes: self.max_bytes }
    }
}

// ── Agent config ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub enabled: bool,
    /// Executable name or path, resolved against an augmented search path.
    pub command: String,
    pub backend: AgentBackend,
    pub model: String,
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
    pub web_search: WebSearchMode,
    pub prompt_profile: PromptProfile,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub reasoning_summary: ReasoningSummary,
    pub extra_args: Vec<String>,
    /// Re-invocations allowed after the first attempt fails the output guard.
    pub max_repair_attempts: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: DEFAULT_AGENT_COMMAND.into(),
            backend: AgentBackend::Exec,
            model: DEFAULT_AGENT_MODEL.into(),
            timeout_ms: DEFAULT_AGENT_TIMEOUT_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            web_search: WebSearchMode::Disabled,
            prompt_profile: PromptProfile::Core,
            reasoning_effort: None,
            reasoning_summary: ReasoningSummary::Auto,
            extra_args: Vec::new(),
            max_repair_attempts: DEFAULT_MAX_REPAIR_ATTEMPTS,
        }
    }
}

/// How the agent process is driven.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentBackend {
    /// `<command> exec ... -` with model flags; accepts images.
    Exec,
    /// `<command> <extra_args>` with the prompt on stdin; text only.
    Plain,
}

impl AgentBackend {
    pub fn accepts_images(self) -> bool {
        matches!(self, Self::Exec)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebSearchMode {
    Disabled,
    Cached,
    Live,
}

impl WebSearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Cached => "cached",
            Self::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptProfile {
    Core,
    Extended,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningSummary {
    Auto,
    Concise,
    Detailed,
    None,
}

impl ReasoningSummary {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Concise => "concise",
            Self::Detailed => "detailed",
            Self::None => "none",
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("config permissions error: {0}")]
    Permissions(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> =
            pairs.iter().map(|(k, v)| (k.to_string(), OsString::from(v))).collect();
        move |key| map.get(key).cloned()
    }

    // ── Defaults ───────────────────────────────────────────────────

    #[test]
    fn defaults_match_documented_values() {
        let cfg = DaemonConfig::default();
        assert!(cfg.socket_path.is_none());
        assert_eq!(cfg.autosave_debounce_ms, 400);
        assert!(cfg.watch_external_changes);
        assert_eq!(cfg.history.max_snapshots, 50);
        assert_eq!(cfg.history.max_bytes, 8 * 1024 * 1024);
        assert!(cfg.agent.enabled);
        assert_eq!(cfg.agent.command, "codex");
        assert_eq!(cfg.agent.backend, AgentBackend::Exec);
        assert_eq!(cfg.agent.timeout_ms, 60_000);
        assert_eq!(cfg.agent.max_output_bytes, 1024 * 1024);
        assert_eq!(cfg.agent.max_repair_attempts, 2);
        assert!(cfg.agent.reasoning_effort.is_none());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, DaemonConfig::default());
    }

    // ── Parsing ────────────────────────────────────────────────────

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
socket_path = "/tmp/custom.sock"
autosave_debounce_ms = 750
watch_external_changes = false

[history]
max_snapshots = 10
max_bytes = 4096

[agent]
enabled = true
command = "/opt/bin/codex"
backend = "plain"
model = "gpt-5"
timeout_ms = 5000
max_output_bytes = 2048
web_search = "cached"
prompt_profile = "extended"
reasoning_effort = "high"
reasoning_summary = "concise"
extra_args = ["--quiet"]
max_repair_attempts = 1
"#;
        let cfg: DaemonConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.socket_path, Some(PathBuf::from("/tmp/custom.sock")));
        assert_eq!(cfg.autosave_debounce_ms, 750);
        assert!(!cfg.watch_external_changes);
        assert_eq!(cfg.history.limits(), HistoryLimits { max_count: 10, max_bytes: 4096 });
        assert_eq!(cfg.agent.backend, AgentBackend::Plain);
        assert_eq!(cfg.agent.web_search, WebSearchMode::Cached);
        assert_eq!(cfg.agent.prompt_profile, PromptProfile::Extended);
        assert_eq!(cfg.agent.reasoning_effort, Some(ReasoningEffort::High));
        assert_eq!(cfg.agent.reasoning_summary, ReasoningSummary::Concise);
        assert_eq!(cfg.agent.extra_args, vec!["--quiet".to_string()]);
    }

    #[test]
    fn partial_agent_section_keeps_other_defaults() {
        let cfg: DaemonConfig = toml::from_str("[agent]\nmodel = \"m\"\n").unwrap();
        assert_eq!(cfg.agent.model, "m");
        assert_eq!(cfg.agent.command, "codex");
        assert_eq!(cfg.history, HistoryConfig::default());
    }

    #[test]
    fn unknown_agent_key_is_rejected() {
        let error = toml::from_str::<DaemonConfig>("[agent]\napi_key = \"sk\"\n")
            .expect_err("parse should fail");
        assert!(error.to_string().contains("unknown field `api_key`"));
    }

    #[test]
    fn load_from_clamps_out_of_range_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "autosave_debounce_ms = 5\n[history]\nmax_snapshots = 0\n[agent]\ntimeout_ms = 1\n",
        )
        .unwrap();

        let cfg = DaemonConfig::load_from(&path).unwrap();
        assert_eq!(cfg.autosave_debounce_ms, 50);
        assert_eq!(cfg.history.max_snapshots, 1);
        assert_eq!(cfg.agent.timeout_ms, 1_000);
    }

    // ── Load / save ────────────────────────────────────────────────

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = DaemonConfig::default();
        cfg.agent.backend = AgentBackend::Plain;
        cfg.agent.reasoning_effort = Some(ReasoningEffort::Medium);
        cfg.save_to(&path).unwrap();

        assert_eq!(DaemonConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn load_with_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        let cfg = DaemonConfig::load_with(env(&[(CONFIG_PATH_ENV, missing.to_str().unwrap())]));
        assert_eq!(cfg, DaemonConfig::default());
    }

    #[test]
    fn load_with_corrupt_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "autosave_debounce_ms = [").unwrap();

        let cfg = DaemonConfig::load_with(env(&[(CONFIG_PATH_ENV, path.to_str().unwrap())]));
        assert_eq!(cfg, DaemonConfig::default());
    }

    #[test]
    fn socket_env_overrides_file_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "socket_path = \"/from/file.sock\"\n").unwrap();

        let cfg = DaemonConfig::load_with(env(&[
            (CONFIG_PATH_ENV, path.to_str().unwrap()),
            (SOCKET_PATH_ENV, "/from/env.sock"),
        ]));
        assert_eq!(cfg.socket_path, Some(PathBuf::from("/from/env.sock")));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let cfg = DaemonConfig::default().with_env_overrides(env(&[(SOCKET_PATH_ENV, "")]));
        assert!(cfg.socket_path.is_none());
    }

    #[test]
    fn global_dir_is_under_home() {
        assert!(global_dir().is_some_and(|dir| dir.ends_with(".redraft")));
    }

    #[test]
    fn backend_image_support() {
        assert!(AgentBackend::Exec.accepts_images());
        assert!(!AgentBackend::Plain.accepts_images());
    }
}
