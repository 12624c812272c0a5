//! Bridge configuration parsing and launch-argument models.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// How a plain debug-protocol `restart` request is mapped onto the runner.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RestartBehaviour {
    /// Apply code changes and keep application state.
    #[default]
    HotReload,
    /// Apply code changes and reset application state.
    HotRestart,
}

/// Deadlines and intervals (seconds or milliseconds as named).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Default deadline for correlated runner commands.
    #[serde(default = "default_command_seconds")]
    pub command_seconds: u64,
    /// Deadline for `app.restart` (hot reload / hot restart).
    #[serde(default = "default_reload_seconds")]
    pub reload_seconds: u64,
    /// Grace period the quit command races against on terminate.
    #[serde(default = "default_quit_grace_millis")]
    pub quit_grace_millis: u64,
    /// Debounce window for state refreshes.
    #[serde(default = "default_refresh_debounce_millis")]
    pub refresh_debounce_millis: u64,
    /// Memory polling interval when a launch asks for it.
    #[serde(default = "default_memory_poll_millis")]
    pub memory_poll_millis: u64,
}

impl TimeoutConfig {
    /// Default correlated-command deadline.
    #[must_use]
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_seconds)
    }

    /// Reload/restart deadline.
    #[must_use]
    pub fn reload(&self) -> Duration {
        Duration::from_secs(self.reload_seconds)
    }

    /// Terminate grace period.
    #[must_use]
    pub fn quit_grace(&self) -> Duration {
        Duration::from_millis(self.quit_grace_millis)
    }

    /// State-refresh debounce window.
    #[must_use]
    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_millis)
    }

    /// Memory polling interval.
    #[must_use]
    pub fn memory_poll(&self) -> Duration {
        Duration::from_millis(self.memory_poll_millis)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_seconds: default_command_seconds(),
            reload_seconds: default_reload_seconds(),
            quit_grace_millis: default_quit_grace_millis(),
            refresh_debounce_millis: default_refresh_debounce_millis(),
            memory_poll_millis: default_memory_poll_millis(),
        }
    }
}

fn default_command_seconds() -> u64 {
    30
}

fn default_reload_seconds() -> u64 {
    120
}

fn default_quit_grace_millis() -> u64 {
    1000
}

fn default_refresh_debounce_millis() -> u64 {
    500
}

fn default_memory_poll_millis() -> u64 {
    1000
}

fn default_runner() -> String {
    "flutter".into()
}

fn default_namespace() -> String {
    "flutter".into()
}

/// Global bridge configuration parsed from an optional `bridge.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Runner executable spawned for every session.
    #[serde(default = "default_runner")]
    pub runner: String,
    /// Prefix for custom client events (`<namespace>.launched`, ...).
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Mapping of the plain `restart` request.
    #[serde(default)]
    pub restart_behaviour: RestartBehaviour,
    /// Always pass the runner's verbose flag.
    #[serde(default)]
    pub force_verbose: bool,
    /// Forward raw runner traffic to the client as `<namespace>.log`.
    #[serde(default)]
    pub log_daemon_traffic: bool,
    /// Deadlines and intervals.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Extra environment variables for the runner process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            runner: default_runner(),
            namespace: default_namespace(),
            restart_behaviour: RestartBehaviour::default(),
            force_verbose: false,
            log_daemon_traffic: false,
            timeouts: TimeoutConfig::default(),
            env: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Fully-qualified custom event name, e.g. `flutter.launched`.
    #[must_use]
    pub fn event_name(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.namespace)
    }

    fn validate(&self) -> Result<()> {
        if self.runner.trim().is_empty() {
            return Err(AppError::Config("runner must not be empty".into()));
        }
        if self.namespace.trim().is_empty() {
            return Err(AppError::Config("namespace must not be empty".into()));
        }
        if self.timeouts.command_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.command_seconds must be greater than zero".into(),
            ));
        }
        if self.timeouts.reload_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.reload_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Build mode of the target application.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Debug build; the only mode with a runtime debugger.
    #[default]
    Debug,
    /// Profile build.
    Profile,
    /// Release build.
    Release,
}

/// Launch or attach configuration supplied by the debug-protocol client.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    /// Display name of the configuration.
    #[serde(default)]
    pub name: Option<String>,
    /// Working directory of the runner process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Entry point passed as `-t`; required for launch.
    #[serde(default)]
    pub program: Option<String>,
    /// Target device selector passed as `-d`.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Build mode.
    #[serde(default)]
    pub mode: RunMode,
    /// Extra arguments appended verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Run without connecting the runtime debugger.
    #[serde(default)]
    pub no_debug: bool,
    /// Pass `--track-widget-creation`.
    #[serde(default)]
    pub track_widget_creation: bool,
    /// Force the runner's verbose flag for this session.
    #[serde(default)]
    pub force_verbose: bool,
    /// Poll runtime memory usage and forward it to the client.
    #[serde(default)]
    pub poll_memory_usage: bool,
    /// Attach only: runtime service endpoint of an already running app.
    #[serde(default)]
    pub service_uri: Option<String>,
    /// Extra environment variables for this session's runner.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl LaunchArguments {
    /// Parse launch arguments from a raw request payload.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the payload has the wrong shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|err| AppError::Config(format!("invalid launch arguments: {err}")))
    }

    /// Whether the runtime debugger should be connected for this session.
    #[must_use]
    pub fn debugging_requested(&self) -> bool {
        !self.no_debug
    }

    /// Debug launches start paused so the debugger sees the first isolate.
    #[must_use]
    pub fn starts_paused(&self) -> bool {
        !self.no_debug && self.mode == RunMode::Debug
    }
}
