//! Debug session orchestrator.
//!
//! One [`DebugSession`] bridges a debug-protocol client to one runner
//! process and, once the application is up, its runtime introspection
//! service.
//!
//! # Event flow
//!
//! ```text
//! runner stdout ─► ProcessDriver ─► EventBus ─┐
//!                                             ├─► inputs ─► pump ─► handle_*_event
//! runtime service ─► RuntimeEvent ────────────┘
//! client requests ─► handle_request (one task per request)
//! ```
//!
//! Runner and runtime events are processed strictly in arrival order by a
//! single pump task. Requests run concurrently with the pump and with each
//! other; state lives behind a mutex that is never held across an await on
//! the runner or the runtime service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{BridgeConfig, LaunchArguments, RestartBehaviour};
use crate::daemon::bus::EventBus;
use crate::daemon::driver::{DriverOptions, ProcessDriver, TrafficDirection, TrafficObserver};
use crate::daemon::events::{DaemonEvent, EventKind, OutputStream};
use crate::daemon::spawner::{ProcessSpawner, RunnerCommand};
use crate::dap::messages::{ClientChannel, OutputCategory, Request};
use crate::runtime::extensions::{creation_location, ServiceExtensionBridge};
use crate::runtime::{RuntimeConnector, RuntimeEvent, RuntimeService};
use crate::session::hooks::LifecycleHooks;
use crate::session::output::OutputChannel;
use crate::session::refresh::RefreshScheduler;
use crate::session::registry::{RegisteredSession, SessionRegistry};
use crate::session::state::{AppInstance, RuntimeLink, SessionKind, SessionPhase, SessionState};
use crate::{AppError, Result};

/// Collaborators shared by every session of one bridge process.
#[derive(Clone)]
pub struct SessionDeps {
    /// Bridge configuration.
    pub config: Arc<BridgeConfig>,
    /// Process-wide session registry.
    pub registry: SessionRegistry,
    /// Runner process factory.
    pub spawner: Arc<dyn ProcessSpawner>,
    /// Runner-specific argument grammar and command names.
    pub hooks: Arc<dyn LifecycleHooks>,
    /// Runtime service factory.
    pub connector: Arc<dyn RuntimeConnector>,
}

impl std::fmt::Debug for SessionDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDeps")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Input processed by the session pump.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    /// Event from the runner process.
    Daemon(DaemonEvent),
    /// Event from the runtime service.
    Runtime(RuntimeEvent),
}

/// Marks a reload in flight; dropping it clears the flag.
struct ReloadGuard<'a>(&'a AtomicBool);

impl<'a> ReloadGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ReloadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One debug session.
pub struct DebugSession {
    id: String,
    deps: SessionDeps,
    client: ClientChannel,
    state: Mutex<SessionState>,
    driver: Mutex<Option<Arc<ProcessDriver>>>,
    inputs: mpsc::UnboundedSender<SessionInput>,
    refresh: RefreshScheduler,
    reload_in_progress: AtomicBool,
    torn_down: AtomicBool,
    inspector_groups: AtomicU64,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("id", &self.id)
            .field("reloading", &self.is_reloading())
            .finish_non_exhaustive()
    }
}

impl DebugSession {
    /// Create an idle session and start its event pump.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(deps: SessionDeps, client: ClientChannel) -> Arc<Self> {
        let state = SessionState::new();
        let id = state.id.clone();
        let (inputs, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let refresh = RefreshScheduler::spawn(
            deps.config.timeouts.refresh_debounce(),
            client.clone(),
            deps.config.event_name("refresh"),
        );

        let session = Arc::new(Self {
            id: id.clone(),
            deps,
            client,
            state: Mutex::new(state),
            driver: Mutex::new(None),
            inputs,
            refresh,
            reload_in_progress: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            inspector_groups: AtomicU64::new(1),
            cancel: cancel.clone(),
        });

        let span = info_span!("session", session_id = %id);
        tokio::spawn(pump(Arc::downgrade(&session), rx, cancel).instrument(span));
        session
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> SessionPhase {
        self.state.lock().await.phase
    }

    /// Current application id, if the runner reported one.
    pub async fn app_id(&self) -> Option<String> {
        self.state.lock().await.app_id()
    }

    /// Whether a hot reload or hot restart is in flight.
    #[must_use]
    pub fn is_reloading(&self) -> bool {
        self.reload_in_progress.load(Ordering::SeqCst)
    }

    /// Whether teardown has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn event_name(&self, suffix: &str) -> String {
        self.deps.config.event_name(suffix)
    }

    async fn current_driver(&self) -> Option<Arc<ProcessDriver>> {
        self.driver.lock().await.clone()
    }

    async fn extension_bridge(&self) -> ServiceExtensionBridge {
        let (app_id, runtime) = {
            let state = self.state.lock().await;
            (state.app_id(), state.runtime.service())
        };
        ServiceExtensionBridge::new(app_id, runtime, self.current_driver().await)
    }

    fn report_error(&self, context: &str, err: &AppError) {
        warn!(session_id = %self.id, context, %err, "operation failed");
        self.client
            .output(OutputCategory::Stderr, &format!("{context}: {err}\n"));
    }

    // ── Client requests ─────────────────────────────────

    /// Handle one client request and send its response.
    pub async fn handle_request(&self, request: Request) {
        let span = info_span!("request", command = %request.command, seq = request.seq);
        async {
            if request.command == "initialize" {
                self.client.respond_ok(&request, capabilities());
                self.client.event("initialized", json!({}));
                return;
            }
            match self.dispatch(&request).await {
                Ok(body) => self.client.respond_ok(&request, body),
                Err(err) => {
                    debug!(%err, "request failed");
                    self.client.respond_err(&request, err.to_string());
                }
            }
        }
        .instrument(span)
        .await;
    }

    async fn dispatch(&self, request: &Request) -> Result<Value> {
        match request.command.as_str() {
            "launch" | "attach" => {
                let kind = if request.command == "launch" {
                    SessionKind::Launch
                } else {
                    SessionKind::Attach
                };
                let arguments = if request.arguments.is_null() {
                    LaunchArguments::default()
                } else {
                    LaunchArguments::from_value(request.arguments.clone())?
                };
                self.launch(kind, arguments).await?;
                Ok(Value::Null)
            }
            "configurationDone" => Ok(Value::Null),
            "restart" => {
                self.restart().await;
                Ok(Value::Null)
            }
            "terminate" | "disconnect" => {
                self.terminate().await;
                Ok(Value::Null)
            }
            "threads" => self.threads().await,
            "stackTrace" => self.stack_trace(&request.arguments).await,
            "serviceExtension"
            | "checkPlatformOverride"
            | "checkIsWidgetCreationTracked"
            | "hotReload"
            | "hotRestart" => {
                self.custom_request(&request.command, &request.arguments)
                    .await;
                Ok(Value::Null)
            }
            other => Err(AppError::Protocol(format!("unsupported request: {other}"))),
        }
    }

    /// Start (launch) or attach to an application through a new runner.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` for unusable launch arguments.
    /// - `AppError::Spawn` if the runner cannot be started; the session is
    ///   torn down before returning.
    pub async fn launch(&self, kind: SessionKind, arguments: LaunchArguments) -> Result<()> {
        let config = Arc::clone(&self.deps.config);
        let spawn_args = self
            .deps
            .hooks
            .spawn_arguments(kind, &arguments, config.force_verbose)?;

        {
            let mut state = self.state.lock().await;
            if state.phase != SessionPhase::Idle {
                return Err(AppError::Protocol(format!(
                    "session already started ({:?})",
                    state.phase
                )));
            }
            state.kind = Some(kind);
            state.no_debug_requested = !arguments.debugging_requested();
            state.arguments = arguments.clone();
            state.transition(SessionPhase::Launching);
        }

        let purged = self.deps.registry.clear();
        if purged > 0 {
            warn!(purged, "purged stale sessions from registry");
        }
        self.deps.registry.register(RegisteredSession::new(
            self.id.clone(),
            arguments.name.clone(),
            kind,
        ));

        let command = RunnerCommand {
            executable: config.runner.clone(),
            cwd: arguments.cwd.clone(),
            args: spawn_args,
            env: runner_environment(&config, &arguments),
        };

        let bus = EventBus::new();
        for event_kind in EventKind::ALL {
            let inputs = self.inputs.clone();
            bus.register_handler(event_kind, move |event| {
                if inputs.send(SessionInput::Daemon(event.clone())).is_err() {
                    debug!("session pump gone, dropping runner event");
                }
            });
        }

        let options = DriverOptions {
            command_timeout: config.timeouts.command(),
            traffic: config
                .log_daemon_traffic
                .then(|| traffic_observer(self.client.clone(), self.event_name("log"))),
        };

        info!(%kind, executable = %command.executable, args = ?command.args, "starting runner");

        let driver = match ProcessDriver::start(self.deps.spawner.as_ref(), &command, bus, options) {
            Ok(driver) => driver,
            Err(err) => {
                error!(%err, "runner failed to start");
                self.report_error("failed to start runner", &err);
                self.teardown().await;
                return Err(err);
            }
        };

        {
            // Teardown moves the phase under this lock before it takes the
            // driver, so the install below is either seen by it or skipped.
            let mut state = self.state.lock().await;
            if state.phase.is_shutting_down() || self.is_torn_down() {
                drop(state);
                info!("session terminated while the runner was starting");
                driver.dispose();
                self.deps.registry.remove(&self.id);
                return Err(AppError::ProcessExited(
                    "session terminated before launch completed".into(),
                ));
            }
            *self.driver.lock().await = Some(Arc::new(driver));
            state.transition(SessionPhase::WaitingForAppStart);
        }

        self.client.event(
            &self.event_name("launching"),
            json!({ "message": self.deps.hooks.launching_message(kind, &arguments) }),
        );
        Ok(())
    }

    /// Handle the plain `restart` request: hot reload or hot restart per
    /// configuration. Failures are reported as output.
    pub async fn restart(&self) {
        let full_restart = self.deps.config.restart_behaviour == RestartBehaviour::HotRestart;
        let notice = if full_restart {
            "hotRestartRequest"
        } else {
            "hotReloadRequest"
        };
        self.client.event(&self.event_name(notice), json!({}));

        if self.app_id().await.is_none() {
            debug!("restart requested with no application; ignoring");
            return;
        }
        if let Err(err) = self.reload(full_restart, "restart").await {
            debug!(%err, "restart did not reload the application");
        }
    }

    /// Hot reload (`full_restart == false`) or hot restart the app.
    ///
    /// At most one reload runs at a time; a concurrent call is rejected
    /// locally and never reaches the runner. Every failure, including the
    /// rejection, is reported as error output before returning.
    ///
    /// # Errors
    ///
    /// - `AppError::ReloadInProgress` when another reload is in flight.
    /// - `AppError::ExtensionCall` if there is no application.
    /// - Any runner command error.
    pub async fn reload(&self, full_restart: bool, reason: &str) -> Result<()> {
        let context = if full_restart { "hot restart" } else { "hot reload" };

        let Some(_guard) = ReloadGuard::acquire(&self.reload_in_progress) else {
            let err = AppError::ReloadInProgress;
            self.report_error(context, &err);
            return Err(err);
        };

        let outcome = self.send_reload(full_restart, reason).await;

        match &outcome {
            Ok(()) => {
                info!(full_restart, reason, "reload completed");
                self.refresh
                    .schedule(if full_restart { "hot-restart" } else { "hot-reload" });
            }
            Err(err) => self.report_error(context, err),
        }
        outcome
    }

    async fn send_reload(&self, full_restart: bool, reason: &str) -> Result<()> {
        let app_id = {
            let mut state = self.state.lock().await;
            let app_id = state.app_id().ok_or_else(|| {
                AppError::ExtensionCall("no running application to reload".into())
            })?;
            if state.phase == SessionPhase::Running {
                state.transition(SessionPhase::Reloading);
            }
            app_id
        };

        let result = match self.current_driver().await {
            Some(driver) => {
                driver
                    .send_command_within(
                        self.deps.hooks.reload_command(),
                        json!({
                            "appId": app_id,
                            "fullRestart": full_restart,
                            "pause": false,
                            "reason": reason,
                        }),
                        self.deps.config.timeouts.reload(),
                    )
                    .await
            }
            None => Err(AppError::ProcessExited("runner is not running".into())),
        };

        {
            let mut state = self.state.lock().await;
            if state.phase == SessionPhase::Reloading {
                state.transition(SessionPhase::Running);
            }
        }

        let value = result?;
        let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code == 0 {
            Ok(())
        } else {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("reload rejected by runner");
            Err(AppError::Command(format!("{message} (code {code})")))
        }
    }

    /// Handle a custom request. Always returns normally; the caller
    /// acknowledges the request regardless of outcome.
    ///
    /// With no application these are no-ops. Failures are reported as error
    /// output.
    pub async fn custom_request(&self, command: &str, arguments: &Value) {
        if self.app_id().await.is_none() {
            debug!(command, "no application instance; ignoring custom request");
            return;
        }

        let reason = arguments
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("manual");

        let outcome = match command {
            "hotReload" | "hotRestart" => {
                if let Err(err) = self.reload(command == "hotRestart", reason).await {
                    debug!(%err, command, "reload already reported");
                }
                Ok(())
            }
            "serviceExtension" => self.call_service_extension(arguments).await,
            "checkPlatformOverride" => self.check_platform_override().await,
            "checkIsWidgetCreationTracked" => self.check_widget_creation_tracked().await,
            other => Err(AppError::Protocol(format!("unsupported request: {other}"))),
        };

        if let Err(err) = outcome {
            self.report_error(command, &err);
        }
    }

    async fn call_service_extension(&self, arguments: &Value) -> Result<()> {
        let extension = arguments
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ExtensionCall("serviceExtension requires a type".into()))?;
        let params = arguments.get("params").cloned().unwrap_or_else(|| json!({}));
        self.extension_bridge()
            .await
            .call(extension, params)
            .await
            .map(|_| ())
    }

    async fn check_platform_override(&self) -> Result<()> {
        let platform = self.extension_bridge().await.platform_override().await?;
        self.client.event(
            &self.event_name("updatePlatformOverride"),
            json!({ "platform": platform }),
        );
        Ok(())
    }

    async fn check_widget_creation_tracked(&self) -> Result<()> {
        let tracked = self
            .extension_bridge()
            .await
            .is_widget_creation_tracked()
            .await?;
        self.client.event(
            &self.event_name("updateIsWidgetCreationTracked"),
            json!({ "isWidgetCreationTracked": tracked }),
        );
        Ok(())
    }

    /// Stop or detach from the app, then tear everything down.
    ///
    /// The quit command races the configured grace period; its failure or
    /// a lost race never prevents teardown.
    pub async fn terminate(&self) {
        let (kind, app_id) = {
            let mut state = self.state.lock().await;
            if state.phase.is_shutting_down() {
                debug!(phase = ?state.phase, "terminate: already shutting down");
                drop(state);
                self.teardown().await;
                return;
            }
            state.transition(SessionPhase::Terminating);
            let app_id = if state.app_has_started {
                state.app_id()
            } else {
                None
            };
            (state.kind.unwrap_or(SessionKind::Launch), app_id)
        };

        if let (Some(app_id), Some(driver)) = (app_id, self.current_driver().await) {
            let method = self.deps.hooks.quit_command(kind);
            info!(method, %app_id, "asking runner to quit");
            let quit = driver.send_command(method, json!({ "appId": app_id }));
            tokio::select! {
                outcome = quit => {
                    if let Err(err) = outcome {
                        debug!(%err, "quit command failed; continuing shutdown");
                    }
                }
                () = tokio::time::sleep(self.deps.config.timeouts.quit_grace()) => {
                    debug!("quit grace period elapsed; continuing shutdown");
                }
            }
        }

        self.teardown().await;
    }

    async fn threads(&self) -> Result<Value> {
        let Some(runtime) = self.state.lock().await.runtime.service() else {
            return Ok(json!({ "threads": [] }));
        };
        let isolates = runtime.isolates().await?;
        let mut state = self.state.lock().await;
        let threads: Vec<Value> = isolates
            .iter()
            .map(|isolate| json!({ "id": state.threads.id_for(&isolate.id), "name": isolate.name }))
            .collect();
        Ok(json!({ "threads": threads }))
    }

    async fn stack_trace(&self, arguments: &Value) -> Result<Value> {
        let thread_id = arguments
            .get("threadId")
            .and_then(Value::as_i64)
            .ok_or_else(|| AppError::Protocol("stackTrace requires threadId".into()))?;

        let (runtime, isolate_id) = {
            let state = self.state.lock().await;
            (
                state.runtime.service(),
                state.threads.isolate_for(thread_id).map(ToOwned::to_owned),
            )
        };
        let (Some(runtime), Some(isolate_id)) = (runtime, isolate_id) else {
            return Ok(json!({ "stackFrames": [], "totalFrames": 0 }));
        };

        let stack = runtime.stack(&isolate_id).await?;
        let frames: Vec<Value> = stack
            .get("frames")
            .and_then(Value::as_array)
            .map(|frames| {
                frames
                    .iter()
                    .enumerate()
                    .map(|(index, frame)| stack_frame(index, frame))
                    .collect()
            })
            .unwrap_or_default();
        let total = frames.len();
        Ok(json!({ "stackFrames": frames, "totalFrames": total }))
    }

    // ── Runner events ───────────────────────────────────

    async fn handle_input(&self, input: SessionInput) {
        match input {
            SessionInput::Daemon(event) => self.handle_daemon_event(event).await,
            SessionInput::Runtime(event) => self.handle_runtime_event(event).await,
        }
    }

    /// Apply one runner event. Called by the pump in arrival order.
    pub async fn handle_daemon_event(&self, event: DaemonEvent) {
        match event {
            DaemonEvent::DaemonConnected { version, pid } => {
                info!(?version, ?pid, "runner daemon connected");
                if let Some(pid) = pid {
                    self.state.lock().await.auxiliary_pids.push(pid);
                }
            }
            DaemonEvent::LogMessage {
                level,
                message,
                stack_trace,
            } => {
                let category = if level == "error" {
                    OutputCategory::Stderr
                } else {
                    OutputCategory::Console
                };
                let mut text = format!("{message}\n");
                if let Some(trace) = stack_trace {
                    text.push_str(&trace);
                    if !trace.ends_with('\n') {
                        text.push('\n');
                    }
                }
                self.client.output(category, &text);
            }
            DaemonEvent::AppStart {
                app_id,
                device_id,
                directory,
                supports_restart,
            } => {
                info!(%app_id, ?device_id, "application instance created");
                self.state.lock().await.app = Some(AppInstance {
                    app_id,
                    device_id,
                    directory,
                    supports_restart,
                });
            }
            DaemonEvent::AppDebugPort { app_id, ws_uri, .. } => {
                info!(%app_id, %ws_uri, "runtime service endpoint announced");
                self.state.lock().await.service_uri = Some(ws_uri.clone());
                self.deps.registry.update_service_uri(&self.id, &ws_uri);
                self.try_connect_runtime().await;
            }
            DaemonEvent::AppStarted { app_id } => {
                info!(%app_id, "application started");
                self.state.lock().await.app_has_started = true;
                self.try_connect_runtime().await;
                {
                    let mut state = self.state.lock().await;
                    let awaiting_runtime = !state.no_debug_requested
                        && matches!(state.runtime, RuntimeLink::Disconnected);
                    if state.phase == SessionPhase::WaitingForAppStart && !awaiting_runtime {
                        state.transition(SessionPhase::Running);
                    }
                }
                self.client
                    .event(&self.event_name("launched"), json!({ "appId": app_id }));
            }
            DaemonEvent::AppStop { app_id, error } => {
                info!(%app_id, ?error, "application stopped");
                if let Some(error) = error {
                    self.client
                        .output(OutputCategory::Stderr, &format!("{error}\n"));
                }
                self.state.lock().await.app = None;
                if let Some(driver) = self.current_driver().await {
                    driver.dispose();
                }
            }
            DaemonEvent::AppProgress {
                progress_id,
                message,
                finished,
                ..
            } => {
                self.client.event(
                    &self.event_name("progress"),
                    json!({ "progressId": progress_id, "message": message, "finished": finished }),
                );
            }
            DaemonEvent::AppLog { log, error, .. } => {
                for line in log.lines() {
                    self.emit_program_output(line, error).await;
                }
            }
            DaemonEvent::Other { name, .. } => {
                debug!(%name, "ignoring runner event");
            }
            DaemonEvent::UnhandledOutput { line, stream } => {
                self.emit_program_output(&line, stream == OutputStream::Stderr)
                    .await;
            }
            DaemonEvent::Exited { code } => {
                info!(?code, "runner exited");
                let text = match code {
                    Some(code) => format!("Exited ({code}).\n"),
                    None => "Exited.\n".to_owned(),
                };
                self.client.output(OutputCategory::Console, &text);
                self.client
                    .event("exited", json!({ "exitCode": code.unwrap_or(0) }));
                self.teardown().await;
            }
        }
    }

    async fn emit_program_output(&self, line: &str, forced_error: bool) {
        let channel = self.state.lock().await.output.classify(line);
        let category = if forced_error || channel == OutputChannel::Error {
            OutputCategory::Stderr
        } else {
            OutputCategory::Stdout
        };
        self.client.output(category, &format!("{line}\n"));
    }

    /// Connect to the runtime service if the connection gate is open.
    ///
    /// The gate opens at most once per session; concurrent or repeated
    /// triggers after the first attempt are no-ops. The attempt is bounded
    /// by the command deadline and expiry fails the link like any other
    /// connection error.
    async fn try_connect_runtime(&self) {
        let uri = {
            let mut state = self.state.lock().await;
            if !state.connection_gate_open() {
                return;
            }
            let Some(uri) = state.service_uri.clone() else {
                return;
            };
            state.runtime = RuntimeLink::Connecting;
            state.transition(SessionPhase::Connecting);
            uri
        };

        info!(%uri, "connecting to runtime service");
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if inputs.send(SessionInput::Runtime(event)).is_err() {
                    break;
                }
            }
        });

        let deadline = self.deps.config.timeouts.command();
        let outcome = tokio::time::timeout(deadline, self.deps.connector.connect(&uri, events_tx))
            .await
            .unwrap_or_else(|_| {
                Err(AppError::RequestTimeout {
                    method: "connect".into(),
                    timeout: deadline,
                })
            });

        let mut state = self.state.lock().await;
        match outcome {
            Ok(service) => {
                if state.phase.is_shutting_down() {
                    drop(state);
                    service.close().await;
                    return;
                }
                info!("runtime service connected");
                state.runtime = RuntimeLink::Connected(Arc::clone(&service));
                state.transition(SessionPhase::Running);
                let poll = state.arguments.poll_memory_usage;
                drop(state);
                if poll {
                    self.start_memory_polling(service);
                }
            }
            Err(err) => {
                state.runtime = RuntimeLink::Failed;
                if state.phase == SessionPhase::Connecting {
                    state.transition(SessionPhase::Running);
                }
                drop(state);
                self.report_error("failed to connect to runtime service", &err);
            }
        }
    }

    fn start_memory_polling(&self, runtime: Arc<dyn RuntimeService>) {
        let client = self.client.clone();
        let event = self.event_name("memoryUsage");
        let interval = self.deps.config.timeouts.memory_poll();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match runtime.memory_usage().await {
                            Ok(usage) => client.event(&event, usage),
                            Err(err) => debug!(%err, "memory usage poll failed"),
                        }
                    }
                }
            }
        });
    }

    // ── Runtime events ──────────────────────────────────

    /// Apply one runtime service event.
    pub async fn handle_runtime_event(&self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::IsolateStarted { isolate_id, name } => {
                let thread_id = self.state.lock().await.threads.id_for(&isolate_id);
                debug!(%isolate_id, %name, thread_id, "isolate started");
                self.client
                    .event("thread", json!({ "reason": "started", "threadId": thread_id }));
            }
            RuntimeEvent::IsolateExited { isolate_id } => {
                let thread_id = self.state.lock().await.threads.id_for(&isolate_id);
                self.client
                    .event("thread", json!({ "reason": "exited", "threadId": thread_id }));
            }
            RuntimeEvent::PausedAtStart { isolate_id } => {
                let runtime = self.state.lock().await.runtime.service();
                if let Some(runtime) = runtime {
                    debug!(%isolate_id, "resuming isolate paused at start");
                    if let Err(err) = runtime.resume(&isolate_id).await {
                        warn!(%err, %isolate_id, "failed to resume isolate");
                    }
                }
            }
            RuntimeEvent::Inspect { isolate_id, .. } => {
                debug!(%isolate_id, "inspect event");
                self.handle_inspect().await;
            }
            RuntimeEvent::FirstFrame => {
                self.client.event(&self.event_name("firstFrame"), json!({}));
            }
            RuntimeEvent::Frame => self.refresh.schedule("frame"),
            RuntimeEvent::ServiceExtensionStateChanged(payload) => {
                self.client
                    .event(&self.event_name("serviceExtensionStateChanged"), payload);
            }
            RuntimeEvent::Extension { kind, .. } => {
                debug!(%kind, "ignoring extension event");
            }
            RuntimeEvent::Disconnected => {
                let mut state = self.state.lock().await;
                if matches!(state.runtime, RuntimeLink::Connected(_)) {
                    info!("runtime service disconnected");
                    state.runtime = RuntimeLink::Closed;
                }
            }
        }
    }

    /// Resolve the widget the user selected in the running app to a source
    /// location and ask the client to navigate there.
    async fn handle_inspect(&self) {
        let bridge = self.extension_bridge().await;
        let group = format!(
            "inspector-{}",
            self.inspector_groups.fetch_add(1, Ordering::SeqCst)
        );

        let roots = self.pub_root_directories().await;
        if let Err(err) = bridge.set_pub_root_directories(&roots).await {
            warn!(%err, "failed to set inspector root directories");
        }

        match bridge.selected_summary_widget(&group).await {
            Ok(summary) => {
                if let Some(location) = creation_location(&summary) {
                    self.client.event(
                        &self.event_name("navigate"),
                        json!({
                            "file": location.file,
                            "line": location.line,
                            "column": location.column,
                        }),
                    );
                } else {
                    debug!("inspected widget has no creation location");
                }
            }
            Err(err) => self.report_error("inspect", &err),
        }

        if let Err(err) = bridge.dispose_group(&group).await {
            debug!(%err, %group, "failed to dispose inspector group");
        }
    }

    async fn pub_root_directories(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .arguments
            .cwd
            .as_ref()
            .map(|cwd| cwd.to_string_lossy().into_owned())
            .or_else(|| state.app.as_ref().and_then(|app| app.directory.clone()))
            .into_iter()
            .collect()
    }

    // ── Teardown ────────────────────────────────────────

    /// Release every resource the session holds. Idempotent; the first
    /// call emits `terminated`.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let (runtime, pids) = {
            let mut state = self.state.lock().await;
            state.transition(SessionPhase::Terminated);
            state.app = None;
            let runtime = std::mem::replace(&mut state.runtime, RuntimeLink::Closed).service();
            (runtime, std::mem::take(&mut state.auxiliary_pids))
        };

        if let Some(runtime) = runtime {
            runtime.close().await;
        }
        if let Some(driver) = self.driver.lock().await.take() {
            driver.dispose();
        }
        kill_auxiliary_processes(&pids);

        self.deps.registry.remove(&self.id);
        self.refresh.stop();
        self.cancel.cancel();

        info!(session_id = %self.id, "session torn down");
        self.client.event("terminated", json!({}));
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn pump(
    session: Weak<DebugSession>,
    mut rx: mpsc::UnboundedReceiver<SessionInput>,
    cancel: CancellationToken,
) {
    loop {
        let input = tokio::select! {
            () = cancel.cancelled() => break,
            input = rx.recv() => match input {
                Some(input) => input,
                None => break,
            },
        };
        let Some(session) = session.upgrade() else {
            break;
        };
        session.handle_input(input).await;
    }
    debug!("session pump stopped");
}

fn capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": true,
        "supportsRestartRequest": true,
        "supportsTerminateRequest": true,
    })
}

fn traffic_observer(client: ClientChannel, event: String) -> TrafficObserver {
    Arc::new(move |direction, line| {
        let direction = match direction {
            TrafficDirection::Inbound => "in",
            TrafficDirection::Outbound => "out",
        };
        client.event(&event, json!({ "message": line, "direction": direction }));
    })
}

fn stack_frame(index: usize, frame: &Value) -> Value {
    let name = frame
        .pointer("/code/name")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>");
    let mut value = json!({ "id": index, "name": name, "line": 0, "column": 0 });
    if let Some(path) = frame
        .pointer("/location/script/uri")
        .and_then(Value::as_str)
    {
        value["source"] = json!({ "path": path.strip_prefix("file://").unwrap_or(path) });
    }
    value
}

fn kill_auxiliary_processes(pids: &[u32]) {
    for &pid in pids {
        kill_process(pid);
    }
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "auxiliary pid out of range");
        return;
    };
    match kill(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pid, "killed auxiliary process"),
        Err(err) => debug!(pid, %err, "auxiliary process already gone"),
    }
}

#[cfg(not(unix))]
fn kill_process(pid: u32) {
    debug!(pid, "auxiliary process termination not supported on this platform");
}

/// Environment for the runner: configuration values overridden by the
/// launch request's own.
#[must_use]
pub fn runner_environment(
    config: &BridgeConfig,
    arguments: &LaunchArguments,
) -> HashMap<String, String> {
    let mut env = config.env.clone();
    env.extend(arguments.env.clone());
    env
}
