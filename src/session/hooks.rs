//! Runner-specific lifecycle hooks.
//!
//! The session orchestrator is runner-agnostic: everything that depends on
//! the runner's command-line grammar and command names lives behind
//! [`LifecycleHooks`]. [`FlutterHooks`] implements the `flutter` tool's
//! `run --machine` / `attach --machine` surface.

use crate::config::{LaunchArguments, RunMode};
use crate::runtime::endpoint::port_of;
use crate::session::state::SessionKind;
use crate::{AppError, Result};

/// Runner-specific behaviour plugged into the session orchestrator.
pub trait LifecycleHooks: Send + Sync {
    /// Full argument list for the runner process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if required launch arguments are missing
    /// or malformed.
    fn spawn_arguments(
        &self,
        kind: SessionKind,
        arguments: &LaunchArguments,
        force_verbose: bool,
    ) -> Result<Vec<String>>;

    /// Command sent to stop (launch) or detach from (attach) the app.
    fn quit_command(&self, kind: SessionKind) -> &'static str;

    /// Command that performs hot reload and hot restart.
    fn reload_command(&self) -> &'static str {
        "app.restart"
    }

    /// Human-readable progress message shown while the runner starts.
    fn launching_message(&self, kind: SessionKind, arguments: &LaunchArguments) -> String;
}

/// Hooks for the `flutter` tool's machine mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlutterHooks;

impl LifecycleHooks for FlutterHooks {
    fn spawn_arguments(
        &self,
        kind: SessionKind,
        arguments: &LaunchArguments,
        force_verbose: bool,
    ) -> Result<Vec<String>> {
        let mut out: Vec<String> = Vec::new();

        match kind {
            SessionKind::Launch => {
                out.push("run".into());
                out.push("--machine".into());

                let program = arguments
                    .program
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| AppError::Config("launch requires a program".into()))?;
                out.push("-t".into());
                out.push(program.to_owned());

                if let Some(device) = &arguments.device_id {
                    out.push("-d".into());
                    out.push(device.clone());
                }

                match arguments.mode {
                    RunMode::Debug if arguments.starts_paused() => {
                        out.push("--start-paused".into());
                    }
                    RunMode::Debug => {}
                    RunMode::Profile => out.push("--profile".into()),
                    RunMode::Release => out.push("--release".into()),
                }

                if arguments.track_widget_creation {
                    out.push("--track-widget-creation".into());
                }
            }
            SessionKind::Attach => {
                out.push("attach".into());
                out.push("--machine".into());

                if let Some(device) = &arguments.device_id {
                    out.push("-d".into());
                    out.push(device.clone());
                }

                if let Some(uri) = &arguments.service_uri {
                    let port = port_of(uri).ok_or_else(|| {
                        AppError::Config(format!("cannot determine port from service uri {uri}"))
                    })?;
                    out.push("--debug-port".into());
                    out.push(port.to_string());
                }
            }
        }

        out.extend(arguments.args.iter().cloned());

        if force_verbose || arguments.force_verbose {
            out.push("-v".into());
        }

        Ok(out)
    }

    fn quit_command(&self, kind: SessionKind) -> &'static str {
        match kind {
            SessionKind::Launch => "app.stop",
            SessionKind::Attach => "app.detach",
        }
    }

    fn launching_message(&self, kind: SessionKind, arguments: &LaunchArguments) -> String {
        let target = arguments.device_id.as_deref().unwrap_or("default device");
        match kind {
            SessionKind::Launch => format!(
                "Launching {} on {target}",
                arguments.program.as_deref().unwrap_or("app")
            ),
            SessionKind::Attach => format!("Attaching to app on {target}"),
        }
    }
}
