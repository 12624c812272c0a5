//! Service extension bridge.
//!
//! Typed calls to `ext.flutter.*` extensions scoped to one application
//! instance. Calls go through the runtime service when it is connected and
//! fall back to the runner's `app.callServiceExtension` command otherwise
//! (no-debug runs have an app but no runtime connection). The bridge is
//! stateless: build one from the session's current handles per operation.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::daemon::driver::ProcessDriver;
use crate::runtime::RuntimeService;
use crate::{AppError, Result};

/// `ext.flutter.platformOverride`
pub const PLATFORM_OVERRIDE: &str = "ext.flutter.platformOverride";
/// `ext.flutter.inspector.isWidgetCreationTracked`
pub const IS_WIDGET_CREATION_TRACKED: &str = "ext.flutter.inspector.isWidgetCreationTracked";
/// `ext.flutter.inspector.setPubRootDirectories`
pub const SET_PUB_ROOT_DIRECTORIES: &str = "ext.flutter.inspector.setPubRootDirectories";
/// `ext.flutter.inspector.getSelectedSummaryWidget`
pub const GET_SELECTED_SUMMARY_WIDGET: &str = "ext.flutter.inspector.getSelectedSummaryWidget";
/// `ext.flutter.inspector.disposeGroup`
pub const DISPOSE_GROUP: &str = "ext.flutter.inspector.disposeGroup";

/// Extension calls bound to one application instance.
#[derive(Clone)]
pub struct ServiceExtensionBridge {
    app_id: Option<String>,
    runtime: Option<Arc<dyn RuntimeService>>,
    driver: Option<Arc<ProcessDriver>>,
}

impl std::fmt::Debug for ServiceExtensionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceExtensionBridge")
            .field("app_id", &self.app_id)
            .field("runtime", &self.runtime.is_some())
            .field("driver", &self.driver.is_some())
            .finish()
    }
}

impl ServiceExtensionBridge {
    /// Bind the bridge to the session's current handles.
    #[must_use]
    pub fn new(
        app_id: Option<String>,
        runtime: Option<Arc<dyn RuntimeService>>,
        driver: Option<Arc<ProcessDriver>>,
    ) -> Self {
        Self {
            app_id,
            runtime,
            driver,
        }
    }

    /// Invoke `extension` with `params` and return the raw result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ExtensionCall` if there is no application
    /// instance, no route to it, or the service reports an error.
    pub async fn call(&self, extension: &str, params: Value) -> Result<Value> {
        let Some(app_id) = self.app_id.as_deref() else {
            return Err(AppError::ExtensionCall(format!(
                "{extension}: no running application"
            )));
        };

        let outcome = if let Some(runtime) = &self.runtime {
            debug!(app_id, extension, "calling extension via runtime service");
            runtime.call_extension(extension, params).await
        } else if let Some(driver) = &self.driver {
            debug!(app_id, extension, "calling extension via runner");
            driver
                .send_command(
                    "app.callServiceExtension",
                    json!({ "appId": app_id, "methodName": extension, "params": params }),
                )
                .await
        } else {
            return Err(AppError::ExtensionCall(format!(
                "{extension}: no connection to application {app_id}"
            )));
        };

        outcome.map_err(|err| match err {
            AppError::ExtensionCall(msg) => AppError::ExtensionCall(msg),
            other => AppError::ExtensionCall(format!("{extension}: {other}")),
        })
    }

    /// Current platform override, e.g. `"android"`.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn platform_override(&self) -> Result<Option<String>> {
        let result = self.call(PLATFORM_OVERRIDE, json!({})).await?;
        Ok(result
            .get("value")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned))
    }

    /// Whether the app was built with widget-creation tracking.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn is_widget_creation_tracked(&self) -> Result<bool> {
        let result = self.call(IS_WIDGET_CREATION_TRACKED, json!({})).await?;
        Ok(result.get("result").and_then(Value::as_bool).unwrap_or(false))
    }

    /// Tell the inspector which directories hold user code.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn set_pub_root_directories(&self, directories: &[String]) -> Result<()> {
        let mut params = serde_json::Map::new();
        for (index, dir) in directories.iter().enumerate() {
            params.insert(format!("arg{index}"), Value::String(dir.clone()));
        }
        self.call(SET_PUB_ROOT_DIRECTORIES, Value::Object(params))
            .await
            .map(|_| ())
    }

    /// Summary of the currently selected widget, allocated in `group`.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn selected_summary_widget(&self, group: &str) -> Result<Value> {
        self.call(
            GET_SELECTED_SUMMARY_WIDGET,
            json!({ "previousSelectionId": null, "objectGroup": group }),
        )
        .await
    }

    /// Release every object allocated in `group`.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn dispose_group(&self, group: &str) -> Result<()> {
        self.call(DISPOSE_GROUP, json!({ "objectGroup": group }))
            .await
            .map(|_| ())
    }
}

/// Source location carried by an inspector summary, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// File path or URI.
    pub file: String,
    /// 1-based line.
    pub line: u64,
    /// 1-based column.
    pub column: u64,
}

/// Extract `creationLocation` from an inspector summary result.
///
/// Results may be wrapped as `{ "result": {...} }`; both shapes are accepted.
#[must_use]
pub fn creation_location(summary: &Value) -> Option<SourceLocation> {
    let node = summary.get("result").unwrap_or(summary);
    let location = node.get("creationLocation")?;
    Some(SourceLocation {
        file: location.get("file").and_then(Value::as_str)?.to_owned(),
        line: location.get("line").and_then(Value::as_u64)?,
        column: location.get("column").and_then(Value::as_u64)?,
    })
}
