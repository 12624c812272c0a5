//! Runtime introspection service capability.
//!
//! The running application exposes an introspection service (threads,
//! stacks, memory, named `ext.*` extensions) once the runner announces its
//! endpoint. The session consumes it through the [`RuntimeService`] and
//! [`RuntimeConnector`] traits so the transport can be swapped out:
//! [`vm_service`] provides the WebSocket JSON-RPC implementation used in
//! production.

pub mod endpoint;
pub mod extensions;
pub mod vm_service;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::Result;

/// Boxed future returned by runtime capability methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Asynchronous events pushed by the runtime service.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// An isolate (thread) became runnable.
    IsolateStarted {
        /// Isolate identifier.
        isolate_id: String,
        /// Display name.
        name: String,
    },
    /// An isolate exited.
    IsolateExited {
        /// Isolate identifier.
        isolate_id: String,
    },
    /// An isolate is paused before running any code.
    PausedAtStart {
        /// Isolate identifier.
        isolate_id: String,
    },
    /// The user selected an object of interest in the running app.
    Inspect {
        /// Isolate the object lives in.
        isolate_id: String,
        /// Raw reference to the inspected object.
        inspectee: Value,
    },
    /// The app rendered its first frame.
    FirstFrame,
    /// The app rendered a frame.
    Frame,
    /// A service extension's state changed; payload forwarded verbatim.
    ServiceExtensionStateChanged(Value),
    /// Any other extension event.
    Extension {
        /// Extension event kind, e.g. `Flutter.Navigation`.
        kind: String,
        /// Raw extension data.
        data: Value,
    },
    /// The service connection closed.
    Disconnected,
}

/// One isolate as reported by the runtime service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolateInfo {
    /// Isolate identifier.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Connected runtime introspection service.
pub trait RuntimeService: Send + Sync {
    /// Invoke a named extension (`ext.<namespace>.*`) on the main isolate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` on transport failure or a service error.
    fn call_extension(&self, method: &str, params: Value) -> BoxFuture<'_, Result<Value>>;

    /// List live isolates.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` on transport failure or a service error.
    fn isolates(&self) -> BoxFuture<'_, Result<Vec<IsolateInfo>>>;

    /// Raw stack of `isolate_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` on transport failure or a service error.
    fn stack(&self, isolate_id: &str) -> BoxFuture<'_, Result<Value>>;

    /// Resume a paused isolate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` on transport failure or a service error.
    fn resume(&self, isolate_id: &str) -> BoxFuture<'_, Result<()>>;

    /// Memory usage of the main isolate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` on transport failure or a service error.
    fn memory_usage(&self) -> BoxFuture<'_, Result<Value>>;

    /// Close the connection. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Factory for [`RuntimeService`] connections.
pub trait RuntimeConnector: Send + Sync {
    /// Connect to the service at `uri`, pushing its events into `events`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Runtime` if the connection cannot be established.
    fn connect(
        &self,
        uri: &str,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> BoxFuture<'_, Result<Arc<dyn RuntimeService>>>;
}
