//! Runner process integration.
//!
//! The runner (`flutter run --machine` / `flutter attach --machine`) speaks a
//! line-oriented, self-describing protocol over stdio and interleaves it with
//! free-form diagnostic text. This module spawns it, decodes its output into
//! typed events, and correlates outbound commands with their responses.
//!
//! - `codec`: line framing with a maximum line length.
//! - `protocol`: line decoding and command encoding.
//! - `events`: typed [`DaemonEvent`](events::DaemonEvent)s and subscription kinds.
//! - `bus`: publish/subscribe registry.
//! - `spawner`: the [`ProcessSpawner`](spawner::ProcessSpawner) capability.
//! - `driver`: the [`ProcessDriver`](driver::ProcessDriver).

pub mod bus;
pub mod codec;
pub mod driver;
pub mod events;
pub mod protocol;
pub mod spawner;
