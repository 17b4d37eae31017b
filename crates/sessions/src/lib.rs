//! Instance lifecycle and message dispatch for relaygate.
//!
//! The [`InstanceRegistry`] owns every messaging session and drives its
//! state from client events; the [`DispatchGate`] authorizes and performs
//! sends on top of it and records each attempt in a [`MessageLog`].

pub mod dispatch;
pub mod lifecycle;
pub mod message_log;
pub mod registry;

pub use dispatch::{DispatchError, DispatchGate};
pub use lifecycle::{apply_event, may_send, Transition};
pub use message_log::{LogError, MemoryMessageLog, MessageLog, SqliteMessageLog};
pub use registry::{InstanceRegistry, RegistryError};
