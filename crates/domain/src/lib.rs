//! Shared types for the relaygate crates: configuration, the instance and
//! message models, the common error type and structured trace events.

pub mod config;
pub mod error;
pub mod instance;
pub mod message;
pub mod trace;

pub use instance::{Instance, InstanceId, InstanceState, SessionEvent};
pub use message::{DeliveryResult, HistoryQuery, MessageRecord, NewMessageRecord};
