//! relaygate gateway: HTTP API, bearer auth, bootstrap and CLI.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
