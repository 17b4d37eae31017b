//! `rg-client`: messaging client backends for relaygate.
//!
//! Provides the [`MessagingClient`] / [`ClientFactory`] traits the instance
//! registry programs against, plus two backends:
//!
//! | `client.kind` | Implementation    | Best for                          |
//! |---------------|-------------------|-----------------------------------|
//! | `bridge`      | [`BridgeFactory`]   | Production, via automation sidecar |
//! | `loopback`    | [`LoopbackFactory`] | Local development and tests       |

pub mod bridge;
pub mod loopback;
mod sse;
pub mod traits;

pub use bridge::{BridgeClient, BridgeFactory};
pub use loopback::{LoopbackClient, LoopbackFactory, SentMessage};
pub use traits::{Address, ClientFactory, DeliveryReceipt, EventSink, MessagingClient, SessionSpec};

use std::sync::Arc;

use rg_domain::config::{ClientConfig, ClientKind};
use rg_domain::error::Result;

/// Build the client factory selected by `client.kind`.
pub fn create_factory(cfg: &ClientConfig) -> Result<Arc<dyn ClientFactory>> {
    match cfg.kind {
        ClientKind::Bridge => {
            let factory = BridgeFactory::new(cfg)?;
            tracing::info!(base_url = %factory.base_url(), "using bridge messaging client");
            Ok(Arc::new(factory))
        }
        ClientKind::Loopback => {
            tracing::warn!("using loopback messaging client, messages are not delivered");
            Ok(Arc::new(LoopbackFactory::auto()))
        }
    }
}
