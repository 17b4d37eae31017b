//! Send authorization and orchestration.
//!
//! Every attempt that passes the send gate appends exactly one record to the
//! message log before the caller sees the outcome.  Attempts rejected by the
//! gate write nothing.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use rg_domain::config::SendGate;
use rg_domain::trace::TraceEvent;
use rg_domain::{DeliveryResult, Instance, InstanceId, NewMessageRecord};

use crate::lifecycle::may_send;
use crate::message_log::MessageLog;
use crate::registry::InstanceRegistry;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("instance {0} not found")]
    InstanceNotFound(InstanceId),
    #[error("instance {0} is not authenticated, scan the QR code before sending messages")]
    NotAuthenticated(InstanceId),
    #[error("number {0} is not registered on the network")]
    UnknownRecipient(String),
    #[error("failed to send message: {0}")]
    Delivery(String),
}

impl DispatchError {
    fn outcome(&self) -> &'static str {
        match self {
            Self::InstanceNotFound(_) => "instance_not_found",
            Self::NotAuthenticated(_) => "not_authenticated",
            Self::UnknownRecipient(_) => "unknown_recipient",
            Self::Delivery(_) => "delivery_error",
        }
    }
}

/// Sends messages through registered instances.
#[derive(Clone)]
pub struct DispatchGate {
    registry: InstanceRegistry,
    log: Arc<dyn MessageLog>,
    gate: SendGate,
}

impl DispatchGate {
    pub fn new(registry: InstanceRegistry, log: Arc<dyn MessageLog>, gate: SendGate) -> Self {
        Self { registry, log, gate }
    }

    pub fn send_gate(&self) -> SendGate {
        self.gate
    }

    pub async fn send_message(
        &self,
        instance_id: InstanceId,
        phone: &str,
        body: &str,
    ) -> Result<DeliveryResult, DispatchError> {
        let started = Instant::now();
        let result = self.dispatch(instance_id, phone, body).await;

        let outcome = match &result {
            Ok(_) => "sent",
            Err(e) => e.outcome(),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(instance_id = %instance_id, outcome, duration_ms, "message dispatched"),
            Err(e) => tracing::warn!(instance_id = %instance_id, outcome, duration_ms, error = %e, "message not dispatched"),
        }
        TraceEvent::MessageDispatched {
            instance_id: instance_id.to_string(),
            outcome: outcome.into(),
            duration_ms,
        }
        .emit();
        result
    }

    async fn dispatch(
        &self,
        instance_id: InstanceId,
        phone: &str,
        body: &str,
    ) -> Result<DeliveryResult, DispatchError> {
        // Held until the attempt is recorded; a concurrent delete waits for it.
        let lease = self
            .registry
            .lease(instance_id)
            .await
            .map_err(|_| DispatchError::InstanceNotFound(instance_id))?;
        let instance = lease.instance();
        if !may_send(&instance, self.gate) {
            return Err(DispatchError::NotAuthenticated(instance_id));
        }

        let client = lease.client();
        let sent = match client.resolve_address(phone).await {
            Ok(Some(address)) => client
                .send(&address, body)
                .await
                .map_err(|e| DispatchError::Delivery(e.to_string())),
            Ok(None) => Err(DispatchError::UnknownRecipient(phone.to_owned())),
            Err(e) => Err(DispatchError::Delivery(e.to_string())),
        };

        self.record(&instance, phone, body, sent.is_ok()).await;
        drop(lease);

        let receipt = sent?;
        Ok(DeliveryResult {
            instance_id,
            name: instance.name,
            phone: phone.to_owned(),
            message: body.to_owned(),
            success: true,
            date: Utc::now(),
            message_id: receipt.message_id,
        })
    }

    /// Append the attempt to the log.  A failed append is logged and does not
    /// change the send outcome.
    async fn record(&self, instance: &Instance, phone: &str, body: &str, success: bool) {
        let record = NewMessageRecord {
            instance_id: instance.id,
            name: instance.name.clone(),
            phone: phone.to_owned(),
            message: body.to_owned(),
            success,
        };
        if let Err(e) = self.log.append(record).await {
            tracing::warn!(instance_id = %instance.id, error = %e, "failed to record message attempt");
        }
    }
}
