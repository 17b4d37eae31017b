//! In-memory registry of messaging instances.
//!
//! Each entry owns one client handle, the latest [`Instance`] snapshot (held
//! in a `watch` channel so observers can follow it) and a lease lock.  Sends
//! hold a shared lease for their whole duration; delete takes the exclusive
//! lease before destroying the handle, so a send never runs against a
//! destroyed client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch, OwnedRwLockReadGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rg_client::{ClientFactory, MessagingClient, SessionSpec};
use rg_domain::config::DispatchConfig;
use rg_domain::trace::TraceEvent;
use rg_domain::{Instance, InstanceId, SessionEvent};

use crate::lifecycle::apply_event;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0}")]
    Validation(String),
    #[error("instance {0} not found")]
    NotFound(InstanceId),
    #[error("failed to allocate client: {0}")]
    Client(#[from] rg_domain::error::Error),
}

struct Entry {
    /// Creation order, used to list instances stably.
    seq: u64,
    snapshot: watch::Sender<Instance>,
    client: Arc<dyn MessagingClient>,
    lease: Arc<tokio::sync::RwLock<()>>,
    /// Set once the entry has left the map; late leases must not use it.
    retired: AtomicBool,
    /// Stops the event consumer.
    cancel: CancellationToken,
}

impl Entry {
    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

struct Inner {
    factory: Arc<dyn ClientFactory>,
    entries: RwLock<HashMap<InstanceId, Arc<Entry>>>,
    next_seq: AtomicU64,
    event_buffer: usize,
}

/// A shared lease on one instance's client.  While any lease is alive the
/// instance cannot be destroyed.
pub struct InstanceLease {
    entry: Arc<Entry>,
    _guard: OwnedRwLockReadGuard<()>,
}

impl InstanceLease {
    /// Current snapshot of the leased instance.
    pub fn instance(&self) -> Instance {
        self.entry.snapshot.borrow().clone()
    }

    pub fn client(&self) -> &dyn MessagingClient {
        self.entry.client.as_ref()
    }
}

/// Thread-safe registry of all live instances.  Cheap to clone.
#[derive(Clone)]
pub struct InstanceRegistry {
    inner: Arc<Inner>,
}

impl InstanceRegistry {
    pub fn new(factory: Arc<dyn ClientFactory>, cfg: &DispatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                entries: RwLock::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
                event_buffer: cfg.event_buffer.max(1),
            }),
        }
    }

    /// Register a new instance and start connecting it.
    ///
    /// Returns immediately in `initializing`; authentication progress arrives
    /// later through client events.  Must be called inside a tokio runtime.
    pub fn create(&self, name: &str) -> Result<Instance, RegistryError> {
        if name.is_empty() {
            return Err(RegistryError::Validation("name is required".into()));
        }

        let id = Uuid::new_v4();
        let client = self.inner.factory.create(&SessionSpec {
            session_id: id.to_string(),
        })?;
        let instance = Instance::new(id, name);

        let (events_tx, events_rx) = mpsc::channel(self.inner.event_buffer);
        client.subscribe(events_tx);

        let (snapshot, _) = watch::channel(instance.clone());
        let entry = Arc::new(Entry {
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            snapshot,
            client: client.clone(),
            lease: Arc::new(tokio::sync::RwLock::new(())),
            retired: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        let cancel = entry.cancel.clone();
        self.inner.entries.write().insert(id, entry);

        tokio::spawn(consume_events(
            Arc::downgrade(&self.inner),
            id,
            events_rx,
            cancel,
        ));
        client.initialize();

        tracing::info!(instance_id = %id, name = %name, backend = client.backend(), "instance created");
        TraceEvent::InstanceCreated {
            instance_id: id.to_string(),
            name: name.to_owned(),
        }
        .emit();
        Ok(instance)
    }

    pub fn get(&self, id: InstanceId) -> Result<Instance, RegistryError> {
        self.inner
            .entries
            .read()
            .get(&id)
            .map(|e| e.snapshot.borrow().clone())
            .ok_or(RegistryError::NotFound(id))
    }

    /// All instances, oldest first.
    pub fn list(&self) -> Vec<Instance> {
        let mut entries: Vec<(u64, Instance)> = self
            .inner
            .entries
            .read()
            .values()
            .map(|e| (e.seq, e.snapshot.borrow().clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, inst)| inst).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Follow changes to one instance.  The stream closes once the instance
    /// is deleted.
    pub fn watch(&self, id: InstanceId) -> Result<watch::Receiver<Instance>, RegistryError> {
        self.inner
            .entries
            .read()
            .get(&id)
            .map(|e| e.snapshot.subscribe())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Take a shared lease on an instance's client.
    ///
    /// Fails with `NotFound` if the instance is unknown or was deleted while
    /// the lease was being acquired.
    pub async fn lease(&self, id: InstanceId) -> Result<InstanceLease, RegistryError> {
        let entry = self
            .inner
            .entries
            .read()
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))?;
        let guard = entry.lease.clone().read_owned().await;
        if entry.is_retired() {
            return Err(RegistryError::NotFound(id));
        }
        Ok(InstanceLease {
            entry,
            _guard: guard,
        })
    }

    /// Remove an instance and destroy its client.  Returns `false` if the id
    /// is unknown (including when a concurrent delete got there first).
    ///
    /// Waits for in-flight sends on the instance before destroying.
    pub async fn delete(&self, id: InstanceId) -> bool {
        let Some(entry) = self.inner.entries.write().remove(&id) else {
            return false;
        };
        entry.retire();
        release(id, &entry).await;

        tracing::info!(instance_id = %id, "instance deleted");
        TraceEvent::InstanceDeleted {
            instance_id: id.to_string(),
        }
        .emit();
        true
    }

    /// Destroy every instance.  Called once on gateway exit.
    pub async fn shutdown(&self) {
        let drained: Vec<(InstanceId, Arc<Entry>)> = self.inner.entries.write().drain().collect();
        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), "destroying instances");
        for (id, entry) in drained {
            entry.retire();
            release(id, &entry).await;
        }
    }
}

/// Wait for outstanding leases, then destroy the client.
async fn release(id: InstanceId, entry: &Entry) {
    let _exclusive = entry.lease.write().await;
    if let Err(e) = entry.client.destroy().await {
        tracing::warn!(instance_id = %id, error = %e, "client destroy failed");
    }
}

/// Apply client events to one instance until it is removed or its client
/// drops the sink.
async fn consume_events(
    registry: Weak<Inner>,
    id: InstanceId,
    mut events: mpsc::Receiver<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(inner) = registry.upgrade() else {
            break;
        };
        let entry = inner.entries.read().get(&id).cloned();
        let Some(entry) = entry.filter(|e| !e.is_retired()) else {
            tracing::debug!(instance_id = %id, event = event.kind(), "dropping event for removed instance");
            break;
        };

        let mut transition = None;
        let mut auth = false;
        entry.snapshot.send_modify(|inst| {
            transition = Some(apply_event(inst, &event, Utc::now()));
            auth = inst.auth;
        });
        let Some(transition) = transition else {
            continue;
        };

        tracing::info!(
            instance_id = %id,
            event = event.kind(),
            from = %transition.from,
            to = %transition.to,
            auth,
            "instance state changed"
        );
        TraceEvent::SessionTransition {
            instance_id: id.to_string(),
            session_event: event.kind().into(),
            from: transition.from.to_string(),
            to: transition.to.to_string(),
            auth,
        }
        .emit();
    }
    tracing::debug!(instance_id = %id, "event consumer stopped");
}
