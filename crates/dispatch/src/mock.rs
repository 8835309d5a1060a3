//! Recording in-memory collaborators for tests and offline runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kic_core::{ObjectKey, SyncTarget};

use crate::{IngressClassed, LookupError, Resolver, SecretError, SyncQueue};

/// A collaborator call observed by [`Recorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddSyncQueue(SyncTarget),
    FindMasterForMinion(ObjectKey),
    EnqueueIngressForService(ObjectKey),
    EnqueueVirtualServersForService(ObjectKey),
    EnqueueTransportServerForService(ObjectKey),
}

/// Records every queue and fan-out call; lookups are answered from fixed tables.
pub struct Recorder {
    /// Accepted ingress class; resources without a class are rejected.
    pub ingress_class: String,
    pub valid_secret: fn(&Secret) -> bool,
    /// Minion key -> master.
    pub masters: HashMap<ObjectKey, Ingress>,
    pub external_service: Option<ObjectKey>,
    calls: Mutex<Vec<Call>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self {
            ingress_class: "nginx".to_string(),
            valid_secret: |s| s.type_.as_deref() == Some("kubernetes.io/tls"),
            masters: HashMap::new(),
            external_service: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Recorder {
    fn lock(&self) -> MutexGuard<'_, Vec<Call>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: Call) {
        self.lock().push(call);
    }

    /// Snapshot of the calls recorded so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().clone()
    }

    /// Targets pushed onto the sync queue, in order.
    pub fn enqueued(&self) -> Vec<SyncTarget> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddSyncQueue(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl SyncQueue for Recorder {
    fn add(&self, target: SyncTarget) {
        self.record(Call::AddSyncQueue(target));
    }
}

impl Resolver for Recorder {
    fn has_correct_ingress_class(&self, obj: &dyn IngressClassed) -> bool {
        obj.ingress_class() == Some(self.ingress_class.as_str())
    }

    fn validate_secret(&self, secret: &Secret) -> Result<(), SecretError> {
        if (self.valid_secret)(secret) {
            Ok(())
        } else {
            Err(SecretError::UnsupportedType(secret.type_.clone()))
        }
    }

    fn find_master_for_minion(&self, minion: &Ingress) -> Result<Ingress, LookupError> {
        let key = ObjectKey::of(minion);
        self.record(Call::FindMasterForMinion(key.clone()));
        self.masters.get(&key).cloned().ok_or(LookupError::NoMaster(key))
    }

    fn is_external_service_for_status(&self, svc: &Service) -> bool {
        self.external_service.as_ref() == Some(&ObjectKey::of(svc))
    }

    fn enqueue_ingress_for_service(&self, svc: &Service) {
        self.record(Call::EnqueueIngressForService(ObjectKey::of(svc)));
    }

    fn enqueue_virtual_servers_for_service(&self, svc: &Service) {
        self.record(Call::EnqueueVirtualServersForService(ObjectKey::of(svc)));
    }

    fn enqueue_transport_server_for_service(&self, svc: &Service) {
        self.record(Call::EnqueueTransportServerForService(ObjectKey::of(svc)));
    }
}
