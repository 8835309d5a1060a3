//! kic dispatch: decides whether and what to enqueue for each watch notification.
//!
//! Every notification goes through identity recovery, per-kind admission, the
//! per-kind equality predicate (updates only) and finally either a direct
//! enqueue or a fan-out to the resources that depend on the changed object.
//! Collaborators (sync queue, class matching, secret validation, lookups) are
//! injected through the [`SyncQueue`] and [`Resolver`] traits.

#![forbid(unsafe_code)]

pub mod admission;
pub mod equality;
pub mod fanout;
pub mod ingress;
pub mod mock;
pub mod router;

use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kic_core::{ObjectKey, SyncTarget};
use serde::{Deserialize, Serialize};

pub use admission::Admit;
pub use equality::Equal;
pub use fanout::{FanOut, Route};
pub use mock::{Call, Recorder};
pub use router::{Dispatcher, Outcome};

/// Read-only controller configuration, fixed at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Ingress class this controller instance owns.
    pub ingress_class: String,
    /// Reject resources that carry no class at all.
    pub use_ingress_class_only: bool,
    /// Name of the single ConfigMap holding the global configuration.
    pub config_map: Option<String>,
    /// Whether VirtualServer/TransportServer resources take part in fan-out.
    pub custom_resources_enabled: bool,
    /// Service whose addresses are reported in resource status.
    pub external_service: Option<ObjectKey>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ingress_class: "nginx".to_string(),
            use_ingress_class_only: false,
            config_map: None,
            custom_resources_enabled: false,
            external_service: None,
        }
    }
}

/// Operation carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Update,
    Remove,
}

/// Thread-safe, non-blocking sink for sync targets.
pub trait SyncQueue: Send + Sync {
    fn add(&self, target: SyncTarget);
}

/// Resources that can be scoped to an ingress class.
pub trait IngressClassed {
    /// Class from the legacy `kubernetes.io/ingress.class` annotation.
    fn class_annotation(&self) -> Option<&str> {
        None
    }

    /// Class from the resource's `ingressClassName` field.
    fn class_name(&self) -> Option<&str>;

    /// Effective class: the annotation wins over the field. Empty values count as unset.
    fn ingress_class(&self) -> Option<&str> {
        self.class_annotation()
            .filter(|c| !c.is_empty())
            .or_else(|| self.class_name().filter(|c| !c.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("secret type {0:?} is not supported")]
    UnsupportedType(Option<String>),
    #[error("secret of type {secret_type} is missing data key {key}")]
    MissingKey { secret_type: String, key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("minion {0} has no host")]
    NoHost(ObjectKey),
    #[error("could not find a master for minion {0}")]
    NoMaster(ObjectKey),
}

/// Lookups and fan-out collaborators of the controller.
pub trait Resolver: Send + Sync {
    fn has_correct_ingress_class(&self, obj: &dyn IngressClassed) -> bool;

    fn validate_secret(&self, secret: &Secret) -> Result<(), SecretError>;

    fn find_master_for_minion(&self, minion: &Ingress) -> Result<Ingress, LookupError>;

    fn is_external_service_for_status(&self, svc: &Service) -> bool;

    fn enqueue_ingress_for_service(&self, svc: &Service);

    fn enqueue_virtual_servers_for_service(&self, svc: &Service);

    fn enqueue_transport_server_for_service(&self, svc: &Service);
}

/// Borrowed view handed to the per-kind capabilities.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub config: &'a DispatchConfig,
    pub resolver: &'a dyn Resolver,
}
