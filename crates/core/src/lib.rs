//! kic core types: watched kinds, notifications, tombstones and identity recovery.

#![forbid(unsafe_code)]

pub mod crd;

use std::fmt;

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

pub use crd::{GlobalConfiguration, TransportServer, VirtualServer, VirtualServerRoute};

/// Closed set of kinds the controller watches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    ConfigMap,
    Endpoints,
    Ingress,
    Secret,
    Service,
    VirtualServer,
    VirtualServerRoute,
    GlobalConfiguration,
    TransportServer,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::ConfigMap,
        ResourceKind::Endpoints,
        ResourceKind::Ingress,
        ResourceKind::Secret,
        ResourceKind::Service,
        ResourceKind::VirtualServer,
        ResourceKind::VirtualServerRoute,
        ResourceKind::GlobalConfiguration,
        ResourceKind::TransportServer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Endpoints => "Endpoints",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::Secret => "Secret",
            ResourceKind::Service => "Service",
            ResourceKind::VirtualServer => "VirtualServer",
            ResourceKind::VirtualServerRoute => "VirtualServerRoute",
            ResourceKind::GlobalConfiguration => "GlobalConfiguration",
            ResourceKind::TransportServer => "TransportServer",
        }
    }

    /// Kinds served by the `k8s.nginx.org` custom resource definitions.
    pub fn is_custom(&self) -> bool {
        matches!(
            self,
            ResourceKind::VirtualServer
                | ResourceKind::VirtualServerRoute
                | ResourceKind::GlobalConfiguration
                | ResourceKind::TransportServer
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `namespace/name` identity of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.map(|s| s.to_string()), name: name.to_string() }
    }

    pub fn of<K: kube::Resource>(obj: &K) -> Self {
        Self { namespace: obj.namespace(), name: obj.name_any() }
    }

    /// Parse `namespace/name`; a bare `name` yields a key without namespace.
    pub fn parse(key: &str) -> Self {
        match key.split_once('/') {
            Some((ns, name)) => Self::new(Some(ns), name),
            None => Self::new(None, key),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// One observed object of any watched kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resource", content = "object")]
pub enum ResourceObject {
    ConfigMap(ConfigMap),
    Endpoints(Endpoints),
    Ingress(Ingress),
    Secret(Secret),
    Service(Service),
    VirtualServer(VirtualServer),
    VirtualServerRoute(VirtualServerRoute),
    GlobalConfiguration(GlobalConfiguration),
    TransportServer(TransportServer),
}

/// Object removed while nobody was watching: only the last cached state is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub key: ObjectKey,
    pub last_known: ResourceObject,
}

impl Tombstone {
    pub fn new(last_known: ResourceObject) -> Self {
        Self { key: last_known.key(), last_known }
    }
}

/// Notification payload: a live snapshot or a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Object(ResourceObject),
    Tombstone(Tombstone),
}

impl Payload {
    pub fn key(&self) -> ObjectKey {
        match self {
            Payload::Object(o) => o.key(),
            Payload::Tombstone(t) => t.key.clone(),
        }
    }
}

impl From<ResourceObject> for Payload {
    fn from(o: ResourceObject) -> Self {
        Payload::Object(o)
    }
}

impl From<Tombstone> for Payload {
    fn from(t: Tombstone) -> Self {
        Payload::Tombstone(t)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Object(o) => write!(f, "{} {}", o.kind(), o.key()),
            Payload::Tombstone(t) => write!(f, "tombstone {} ({})", t.key, t.last_known.kind()),
        }
    }
}

/// Add/update/delete event about one object, delivered by the informer layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Added(Payload),
    Updated(Payload, Payload),
    Removed(Payload),
}

impl Notification {
    pub fn event(&self) -> &'static str {
        match self {
            Notification::Added(_) => "add",
            Notification::Updated(..) => "update",
            Notification::Removed(_) => "delete",
        }
    }
}

/// Raw watch stream event, before the informer turns it into notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum WatchEvent {
    Applied(ResourceObject),
    Deleted(ResourceObject),
    Restarted(Vec<ResourceObject>),
}

/// Reference handed to the sync queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncTarget {
    pub kind: ResourceKind,
    pub key: ObjectKey,
}

impl SyncTarget {
    pub fn of<T: Watched>(obj: &T) -> Self {
        Self { kind: T::KIND, key: ObjectKey::of(obj) }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unrecoverable {
    #[error("received unexpected {found} object while expecting {expected}")]
    UnexpectedObject { expected: ResourceKind, found: ResourceKind },
    #[error("tombstone {key} contained non-{expected} object ({found})")]
    UnexpectedTombstone { expected: ResourceKind, found: ResourceKind, key: ObjectKey },
}

/// A typed object of one watched kind.
pub trait Watched: kube::Resource<DynamicType = ()> + Clone + PartialEq + Send + Sync + 'static {
    const KIND: ResourceKind;

    /// Unwrap the matching variant, handing the object back on a kind mismatch.
    fn from_object(obj: ResourceObject) -> Result<Self, ResourceObject>;

    fn into_object(self) -> ResourceObject;
}

macro_rules! watched_kinds {
    ($($kind:ident),* $(,)?) => {
        $(
            impl Watched for $kind {
                const KIND: ResourceKind = ResourceKind::$kind;

                fn from_object(obj: ResourceObject) -> Result<Self, ResourceObject> {
                    match obj {
                        ResourceObject::$kind(o) => Ok(o),
                        other => Err(other),
                    }
                }

                fn into_object(self) -> ResourceObject {
                    ResourceObject::$kind(self)
                }
            }

            impl From<$kind> for ResourceObject {
                fn from(o: $kind) -> Self {
                    ResourceObject::$kind(o)
                }
            }
        )*

        impl ResourceObject {
            pub fn kind(&self) -> ResourceKind {
                match self {
                    $(ResourceObject::$kind(_) => ResourceKind::$kind,)*
                }
            }

            pub fn key(&self) -> ObjectKey {
                match self {
                    $(ResourceObject::$kind(o) => ObjectKey::of(o),)*
                }
            }
        }
    };
}

watched_kinds!(
    ConfigMap,
    Endpoints,
    Ingress,
    Secret,
    Service,
    VirtualServer,
    VirtualServerRoute,
    GlobalConfiguration,
    TransportServer,
);

/// Recover a typed object from a live payload or from a tombstone's last known state.
pub fn recover<T: Watched>(payload: Payload) -> Result<T, Unrecoverable> {
    match payload {
        Payload::Object(obj) => T::from_object(obj)
            .map_err(|other| Unrecoverable::UnexpectedObject { expected: T::KIND, found: other.kind() }),
        Payload::Tombstone(Tombstone { key, last_known }) => T::from_object(last_known)
            .map_err(|other| Unrecoverable::UnexpectedTombstone { expected: T::KIND, found: other.kind(), key }),
    }
}

/// Untyped variant of [`recover`]: checks the payload against `kind`.
pub fn recover_as(kind: ResourceKind, payload: Payload) -> Result<ResourceObject, Unrecoverable> {
    match payload {
        Payload::Object(obj) if obj.kind() == kind => Ok(obj),
        Payload::Object(obj) => Err(Unrecoverable::UnexpectedObject { expected: kind, found: obj.kind() }),
        Payload::Tombstone(t) if t.last_known.kind() == kind => Ok(t.last_known),
        Payload::Tombstone(t) => {
            Err(Unrecoverable::UnexpectedTombstone { expected: kind, found: t.last_known.kind(), key: t.key })
        }
    }
}

pub mod prelude {
    pub use super::{
        recover, recover_as, Notification, ObjectKey, Payload, ResourceKind, ResourceObject, SyncTarget, Tombstone,
        Unrecoverable, WatchEvent, Watched,
    };
}
