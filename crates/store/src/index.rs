//! Cluster index: the controller's lookup and fan-out collaborators, answered
//! from the informer cache.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kic_core::crd::Upstream;
use kic_core::{ObjectKey, SyncTarget, TransportServer, VirtualServer, VirtualServerRoute};
use kic_dispatch::ingress::{backend_services, host, is_master, is_minion};
use kic_dispatch::{DispatchConfig, IngressClassed, LookupError, Resolver, SecretError, SyncQueue};
use kube::ResourceExt;
use smallvec::SmallVec;
use tracing::debug;

use crate::Informer;

pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
pub const SECRET_TYPE_CA: &str = "nginx.org/ca";
pub const SECRET_TYPE_JWK: &str = "nginx.org/jwk";

const TLS_KEYS: &[&str] = &["tls.crt", "tls.key"];
const CA_KEYS: &[&str] = &["ca.crt"];
const JWK_KEYS: &[&str] = &["jwk"];

type Targets = SmallVec<[SyncTarget; 4]>;

fn references_service(upstreams: &[Upstream], service: &str) -> bool {
    upstreams.iter().any(|u| u.service == service)
}

fn push_unique(targets: &mut Targets, t: SyncTarget) {
    if !targets.contains(&t) {
        targets.push(t);
    }
}

/// Resolver backed by the informer's snapshots, enqueueing onto `queue`.
pub struct ClusterIndex {
    config: DispatchConfig,
    informer: Arc<Informer>,
    queue: Arc<dyn SyncQueue>,
}

impl ClusterIndex {
    pub fn new(config: DispatchConfig, informer: Arc<Informer>, queue: Arc<dyn SyncQueue>) -> Self {
        Self { config, informer, queue }
    }

    fn flush(&self, targets: Targets) {
        for t in targets {
            debug!(target = %t, "fan-out enqueue");
            self.queue.add(t);
        }
    }

    /// Referencing ingresses, with minions replaced by their masters.
    pub fn ingress_targets(&self, svc: &Service) -> Targets {
        let ns = svc.namespace();
        let name = svc.name_any();
        let mut out = Targets::new();
        for ing in self.informer.list::<Ingress>() {
            if ing.namespace() != ns || !self.has_correct_ingress_class(&ing) {
                continue;
            }
            if !backend_services(&ing).any(|s| s == name) {
                continue;
            }
            if !is_minion(&ing) {
                push_unique(&mut out, SyncTarget::of(&ing));
                continue;
            }
            match self.find_master_for_minion(&ing) {
                Ok(master) => push_unique(&mut out, SyncTarget::of(&master)),
                Err(e) => debug!(minion = %ObjectKey::of(&ing), error = %e, "skipping minion without master"),
            }
        }
        out
    }

    /// VirtualServers referencing the service directly or through one of their routes.
    pub fn virtual_server_targets(&self, svc: &Service) -> Targets {
        let ns = svc.namespace();
        let name = svc.name_any();
        let routes: Vec<ObjectKey> = self
            .informer
            .list::<VirtualServerRoute>()
            .into_iter()
            .filter(|vsr| vsr.namespace() == ns && self.has_correct_ingress_class(vsr))
            .filter(|vsr| references_service(&vsr.spec.upstreams, &name))
            .map(|vsr| ObjectKey::of(&vsr))
            .collect();

        let mut out = Targets::new();
        for vs in self.informer.list::<VirtualServer>() {
            if !self.has_correct_ingress_class(&vs) {
                continue;
            }
            let direct = vs.namespace() == ns && references_service(&vs.spec.upstreams, &name);
            let via_route = vs.spec.routes.iter().filter_map(|r| r.route.as_deref()).any(|r| {
                let mut key = ObjectKey::parse(r);
                if key.namespace.is_none() {
                    key.namespace = vs.namespace();
                }
                routes.contains(&key)
            });
            if direct || via_route {
                push_unique(&mut out, SyncTarget::of(&vs));
            }
        }
        out
    }

    pub fn transport_server_targets(&self, svc: &Service) -> Targets {
        let ns = svc.namespace();
        let name = svc.name_any();
        self.informer
            .list::<TransportServer>()
            .iter()
            .filter(|ts| ts.namespace() == ns && references_service(&ts.spec.upstreams, &name))
            .map(SyncTarget::of)
            .collect()
    }
}

fn required_keys(secret_type: &str) -> Option<&'static [&'static str]> {
    match secret_type {
        SECRET_TYPE_TLS => Some(TLS_KEYS),
        SECRET_TYPE_CA => Some(CA_KEYS),
        SECRET_TYPE_JWK => Some(JWK_KEYS),
        _ => None,
    }
}

impl Resolver for ClusterIndex {
    fn has_correct_ingress_class(&self, obj: &dyn IngressClassed) -> bool {
        match obj.ingress_class() {
            Some(class) => class == self.config.ingress_class,
            None => !self.config.use_ingress_class_only,
        }
    }

    fn validate_secret(&self, secret: &Secret) -> Result<(), SecretError> {
        let secret_type = secret.type_.as_deref().unwrap_or_default();
        let keys = required_keys(secret_type).ok_or_else(|| SecretError::UnsupportedType(secret.type_.clone()))?;
        for &key in keys {
            let present = secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| !v.0.is_empty())
                .unwrap_or(false);
            if !present {
                return Err(SecretError::MissingKey { secret_type: secret_type.to_string(), key });
            }
        }
        Ok(())
    }

    fn find_master_for_minion(&self, minion: &Ingress) -> Result<Ingress, LookupError> {
        let minion_key = ObjectKey::of(minion);
        let minion_host = host(minion).ok_or_else(|| LookupError::NoHost(minion_key.clone()))?;
        self.informer
            .list::<Ingress>()
            .into_iter()
            .find(|ing| {
                ing.namespace() == minion.namespace()
                    && is_master(ing)
                    && host(ing) == Some(minion_host)
                    && self.has_correct_ingress_class(ing)
            })
            .ok_or(LookupError::NoMaster(minion_key))
    }

    fn is_external_service_for_status(&self, svc: &Service) -> bool {
        self.config.external_service.as_ref() == Some(&ObjectKey::of(svc))
    }

    fn enqueue_ingress_for_service(&self, svc: &Service) {
        self.flush(self.ingress_targets(svc));
    }

    fn enqueue_virtual_servers_for_service(&self, svc: &Service) {
        self.flush(self.virtual_server_targets(svc));
    }

    fn enqueue_transport_server_for_service(&self, svc: &Service) {
        self.flush(self.transport_server_targets(svc));
    }
}
