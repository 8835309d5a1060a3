//! Per-kind equality: does an update carry a change that matters for reconciliation?
//!
//! Structural equality is the default. Services compare only ports and, for
//! `ExternalName` services, the external name. Ingresses ignore the load
//! balancer status and the resource version.

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service, ServicePort};
use k8s_openapi::api::networking::v1::Ingress;
use kic_core::{GlobalConfiguration, TransportServer, VirtualServer, VirtualServerRoute, Watched};

use crate::Context;

pub trait Equal: Watched {
    /// `true` when `new` carries nothing worth a resync.
    fn equal(old: &Self, new: &Self, ctx: &Context<'_>) -> bool {
        let _ = ctx;
        old == new
    }
}

impl Equal for ConfigMap {}
impl Equal for Endpoints {}
impl Equal for GlobalConfiguration {}
impl Equal for TransportServer {}

impl Equal for VirtualServer {
    fn equal(old: &Self, new: &Self, _ctx: &Context<'_>) -> bool {
        old.spec == new.spec
    }
}

impl Equal for VirtualServerRoute {
    fn equal(old: &Self, new: &Self, _ctx: &Context<'_>) -> bool {
        old.spec == new.spec
    }
}

impl Equal for Secret {
    fn equal(old: &Self, new: &Self, ctx: &Context<'_>) -> bool {
        let validity_changed =
            ctx.resolver.validate_secret(old).is_ok() != ctx.resolver.validate_secret(new).is_ok();
        !validity_changed && old == new
    }
}

impl Equal for Ingress {
    fn equal(old: &Self, new: &Self, _ctx: &Context<'_>) -> bool {
        !ingress_changed(old, new)
    }
}

impl Equal for Service {
    fn equal(old: &Self, new: &Self, ctx: &Context<'_>) -> bool {
        if old == new {
            return true;
        }
        // the status service is enqueued as is, so any change counts
        if ctx.resolver.is_external_service_for_status(new) {
            return false;
        }
        !service_changed(old, new)
    }
}

/// Routing-relevant difference between two observations of an ingress.
pub fn ingress_changed(old: &Ingress, new: &Ingress) -> bool {
    let mut old = old.clone();
    old.metadata.resource_version = new.metadata.resource_version.clone();
    // status only carries the load balancer addresses
    old.status = new.status.clone();
    old != *new
}

const EXTERNAL_NAME: &str = "ExternalName";

/// Port or (for `ExternalName` services) external name difference.
pub fn service_changed(old: &Service, new: &Service) -> bool {
    ports_changed(ports(old), ports(new)) || external_name_changed(old, new)
}

fn ports(svc: &Service) -> &[ServicePort] {
    svc.spec.as_ref().and_then(|s| s.ports.as_deref()).unwrap_or(&[])
}

fn external_name(svc: &Service) -> Option<&str> {
    svc.spec.as_ref().and_then(|s| s.external_name.as_deref())
}

fn external_name_changed(old: &Service, new: &Service) -> bool {
    let is_external_name = new.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some(EXTERNAL_NAME);
    is_external_name && external_name(old) != external_name(new)
}

/// Compares name and port only, independent of declaration order.
fn ports_changed(old: &[ServicePort], new: &[ServicePort]) -> bool {
    if old.len() != new.len() {
        return true;
    }
    sorted_ports(old) != sorted_ports(new)
}

fn sorted_ports(ports: &[ServicePort]) -> Vec<(&str, i32)> {
    let mut out: Vec<_> = ports.iter().map(|p| (p.name.as_deref().unwrap_or(""), p.port)).collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, port: i32) -> ServicePort {
        ServicePort { name: Some(name.to_string()), port, ..Default::default() }
    }

    #[test]
    fn sorts_by_name_then_port() {
        let ports = vec![port("b", 90), port("a", 81), port("a", 80)];
        assert_eq!(sorted_ports(&ports), vec![("a", 80), ("a", 81), ("b", 90)]);
    }

    #[test]
    fn unnamed_ports_sort_first() {
        let ports = vec![port("http", 80), ServicePort { port: 8080, ..Default::default() }];
        assert_eq!(sorted_ports(&ports), vec![("", 8080), ("http", 80)]);
    }

    #[test]
    fn different_lengths_always_change() {
        assert!(ports_changed(&[port("a", 80)], &[port("a", 80), port("a", 80)]));
        assert!(!ports_changed(&[], &[]));
    }
}
