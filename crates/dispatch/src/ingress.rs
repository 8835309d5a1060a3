//! Ingress helpers: class annotation, mergeable (master/minion) ingresses and backends.

use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use kic_core::{VirtualServer, VirtualServerRoute};

use crate::IngressClassed;

pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
pub const MERGEABLE_INGRESS_TYPE_ANNOTATION: &str = "nginx.org/mergeable-ingress-type";

fn mergeable_type(ing: &Ingress) -> Option<&str> {
    ing.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(MERGEABLE_INGRESS_TYPE_ANNOTATION))
        .map(|s| s.as_str())
}

pub fn is_master(ing: &Ingress) -> bool {
    mergeable_type(ing) == Some("master")
}

pub fn is_minion(ing: &Ingress) -> bool {
    mergeable_type(ing) == Some("minion")
}

/// Host of the first rule; mergeable ingresses are grouped by it.
pub fn host(ing: &Ingress) -> Option<&str> {
    ing.spec
        .as_ref()
        .and_then(|s| s.rules.as_ref())
        .and_then(|r| r.first())
        .and_then(|r| r.host.as_deref())
}

fn backend_service(b: &IngressBackend) -> Option<&str> {
    b.service.as_ref().map(|s| s.name.as_str())
}

/// Names of every service referenced by the default backend or a path backend.
pub fn backend_services(ing: &Ingress) -> impl Iterator<Item = &str> {
    let spec = ing.spec.as_ref();
    let default = spec.and_then(|s| s.default_backend.as_ref()).and_then(backend_service);
    let paths = spec
        .and_then(|s| s.rules.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|r| r.http.as_ref())
        .flat_map(|h| h.paths.iter())
        .filter_map(|p| backend_service(&p.backend));
    default.into_iter().chain(paths)
}

impl IngressClassed for Ingress {
    fn class_annotation(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(INGRESS_CLASS_ANNOTATION))
            .map(|s| s.as_str())
    }

    fn class_name(&self) -> Option<&str> {
        self.spec.as_ref().and_then(|s| s.ingress_class_name.as_deref())
    }
}

impl IngressClassed for VirtualServer {
    fn class_name(&self) -> Option<&str> {
        self.spec.ingress_class_name.as_deref()
    }
}

impl IngressClassed for VirtualServerRoute {
    fn class_name(&self) -> Option<&str> {
        self.spec.ingress_class_name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressRule, IngressServiceBackend, IngressSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn backend(svc: &str) -> IngressBackend {
        IngressBackend {
            service: Some(IngressServiceBackend { name: svc.to_string(), port: None }),
            ..Default::default()
        }
    }

    #[test]
    fn collects_default_and_path_backends() {
        let ing = Ingress {
            spec: Some(IngressSpec {
                default_backend: Some(backend("fallback")),
                rules: Some(vec![IngressRule {
                    host: Some("cafe.example.com".to_string()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![
                            HTTPIngressPath { path: Some("/tea".into()), backend: backend("tea"), ..Default::default() },
                            HTTPIngressPath { path: Some("/coffee".into()), backend: backend("coffee"), ..Default::default() },
                        ],
                    }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let names: Vec<_> = backend_services(&ing).collect();
        assert_eq!(names, vec!["fallback", "tea", "coffee"]);
        assert_eq!(host(&ing), Some("cafe.example.com"));
    }

    #[test]
    fn annotation_class_wins_over_field() {
        let ing = Ingress {
            metadata: ObjectMeta {
                annotations: Some([(INGRESS_CLASS_ANNOTATION.to_string(), "nginx".to_string())].into()),
                ..Default::default()
            },
            spec: Some(IngressSpec { ingress_class_name: Some("other".into()), ..Default::default() }),
            ..Default::default()
        };
        assert_eq!(ing.ingress_class(), Some("nginx"));
        assert!(!is_minion(&ing));
        assert!(!is_master(&ing));
    }
}
