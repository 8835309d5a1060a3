#![forbid(unsafe_code)]

use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kic_core::prelude::*;

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta { name: Some(name.to_string()), namespace: Some("default".to_string()), ..Default::default() }
}

fn svc(name: &str) -> Service {
    Service { metadata: meta(name), ..Default::default() }
}

fn cm(name: &str) -> ConfigMap {
    ConfigMap { metadata: meta(name), ..Default::default() }
}

#[test]
fn live_object_of_expected_kind_is_returned() {
    let got: Service = recover(Payload::from(ResourceObject::from(svc("web")))).unwrap();
    assert_eq!(got, svc("web"));
}

#[test]
fn tombstone_wrapping_expected_kind_yields_last_known_state() {
    let t = Tombstone::new(ResourceObject::from(svc("web")));
    assert_eq!(t.key, ObjectKey::new(Some("default"), "web"));
    let got: Service = recover(Payload::from(t)).unwrap();
    assert_eq!(got.metadata.name.as_deref(), Some("web"));
}

#[test]
fn wrong_kind_is_unrecoverable() {
    let err = recover::<Secret>(Payload::from(ResourceObject::from(cm("cfg")))).unwrap_err();
    assert_eq!(err, Unrecoverable::UnexpectedObject { expected: ResourceKind::Secret, found: ResourceKind::ConfigMap });
}

#[test]
fn tombstone_wrapping_wrong_kind_is_unrecoverable() {
    let t = Tombstone::new(ResourceObject::from(cm("cfg")));
    let err = recover::<Service>(Payload::from(t)).unwrap_err();
    match err {
        Unrecoverable::UnexpectedTombstone { expected, found, key } => {
            assert_eq!(expected, ResourceKind::Service);
            assert_eq!(found, ResourceKind::ConfigMap);
            assert_eq!(key.to_string(), "default/cfg");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn untyped_recovery_checks_kind_for_every_kind() {
    for kind in ResourceKind::ALL {
        let res = recover_as(kind, Payload::from(ResourceObject::from(svc("web"))));
        assert_eq!(res.is_ok(), kind == ResourceKind::Service, "kind {kind}");
        let res = recover_as(kind, Payload::from(Tombstone::new(ResourceObject::from(svc("web")))));
        assert_eq!(res.is_ok(), kind == ResourceKind::Service, "tombstone kind {kind}");
    }
}

#[test]
fn object_key_parses_namespaced_and_bare_names() {
    assert_eq!(ObjectKey::parse("nginx-ingress/status"), ObjectKey::new(Some("nginx-ingress"), "status"));
    assert_eq!(ObjectKey::parse("status"), ObjectKey::new(None, "status"));
    assert_eq!(ObjectKey::parse("nginx-ingress/status").to_string(), "nginx-ingress/status");
}

#[test]
fn payload_serializes_with_resource_tag() {
    let p = Payload::from(ResourceObject::from(cm("cfg")));
    let v = serde_json::to_value(&p).unwrap();
    assert_eq!(v["object"]["resource"], "ConfigMap");
    assert_eq!(v["object"]["object"]["metadata"]["name"], "cfg");
}
