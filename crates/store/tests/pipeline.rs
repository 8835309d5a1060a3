#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kic_core::prelude::*;
use kic_dispatch::{DispatchConfig, Dispatcher};
use kic_store::{ingest, spawn_pipeline, ClusterIndex, Informer, TaskQueue};

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta { name: Some(name.to_string()), namespace: Some("default".to_string()), ..Default::default() }
}

fn svc1(port: i32) -> ResourceObject {
    ResourceObject::from(Service {
        metadata: meta("svc1"),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort { name: Some("http".to_string()), port, ..Default::default() }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn ing1() -> ResourceObject {
    ResourceObject::from(Ingress {
        metadata: meta("ing1"),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: Some("cafe.example.com".to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend { name: "svc1".to_string(), port: None }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn wire(config: DispatchConfig) -> (Arc<Informer>, Arc<Dispatcher>, Arc<TaskQueue>) {
    let informer = Arc::new(Informer::new());
    let queue = Arc::new(TaskQueue::with_capacity(64));
    let index = Arc::new(ClusterIndex::new(config.clone(), informer.clone(), queue.clone()));
    let dispatcher = Arc::new(Dispatcher::new(config, queue.clone(), index));
    (informer, dispatcher, queue)
}

fn ingress_target() -> SyncTarget {
    SyncTarget { kind: ResourceKind::Ingress, key: ObjectKey::new(Some("default"), "ing1") }
}

#[test]
fn service_add_resyncs_referencing_ingress_only() {
    let (informer, dispatcher, queue) = wire(DispatchConfig::default());
    ingest(&informer, &dispatcher, ResourceKind::Ingress, WatchEvent::Applied(ing1()));
    assert_eq!(queue.drain_ready(), vec![ingress_target()]);

    ingest(&informer, &dispatcher, ResourceKind::Service, WatchEvent::Applied(svc1(80)));
    assert_eq!(queue.drain_ready(), vec![ingress_target()]);

    // resync with identical content is a no-op
    ingest(&informer, &dispatcher, ResourceKind::Service, WatchEvent::Applied(svc1(80)));
    assert!(queue.is_empty());

    ingest(&informer, &dispatcher, ResourceKind::Service, WatchEvent::Applied(svc1(8080)));
    assert_eq!(queue.drain_ready(), vec![ingress_target()]);
}

#[test]
fn missed_service_deletion_still_fans_out() {
    let (informer, dispatcher, queue) = wire(DispatchConfig::default());
    ingest(&informer, &dispatcher, ResourceKind::Ingress, WatchEvent::Applied(ing1()));
    ingest(&informer, &dispatcher, ResourceKind::Service, WatchEvent::Applied(svc1(80)));
    queue.drain_ready();

    ingest(&informer, &dispatcher, ResourceKind::Service, WatchEvent::Restarted(vec![]));
    assert_eq!(queue.drain_ready(), vec![ingress_target()]);
}

#[tokio::test]
async fn pipeline_emits_drained_batches() {
    let (informer, dispatcher, queue) = wire(DispatchConfig::default());
    let (tx, mut rx) = spawn_pipeline(informer, dispatcher, queue, 16, Duration::from_millis(5));
    tx.send((ResourceKind::Ingress, WatchEvent::Applied(ing1()))).await.unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(batch, vec![ingress_target()]);
    drop(tx);
    assert!(tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().is_none());
}
