#![forbid(unsafe_code)]

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kic_core::prelude::*;
use kic_store::Informer;

fn ep(name: &str, rv: &str) -> ResourceObject {
    ResourceObject::from(Endpoints {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("ns".to_string()),
            resource_version: Some(rv.to_string()),
            ..Default::default()
        },
        ..Default::default()
    })
}

#[test]
fn replay_basic_sequence() {
    let inf = Informer::new();
    let k = ResourceKind::Endpoints;

    let n = inf.apply(k, WatchEvent::Applied(ep("a", "1")));
    assert_eq!(n, vec![Notification::Added(ep("a", "1").into())]);

    let n = inf.apply(k, WatchEvent::Applied(ep("a", "2")));
    assert_eq!(n, vec![Notification::Updated(ep("a", "1").into(), ep("a", "2").into())]);

    inf.apply(k, WatchEvent::Applied(ep("b", "3")));
    assert_eq!(inf.snapshot(k).len(), 2);

    let n = inf.apply(k, WatchEvent::Deleted(ep("b", "4")));
    assert_eq!(n, vec![Notification::Removed(ep("b", "4").into())]);
    assert_eq!(inf.list::<Endpoints>().len(), 1);
}

#[test]
fn relist_turns_missed_deletions_into_tombstones() {
    let inf = Informer::new();
    let k = ResourceKind::Endpoints;
    inf.apply(k, WatchEvent::Applied(ep("a", "1")));
    inf.apply(k, WatchEvent::Applied(ep("b", "1")));
    inf.apply(k, WatchEvent::Applied(ep("c", "1")));

    // b and c vanished while the watch was down, d appeared
    let n = inf.apply(k, WatchEvent::Restarted(vec![ep("a", "2"), ep("d", "1")]));
    assert_eq!(
        n,
        vec![
            Notification::Updated(ep("a", "1").into(), ep("a", "2").into()),
            Notification::Added(ep("d", "1").into()),
            Notification::Removed(Payload::Tombstone(Tombstone::new(ep("b", "1")))),
            Notification::Removed(Payload::Tombstone(Tombstone::new(ep("c", "1")))),
        ]
    );
    let names: Vec<_> = inf.list::<Endpoints>().into_iter().filter_map(|e| e.metadata.name).collect();
    assert_eq!(names, vec!["a", "d"]);
}

#[test]
fn kinds_are_cached_separately() {
    let inf = Informer::new();
    inf.apply(ResourceKind::Endpoints, WatchEvent::Applied(ep("a", "1")));
    assert!(inf.snapshot(ResourceKind::Service).is_empty());
    let n = inf.apply(ResourceKind::Service, WatchEvent::Restarted(vec![]));
    assert!(n.is_empty());
    assert_eq!(inf.snapshot(ResourceKind::Endpoints).len(), 1);
}

#[test]
fn objects_of_another_kind_never_enter_the_cache() {
    let inf = Informer::new();
    let k = ResourceKind::Endpoints;
    let cm = ResourceObject::from(ConfigMap {
        metadata: ObjectMeta { name: Some("a".to_string()), namespace: Some("ns".to_string()), ..Default::default() },
        ..Default::default()
    });
    assert!(inf.apply(k, WatchEvent::Applied(cm.clone())).is_empty());
    assert!(inf.apply(k, WatchEvent::Deleted(cm.clone())).is_empty());
    assert!(inf.snapshot(k).is_empty());

    let n = inf.apply(k, WatchEvent::Restarted(vec![cm, ep("b", "1")]));
    assert_eq!(n, vec![Notification::Added(ep("b", "1").into())]);
    assert_eq!(inf.snapshot(k).len(), 1);
}
