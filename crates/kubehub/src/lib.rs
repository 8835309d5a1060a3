//! kic kubehub – discovery and typed watcher wiring

#![forbid(unsafe_code)]

use std::fmt::Debug;

use anyhow::{Context, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kic_core::{
    GlobalConfiguration, ResourceKind, TransportServer, VirtualServer, VirtualServerRoute, WatchEvent, Watched,
};
use kube::{
    api::Api,
    discovery::Discovery,
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client,
};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub type EventSender = mpsc::Sender<(ResourceKind, WatchEvent)>;

/// API group serving `kind`.
pub fn api_group(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Ingress => "networking.k8s.io",
        k if k.is_custom() => "k8s.nginx.org",
        _ => "",
    }
}

/// Which of the watched kinds the API server currently serves (CRDs may be missing).
pub async fn discover(client: Client) -> Result<Vec<ResourceKind>> {
    let discovery = Discovery::new(client).run().await.context("running API discovery")?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        for (ar, _caps) in group.recommended_resources() {
            let served = ResourceKind::ALL
                .iter()
                .find(|k| k.as_str() == ar.kind && api_group(**k) == ar.group);
            if let Some(kind) = served {
                out.push(*kind);
            }
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

fn api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

async fn watch_typed<K>(api: Api<K>, tx: EventSender) -> Result<()>
where
    K: Watched + DeserializeOwned + Debug,
{
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    info!(kind = %K::KIND, "watcher started");
    while let Some(ev) = stream.next().await {
        let ev = match ev {
            Ok(Event::Applied(o)) => WatchEvent::Applied(o.into_object()),
            Ok(Event::Deleted(o)) => WatchEvent::Deleted(o.into_object()),
            Ok(Event::Restarted(list)) => {
                debug!(kind = %K::KIND, count = list.len(), "watch restart");
                WatchEvent::Restarted(list.into_iter().map(Watched::into_object).collect())
            }
            Err(e) => {
                warn!(kind = %K::KIND, error = %e, "watch error; backing off");
                continue;
            }
        };
        if tx.send((K::KIND, ev)).await.is_err() {
            debug!(kind = %K::KIND, "event receiver dropped");
            break;
        }
    }
    warn!(kind = %K::KIND, "watcher stream ended");
    Ok(())
}

/// List+watch `kind` (optionally in one namespace) and forward events to `tx`.
pub async fn start_watcher(client: Client, kind: ResourceKind, namespace: Option<&str>, tx: EventSender) -> Result<()> {
    match kind {
        ResourceKind::ConfigMap => watch_typed(api::<ConfigMap>(client, namespace), tx).await,
        ResourceKind::Endpoints => watch_typed(api::<Endpoints>(client, namespace), tx).await,
        ResourceKind::Ingress => watch_typed(api::<Ingress>(client, namespace), tx).await,
        ResourceKind::Secret => watch_typed(api::<Secret>(client, namespace), tx).await,
        ResourceKind::Service => watch_typed(api::<Service>(client, namespace), tx).await,
        ResourceKind::VirtualServer => watch_typed(api::<VirtualServer>(client, namespace), tx).await,
        ResourceKind::VirtualServerRoute => watch_typed(api::<VirtualServerRoute>(client, namespace), tx).await,
        ResourceKind::GlobalConfiguration => watch_typed(api::<GlobalConfiguration>(client, namespace), tx).await,
        ResourceKind::TransportServer => watch_typed(api::<TransportServer>(client, namespace), tx).await,
    }
}

/// Spawn one watcher task per kind.
pub fn spawn_watchers(
    client: Client,
    kinds: &[ResourceKind],
    namespace: Option<String>,
    tx: EventSender,
) -> Vec<JoinHandle<()>> {
    kinds
        .iter()
        .map(|&kind| {
            let client = client.clone();
            let namespace = namespace.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = start_watcher(client, kind, namespace.as_deref(), tx).await {
                    error!(kind = %kind, error = ?e, "watcher failed");
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_match_served_apis() {
        assert_eq!(api_group(ResourceKind::Service), "");
        assert_eq!(api_group(ResourceKind::Ingress), "networking.k8s.io");
        assert_eq!(api_group(ResourceKind::TransportServer), "k8s.nginx.org");
    }
}
