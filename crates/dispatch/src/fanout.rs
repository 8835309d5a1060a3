//! Resolution of admitted objects into sync targets, including service fan-out.

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kic_core::{GlobalConfiguration, ObjectKey, SyncTarget, TransportServer, VirtualServer, VirtualServerRoute, Watched};
use metrics::counter;
use tracing::{debug, info};

use crate::{ingress, Context, Op};

/// Where an admitted notification goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Push the target onto the sync queue.
    Enqueue(SyncTarget),
    /// Resync everything that references this service.
    FanOut(Service),
    /// Nothing to enqueue.
    Skip(String),
}

pub trait FanOut: Watched {
    fn resolve(self, op: Op, ctx: &Context<'_>) -> Route {
        let _ = (op, ctx);
        Route::Enqueue(SyncTarget::of(&self))
    }
}

impl FanOut for ConfigMap {}
impl FanOut for Endpoints {}
impl FanOut for Secret {}
impl FanOut for GlobalConfiguration {}
impl FanOut for TransportServer {}
impl FanOut for VirtualServer {}
impl FanOut for VirtualServerRoute {}

impl FanOut for Service {
    fn resolve(self, _op: Op, ctx: &Context<'_>) -> Route {
        if ctx.resolver.is_external_service_for_status(&self) {
            return Route::Enqueue(SyncTarget::of(&self));
        }
        Route::FanOut(self)
    }
}

/// A deleted minion is resynced through its master; the minion itself is gone.
impl FanOut for Ingress {
    fn resolve(self, op: Op, ctx: &Context<'_>) -> Route {
        if op != Op::Remove || !ingress::is_minion(&self) {
            return Route::Enqueue(SyncTarget::of(&self));
        }
        let minion = ObjectKey::of(&self);
        match ctx.resolver.find_master_for_minion(&self) {
            Ok(master) => {
                debug!(minion = %minion, master = %ObjectKey::of(&master), "removing minion ingress, syncing master");
                Route::Enqueue(SyncTarget::of(&master))
            }
            Err(e) => {
                info!(minion = %minion, error = %e, "ignoring minion ingress");
                Route::Skip(e.to_string())
            }
        }
    }
}

/// Enqueue every resource referencing `svc`. Returns whether custom resources were included.
pub fn fan_out_service(svc: &Service, ctx: &Context<'_>) -> bool {
    counter!("kic_fanout_total", 1u64);
    ctx.resolver.enqueue_ingress_for_service(svc);
    if !ctx.config.custom_resources_enabled {
        return false;
    }
    ctx.resolver.enqueue_virtual_servers_for_service(svc);
    ctx.resolver.enqueue_transport_server_for_service(svc);
    true
}
