//! Dispatch router: one terminal action per notification.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kic_core::{
    recover, GlobalConfiguration, Notification, ObjectKey, Payload, ResourceKind, SyncTarget, TransportServer,
    Unrecoverable, VirtualServer, VirtualServerRoute,
};
use metrics::counter;
use tracing::{debug, warn};

use crate::fanout::{self, Route};
use crate::{Admit, Context, DispatchConfig, Equal, FanOut, Op, Resolver, SyncQueue};

/// What happened to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A single target was pushed onto the sync queue.
    Enqueued(SyncTarget),
    /// Referencing resources of a service were enqueued by the fan-out collaborators.
    FannedOut { service: ObjectKey, custom_resources: bool },
    /// Rejected by the kind's admission filter.
    Filtered,
    /// The update carried no meaningful change.
    Unchanged,
    /// The payload could not be turned into an object of the expected kind.
    Unrecoverable(Unrecoverable),
    /// Admitted, but the related target could not be resolved.
    Skipped(String),
}

impl Outcome {
    fn reason(&self) -> &'static str {
        match self {
            Outcome::Enqueued(_) => "enqueued",
            Outcome::FannedOut { .. } => "fanned_out",
            Outcome::Filtered => "filtered",
            Outcome::Unchanged => "unchanged",
            Outcome::Unrecoverable(_) => "unrecoverable",
            Outcome::Skipped(_) => "skipped",
        }
    }
}

/// Routes notifications of every watched kind to the sync queue.
///
/// Holds only read-only configuration and shared collaborators, so a single
/// instance can be called concurrently from every watcher.
pub struct Dispatcher {
    config: DispatchConfig,
    queue: Arc<dyn SyncQueue>,
    resolver: Arc<dyn Resolver>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, queue: Arc<dyn SyncQueue>, resolver: Arc<dyn Resolver>) -> Self {
        Self { config, queue, resolver }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn context(&self) -> Context<'_> {
        Context { config: &self.config, resolver: self.resolver.as_ref() }
    }

    /// Handle one notification delivered by the watcher of `kind`.
    pub fn dispatch(&self, kind: ResourceKind, notification: Notification) -> Outcome {
        let event = notification.event();
        counter!("kic_notifications_total", 1u64, "kind" => kind.as_str(), "event" => event);
        let outcome = match kind {
            ResourceKind::ConfigMap => self.handle::<ConfigMap>(notification),
            ResourceKind::Endpoints => self.handle::<Endpoints>(notification),
            ResourceKind::Ingress => self.handle::<Ingress>(notification),
            ResourceKind::Secret => self.handle::<Secret>(notification),
            ResourceKind::Service => self.handle::<Service>(notification),
            ResourceKind::VirtualServer => self.handle::<VirtualServer>(notification),
            ResourceKind::VirtualServerRoute => self.handle::<VirtualServerRoute>(notification),
            ResourceKind::GlobalConfiguration => self.handle::<GlobalConfiguration>(notification),
            ResourceKind::TransportServer => self.handle::<TransportServer>(notification),
        };
        if !matches!(outcome, Outcome::Enqueued(_) | Outcome::FannedOut { .. }) {
            counter!("kic_notifications_dropped_total", 1u64, "kind" => kind.as_str(), "reason" => outcome.reason());
        }
        outcome
    }

    fn handle<T: Admit + Equal + FanOut>(&self, notification: Notification) -> Outcome {
        let ctx = self.context();
        match notification {
            Notification::Added(payload) => self.admitted::<T>(payload, Op::Add, &ctx),
            Notification::Removed(payload) => self.admitted::<T>(payload, Op::Remove, &ctx),
            Notification::Updated(old, new) => {
                let (old, new) = match (recover_logged::<T>(old), recover_logged::<T>(new)) {
                    (Ok(old), Ok(new)) => (old, new),
                    (Err(e), _) | (_, Err(e)) => return Outcome::Unrecoverable(e),
                };
                if !T::admit_update(&old, &new, &ctx) {
                    return Outcome::Filtered;
                }
                if T::equal(&old, &new, &ctx) {
                    return Outcome::Unchanged;
                }
                debug!(kind = %T::KIND, key = %ObjectKey::of(&new), "changed, syncing");
                self.deliver(new.resolve(Op::Update, &ctx), &ctx)
            }
        }
    }

    fn admitted<T: Admit + FanOut>(&self, payload: Payload, op: Op, ctx: &Context<'_>) -> Outcome {
        let obj = match recover_logged::<T>(payload) {
            Ok(obj) => obj,
            Err(e) => return Outcome::Unrecoverable(e),
        };
        if !obj.admit(ctx) {
            return Outcome::Filtered;
        }
        debug!(kind = %T::KIND, key = %ObjectKey::of(&obj), op = ?op, "syncing");
        self.deliver(obj.resolve(op, ctx), ctx)
    }

    fn deliver(&self, route: Route, ctx: &Context<'_>) -> Outcome {
        match route {
            Route::Enqueue(target) => {
                counter!("kic_sync_enqueued_total", 1u64, "kind" => target.kind.as_str());
                self.queue.add(target.clone());
                Outcome::Enqueued(target)
            }
            Route::FanOut(svc) => {
                let custom_resources = fanout::fan_out_service(&svc, ctx);
                Outcome::FannedOut { service: ObjectKey::of(&svc), custom_resources }
            }
            Route::Skip(reason) => Outcome::Skipped(reason),
        }
    }
}

fn recover_logged<T: kic_core::Watched>(payload: Payload) -> Result<T, Unrecoverable> {
    recover::<T>(payload).map_err(|e| {
        warn!(kind = %T::KIND, error = %e, "dropping unrecoverable notification");
        e
    })
}
