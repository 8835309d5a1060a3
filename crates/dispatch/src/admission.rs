//! Per-kind admission: is this object in scope for this controller instance?

use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kic_core::{GlobalConfiguration, ObjectKey, TransportServer, VirtualServer, VirtualServerRoute, Watched};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::{Context, IngressClassed};

pub trait Admit: Watched {
    /// Admission for add and delete notifications.
    fn admit(&self, ctx: &Context<'_>) -> bool;

    /// Admission for updates; by default only the new observation is checked.
    fn admit_update(old: &Self, new: &Self, ctx: &Context<'_>) -> bool {
        let _ = old;
        new.admit(ctx)
    }
}

impl Admit for ConfigMap {
    fn admit(&self, ctx: &Context<'_>) -> bool {
        ctx.config.config_map.as_deref() == Some(self.name_any().as_str())
    }
}

impl Admit for Endpoints {
    fn admit(&self, _ctx: &Context<'_>) -> bool {
        true
    }
}

impl Admit for GlobalConfiguration {
    fn admit(&self, _ctx: &Context<'_>) -> bool {
        true
    }
}

impl Admit for TransportServer {
    fn admit(&self, _ctx: &Context<'_>) -> bool {
        true
    }
}

/// Both service paths (external status, fan-out) are admitted; routing decides.
impl Admit for Service {
    fn admit(&self, _ctx: &Context<'_>) -> bool {
        true
    }
}

fn admit_classed<T: Watched + IngressClassed>(obj: &T, ctx: &Context<'_>) -> bool {
    if ctx.resolver.has_correct_ingress_class(obj) {
        return true;
    }
    info!(
        kind = %T::KIND,
        key = %ObjectKey::of(obj),
        class = ?obj.ingress_class(),
        "ignoring resource based on ingress class"
    );
    false
}

impl Admit for Ingress {
    fn admit(&self, ctx: &Context<'_>) -> bool {
        admit_classed(self, ctx)
    }
}

impl Admit for VirtualServer {
    fn admit(&self, ctx: &Context<'_>) -> bool {
        admit_classed(self, ctx)
    }
}

impl Admit for VirtualServerRoute {
    fn admit(&self, ctx: &Context<'_>) -> bool {
        admit_classed(self, ctx)
    }
}

impl Admit for Secret {
    fn admit(&self, ctx: &Context<'_>) -> bool {
        match ctx.resolver.validate_secret(self) {
            Ok(()) => true,
            Err(e) => {
                debug!(key = %ObjectKey::of(self), error = %e, "ignoring invalid secret");
                false
            }
        }
    }

    /// A transition into or out of validity must still be observed.
    fn admit_update(old: &Self, new: &Self, ctx: &Context<'_>) -> bool {
        ctx.resolver.validate_secret(old).is_ok() || ctx.resolver.validate_secret(new).is_ok()
    }
}
