//! The admission pipeline: identity, tiers, counting and enforcement.

use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, trace};

use super::counter::SlidingWindowCounter;
use super::enforcer::{Decision, Enforcer};
use super::identity::{Identity, IdentityResolver};
use super::overrides::KeyOverrideStore;
use super::rules::RouteTable;
use super::switches::Switches;
use super::tiers::resolve_tiers;
use crate::error::{self, AdmissionError};

/// The request facts admission needs.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    /// Raw request path, checked against the exempt list
    pub path: &'a str,
    /// Matched route template; the raw path is used when absent
    pub route: Option<&'a str>,
    /// Candidate API key as supplied by the caller
    pub api_key: Option<&'a str>,
    /// Client address
    pub client_ip: IpAddr,
}

/// The outcome of admitting a request.
#[derive(Debug, Clone)]
pub enum Admission {
    /// The path bypasses admission
    Exempt,
    /// No tiers are declared for the route
    Unlimited { identity: Identity },
    /// The counter store failed; the request is let through
    FailedOpen { identity: Identity },
    /// Every tier was evaluated
    Decided {
        identity: Identity,
        decision: Decision,
    },
}

impl Admission {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Admission::Exempt => None,
            Admission::Unlimited { identity }
            | Admission::FailedOpen { identity }
            | Admission::Decided { identity, .. } => Some(identity),
        }
    }

    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Admission::Decided { decision, .. } => Some(decision),
            _ => None,
        }
    }
}

/// Distributed rate limiter shared by every request of one process.
pub struct RateLimiter {
    routes: RwLock<Arc<RouteTable>>,
    resolver: IdentityResolver,
    overrides: KeyOverrideStore,
    counter: SlidingWindowCounter,
    enforcer: Enforcer,
}

impl RateLimiter {
    /// Create a rate limiter. The emergency switch in `switches` is applied
    /// to the resolver.
    ///
    /// # Errors
    /// Returns an error if the route table does not validate.
    pub fn new(
        routes: RouteTable,
        resolver: IdentityResolver,
        overrides: KeyOverrideStore,
        counter: SlidingWindowCounter,
        switches: Switches,
    ) -> error::Result<Self> {
        routes.validate()?;
        Ok(Self {
            routes: RwLock::new(Arc::new(routes)),
            resolver: resolver.with_emergency_mode(switches.emergency_mode),
            overrides,
            counter,
            enforcer: Enforcer::new(switches.enforce),
        })
    }

    /// Replace the route table. An invalid table leaves the current one in
    /// place.
    pub fn set_routes(&self, routes: RouteTable) -> error::Result<()> {
        routes.validate()?;
        *self.routes.write() = Arc::new(routes);
        Ok(())
    }

    /// The current route table.
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.read().clone()
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Decide whether a request may proceed.
    ///
    /// # Errors
    /// [`AdmissionError::EmergencyMode`] for callers without a usable key in
    /// emergency mode, and [`AdmissionError::RateLimited`] for violations
    /// while enforcing. Counter store failures never reject.
    pub async fn check(&self, request: &AdmissionRequest<'_>) -> Result<Admission, AdmissionError> {
        let routes = self.routes();
        if routes.is_exempt(request.path) {
            trace!(path = %request.path, "Path exempt from admission");
            return Ok(Admission::Exempt);
        }

        let route = request.route.unwrap_or(request.path);
        let matched = routes.find(route);
        let require_data_access = matched.as_ref().is_some_and(|m| m.quotas.data_access);

        let identity = self
            .resolver
            .resolve(request.api_key, request.client_ip, require_data_access)
            .await?;

        let Some(matched) = matched else {
            trace!(route = %route, "No tiers declared for route");
            return Ok(Admission::Unlimited { identity });
        };

        let tiers = resolve_tiers(&identity, matched.scope, matched.quotas, &self.overrides).await;

        let statuses = match self.counter.evaluate(&tiers).await {
            Ok(statuses) => statuses,
            Err(e) => {
                error!(
                    route = %route,
                    identity = %identity,
                    error = %e,
                    "Counter store unavailable, admitting request without rate limiting"
                );
                return Ok(Admission::FailedOpen { identity });
            }
        };

        let decision = self.enforcer.enforce(statuses)?;
        debug!(
            route = %route,
            identity = %identity,
            tiers = tiers.len(),
            remaining = decision.tightest().map(|s| s.remaining()),
            "Admitted request"
        );

        Ok(Admission::Decided { identity, decision })
    }
}
