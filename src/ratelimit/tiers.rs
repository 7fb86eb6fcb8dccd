//! Tier resolution: which quotas apply to one request.

use serde::Serialize;
use std::fmt;

use super::identity::Identity;
use super::overrides::KeyOverrideStore;
use super::quota::Quota;
use super::rules::RouteQuotas;
use crate::store::CounterKey;

/// Where a tier's quota came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Anonymous,
    Authenticated,
    Override,
    Global,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TierKind::Anonymous => "anonymous",
            TierKind::Authenticated => "authenticated",
            TierKind::Override => "override",
            TierKind::Global => "global",
        };
        f.write_str(name)
    }
}

/// One quota evaluated against one counter key.
#[derive(Debug, Clone, PartialEq)]
pub struct Tier {
    pub kind: TierKind,
    pub key: CounterKey,
    pub quota: Quota,
}

impl Tier {
    fn new(kind: TierKind, subject: &str, route_scope: &str, quota: &Quota) -> Self {
        let scope = quota.scope().unwrap_or(route_scope);
        Self {
            kind,
            key: CounterKey::new(subject, scope),
            quota: quota.clone(),
        }
    }
}

/// Resolve the ordered tier list for `identity` on a route.
///
/// Per-key overrides replace the route's authenticated tier entirely. A keyed
/// caller on a route without an authenticated tier is held to the anonymous
/// quotas, counted under the key. Global tiers always apply, counted per scope.
pub async fn resolve_tiers(
    identity: &Identity,
    scope: &str,
    quotas: &RouteQuotas,
    overrides: &KeyOverrideStore,
) -> Vec<Tier> {
    let subject = identity.to_string();

    let mut tiers: Vec<Tier> = match identity {
        Identity::ApiKey(key) => {
            let custom = overrides.lookup(key, scope).await;
            if !custom.is_empty() {
                custom
                    .iter()
                    .map(|q| Tier::new(TierKind::Override, &subject, scope, q))
                    .collect()
            } else if !quotas.authenticated.is_empty() {
                quotas
                    .authenticated
                    .iter()
                    .map(|q| Tier::new(TierKind::Authenticated, &subject, scope, q))
                    .collect()
            } else {
                quotas
                    .anonymous
                    .iter()
                    .map(|q| Tier::new(TierKind::Anonymous, &subject, scope, q))
                    .collect()
            }
        }
        Identity::AnonymousIp(_) => quotas
            .anonymous
            .iter()
            .map(|q| Tier::new(TierKind::Anonymous, &subject, scope, q))
            .collect(),
    };

    tiers.extend(quotas.global.iter().map(|q| {
        let scope = q.scope().unwrap_or(scope);
        Tier {
            kind: TierKind::Global,
            key: CounterKey::global(scope),
            quota: q.clone(),
        }
    }));

    tiers
}
