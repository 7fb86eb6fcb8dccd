//! Admission control: identity resolution, quota tiers, sliding-window
//! counting and enforcement.

mod cache;
mod clock;
mod counter;
mod enforcer;
mod identity;
mod limiter;
mod overrides;
mod quota;
mod registry;
mod rules;
mod switches;
mod tiers;

pub use cache::TtlCache;
pub use clock::{epoch_seconds, Clock, ManualClock, SystemClock};
pub use counter::{SlidingWindowCounter, WindowStatus};
pub use enforcer::{rate_limit_headers, Decision, Enforcer, Verdict};
pub use enforcer::{HEADER_LIMIT, HEADER_PERIOD, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER};
pub use identity::{Identity, IdentityResolver};
pub use limiter::{Admission, AdmissionRequest, RateLimiter};
pub use overrides::KeyOverrideStore;
pub use quota::Quota;
pub use registry::{InMemoryKeyRegistry, KeyRecord, KeyRegistry, PgKeyRegistry};
pub use rules::{RouteMatch, RouteQuotas, RouteTable};
pub use switches::Switches;
pub use tiers::{resolve_tiers, Tier, TierKind};
