//! Rate limiting logic and state management.

mod entry;
mod key;
mod limiter;
mod policy;

pub use entry::RateLimitEntry;
pub use key::LimitKey;
pub use limiter::{DenyReason, RateLimitDecision, RateLimiter};
pub use policy::{names, PolicySet, RateLimitPolicy};
