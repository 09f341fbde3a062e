pub mod client;
pub mod policy;
pub mod scheduler;
pub mod session;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use client::{DEFAULT_BASE_URL, HttpTransport, Transport};
pub use policy::{current_cache_ttl, with_cache_ttl};
pub use scheduler::{DrainReport, PendingRequest, RequestId, Scheduler};
pub use session::{Authorizer, Session};
pub use types::{Params, params};
