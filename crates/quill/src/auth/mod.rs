//! Authentication and session resolution.
//!
//! Session resolution is an opaque call from the chat core's perspective: a
//! request either resolves to a user identity or is unauthenticated.

mod claims;
mod middleware;

pub use claims::{Claims, Role};
pub use middleware::{AuthConfig, AuthError, AuthState, AuthUser, CurrentUser, DevUser};
