//! Bearer-token authentication for streaming and intake routes.
//!
//! Tokens are issued by the external identity provider; this module only
//! validates them and exposes the caller as a [`UserContext`].

pub mod claims;
pub mod middleware;

pub use claims::{PUBLISHER_ROLE, UserClaims, UserContext};
pub use middleware::auth_middleware;
