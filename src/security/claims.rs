use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserClaims {
    pub sub: String, // Account ID (Subject)
    pub name: Option<String>,
    pub roles: Option<Vec<String>>,
    pub exp: usize, // Expiration time (UNIX timestamp)
}

/// Authenticated caller, attached to the request by the auth middleware.
#[derive(Clone, Debug)]
pub struct UserContext {
    pub user_id: String,
    pub claims: UserClaims,
}

/// Role allowing a caller to push events through `POST /events/publish`.
pub const PUBLISHER_ROLE: &str = "publisher";

impl UserContext {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.claims
            .roles
            .as_ref()
            .is_some_and(|roles| roles.iter().any(|r| r == role))
    }
}
