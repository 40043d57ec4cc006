use serde::{Deserialize, Serialize};

use crate::store::UserView;

/// Input to `SessionManager::register`
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Tokens handed to a client when a session opens or rotates
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub user: UserView,
}

/// Which of the presented tokens this logout newly revoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogoutOutcome {
    pub access_token_revoked: bool,
    pub refresh_token_revoked: bool,
}

impl LogoutOutcome {
    pub fn tokens_revoked(&self) -> Vec<&'static str> {
        let mut revoked = Vec::new();
        if self.access_token_revoked {
            revoked.push("access_token");
        }
        if self.refresh_token_revoked {
            revoked.push("refresh_token");
        }
        revoked
    }
}
