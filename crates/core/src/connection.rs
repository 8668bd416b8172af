use chrono::{DateTime, Duration, Utc};

/// One user's OAuth2 link to the external CRM. The token pair is mutated only
/// by the token manager; everything else reads it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub active: bool,
}

/// Refresh slightly before the advertised expiry so a token never dies
/// mid-page-loop.
pub const TOKEN_EXPIRY_SKEW_SECONDS: i64 = 60;

impl Connection {
    pub fn token_needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_EXPIRY_SKEW_SECONDS) >= self.token_expires_at
    }
}
