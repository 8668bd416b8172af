use chrono::{Duration, Utc};
use tracing::{info, warn};

use freightdesk_core::TokenError;
use freightdesk_db::repositories::ConnectionRepository;

use crate::client::CrmApiClient;
use crate::error::SyncError;

/// Keeps the per-user access token usable. Refreshes are lazy: nothing
/// happens until a run asks for a token and the stored one is expired or
/// inside the expiry skew window.
pub struct TokenManager<'a, C> {
    client: &'a C,
    connections: &'a ConnectionRepository,
}

impl<'a, C: CrmApiClient> TokenManager<'a, C> {
    pub fn new(client: &'a C, connections: &'a ConnectionRepository) -> Self {
        Self { client, connections }
    }

    /// Returns an access token valid for at least the skew window. A failed
    /// refresh, rejected grant or not, deactivates the connection so every
    /// later run fails fast until the user re-authorizes.
    pub async fn ensure_valid(&self, user_id: &str) -> Result<String, SyncError> {
        let connection = self
            .connections
            .find_active(user_id)
            .await?
            .ok_or(TokenError::MissingConnection)?;

        if !connection.token_needs_refresh(Utc::now()) {
            return Ok(connection.access_token);
        }

        match self.client.refresh_token(&connection.refresh_token).await {
            Ok(grant) => {
                let expires_at = Utc::now() + Duration::seconds(grant.expires_in.max(0));
                let refresh_token =
                    grant.refresh_token.unwrap_or_else(|| connection.refresh_token.clone());
                self.connections
                    .save_tokens(&connection.id, &grant.access_token, &refresh_token, expires_at)
                    .await?;
                info!(user_id, connection_id = %connection.id, "refreshed crm access token");
                Ok(grant.access_token)
            }
            Err(error) => {
                warn!(user_id, connection_id = %connection.id, %error,
                    "token refresh failed, deactivating connection");
                self.connections.deactivate(&connection.id).await?;
                Err(error.into())
            }
        }
    }
}
