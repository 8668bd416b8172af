use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use freightdesk_core::config::CrmConfig;
use freightdesk_core::{ApiError, SyncEntityType, TokenError};

/// A successful refresh grant. The provider rotates the refresh token on
/// most grants but is allowed to omit it, in which case the old one stays
/// valid.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// The outbound seam to the CRM provider. The orchestrator is generic over
/// this trait so the whole engine runs against an in-process fake in tests.
#[async_trait]
pub trait CrmApiClient: Send + Sync {
    /// Fetches one page of an entity collection. Returns the raw records of
    /// the `data` envelope.
    async fn fetch_page(
        &self,
        access_token: &str,
        entity: SyncEntityType,
        page_number: u32,
        page_size: u32,
    ) -> Result<Vec<Value>, ApiError>;

    /// Exchanges a refresh token for a new access token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, TokenError>;
}

/// Production client speaking the provider's JSON-over-POST list protocol.
pub struct HttpCrmClient {
    http: reqwest::Client,
    config: CrmConfig,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    data: Vec<Value>,
}

impl HttpCrmClient {
    pub fn new(config: CrmConfig) -> Self {
        Self { http: reqwest::Client::new(), config }
    }

    fn list_url(&self, entity: SyncEntityType) -> String {
        format!("{}/{}", self.config.api_base_url.trim_end_matches('/'), entity.list_endpoint())
    }
}

#[async_trait]
impl CrmApiClient for HttpCrmClient {
    async fn fetch_page(
        &self,
        access_token: &str,
        entity: SyncEntityType,
        page_number: u32,
        page_size: u32,
    ) -> Result<Vec<Value>, ApiError> {
        // The provider rejects `"number": 1`; the first page is requested by
        // omitting the page number entirely.
        let page = if page_number > 1 {
            json!({ "size": page_size, "number": page_number })
        } else {
            json!({ "size": page_size })
        };
        let body = json!({ "filter": {}, "page": page });

        debug!(entity = %entity, page = page_number, "requesting crm page");
        let response = self
            .http
            .post(self.list_url(entity))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|error| ApiError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail: truncate_detail(&detail),
            });
        }

        let envelope: ListEnvelope = response
            .json()
            .await
            .map_err(|error| ApiError::Decode(error.to_string()))?;
        Ok(envelope.data)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, TokenError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|error| TokenError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TokenError::RefreshRejected(format!(
                "status {}: {}",
                status.as_u16(),
                truncate_detail(&detail)
            )));
        }

        response
            .json::<TokenGrant>()
            .await
            .map_err(|error| TokenError::Transport(format!("invalid grant response: {error}")))
    }
}

/// Error bodies can be arbitrarily large; keep enough for the run error list.
fn truncate_detail(detail: &str) -> String {
    const MAX: usize = 200;
    let trimmed = detail.trim();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        let cut = trimmed
            .char_indices()
            .take_while(|(index, _)| *index < MAX)
            .last()
            .map(|(index, ch)| index + ch.len_utf8())
            .unwrap_or(0);
        format!("{}...", &trimmed[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_detail;

    #[test]
    fn detail_is_trimmed_and_capped() {
        assert_eq!(truncate_detail("  not found  "), "not found");
        let long = "x".repeat(500);
        let capped = truncate_detail(&long);
        assert!(capped.len() <= 204);
        assert!(capped.ends_with("..."));
    }
}
