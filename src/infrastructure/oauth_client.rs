use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

#[derive(Debug, Clone)]
pub struct OAuthCodeExchangeRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorization_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[async_trait]
pub trait OAuthHttpClient: Send + Sync {
    async fn exchange_authorization_code(
        &self,
        request: OAuthCodeExchangeRequest,
    ) -> Result<OAuthTokenResponse, InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestOAuthClient {
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponsePayload {
    access_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl ReqwestOAuthClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Posts a form to the token endpoint, authenticating the client with
    /// HTTP Basic credentials.
    async fn post_form(
        &self,
        endpoint: &str,
        client_id: &str,
        client_secret: &str,
        params: &[(&str, String)],
    ) -> Result<OAuthTokenResponse, InfraError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|error| InfraError::InvalidUrl(format!("token endpoint: {error}")))?;

        let response = self
            .client
            .post(endpoint)
            .basic_auth(client_id, Some(client_secret))
            .form(params)
            .send()
            .await
            .map_err(|error| InfraError::TokenExchange(format!("request failed: {error}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::TokenExchange(format!("failed reading token response: {error}"))
        })?;

        let parsed = serde_json::from_str::<TokenResponsePayload>(&body).map_err(|error| {
            InfraError::TokenExchange(format!("invalid token response payload: {error}; body={body}"))
        })?;

        if !status.is_success() || parsed.error.is_some() {
            let code = parsed.error.unwrap_or_else(|| format!("http_{}", status.as_u16()));
            let detail = parsed.error_description.unwrap_or_else(|| body.clone());
            return Err(InfraError::TokenExchange(format!(
                "token endpoint error: {code}; {detail}"
            )));
        }

        let access_token = parsed
            .access_token
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                InfraError::TokenExchange("token response did not include access_token".to_string())
            })?;

        Ok(OAuthTokenResponse {
            access_token,
            expires_in: parsed.expires_in,
            token_type: parsed.token_type,
            scope: parsed.scope,
        })
    }
}

#[async_trait]
impl OAuthHttpClient for ReqwestOAuthClient {
    async fn exchange_authorization_code(
        &self,
        request: OAuthCodeExchangeRequest,
    ) -> Result<OAuthTokenResponse, InfraError> {
        self.post_form(
            &request.token_endpoint,
            &request.client_id,
            &request.client_secret,
            &[
                ("code", request.authorization_code),
                ("grant_type", "authorization_code".to_string()),
                ("redirect_uri", request.redirect_uri),
            ],
        )
        .await
    }
}
