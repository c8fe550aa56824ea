use crate::application::NowProvider;
use crate::domain::models::OAuthToken;
use crate::infrastructure::browser_session::{BrowserSession, PresentationRequest};
use crate::infrastructure::config::{
    DEFAULT_AUTHORIZATION_ENDPOINT, DEFAULT_REDIRECT_URI, DEFAULT_TOKEN_ENDPOINT,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::{OAuthCodeExchangeRequest, OAuthHttpClient, OAuthTokenResponse};
use crate::infrastructure::session::Session;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_SCOPES: [&str; 2] = ["tasks:read", "tasks:write"];

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
}

impl OAuthConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|scope| scope.to_string()).collect(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
        }
    }
}

/// Anything that can (re)establish the shared session interactively.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns whether the session is authenticated afterwards.
    async fn authenticate(&self) -> bool;

    /// Called after the service rejected the current credential.
    async fn re_authenticate(&self) -> bool {
        self.authenticate().await
    }
}

type StateProvider = Arc<dyn Fn() -> String + Send + Sync>;

pub struct AuthorizationFlow<C, B>
where
    C: OAuthHttpClient,
    B: BrowserSession,
{
    config: OAuthConfig,
    session: Arc<Session>,
    oauth_client: Arc<C>,
    browser_session: Arc<B>,
    state_provider: StateProvider,
    now_provider: NowProvider,
}

impl<C, B> AuthorizationFlow<C, B>
where
    C: OAuthHttpClient,
    B: BrowserSession,
{
    pub fn new(
        config: OAuthConfig,
        session: Arc<Session>,
        oauth_client: Arc<C>,
        browser_session: Arc<B>,
    ) -> Self {
        Self {
            config,
            session,
            oauth_client,
            browser_session,
            state_provider: Arc::new(|| uuid::Uuid::new_v4().to_string()),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_state_provider(mut self, state_provider: StateProvider) -> Self {
        self.state_provider = state_provider;
        self
    }

    pub fn build_authorization_url(&self, state: &str) -> Result<Url, InfraError> {
        if state.trim().is_empty() {
            return Err(InfraError::Authorization("state must not be empty".to_string()));
        }
        if self.config.scopes.is_empty() {
            return Err(InfraError::Authorization(
                "at least one scope is required".to_string(),
            ));
        }

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|error| InfraError::InvalidUrl(format!("authorization endpoint: {error}")))?;
        let scope = self.config.scopes.join(" ");

        url.query_pairs_mut()
            .append_pair("scope", &scope)
            .append_pair("client_id", &self.config.client_id)
            .append_pair("state", state)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code");

        Ok(url)
    }

    pub async fn authenticate_with_code(&self, authorization_code: &str) -> Result<OAuthToken, InfraError> {
        if authorization_code.trim().is_empty() {
            return Err(InfraError::MissingAuthorizationCode);
        }

        let response = self
            .oauth_client
            .exchange_authorization_code(OAuthCodeExchangeRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                redirect_uri: self.config.redirect_uri.clone(),
                authorization_code: authorization_code.to_string(),
            })
            .await?;

        let token = self.token_from_response(response);
        self.session.establish(token.clone())?;
        Ok(token)
    }

    /// Runs the full interactive flow: present, read the callback, exchange.
    pub async fn try_authenticate(&self) -> Result<OAuthToken, InfraError> {
        let state = (self.state_provider)();
        let authorization_url = self.build_authorization_url(&state)?;
        let callback_scheme = Url::parse(&self.config.redirect_uri)
            .map_err(|error| InfraError::InvalidUrl(format!("redirect uri: {error}")))?
            .scheme()
            .to_string();

        let callback = self
            .browser_session
            .present(PresentationRequest {
                authorization_url,
                callback_scheme,
                ephemeral: true,
            })
            .await?;

        let code = extract_authorization_code(&callback, &state)?;
        self.authenticate_with_code(&code).await
    }

    fn token_from_response(&self, response: OAuthTokenResponse) -> OAuthToken {
        let expires_at = response
            .expires_in
            .map(|seconds| (self.now_provider)() + Duration::seconds(seconds.max(0)));
        OAuthToken {
            access_token: response.access_token,
            token_type: response.token_type.unwrap_or_else(|| "bearer".to_string()),
            scope: response.scope,
            expires_at,
        }
    }
}

#[async_trait]
impl<C, B> Authenticator for AuthorizationFlow<C, B>
where
    C: OAuthHttpClient + 'static,
    B: BrowserSession + 'static,
{
    async fn authenticate(&self) -> bool {
        match self.try_authenticate().await {
            Ok(token) => {
                info!(scope = ?token.scope, expires_at = ?token.expires_at, "logged in to TickTick");
                true
            }
            Err(error) => {
                warn!(%error, "authorization failed");
                false
            }
        }
    }

    async fn re_authenticate(&self) -> bool {
        info!("credential rejected; starting authorization again");
        self.authenticate().await
    }
}

/// Reads `code` from the redirect. A `state` that is present but differs
/// from the one sent is rejected.
pub fn extract_authorization_code(callback: &Url, expected_state: &str) -> Result<String, InfraError> {
    let mut code = None;
    let mut state = None;
    for (key, value) in callback.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    if state.is_some_and(|state| state != expected_state) {
        return Err(InfraError::Authorization(
            "callback state does not match the authorization request".to_string(),
        ));
    }

    code.filter(|code| !code.trim().is_empty())
        .ok_or(InfraError::MissingAuthorizationCode)
}
