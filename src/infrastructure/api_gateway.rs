use crate::infrastructure::error::InfraError;
use crate::infrastructure::session::Session;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "https://api.ticktick.com/open/v1/";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts made after the first one fails.
    pub max_retries: u8,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiPayload {
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

/// Authenticated access to the TickTick open API.
#[derive(Debug, Clone)]
pub struct ApiGateway {
    client: Client,
    base_url: Url,
    session: Arc<Session>,
    retry_policy: RetryPolicy,
}

impl ApiGateway {
    pub fn new(base_url: &str, session: Arc<Session>) -> Result<Self, InfraError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|error| InfraError::InvalidUrl(format!("api base url: {error}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            session,
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Calls `path` relative to the API base. Transient failures are retried
    /// with a fixed delay; a 401 invalidates the session (unless the rejected
    /// credential was already replaced) and is returned at once as
    /// [`InfraError::AuthenticationRequired`].
    pub async fn call(
        &self,
        path: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<ApiPayload, InfraError> {
        let url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|error| InfraError::InvalidUrl(format!("{path}: {error}")))?;
        let mut retries: u8 = 0;

        loop {
            // Read per attempt: a re-authentication may land between retries.
            let Some(access_token) = self.session.access_token() else {
                return Err(InfraError::AuthenticationRequired);
            };

            match self.send_once(&url, &access_token, method.clone(), body).await {
                Ok(payload) => return Ok(payload),
                Err(InfraError::AuthenticationRequired) => {
                    if self.session.invalidate_if(&access_token) {
                        warn!(%url, "credential rejected; session invalidated");
                    } else {
                        debug!(%url, "rejected credential already replaced; keeping session");
                    }
                    return Err(InfraError::AuthenticationRequired);
                }
                Err(error) if error.is_transient() && retries < self.retry_policy.max_retries => {
                    retries += 1;
                    warn!(
                        %url,
                        %error,
                        retry = retries,
                        delay_ms = self.retry_policy.delay.as_millis() as u64,
                        "api call failed; retrying"
                    );
                    sleep(self.retry_policy.delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn send_once(
        &self,
        url: &Url,
        access_token: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<ApiPayload, InfraError> {
        debug!(%url, %method, "calling TickTick api");
        let mut request = self
            .client
            .request(method, url.clone())
            .bearer_auth(access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.body(serde_json::to_vec(body)?);
        }

        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("request to {url} failed: {error}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(InfraError::AuthenticationRequired);
        }
        if !status.is_success() {
            return Err(InfraError::Http(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| InfraError::Network(format!("failed reading response from {url}: {error}")))?;
        parse_payload(&bytes)
    }
}

fn parse_payload(bytes: &[u8]) -> Result<ApiPayload, InfraError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|error| {
        InfraError::Parse(format!(
            "{error}; body={}",
            String::from_utf8_lossy(bytes)
        ))
    })?;
    match value {
        Value::Object(object) => Ok(ApiPayload::Object(object)),
        Value::Array(array) => Ok(ApiPayload::Array(array)),
        other => Err(InfraError::Parse(format!("unexpected JSON structure: {other}"))),
    }
}
