use crate::application::bootstrap::BootstrapResult;
use crate::application::display_store::{DisplayEvent, DisplayStore};
use crate::application::oauth::{AuthorizationFlow, Authenticator, DEFAULT_SCOPES, OAuthConfig};
use crate::application::refresh::{RefreshOutcome, RefreshService, RefreshTrigger};
use crate::application::task_aggregator::TaskAggregator;
use crate::domain::models::TaskEntry;
use crate::infrastructure::api_gateway::ApiGateway;
use crate::infrastructure::browser_session::LoopbackBrowserSession;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::credential_store::KeyringCredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::ReqwestOAuthClient;
use crate::infrastructure::session::Session;
use crate::infrastructure::ticktick_client::{GatewayTickTickClient, TickTickClient};
use chrono::{Local, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

pub type LiveAuthenticator = AuthorizationFlow<ReqwestOAuthClient, LoopbackBrowserSession>;

pub struct AppState<A = LiveAuthenticator, C = GatewayTickTickClient>
where
    A: Authenticator,
    C: TickTickClient,
{
    workspace_root: PathBuf,
    config: AppConfig,
    session: Arc<Session>,
    authenticator: Arc<A>,
    refresh: Arc<RefreshService<A, C>>,
    display: Arc<DisplayStore>,
}

impl AppState {
    /// Wires the live stack over an already bootstrapped workspace; OAuth
    /// client credentials come from the environment.
    pub fn new(bootstrap: BootstrapResult) -> Result<Self, InfraError> {
        let oauth_config = load_oauth_config_from_env(&bootstrap.config)?;
        Self::with_oauth_config(bootstrap, oauth_config)
    }

    pub fn with_oauth_config(
        bootstrap: BootstrapResult,
        oauth_config: OAuthConfig,
    ) -> Result<Self, InfraError> {
        let BootstrapResult {
            workspace_root,
            config,
            ..
        } = bootstrap;

        let session = Arc::new(Session::new(Arc::new(KeyringCredentialStore::default())));
        let browser_session = LoopbackBrowserSession::new(&oauth_config.redirect_uri)?;
        let authenticator = Arc::new(AuthorizationFlow::new(
            oauth_config,
            Arc::clone(&session),
            Arc::new(ReqwestOAuthClient::new()),
            Arc::new(browser_session),
        ));
        let gateway = ApiGateway::new(&config.api_base_url, Arc::clone(&session))?;
        let client = Arc::new(GatewayTickTickClient::new(gateway));

        Ok(Self::from_parts(
            workspace_root,
            config,
            session,
            authenticator,
            client,
        ))
    }
}

impl<A, C> AppState<A, C>
where
    A: Authenticator,
    C: TickTickClient + 'static,
{
    pub fn from_parts(
        workspace_root: PathBuf,
        config: AppConfig,
        session: Arc<Session>,
        authenticator: Arc<A>,
        client: Arc<C>,
    ) -> Self {
        let display = Arc::new(DisplayStore::new());
        let aggregator = TaskAggregator::new(client, config.reference_timezone);
        let refresh = Arc::new(RefreshService::new(
            aggregator,
            Arc::clone(&authenticator),
            Arc::clone(&session),
            Arc::clone(&display),
        ));
        Self {
            workspace_root,
            config,
            session,
            authenticator,
            refresh,
            display,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn display(&self) -> &Arc<DisplayStore> {
        &self.display
    }

    pub fn refresh_service(&self) -> &Arc<RefreshService<A, C>> {
        &self.refresh
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        error!(command, %error, "command failed");
        error.to_string()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub authenticated: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RefreshResponse {
    pub status: &'static str,
    pub task_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UpcomingTaskResponse {
    pub id: String,
    pub line: String,
    pub color: String,
    pub web_url: String,
    pub app_url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DisplayStateResponse {
    pub authenticated: bool,
    pub headline: String,
    pub title: String,
    pub time_remaining: String,
    pub color: String,
    pub upcoming: Vec<UpcomingTaskResponse>,
    pub last_refreshed_at: Option<String>,
    pub last_error: Option<String>,
}

/// Loads the stored credential. An expired one leaves the session logged out.
pub fn restore_session_impl<A, C>(state: &AppState<A, C>) -> Result<bool, InfraError>
where
    A: Authenticator,
    C: TickTickClient + 'static,
{
    let restored = state.session.restore(Utc::now())?;
    state
        .display
        .update(DisplayEvent::AuthenticationChanged(restored));
    Ok(restored)
}

pub async fn login_impl<A, C>(state: &AppState<A, C>) -> Result<LoginResponse, InfraError>
where
    A: Authenticator,
    C: TickTickClient + 'static,
{
    let authenticated = state.authenticator.authenticate().await;
    state
        .display
        .update(DisplayEvent::AuthenticationChanged(state.session.is_authenticated()));
    if authenticated {
        state.refresh.refresh(RefreshTrigger::Scheduled).await?;
    }
    Ok(LoginResponse { authenticated })
}

/// Forgets the in-memory credential. The stored record is kept, so the next
/// start restores it.
pub fn logout_impl<A, C>(state: &AppState<A, C>) -> Result<(), InfraError>
where
    A: Authenticator,
    C: TickTickClient + 'static,
{
    state.session.invalidate();
    state
        .display
        .update(DisplayEvent::AuthenticationChanged(false));
    info!("logged out");
    Ok(())
}

pub async fn refresh_impl<A, C>(state: &AppState<A, C>) -> Result<RefreshResponse, InfraError>
where
    A: Authenticator,
    C: TickTickClient + 'static,
{
    let response = match state.refresh.refresh(RefreshTrigger::Manual).await? {
        RefreshOutcome::Refreshed { task_count } => RefreshResponse {
            status: "refreshed",
            task_count,
        },
        RefreshOutcome::Skipped => RefreshResponse {
            status: "in_progress",
            task_count: state.display.current_tasks().len(),
        },
        RefreshOutcome::NotAuthenticated => RefreshResponse {
            status: "not_authenticated",
            task_count: 0,
        },
    };
    Ok(response)
}

pub fn display_state_impl<A, C>(state: &AppState<A, C>) -> DisplayStateResponse
where
    A: Authenticator,
    C: TickTickClient + 'static,
{
    let snapshot = state.display.snapshot();
    DisplayStateResponse {
        authenticated: snapshot.authenticated,
        headline: snapshot.headline(),
        title: snapshot.state.title.clone(),
        time_remaining: snapshot.state.time_remaining.clone(),
        color: snapshot.state.color.clone(),
        upcoming: snapshot
            .state
            .upcoming
            .iter()
            .map(upcoming_task_response)
            .collect(),
        last_refreshed_at: snapshot.last_refreshed_at.map(|value| value.to_rfc3339()),
        last_error: snapshot.last_error,
    }
}

fn upcoming_task_response(task: &TaskEntry) -> UpcomingTaskResponse {
    UpcomingTaskResponse {
        id: task.id.clone(),
        line: task.formatted_line(&Local),
        color: task.project_color.clone(),
        web_url: task.web_url(),
        app_url: task.app_url(),
    }
}

pub fn load_oauth_config_from_env(config: &AppConfig) -> Result<OAuthConfig, InfraError> {
    load_oauth_config_from_lookup(|key| std::env::var(key).ok(), config)
}

fn load_oauth_config_from_lookup<F>(lookup: F, config: &AppConfig) -> Result<OAuthConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let client_id = required_lookup_value(&lookup, &["TICKTICK_CLIENT_ID"], "ticktick client id")?;
    let client_secret = required_lookup_value(
        &lookup,
        &["TICKTICK_CLIENT_SECRET"],
        "ticktick client secret",
    )?;

    let mut oauth_config = OAuthConfig::new(client_id, client_secret);
    oauth_config.redirect_uri = optional_lookup_value(&lookup, &["TICKTICK_REDIRECT_URI"])
        .unwrap_or_else(|| config.redirect_uri.clone());
    oauth_config.scopes = optional_lookup_value(&lookup, &["TICKTICK_SCOPES"])
        .map(|raw| parse_scope_list(&raw))
        .filter(|scopes| !scopes.is_empty())
        .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|scope| scope.to_string()).collect());
    oauth_config.token_endpoint = config.token_endpoint.clone();
    oauth_config.authorization_endpoint = config.authorization_endpoint.clone();
    Ok(oauth_config)
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn parse_scope_list(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n', '\t'])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{NOT_LOGGED_IN_TEXT, OAuthToken, Project};
    use crate::infrastructure::credential_store::{CredentialStore, InMemoryCredentialStore};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeAuthenticator {
        session: Arc<Session>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for FakeAuthenticator {
        async fn authenticate(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.session
                .establish(OAuthToken::bearer("granted"))
                .is_ok()
        }
    }

    #[derive(Default)]
    struct FakeTickTickClient {
        list_calls: AtomicUsize,
    }

    #[async_trait]
    impl TickTickClient for FakeTickTickClient {
        async fn list_projects(&self) -> Result<Vec<Project>, InfraError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Project {
                id: "inbox".to_string(),
                color: Some("#4772FA".to_string()),
            }])
        }

        async fn project_tasks(&self, _project_id: &str) -> Result<Vec<Value>, InfraError> {
            let now = Utc::now().with_timezone(&chrono_tz::Europe::Madrid);
            Ok(vec![
                serde_json::json!({
                    "id": "all-day",
                    "title": "Plan the week",
                    "projectId": "inbox",
                    "isAllDay": true,
                    "startDate": now.format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string(),
                }),
            ])
        }
    }

    struct Harness {
        store: Arc<InMemoryCredentialStore>,
        authenticator: Arc<FakeAuthenticator>,
        client: Arc<FakeTickTickClient>,
        state: AppState<FakeAuthenticator, FakeTickTickClient>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryCredentialStore::default());
        let session = Arc::new(Session::new(store.clone()));
        let authenticator = Arc::new(FakeAuthenticator {
            session: Arc::clone(&session),
            calls: AtomicUsize::new(0),
        });
        let client = Arc::new(FakeTickTickClient::default());
        let state = AppState::from_parts(
            std::env::temp_dir(),
            AppConfig::default(),
            session,
            Arc::clone(&authenticator),
            Arc::clone(&client),
        );
        Harness {
            store,
            authenticator,
            client,
            state,
        }
    }

    #[test]
    fn oauth_config_validation_reports_missing_client_id() {
        let result = load_oauth_config_from_lookup(
            |key| match key {
                "TICKTICK_CLIENT_SECRET" => Some("secret".to_string()),
                _ => None,
            },
            &AppConfig::default(),
        );
        match result {
            Err(InfraError::InvalidConfig(message)) => {
                assert!(message.contains("ticktick client id"));
            }
            _ => panic!("expected invalid config error"),
        }
    }

    #[test]
    fn oauth_config_uses_app_config_defaults() {
        let oauth_config = load_oauth_config_from_lookup(
            |key| match key {
                "TICKTICK_CLIENT_ID" => Some(" client ".to_string()),
                "TICKTICK_CLIENT_SECRET" => Some("secret".to_string()),
                "TICKTICK_SCOPES" => Some("   ".to_string()),
                _ => None,
            },
            &AppConfig::default(),
        )
        .expect("oauth config");

        assert_eq!(oauth_config.client_id, "client");
        assert_eq!(oauth_config.redirect_uri, "http://127.0.0.1:8080");
        assert_eq!(oauth_config.scopes, vec!["tasks:read", "tasks:write"]);
        assert_eq!(oauth_config.token_endpoint, "https://ticktick.com/oauth/token");
    }

    #[test]
    fn oauth_config_reads_overrides() {
        let oauth_config = load_oauth_config_from_lookup(
            |key| match key {
                "TICKTICK_CLIENT_ID" => Some("client".to_string()),
                "TICKTICK_CLIENT_SECRET" => Some("secret".to_string()),
                "TICKTICK_REDIRECT_URI" => Some("http://127.0.0.1:9090".to_string()),
                "TICKTICK_SCOPES" => Some("tasks:read,tasks:write".to_string()),
                _ => None,
            },
            &AppConfig::default(),
        )
        .expect("oauth config");

        assert_eq!(oauth_config.redirect_uri, "http://127.0.0.1:9090");
        assert_eq!(oauth_config.scopes, vec!["tasks:read", "tasks:write"]);
    }

    #[test]
    fn live_state_uses_bootstrapped_config_as_is() {
        let workspace_root =
            std::env::temp_dir().join(format!("ticktick-state-{}", uuid::Uuid::new_v4()));
        let config = AppConfig {
            tick_interval: std::time::Duration::from_secs(5),
            api_base_url: "http://127.0.0.1:9/open/v1/".to_string(),
            ..AppConfig::default()
        };
        let bootstrap = BootstrapResult {
            workspace_root: workspace_root.clone(),
            config_dir: workspace_root.join("config"),
            logs_dir: workspace_root.join("logs"),
            config: config.clone(),
        };

        let state = AppState::with_oauth_config(bootstrap, OAuthConfig::new("client", "secret"))
            .expect("app state");

        assert_eq!(state.config(), &config);
        assert_eq!(state.workspace_root(), workspace_root.as_path());
        assert!(!workspace_root.exists());
    }

    #[test]
    fn display_state_starts_not_logged_in() {
        let harness = harness();
        let response = display_state_impl(&harness.state);
        assert!(!response.authenticated);
        assert_eq!(response.headline, NOT_LOGGED_IN_TEXT);
        assert!(response.upcoming.is_empty());
        assert_eq!(response.last_refreshed_at, None);
    }

    #[test]
    fn restore_session_reads_stored_credential() {
        let harness = harness();
        harness
            .store
            .save_token(&OAuthToken::bearer("stored"))
            .expect("save token");

        assert!(restore_session_impl(&harness.state).expect("restore"));
        assert!(display_state_impl(&harness.state).authenticated);
    }

    #[tokio::test]
    async fn login_authenticates_and_refreshes() {
        let harness = harness();

        let response = login_impl(&harness.state).await.expect("login");

        assert!(response.authenticated);
        assert_eq!(harness.authenticator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(harness.client.list_calls.load(Ordering::SeqCst), 1);
        let display = display_state_impl(&harness.state);
        assert!(display.authenticated);
        assert_eq!(display.title, "Plan the week");
        assert_eq!(display.headline, "Plan the week • All Day");
    }

    #[tokio::test]
    async fn logout_keeps_stored_credential() {
        let harness = harness();
        login_impl(&harness.state).await.expect("login");

        logout_impl(&harness.state).expect("logout");

        assert!(!harness.state.session().is_authenticated());
        assert!(!display_state_impl(&harness.state).authenticated);
        assert!(harness.store.load_token().expect("load token").is_some());
    }

    #[tokio::test]
    async fn manual_refresh_logs_in_when_needed() {
        let harness = harness();

        let response = refresh_impl(&harness.state).await.expect("refresh");

        assert_eq!(
            response,
            RefreshResponse {
                status: "refreshed",
                task_count: 1
            }
        );
        assert_eq!(harness.authenticator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn command_error_returns_message() {
        let harness = harness();
        let message = harness
            .state
            .command_error("refresh", &InfraError::AuthenticationRequired);
        assert_eq!(message, "Authentication required");
    }
}
