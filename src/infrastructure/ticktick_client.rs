use crate::domain::models::Project;
use crate::infrastructure::api_gateway::{ApiGateway, ApiPayload};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

/// Read-only view of the TickTick resources the menu bar needs.
#[async_trait]
pub trait TickTickClient: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>, InfraError>;

    /// Raw task records of one project, as returned by the service.
    async fn project_tasks(&self, project_id: &str) -> Result<Vec<Value>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct GatewayTickTickClient {
    gateway: ApiGateway,
}

impl GatewayTickTickClient {
    pub fn new(gateway: ApiGateway) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl TickTickClient for GatewayTickTickClient {
    async fn list_projects(&self) -> Result<Vec<Project>, InfraError> {
        let payload = self.gateway.call("project", Method::GET, None).await?;
        let ApiPayload::Array(items) = payload else {
            return Err(InfraError::Parse("failed to parse projects".to_string()));
        };

        let projects: Vec<Project> = items.iter().filter_map(project_from_value).collect();
        debug!(count = projects.len(), "fetched projects");
        Ok(projects)
    }

    async fn project_tasks(&self, project_id: &str) -> Result<Vec<Value>, InfraError> {
        let encoded_id: String = form_urlencoded::byte_serialize(project_id.as_bytes()).collect();
        let path = format!("project/{encoded_id}/data");
        let payload = self.gateway.call(&path, Method::GET, None).await?;

        match payload {
            ApiPayload::Object(mut object) => match object.remove("tasks") {
                Some(Value::Array(tasks)) => Ok(tasks),
                _ => Err(InfraError::Parse(format!(
                    "failed to parse project data for {project_id}"
                ))),
            },
            ApiPayload::Array(_) => Err(InfraError::Parse(format!(
                "failed to parse project data for {project_id}"
            ))),
        }
    }
}

fn project_from_value(value: &Value) -> Option<Project> {
    let id = value.get("id")?.as_str()?.trim();
    if id.is_empty() {
        return None;
    }
    let color = value
        .get("color")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|color| !color.is_empty())
        .map(ToOwned::to_owned);
    Some(Project {
        id: id.to_string(),
        color,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::OAuthToken;
    use crate::infrastructure::api_gateway::RetryPolicy;
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use crate::infrastructure::session::Session;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GatewayTickTickClient {
        let session = Session::new(Arc::new(InMemoryCredentialStore::default()));
        session
            .establish(OAuthToken::bearer("test-token"))
            .expect("establish session");
        let gateway = ApiGateway::new(&format!("{}/open/v1/", server.uri()), Arc::new(session))
            .expect("gateway")
            .with_retry_policy(RetryPolicy {
                max_retries: 0,
                delay: Duration::from_millis(1),
            });
        GatewayTickTickClient::new(gateway)
    }

    #[tokio::test]
    async fn list_projects_keeps_ids_and_colors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/open/v1/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "inbox", "name": "Inbox"},
                {"id": "work", "name": "Work", "color": "#4772FA"},
                {"name": "missing id", "color": "#000000"}
            ])))
            .mount(&server)
            .await;

        let projects = client(&server).list_projects().await.expect("projects");

        assert_eq!(
            projects,
            vec![
                Project {
                    id: "inbox".to_string(),
                    color: None
                },
                Project {
                    id: "work".to_string(),
                    color: Some("#4772FA".to_string())
                },
            ]
        );
    }

    #[tokio::test]
    async fn list_projects_rejects_object_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/open/v1/project"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "projects": []
            })))
            .mount(&server)
            .await;

        let result = client(&server).list_projects().await;
        assert!(matches!(result, Err(InfraError::Parse(_))));
    }

    #[tokio::test]
    async fn project_tasks_extracts_task_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/open/v1/project/work/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "project": {"id": "work"},
                "tasks": [
                    {"id": "t1", "title": "Standup", "projectId": "work"},
                    {"id": "t2", "title": "Review", "projectId": "work"}
                ],
                "columns": []
            })))
            .mount(&server)
            .await;

        let tasks = client(&server).project_tasks("work").await.expect("tasks");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1]["title"], "Review");
    }

    #[tokio::test]
    async fn project_data_without_tasks_is_a_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/open/v1/project/work/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "project": {"id": "work"}
            })))
            .mount(&server)
            .await;

        let result = client(&server).project_tasks("work").await;
        assert!(matches!(result, Err(InfraError::Parse(_))));
    }
}
