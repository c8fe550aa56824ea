use crate::application::NowProvider;
use crate::domain::models::{DEFAULT_PROJECT_COLOR, TaskEntry};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::ticktick_client::TickTickClient;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const TASK_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

pub struct TaskAggregator<C>
where
    C: TickTickClient,
{
    client: Arc<C>,
    reference_timezone: Tz,
    now_provider: NowProvider,
}

impl<C> TaskAggregator<C>
where
    C: TickTickClient + 'static,
{
    pub fn new(client: Arc<C>, reference_timezone: Tz) -> Self {
        Self {
            client,
            reference_timezone,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Fetches every project's tasks that start today in the reference time
    /// zone. Per-project fetches run concurrently; if any fails, the first
    /// failure (in project order) is returned once all of them have finished.
    pub async fn fetch_today_tasks(&self) -> Result<Vec<TaskEntry>, InfraError> {
        let projects = self.client.list_projects().await?;
        let colors: HashMap<String, String> = projects
            .iter()
            .map(|project| {
                let color = project
                    .color
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PROJECT_COLOR.to_string());
                (project.id.clone(), color)
            })
            .collect();

        let today = (self.now_provider)()
            .with_timezone(&self.reference_timezone)
            .format("%Y-%m-%d")
            .to_string();

        let mut fetches = JoinSet::new();
        for (index, project) in projects.iter().enumerate() {
            let client = Arc::clone(&self.client);
            let project_id = project.id.clone();
            fetches.spawn(async move {
                let result = client.project_tasks(&project_id).await;
                (index, project_id, result)
            });
        }

        let mut results: Vec<Option<Result<Vec<Value>, InfraError>>> =
            (0..projects.len()).map(|_| None).collect();
        let mut join_failure: Option<InfraError> = None;
        while let Some(joined) = fetches.join_next().await {
            let (index, project_id, result) = match joined {
                Ok(fetched) => fetched,
                Err(error) => {
                    warn!(%error, "project fetch task did not complete");
                    join_failure.get_or_insert(InfraError::Join(error));
                    continue;
                }
            };
            match &result {
                Ok(tasks) => debug!(%project_id, count = tasks.len(), "fetched project tasks"),
                Err(error) => warn!(%project_id, %error, "failed to fetch project tasks"),
            }
            results[index] = Some(result);
        }
        if let Some(error) = join_failure {
            return Err(error);
        }

        let mut records = Vec::new();
        for result in results.into_iter().flatten() {
            records.extend(
                result?
                    .into_iter()
                    .filter(|record| starts_on(record, &today)),
            );
        }

        let tasks = map_task_records(&records, &colors);
        info!(projects = projects.len(), tasks = tasks.len(), %today, "fetched today's tasks");
        Ok(tasks)
    }
}

fn starts_on(record: &Value, day: &str) -> bool {
    record
        .get("startDate")
        .and_then(Value::as_str)
        .and_then(|start_date| start_date.get(..10))
        .is_some_and(|date| date == day)
}

pub fn map_task_records(records: &[Value], colors: &HashMap<String, String>) -> Vec<TaskEntry> {
    records
        .iter()
        .filter_map(|record| task_entry_from_record(record, colors))
        .collect()
}

fn task_entry_from_record(record: &Value, colors: &HashMap<String, String>) -> Option<TaskEntry> {
    let id = record.get("id")?.as_str()?;
    let title = record.get("title")?.as_str()?;
    let project_id = record.get("projectId")?.as_str()?;

    let timestamp = |key: &str| {
        record
            .get(key)
            .and_then(Value::as_str)
            .and_then(parse_task_timestamp)
    };

    Some(TaskEntry {
        id: id.to_string(),
        title: title.to_string(),
        start_date: timestamp("startDate"),
        end_date: timestamp("dueDate"),
        is_all_day: record
            .get("isAllDay")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        project_color: colors
            .get(project_id)
            .cloned()
            .unwrap_or_else(|| DEFAULT_PROJECT_COLOR.to_string()),
        project_id: project_id.to_string(),
    })
}

/// Accepts `2024-08-30T09:00:00.000+0000` and RFC 3339 stamps, both only
/// with fractional seconds.
pub fn parse_task_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.as_bytes().get(19) != Some(&b'.') {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, TASK_TIMESTAMP_FORMAT))
        .ok()
        .map(|value| value.with_timezone(&Utc))
}
