use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

pub const DEFAULT_PROJECT_COLOR: &str = "#CCCCCC";
pub const NO_TASK_TITLE: &str = "No task";
pub const ALL_TASKS_COMPLETED_TITLE: &str = "All tasks completed";
pub const NOT_LOGGED_IN_TEXT: &str = "Not logged in";

const TITLE_TRUNCATE_THRESHOLD: usize = 25;
const TITLE_TRUNCATED_LENGTH: usize = 20;
const NOW_WINDOW_SECONDS: i64 = 300;
const WEB_TASK_URL_BASE: &str = "https://ticktick.com/webapp/#q/today/tasks/";
const APP_TASK_URL_BASE: &str = "ticktick://task/";

/// Bearer credential issued by the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "bearer".to_string(),
            scope: None,
            expires_at: None,
        }
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.trim().is_empty()
            && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskEntry {
    pub id: String,
    pub title: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_all_day: bool,
    pub project_color: String,
    pub project_id: String,
}

impl TaskEntry {
    pub fn truncated_title(&self) -> String {
        truncate_title(&self.title)
    }

    /// Countdown label relative to `now`, e.g. `in 1h 5m`, `now`, `20m left`.
    pub fn remaining_time(&self, now: DateTime<Utc>) -> String {
        let (Some(start_date), Some(end_date)) = (self.start_date, self.end_date) else {
            return if self.is_all_day {
                "All Day".to_string()
            } else {
                String::new()
            };
        };

        let until_start = start_date - now;
        let until_end = end_date - now;

        if until_start > Duration::zero() {
            format!("in {}", format_interval(until_start))
        } else if until_end > Duration::zero() {
            if until_start > Duration::seconds(-NOW_WINDOW_SECONDS) {
                "now".to_string()
            } else {
                format!("{} left", format_interval(until_end))
            }
        } else {
            "ended".to_string()
        }
    }

    /// Line used for the upcoming list: `HH:MM • title` or `All Day • title`.
    pub fn formatted_line<Tz>(&self, timezone: &Tz) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        match self.start_date {
            Some(start_date) => format!(
                "{} • {}",
                start_date.with_timezone(timezone).format("%H:%M"),
                self.truncated_title()
            ),
            None => format!("All Day • {}", self.truncated_title()),
        }
    }

    pub fn web_url(&self) -> String {
        format!("{WEB_TASK_URL_BASE}{}", self.id)
    }

    pub fn app_url(&self) -> String {
        format!("{APP_TASK_URL_BASE}{}", self.id)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DisplayState {
    pub title: String,
    pub time_remaining: String,
    pub color: String,
    pub upcoming: Vec<TaskEntry>,
}

impl DisplayState {
    pub fn no_task() -> Self {
        Self::sentinel(NO_TASK_TITLE)
    }

    pub fn all_tasks_completed() -> Self {
        Self::sentinel(ALL_TASKS_COMPLETED_TITLE)
    }

    fn sentinel(title: &str) -> Self {
        Self {
            title: title.to_string(),
            time_remaining: String::new(),
            color: DEFAULT_PROJECT_COLOR.to_string(),
            upcoming: Vec::new(),
        }
    }

    pub fn display_text(&self) -> String {
        if self.time_remaining.is_empty() {
            self.title.clone()
        } else {
            format!("{} • {}", self.title, self.time_remaining)
        }
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::no_task()
    }
}

pub fn truncate_title(title: &str) -> String {
    if title.chars().count() > TITLE_TRUNCATE_THRESHOLD {
        let prefix: String = title.chars().take(TITLE_TRUNCATED_LENGTH).collect();
        format!("{prefix}...")
    } else {
        title.to_string()
    }
}

fn format_interval(interval: Duration) -> String {
    let seconds = interval.num_seconds();
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
