use crate::domain::models::{DisplayState, NOT_LOGGED_IN_TEXT, TaskEntry};
use crate::domain::schedule;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// What the presentation surface renders, published on every change.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct DisplaySnapshot {
    pub authenticated: bool,
    pub state: DisplayState,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl DisplaySnapshot {
    /// Menu bar line, or the logged-out text when there is no session.
    pub fn headline(&self) -> String {
        if self.authenticated {
            self.state.display_text()
        } else {
            NOT_LOGGED_IN_TEXT.to_string()
        }
    }

    pub fn upcoming_lines(&self) -> Vec<String> {
        self.state
            .upcoming
            .iter()
            .map(|task| task.formatted_line(&Local))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum DisplayEvent {
    TasksRefreshed {
        tasks: Vec<TaskEntry>,
        now: DateTime<Utc>,
    },
    Tick {
        now: DateTime<Utc>,
    },
    RefreshFailed {
        error: String,
    },
    AuthenticationChanged(bool),
}

/// Single writer of the derived display state.
///
/// The task set is replaced wholesale on each refresh; ticks only re-derive
/// from the current set. A failed refresh keeps the last good state.
#[derive(Debug)]
pub struct DisplayStore {
    tasks: Mutex<Arc<Vec<TaskEntry>>>,
    snapshot: watch::Sender<DisplaySnapshot>,
}

impl Default for DisplayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(DisplaySnapshot::default());
        Self {
            tasks: Mutex::new(Arc::new(Vec::new())),
            snapshot,
        }
    }

    pub fn update(&self, event: DisplayEvent) {
        match event {
            DisplayEvent::TasksRefreshed { tasks, now } => {
                // Held until published so a tick cannot overwrite this set's
                // state with one derived from the previous set.
                let mut current = self.lock_tasks();
                *current = Arc::new(tasks);
                let state = schedule::recompute(&current, now.with_timezone(&Local));
                self.snapshot.send_if_modified(|snapshot| {
                    snapshot.state = state;
                    snapshot.last_refreshed_at = Some(now);
                    snapshot.last_error = None;
                    true
                });
            }
            DisplayEvent::Tick { now } => {
                let current = self.lock_tasks();
                let state = schedule::recompute(&current, now.with_timezone(&Local));
                self.snapshot.send_if_modified(|snapshot| {
                    if snapshot.state == state {
                        return false;
                    }
                    snapshot.state = state;
                    true
                });
            }
            DisplayEvent::RefreshFailed { error } => {
                self.snapshot.send_if_modified(|snapshot| {
                    if snapshot.last_error.as_deref() == Some(error.as_str()) {
                        return false;
                    }
                    snapshot.last_error = Some(error);
                    true
                });
            }
            DisplayEvent::AuthenticationChanged(authenticated) => {
                self.snapshot.send_if_modified(|snapshot| {
                    if snapshot.authenticated == authenticated {
                        return false;
                    }
                    snapshot.authenticated = authenticated;
                    true
                });
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplaySnapshot> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn current_tasks(&self) -> Arc<Vec<TaskEntry>> {
        Arc::clone(&self.lock_tasks())
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Arc<Vec<TaskEntry>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
