use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod bootstrap;
pub mod commands;
pub mod display_store;
pub mod oauth;
pub mod refresh;
pub mod scheduler;
pub mod task_aggregator;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
