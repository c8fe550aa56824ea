//! Derives what the menu bar should show from the fetched tasks and the clock.
//!
//! Everything here is a pure function of its inputs so the periodic tick and a
//! completed refresh always converge on the same [`DisplayState`].

use crate::domain::models::{DisplayState, TaskEntry};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// Computes the display state for `tasks` at `now`, using the wall-clock day
/// of `now`'s time zone as "today".
pub fn recompute<Tz: TimeZone>(tasks: &[TaskEntry], now: DateTime<Tz>) -> DisplayState {
    let now_utc = now.with_timezone(&Utc);
    let Some((today_start, today_end)) = day_bounds(&now.timezone(), now.date_naive()) else {
        return DisplayState::no_task();
    };

    let today_tasks = todays_tasks(tasks, today_start, today_end);
    if today_tasks.is_empty() {
        return DisplayState::no_task();
    }

    let mut pending = today_tasks
        .into_iter()
        .filter(|task| task.end_date.is_none_or(|end_date| end_date > now_utc));

    let Some(current) = pending.next() else {
        return DisplayState::all_tasks_completed();
    };

    DisplayState {
        title: current.truncated_title(),
        time_remaining: current.remaining_time(now_utc),
        color: current.project_color.clone(),
        upcoming: pending.cloned().collect(),
    }
}

/// Tasks that belong to `[today_start, today_end)`, or undated all-day tasks,
/// ordered by start with undated tasks last.
fn todays_tasks(
    tasks: &[TaskEntry],
    today_start: DateTime<Utc>,
    today_end: DateTime<Utc>,
) -> Vec<&TaskEntry> {
    let mut today_tasks: Vec<&TaskEntry> = tasks
        .iter()
        .filter(|task| match task.start_date {
            Some(start_date) => start_date >= today_start && start_date < today_end,
            None => task.is_all_day,
        })
        .collect();

    // `sort_by_key` is stable, so equal starts keep their fetched order.
    today_tasks.sort_by_key(|task| (task.start_date.is_none(), task.start_date));
    today_tasks
}

fn day_bounds<Tz: TimeZone>(timezone: &Tz, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = local_midnight(timezone, date)?;
    let end = local_midnight(timezone, date.succ_opt()?)?;
    Some((start, end))
}

fn local_midnight<Tz: TimeZone>(timezone: &Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
    let midnight = date.and_time(NaiveTime::MIN);
    timezone
        .from_local_datetime(&midnight)
        .earliest()
        // Zones that skip midnight on a DST switch start the day an hour later.
        .or_else(|| {
            timezone
                .from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
        })
        .map(|value| value.with_timezone(&Utc))
}
