//! Background tasks that keep the display fresh.
//!
//! The tick and the remote refresh run independently on their own cadence.
//! A slow refresh never delays the countdown, and the refresh service itself
//! refuses to overlap with a refresh still in flight.

use crate::application::NowProvider;
use crate::application::display_store::{DisplayEvent, DisplayStore};
use crate::application::oauth::Authenticator;
use crate::application::refresh::{RefreshOutcome, RefreshService, RefreshTrigger};
use crate::infrastructure::session::Session;
use crate::infrastructure::ticktick_client::TickTickClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Re-derives the display state from the current task set every `period`.
pub fn spawn_tick_loop(
    display: Arc<DisplayStore>,
    period: Duration,
    now_provider: NowProvider,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            display.update(DisplayEvent::Tick {
                now: now_provider(),
            });
        }
    })
}

/// Fetches today's tasks every `period`, starting immediately.
pub fn spawn_refresh_loop<A, C>(service: Arc<RefreshService<A, C>>, period: Duration) -> JoinHandle<()>
where
    A: Authenticator + 'static,
    C: TickTickClient + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            // Failures are already logged and published by the service.
            if let Ok(outcome @ (RefreshOutcome::Skipped | RefreshOutcome::NotAuthenticated)) =
                service.refresh(RefreshTrigger::Scheduled).await
            {
                debug!(?outcome, "scheduled refresh did not run");
            }
        }
    })
}

/// Mirrors login state changes (including a 401 mid-refresh) into the display.
pub fn spawn_session_watch(session: Arc<Session>, display: Arc<DisplayStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut authenticated = session.subscribe();
        loop {
            let current = *authenticated.borrow_and_update();
            display.update(DisplayEvent::AuthenticationChanged(current));
            if authenticated.changed().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{OAuthToken, TaskEntry};
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use chrono::{DateTime, Local, TimeZone, Utc};

    fn local_morning() -> DateTime<Utc> {
        Local
            .with_ymd_and_hms(2026, 3, 10, 9, 0, 0)
            .earliest()
            .expect("valid local time")
            .with_timezone(&Utc)
    }

    /// Wall clock that advances with tokio's (paused) test clock.
    fn paused_clock(base: DateTime<Utc>) -> NowProvider {
        let started = tokio::time::Instant::now();
        Arc::new(move || {
            let elapsed = chrono::Duration::from_std(started.elapsed()).unwrap_or_default();
            base + elapsed
        })
    }

    #[tokio::test(start_paused = true)]
    async fn tick_loop_advances_countdown() {
        let base = local_morning();
        let display = Arc::new(DisplayStore::new());
        display.update(DisplayEvent::TasksRefreshed {
            tasks: vec![TaskEntry {
                id: "t".to_string(),
                title: "Deep work".to_string(),
                start_date: Some(base + chrono::Duration::minutes(10)),
                end_date: Some(base + chrono::Duration::minutes(70)),
                is_all_day: false,
                project_color: "#4772FA".to_string(),
                project_id: "p".to_string(),
            }],
            now: base,
        });
        assert_eq!(display.snapshot().state.time_remaining, "in 10m");

        let handle = spawn_tick_loop(Arc::clone(&display), Duration::from_secs(30), paused_clock(base));
        tokio::time::sleep(Duration::from_secs(10 * 60 + 5)).await;
        assert_eq!(display.snapshot().state.time_remaining, "now");

        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        assert_eq!(display.snapshot().state.time_remaining, "40m left");

        handle.abort();
    }

    #[tokio::test]
    async fn session_watch_tracks_login_state() {
        let session = Arc::new(Session::new(Arc::new(InMemoryCredentialStore::default())));
        let display = Arc::new(DisplayStore::new());
        let mut receiver = display.subscribe();
        let handle = spawn_session_watch(Arc::clone(&session), Arc::clone(&display));

        session
            .establish(OAuthToken::bearer("token"))
            .expect("establish session");
        receiver
            .wait_for(|snapshot| snapshot.authenticated)
            .await
            .expect("display alive");

        session.invalidate();
        receiver
            .wait_for(|snapshot| !snapshot.authenticated)
            .await
            .expect("display alive");

        handle.abort();
    }
}
