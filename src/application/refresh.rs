use crate::application::NowProvider;
use crate::application::display_store::{DisplayEvent, DisplayStore};
use crate::application::oauth::Authenticator;
use crate::application::task_aggregator::TaskAggregator;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session::Session;
use crate::infrastructure::ticktick_client::TickTickClient;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// Periodic refresh; never opens the authorization page on its own.
    Scheduled,
    /// User asked for it; logs in first when there is no session.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { task_count: usize },
    /// Another refresh was still in flight.
    Skipped,
    NotAuthenticated,
}

pub struct RefreshService<A, C>
where
    A: Authenticator,
    C: TickTickClient,
{
    aggregator: TaskAggregator<C>,
    authenticator: Arc<A>,
    session: Arc<Session>,
    display: Arc<DisplayStore>,
    now_provider: NowProvider,
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<A, C> RefreshService<A, C>
where
    A: Authenticator,
    C: TickTickClient + 'static,
{
    pub fn new(
        aggregator: TaskAggregator<C>,
        authenticator: Arc<A>,
        session: Arc<Session>,
        display: Arc<DisplayStore>,
    ) -> Self {
        Self {
            aggregator,
            authenticator,
            session,
            display,
            now_provider: Arc::new(Utc::now),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn display(&self) -> &Arc<DisplayStore> {
        &self.display
    }

    /// Fetches today's tasks and publishes them. A rejected credential leads
    /// to one re-authentication and a single retry.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> Result<RefreshOutcome, InfraError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(?trigger, "refresh already in flight; skipping");
            return Ok(RefreshOutcome::Skipped);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let outcome = self.refresh_exclusive(trigger).await;
        self.display
            .update(DisplayEvent::AuthenticationChanged(self.session.is_authenticated()));
        if let Err(error) = &outcome {
            warn!(%error, "refresh failed; keeping last display state");
            self.display.update(DisplayEvent::RefreshFailed {
                error: error.to_string(),
            });
        }
        outcome
    }

    async fn refresh_exclusive(&self, trigger: RefreshTrigger) -> Result<RefreshOutcome, InfraError> {
        if !self.session.is_authenticated() {
            if trigger == RefreshTrigger::Scheduled {
                debug!("not logged in; scheduled refresh skipped");
                return Ok(RefreshOutcome::NotAuthenticated);
            }
            if !self.authenticator.authenticate().await {
                return Ok(RefreshOutcome::NotAuthenticated);
            }
        }

        let tasks = match self.aggregator.fetch_today_tasks().await {
            Err(InfraError::AuthenticationRequired) => {
                self.display.update(DisplayEvent::AuthenticationChanged(false));
                if !self.authenticator.re_authenticate().await {
                    return Ok(RefreshOutcome::NotAuthenticated);
                }
                self.aggregator.fetch_today_tasks().await?
            }
            result => result?,
        };

        let task_count = tasks.len();
        self.display.update(DisplayEvent::TasksRefreshed {
            tasks,
            now: (self.now_provider)(),
        });
        info!(task_count, "display refreshed");
        Ok(RefreshOutcome::Refreshed { task_count })
    }
}
