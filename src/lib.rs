pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    AppState, DisplayStateResponse, LoginResponse, RefreshResponse, display_state_impl,
    login_impl, logout_impl, refresh_impl, restore_session_impl,
};
use application::bootstrap::BootstrapResult;
use application::display_store::DisplayStore;
use application::scheduler::{spawn_refresh_loop, spawn_session_watch, spawn_tick_loop};
use chrono::Utc;
use infrastructure::error::InfraError;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub async fn login(state: &AppState) -> Result<LoginResponse, String> {
    login_impl(state)
        .await
        .map_err(|error| state.command_error("login", &error))
}

pub fn logout(state: &AppState) -> Result<(), String> {
    logout_impl(state).map_err(|error| state.command_error("logout", &error))
}

pub async fn refresh(state: &AppState) -> Result<RefreshResponse, String> {
    refresh_impl(state)
        .await
        .map_err(|error| state.command_error("refresh", &error))
}

pub fn display_state(state: &AppState) -> DisplayStateResponse {
    display_state_impl(state)
}

/// Runs the menu bar backend headless until Ctrl-C, logging the display
/// line whenever it changes.
pub async fn run(bootstrap: BootstrapResult) -> Result<(), InfraError> {
    let state = AppState::new(bootstrap)?;
    info!(workspace = %state.workspace_root().display(), "starting TickTick menu bar");

    let restored = match restore_session_impl(&state) {
        Ok(restored) => restored,
        Err(error) => {
            warn!(%error, "could not read stored credential");
            false
        }
    };

    let config = state.config().clone();
    let handles = vec![
        spawn_presenter(Arc::clone(state.display())),
        spawn_session_watch(Arc::clone(state.session()), Arc::clone(state.display())),
        spawn_tick_loop(
            Arc::clone(state.display()),
            config.tick_interval,
            Arc::new(Utc::now),
        ),
        spawn_refresh_loop(Arc::clone(state.refresh_service()), config.refresh_interval),
    ];

    let interactive = async {
        if !restored {
            match login(&state).await {
                Ok(response) if !response.authenticated => {
                    warn!("not logged in; restart to try again");
                }
                Ok(_) | Err(_) => {}
            }
        }
        std::future::pending::<()>().await
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("received Ctrl+C, shutting down");
        }
        _ = interactive => {}
    }

    for handle in handles {
        handle.abort();
    }
    Ok(())
}

fn spawn_presenter(display: Arc<DisplayStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut receiver = display.subscribe();
        let mut shown: Option<(String, Vec<String>)> = None;
        loop {
            let snapshot = receiver.borrow_and_update().clone();
            let current = (snapshot.headline(), snapshot.upcoming_lines());
            if shown.as_ref() != Some(&current) {
                info!(
                    headline = %current.0,
                    color = %snapshot.state.color,
                    upcoming = ?current.1,
                    "display updated"
                );
                shown = Some(current);
            }
            if receiver.changed().await.is_err() {
                break;
            }
        }
    })
}
