use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;
use ticktick_menubar::application::bootstrap::bootstrap_workspace;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_FILE: &str = "ticktick.log";

#[tokio::main]
async fn main() -> ExitCode {
    let workspace_root = match std::env::current_dir() {
        Ok(path) => path,
        Err(error) => {
            eprintln!("failed to resolve current directory: {error}");
            return ExitCode::FAILURE;
        }
    };

    let bootstrap = match bootstrap_workspace(&workspace_root) {
        Ok(bootstrap) => bootstrap,
        Err(error) => {
            eprintln!("failed to prepare workspace: {error}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = init_logging(&bootstrap.logs_dir) {
        eprintln!("failed to open log file: {error}");
        return ExitCode::FAILURE;
    }

    match ticktick_menubar::run(bootstrap).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "TickTick menu bar stopped");
            ExitCode::FAILURE
        }
    }
}

/// Human-readable output on stderr plus JSON lines in `logs/ticktick.log`.
fn init_logging(logs_dir: &Path) -> std::io::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs_dir.join(LOG_FILE))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);
    let json_layer = fmt::layer()
        .json()
        .with_writer(Mutex::new(log_file))
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(json_layer)
        .init();
    Ok(())
}
