use std::borrow::Cow;
use std::path::PathBuf;

use crossterm::cursor::Show;
use crossterm::execute;
use crossterm::terminal::{LeaveAlternateScreen, disable_raw_mode};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{AppError, Result};

const LOG_FILE_NAME: &str = "ssm.log";

pub fn init_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // intentionally ignore errors here since we're already in a panic
        let _ = restore_tui();
        original_hook(panic_info);
    }));
}

pub fn restore_tui() -> std::io::Result<()> {
    disable_raw_mode()?;
    execute!(std::io::stdout(), LeaveAlternateScreen, Show)?;
    Ok(())
}

/// Directory holding `ssm.log`: the user cache dir, or the working directory.
pub fn log_directory() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("ssm"))
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn init_tracing(log_level: &str) -> Result<()> {
    let file_appender = tracing_appender::rolling::never(log_directory(), LOG_FILE_NAME);

    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Priority: RUST_LOG env var > command line arg > default (info)
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let fmt_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| AppError::ConfigError(format!("Failed to initialize tracing: {}", e)))?;

    // Logging lasts for the whole process, so the guard is never dropped
    std::mem::forget(_guard);

    Ok(())
}

/// Expand a leading `~/` against the local home directory.
pub fn expand_tilde(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir().ok_or_else(|| {
                AppError::ConfigError("Cannot determine the home directory".to_string())
            })?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Quote a value for a POSIX shell on the remote side.
///
/// Values made only of shell-safe characters are passed through unchanged.
pub fn shell_quote(value: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(value)).into_owned()
}

/// Join a remote directory and an entry name with exactly one `/`.
pub fn join_remote_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Split a remote path into `(parent, base name)`.
///
/// `/var/log/` gives `("/var", "log")`, `logs` gives `(".", "logs")`.
pub fn split_remote_path(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return ("/".to_string(), String::new());
    }
    match trimmed.rsplit_once('/') {
        Some(("", base)) => ("/".to_string(), base.to_string()),
        Some((parent, base)) => (parent.to_string(), base.to_string()),
        None => (".".to_string(), trimmed.to_string()),
    }
}
