mod app;
mod async_ssh_client;
mod browser;
mod cli;
mod config;
mod error;
mod events;
mod key_event;
mod remote;
mod transfer;
mod ui;
mod utils;

// Re-export commonly used types
pub use app::{BrowseOptions, browse_with_session, run_interactive_browse};
pub use async_ssh_client::SshSession;
pub use browser::{Action, Browser, Command as BrowserCommand, Message, NavigationState};
pub use cli::{Cli, Command, run};
// `ProfileCipher` is the sealing contract for profile sync clients.
pub use config::encryption::{PasswordEncryption, ProfileCipher};
pub use config::{AuthMethod, ConfigManager, ConnectTarget};
pub use error::{AppError, Result};
pub use remote::{RemoteEntry, RemoteSession, RemoteStdout, list_directory};
pub use transfer::{TransferOutcome, download};
pub use ui::render_lines;
pub use utils::{init_panic_hook, init_tracing};
