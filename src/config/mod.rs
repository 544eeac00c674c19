pub mod encryption;
pub mod manager;

pub use manager::{AuthMethod, ConfigManager, ConnectTarget};
