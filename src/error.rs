use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("SSH connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Remote command `{command}` failed{}: {stderr}", exit_suffix(.status))]
    RemoteCommandFailed {
        command: String,
        status: Option<u32>,
        stderr: String,
    },

    #[error("Listing failed: {0}")]
    ListingFailed(String),

    #[error("Transfer of {name} failed: {reason}")]
    TransferFailed { name: String, reason: String },

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Russh error: {0}")]
    RusshError(#[from] russh::Error),
}

fn exit_suffix(status: &Option<u32>) -> String {
    match status {
        Some(code) => format!(" with exit status {code}"),
        None => " without an exit status".to_string(),
    }
}

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;
