//! Downloading remote entries to the local machine.
//!
//! Files are streamed with `cat`. Directories are archived remotely with
//! `tar`, the archive is streamed like a file and then removed. Local
//! writes go to a temporary file next to the destination and are renamed
//! into place only once the remote command exited cleanly.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::remote::{RemoteEntry, RemoteSession};
use crate::utils::{shell_quote, split_remote_path};

/// Where directory archives are staged on the remote host.
pub const REMOTE_ARCHIVE_DIR: &str = "/tmp";

const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// One entry of a download batch and where it lands locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferJob {
    pub entry: RemoteEntry,
    pub destination: PathBuf,
}

impl TransferJob {
    pub fn new(entry: RemoteEntry, destination_dir: &Path) -> Self {
        let destination = local_destination(destination_dir, &entry);
        Self { entry, destination }
    }
}

/// Result of downloading a single entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferOutcome {
    pub source_name: String,
    pub local_path: PathBuf,
    pub succeeded: bool,
    pub bytes: u64,
    /// Present iff `succeeded` is false.
    pub failure_reason: Option<String>,
}

impl TransferOutcome {
    fn success(source_name: &str, local_path: &Path, bytes: u64) -> Self {
        Self {
            source_name: source_name.to_string(),
            local_path: local_path.to_path_buf(),
            succeeded: true,
            bytes,
            failure_reason: None,
        }
    }

    fn failure(source_name: &str, local_path: &Path, reason: String) -> Self {
        Self {
            source_name: source_name.to_string(),
            local_path: local_path.to_path_buf(),
            succeeded: false,
            bytes: 0,
            failure_reason: Some(reason),
        }
    }
}

/// Local file name for `entry`: leading `/` stripped, `.tar.gz` for directories.
pub fn local_file_name(entry: &RemoteEntry) -> String {
    let name = entry.name.trim_start_matches('/');
    if entry.is_dir {
        format!("{name}{ARCHIVE_SUFFIX}")
    } else {
        name.to_string()
    }
}

pub fn local_destination(destination_dir: &Path, entry: &RemoteEntry) -> PathBuf {
    destination_dir.join(local_file_name(entry))
}

pub fn cat_command(remote_path: &str) -> String {
    format!("cat -- {}", shell_quote(remote_path))
}

/// Archive `remote_dir` so its base name is the top-level entry.
///
/// The base name follows `--`, so names starting with `-` are not options.
pub fn archive_command(remote_dir: &str, archive_path: &str) -> String {
    let (parent, base) = split_remote_path(remote_dir);
    format!(
        "tar -czf {} -C {} -- {}",
        shell_quote(archive_path),
        shell_quote(&parent),
        shell_quote(&base)
    )
}

/// A fresh archive path per call, so concurrent downloads never share one.
pub fn remote_archive_path() -> String {
    format!(
        "{REMOTE_ARCHIVE_DIR}/ssm-{}{ARCHIVE_SUFFIX}",
        Uuid::new_v4().simple()
    )
}

/// Download `entry` to `local_path`. Never fails: errors become a failed outcome.
pub async fn download<S: RemoteSession + ?Sized>(
    session: &S,
    entry: &RemoteEntry,
    local_path: &Path,
) -> TransferOutcome {
    let result = if entry.is_dir {
        download_directory(session, &entry.path, local_path).await
    } else {
        download_file(session, &entry.path, local_path).await
    };

    match result {
        Ok(bytes) => {
            info!(
                "Downloaded '{}' to '{}' ({} bytes)",
                entry.path,
                local_path.display(),
                bytes
            );
            TransferOutcome::success(&entry.name, local_path, bytes)
        }
        Err(e) => {
            let err = AppError::TransferFailed {
                name: entry.name.clone(),
                reason: e.to_string(),
            };
            warn!("{}", err);
            TransferOutcome::failure(&entry.name, local_path, e.to_string())
        }
    }
}

/// Stream `remote_path` into `local_path`, returning the number of bytes copied.
pub async fn download_file<S: RemoteSession + ?Sized>(
    session: &S,
    remote_path: &str,
    local_path: &Path,
) -> Result<u64> {
    let parent = local_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    // Removed automatically unless persisted below
    let staging = tempfile::Builder::new()
        .prefix(".ssm-")
        .suffix(".part")
        .tempfile_in(parent)?;
    let mut file = tokio::fs::File::from_std(staging.reopen()?);

    let command = cat_command(remote_path);
    debug!("Streaming remote file: {}", command);
    let mut stdout = session.stream_stdout(&command).await?;

    let copied = tokio::io::copy(&mut stdout, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    stdout.finish().await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(staging.path(), std::fs::Permissions::from_mode(0o644))?;
    }

    staging.persist(local_path).map_err(|e| e.error)?;
    Ok(copied)
}

/// Archive `remote_dir` remotely, stream the archive to `local_path`, clean up.
pub async fn download_directory<S: RemoteSession + ?Sized>(
    session: &S,
    remote_dir: &str,
    local_path: &Path,
) -> Result<u64> {
    let archive = remote_archive_path();
    let command = archive_command(remote_dir, &archive);
    debug!("Archiving remote directory: {}", command);

    if let Err(e) = session.output(&command).await {
        remove_remote_archive(session, &archive).await;
        return Err(e);
    }

    let result = download_file(session, &archive, local_path).await;
    remove_remote_archive(session, &archive).await;
    result
}

async fn remove_remote_archive<S: RemoteSession + ?Sized>(session: &S, archive: &str) {
    let command = format!("rm -f -- {}", shell_quote(archive));
    if let Err(e) = session.output(&command).await {
        warn!("Failed to remove remote archive '{}': {}", archive, e);
    }
}
