//! Remote directory listing.
//!
//! The remote side runs `ls -lA` and reduces every line to `<mode> <name>`;
//! hidden entries are filtered here, not by the remote command, so toggling
//! them never depends on the remote `ls` flags.

use tracing::debug;

use super::RemoteSession;
use crate::error::{AppError, Result};
use crate::utils::{join_remote_path, shell_quote};

/// Strips the leading `ls -l` columns but keeps spaces inside the name.
///
/// Device nodes print `major, minor` in place of a size, one column more.
const STRIP_COLUMNS_AWK: &str = r#"awk '$1 != "total" { mode = $1; n = (mode ~ /^[cb]/) ? 9 : 8; for (i = 0; i < n; i++) sub(/^[ \t]*[^ \t]+/, ""); sub(/^[ \t]/, ""); print mode " " $0 }'"#;

/// One file or directory on the remote host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    /// `join(listed directory, name)` at the time of listing.
    pub path: String,
}

impl RemoteEntry {
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

/// Build the listing command for `remote_dir`.
///
/// The output of `ls` is captured first so its exit status is not masked by
/// the pipe, and the script runs under `sh` whatever the login shell is.
pub fn listing_command(remote_dir: &str) -> String {
    let script = format!(
        "out=$(LC_ALL=C ls -lA -- {}) || exit $?; printf '%s\\n' \"$out\" | {}",
        shell_quote(remote_dir),
        STRIP_COLUMNS_AWK
    );
    format!("sh -c {}", shell_quote(&script))
}

/// List `remote_dir` on `session`, in the order the remote emitted entries.
pub async fn list_directory<S: RemoteSession + ?Sized>(
    session: &S,
    remote_dir: &str,
    show_hidden: bool,
) -> Result<Vec<RemoteEntry>> {
    let command = listing_command(remote_dir);
    debug!("Listing remote directory: {}", command);

    let output = session
        .output(&command)
        .await
        .map_err(|e| AppError::ListingFailed(e.to_string()))?;

    let entries = parse_listing(&String::from_utf8_lossy(&output), remote_dir, show_hidden)?;
    debug!("Listed '{}': {} entries", remote_dir, entries.len());
    Ok(entries)
}

/// Parse `<mode> <name>` lines into entries rooted at `remote_dir`.
pub fn parse_listing(output: &str, remote_dir: &str, show_hidden: bool) -> Result<Vec<RemoteEntry>> {
    let mut entries = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() || line.starts_with("total ") {
            continue;
        }

        let (mode, name) = line
            .split_once(' ')
            .filter(|(mode, name)| !mode.is_empty() && !name.is_empty())
            .ok_or_else(|| AppError::ListingFailed(format!("malformed listing line: {line:?}")))?;

        let name = match mode.chars().next() {
            // symlinks are listed as `name -> target`
            Some('l') => name.split_once(" -> ").map_or(name, |(link, _)| link),
            _ => name,
        };

        if name == "." || name == ".." {
            continue;
        }
        if !show_hidden && name.starts_with('.') {
            continue;
        }

        entries.push(RemoteEntry {
            name: name.to_string(),
            is_dir: mode.starts_with('d'),
            path: join_remote_path(remote_dir, name),
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::LocalShellSession;
    use std::fs;

    const SAMPLE: &str = "\
-rw-r--r-- a.txt
-rw------- .secret
drwxr-xr-x logs
lrwxrwxrwx current -> logs/x.log
-rw-r--r-- name with spaces.txt
";

    #[test]
    fn test_parse_counts_directories_and_paths() {
        let entries = parse_listing(SAMPLE, "/home/u", true).unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries.iter().filter(|e| e.is_dir).count(), 1);
        for entry in &entries {
            assert_eq!(entry.path, format!("/home/u/{}", entry.name));
        }
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["a.txt", ".secret", "logs", "current", "name with spaces.txt"]
        );
    }

    #[test]
    fn test_hidden_filter_is_subset_without_dot_entries() {
        let all = parse_listing(SAMPLE, "/home/u", true).unwrap();
        let visible = parse_listing(SAMPLE, "/home/u", false).unwrap();

        let expected: Vec<RemoteEntry> = all.into_iter().filter(|e| !e.is_hidden()).collect();
        assert_eq!(visible, expected);
    }

    #[test]
    fn test_listing_command_quotes_directory() {
        let command = listing_command("/srv/it's here");
        assert!(command.starts_with("sh -c '"));
        assert!(command.contains("ls -lA --"));
        assert!(command.contains("it"));
    }

    #[test]
    fn test_symlink_is_a_file_without_target() {
        let entries = parse_listing("lrwxrwxrwx current -> /var/log\n", "/", true).unwrap();
        assert_eq!(entries[0].name, "current");
        assert!(!entries[0].is_dir);
        assert_eq!(entries[0].path, "/current");
    }

    #[test]
    fn test_total_line_and_blank_lines_are_skipped() {
        let entries = parse_listing("total 12\n\n-rw-r--r-- a\n", "/srv", true).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_malformed_line_fails() {
        let result = parse_listing("-rw-r--r--\n", "/srv", true);
        assert!(matches!(result, Err(AppError::ListingFailed(_))));
    }

    #[tokio::test]
    async fn test_list_directory_against_local_shell() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), "hi").unwrap();
        fs::write(tmp.path().join(".secret"), "s").unwrap();
        fs::write(tmp.path().join("two words"), "w").unwrap();
        fs::create_dir(tmp.path().join("logs")).unwrap();

        let dir = tmp.path().to_string_lossy().to_string();
        let session = LocalShellSession::new();

        let mut visible = list_directory(&session, &dir, false).await.unwrap();
        visible.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<&str> = visible.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "logs", "two words"]);
        assert!(visible.iter().find(|e| e.name == "logs").unwrap().is_dir);
        assert_eq!(visible[0].path, format!("{dir}/a.txt"));

        let all = list_directory(&session, &dir, true).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().any(|e| e.name == ".secret"));
    }

    #[tokio::test]
    async fn test_device_nodes_keep_their_names() {
        let session = LocalShellSession::new();
        let entries = list_directory(&session, "/dev", true).await.unwrap();

        let null = entries.iter().find(|e| e.name == "null").unwrap();
        assert!(!null.is_dir);
        assert_eq!(null.path, "/dev/null");

        for entry in &entries {
            let leading = entry.name.split(' ').next().unwrap_or_default();
            let looks_like_time = leading.len() == 5
                && leading.as_bytes()[2] == b':'
                && leading.chars().filter(|c| c.is_ascii_digit()).count() == 4;
            assert!(!looks_like_time, "time column in name: {:?}", entry.name);
        }
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_listing_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope").to_string_lossy().to_string();
        let session = LocalShellSession::new();

        let result = list_directory(&session, &missing, true).await;
        assert!(matches!(result, Err(AppError::ListingFailed(_))));
    }
}
