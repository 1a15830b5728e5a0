use std::path::PathBuf;

use super::StorageError;

/// Expands a leading `~` or `$HOME` against the HOME environment variable.
pub(crate) fn expand_home_path(raw_path: &str) -> Result<PathBuf, StorageError> {
    let suffix = if raw_path == "~" || raw_path == "$HOME" {
        Some("")
    } else {
        raw_path
            .strip_prefix("~/")
            .or_else(|| raw_path.strip_prefix("$HOME/"))
    };

    match suffix {
        Some(suffix) => {
            let home = std::env::var("HOME").map_err(|_| StorageError::HomeDirectoryUnavailable)?;
            Ok(PathBuf::from(home).join(suffix))
        }
        None => Ok(PathBuf::from(raw_path)),
    }
}
