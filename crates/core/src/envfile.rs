//! Line-preserving merge of `KEY=VALUE` entries into an env file.
//!
//! The env file is shared with other tooling, so unrelated lines (including
//! comments and blank lines) must survive the merge verbatim and keys that
//! are updated must keep their original line position. The file is rewritten
//! whole; it is never rebuilt from a flat mapping.

use std::io::ErrorKind;
use std::path::Path;

use regex::{NoExpand, Regex};

use crate::error::BootstrapError;

/// Merge `values` into the env file at `path`, creating it if absent.
///
/// For each `(key, value)` pair in order: the first line matching
/// `^\s*KEY=` is replaced in place; if no line matches, `KEY=VALUE` is
/// appended after trimming trailing whitespace. A missing file starts the
/// merge from empty content; any other read error, and any write error,
/// surfaces as [`BootstrapError::Persistence`].
pub async fn merge_env_file(path: &Path, values: &[(&str, String)]) -> Result<(), BootstrapError> {
    let mut content = match tokio::fs::read_to_string(path).await {
        Ok(existing) => existing,
        Err(error) if error.kind() == ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(BootstrapError::Persistence {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    for (key, value) in values {
        let line = Regex::new(&format!(r"(?m)^\s*{}=.*$", regex::escape(key)))
            .expect("escaped key forms a valid pattern");
        if line.is_match(&content) {
            // NoExpand keeps `$` sequences in values literal.
            content = line
                .replace(&content, NoExpand(format!("{key}={value}").as_str()))
                .into_owned();
        } else {
            let trimmed = content.trim_end();
            content = if trimmed.is_empty() {
                format!("{key}={value}\n")
            } else {
                format!("{trimmed}\n{key}={value}\n")
            };
        }
    }

    tokio::fs::write(path, &content)
        .await
        .map_err(|source| BootstrapError::Persistence {
            path: path.to_path_buf(),
            source,
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    async fn merge_str(
        dir: &tempfile::TempDir,
        initial: Option<&str>,
        values: &[(&str, String)],
    ) -> String {
        let path = dir.path().join(".env");
        if let Some(text) = initial {
            tokio::fs::write(&path, text).await.unwrap();
        }
        merge_env_file(&path, values).await.unwrap();
        tokio::fs::read_to_string(&path).await.unwrap()
    }

    #[tokio::test]
    async fn replaces_in_place_and_appends_new_keys() {
        let dir = tempfile::tempdir().unwrap();
        let merged = merge_str(
            &dir,
            Some("FOO=1\nBAR=2"),
            &[("FOO", "9".to_string()), ("BAZ", "3".to_string())],
        )
        .await;
        assert_eq!(merged, "FOO=9\nBAR=2\nBAZ=3\n");
    }

    #[tokio::test]
    async fn merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        tokio::fs::write(&path, "FOO=1\nBAR=2\n").await.unwrap();

        let values = [("FOO", "9".to_string()), ("BAZ", "3".to_string())];
        merge_env_file(&path, &values).await.unwrap();
        let once = tokio::fs::read_to_string(&path).await.unwrap();
        merge_env_file(&path, &values).await.unwrap();
        let twice = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn unrelated_lines_and_comments_survive_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let merged = merge_str(
            &dir,
            Some("# node settings\nHOST=db.internal\n\nPEER_KEY=old\nEXTRA=keep\n"),
            &[("PEER_KEY", "new".to_string())],
        )
        .await;
        assert_eq!(
            merged,
            "# node settings\nHOST=db.internal\n\nPEER_KEY=new\nEXTRA=keep\n"
        );
    }

    #[tokio::test]
    async fn missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let merged = merge_str(&dir, None, &[("PEER_ID", "p1".to_string())]).await;
        assert_eq!(merged, "PEER_ID=p1\n");
    }

    #[tokio::test]
    async fn indented_key_is_still_matched() {
        let dir = tempfile::tempdir().unwrap();
        let merged = merge_str(
            &dir,
            Some("  FOO=1\nBAR=2\n"),
            &[("FOO", "9".to_string())],
        )
        .await;
        // The whole matched line (indentation included) is replaced.
        assert_eq!(merged, "FOO=9\nBAR=2\n");
    }

    #[tokio::test]
    async fn non_not_found_read_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file; the error is not NotFound.
        let result = merge_env_file(dir.path(), &[("FOO", "1".to_string())]).await;
        assert_matches!(result, Err(BootstrapError::Persistence { .. }));
    }
}
