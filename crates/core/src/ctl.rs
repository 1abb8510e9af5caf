//! Thin wrappers around the `peerctl` admin binary.
//!
//! `peerctl` is treated as a black box: each wrapper builds the fixed
//! argument vector, runs the command once (no retries), checks the exit
//! status, and parses stdout where the command promises structured output.

use std::path::Path;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::BootstrapError;

/// A generated identity key pair.
///
/// Both halves are opaque strings; the private half is a secret held only
/// in memory until the workflow persists it into the env file.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyPair {
    pub public: String,
    pub private: String,
}

/// Generate a fresh key pair via `peerctl gen-key --json`.
///
/// Stdout must be a single JSON object with `public` and `private` string
/// fields. A non-zero exit or unparseable output fails the call; there are
/// no side effects beyond invoking the tool.
pub async fn gen_key(ctl_bin: &Path) -> Result<KeyPair, BootstrapError> {
    let output = Command::new(ctl_bin)
        .args(["gen-key", "--json"])
        .output()
        .await
        .map_err(|source| BootstrapError::Spawn {
            binary: ctl_bin.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(BootstrapError::KeyGeneration {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|source| BootstrapError::KeyGenerationOutput { source })
}

/// Register `admin` as an administrator on the running daemon.
///
/// Runs `peerctl --save-key -s <host>,<port>,<peer_id> -u <admin.private>
/// admin add-user <admin.public> -a`. Success is exit code zero; stdout is
/// advisory text only and is returned trimmed for logging.
pub async fn add_admin_user(
    ctl_bin: &Path,
    host: &str,
    port: u16,
    peer_id: &str,
    admin: &KeyPair,
) -> Result<String, BootstrapError> {
    let server = format!("{host},{port},{peer_id}");
    let output = Command::new(ctl_bin)
        .arg("--save-key")
        .arg("-s")
        .arg(&server)
        .arg("-u")
        .arg(&admin.private)
        .arg("admin")
        .arg("add-user")
        .arg(&admin.public)
        .arg("-a")
        .output()
        .await
        .map_err(|source| BootstrapError::Spawn {
            binary: ctl_bin.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(BootstrapError::ExternalCall {
            command: "admin add-user".to_string(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
