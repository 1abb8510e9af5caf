//! Shared error surface for the bootstrap sequence.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Errors that can occur while provisioning a node.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// An external binary could not be launched at all.
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// `peerctl gen-key` exited non-zero.
    #[error("key generation failed (exit code {exit_code:?}): {stderr}")]
    KeyGeneration {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// `peerctl gen-key` succeeded but its stdout was not a key pair.
    #[error("key generation produced invalid output: {source}")]
    KeyGenerationOutput {
        #[source]
        source: serde_json::Error,
    },

    /// The daemon never printed its readiness marker.
    #[error("daemon not ready within {timeout:?}")]
    StartTimeout { timeout: Duration },

    /// The daemon exited before becoming ready.
    #[error("daemon exited before becoming ready ({status})")]
    PrematureExit { status: ExitStatus },

    /// A downstream command exited non-zero.
    #[error("{command} failed (exit code {exit_code:?}): {stderr}")]
    ExternalCall {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// A downstream command succeeded but returned unparseable output.
    #[error("{command} produced invalid output: {source}")]
    ExternalCallOutput {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    /// The startup payload carried no peer identifier.
    #[error("startup payload has no peer identifier")]
    MissingPeerId,

    /// A protected-store locator was too short to contain a repo id.
    #[error("protected store locator too short: {locator}")]
    MalformedStoreLocator { locator: String },

    /// Reading or writing the persisted env file failed. A missing file on
    /// read is not an error; it starts the merge from empty content.
    #[error("failed to read or write {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
