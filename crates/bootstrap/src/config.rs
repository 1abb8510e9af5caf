//! Bootstrap configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use peerboot_core::capture::{ProbeStream, ReadinessProbe};

/// Runtime configuration for one bootstrap run.
///
/// All fields have defaults suitable for a node whose binaries are on
/// `PATH`; deployments override via environment variables (a `.env` file is
/// honoured through `dotenvy` before this loads).
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Path to the `peerd` daemon binary.
    pub peerd_bin: PathBuf,
    /// Path to the `peerctl` admin binary.
    pub peerctl_bin: PathBuf,
    /// Base storage directory for the daemon's first run.
    pub base_dir: PathBuf,
    /// Loopback port the daemon listens on.
    pub port: u16,
    /// Env file receiving the derived keys and identifiers.
    pub env_file: PathBuf,
    /// Readiness marker and the stream it is expected on.
    pub probe: ReadinessProbe,
    /// How long to wait for the readiness marker.
    pub start_timeout: Duration,
    /// Whether a mappings provisioning failure aborts the run (`true`) or
    /// degrades to a bootstrap without mapping entries (`false`).
    pub mappings_required: bool,
}

impl BootstrapConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env var                       | Default           |
    /// |-------------------------------|-------------------|
    /// | `PEERD_BIN`                   | `peerd`           |
    /// | `PEERCTL_BIN`                 | `peerctl`         |
    /// | `PEERBOOT_BASE_DIR`           | `./.peerd`        |
    /// | `PEERBOOT_PORT`               | `1440`            |
    /// | `PEERBOOT_ENV_FILE`           | `.env`            |
    /// | `PEERBOOT_READY_MARKER`       | `Listening on lo` |
    /// | `PEERBOOT_READY_STREAM`       | `stderr`          |
    /// | `PEERBOOT_START_TIMEOUT_SECS` | `30`              |
    /// | `PEERBOOT_MAPPINGS_REQUIRED`  | `true`            |
    pub fn from_env() -> Self {
        let peerd_bin = std::env::var("PEERD_BIN").unwrap_or_else(|_| "peerd".into());
        let peerctl_bin = std::env::var("PEERCTL_BIN").unwrap_or_else(|_| "peerctl".into());
        let base_dir = std::env::var("PEERBOOT_BASE_DIR").unwrap_or_else(|_| "./.peerd".into());

        let port: u16 = std::env::var("PEERBOOT_PORT")
            .unwrap_or_else(|_| "1440".into())
            .parse()
            .expect("PEERBOOT_PORT must be a valid u16");

        let env_file = std::env::var("PEERBOOT_ENV_FILE").unwrap_or_else(|_| ".env".into());

        let marker =
            std::env::var("PEERBOOT_READY_MARKER").unwrap_or_else(|_| "Listening on lo".into());
        let stream = match std::env::var("PEERBOOT_READY_STREAM")
            .unwrap_or_else(|_| "stderr".into())
            .as_str()
        {
            "stdout" => ProbeStream::Stdout,
            "stderr" => ProbeStream::Stderr,
            other => panic!("PEERBOOT_READY_STREAM must be stdout or stderr, got {other}"),
        };

        let start_timeout_secs: u64 = std::env::var("PEERBOOT_START_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("PEERBOOT_START_TIMEOUT_SECS must be a valid u64");

        let mappings_required: bool = std::env::var("PEERBOOT_MAPPINGS_REQUIRED")
            .unwrap_or_else(|_| "true".into())
            .parse()
            .expect("PEERBOOT_MAPPINGS_REQUIRED must be true or false");

        Self {
            peerd_bin: peerd_bin.into(),
            peerctl_bin: peerctl_bin.into(),
            base_dir: base_dir.into(),
            port,
            env_file: env_file.into(),
            probe: ReadinessProbe::new(stream, marker),
            start_timeout: Duration::from_secs(start_timeout_secs),
            mappings_required,
        }
    }
}
