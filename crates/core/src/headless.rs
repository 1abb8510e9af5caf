//! Headless session and document operations against a running node.
//!
//! The mappings provisioning step needs a user, a session, and one document
//! in that user's protected store. [`HeadlessApi`] abstracts those calls so
//! the workflow can be exercised against an in-memory fake; [`CtlHeadless`]
//! is the real implementation, delegating to `peerctl headless`
//! subcommands.

use std::path::PathBuf;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::BootstrapError;

/// Document type created for the mappings store.
pub const DOC_TYPE: &str = "Graph";
/// Content type of the mappings document.
pub const DOC_CONTENT_TYPE: &str = "data:graph";
/// Target store kind.
pub const DOC_STORE_KIND: &str = "store";
/// Target store access class.
pub const DOC_STORE_ACCESS: &str = "protected";

/// Offset of the repo id inside a protected-store locator.
const STORE_REPO_ID_START: usize = 2;
/// End of the repo id inside a protected-store locator.
const STORE_REPO_ID_END: usize = 46;

/// Connection parameters for headless calls.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Peer identifier of the server, from the startup payload.
    pub server_peer_id: String,
    /// Admin private key authorising the calls.
    pub admin_user_key: String,
    /// Client peer private key used for the connection.
    pub client_peer_key: String,
    /// `host:port` of the running daemon.
    pub server_addr: String,
}

/// A started headless session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    /// Full protected-store locator; see [`store_repo_id`].
    pub protected_store_id: String,
}

#[derive(Debug, Deserialize)]
struct UserCreated {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct DocCreated {
    doc_id: String,
}

/// Extract the 44-character repo id embedded in a protected-store locator.
///
/// Locators carry a 2-character scheme prefix ahead of the repo id; anything
/// shorter cannot name a store.
pub fn store_repo_id(locator: &str) -> Result<&str, BootstrapError> {
    locator
        .get(STORE_REPO_ID_START..STORE_REPO_ID_END)
        .ok_or_else(|| BootstrapError::MalformedStoreLocator {
            locator: locator.to_string(),
        })
}

/// The headless operations the workflow depends on.
///
/// One implementor per transport; the workflow stays generic so tests can
/// swap in a fake without spawning processes.
pub trait HeadlessApi: Send + Sync {
    /// Create a user on the node; returns the user identifier.
    fn create_user(
        &self,
    ) -> impl std::future::Future<Output = Result<String, BootstrapError>> + Send;

    /// Start a session for `user_id`.
    fn start_session(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<SessionInfo, BootstrapError>> + Send;

    /// Create the mappings document in the protected store `repo_id`;
    /// returns the document locator.
    fn create_doc(
        &self,
        session_id: &str,
        repo_id: &str,
    ) -> impl std::future::Future<Output = Result<String, BootstrapError>> + Send;

    /// Tear the session down.
    fn stop_session(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<(), BootstrapError>> + Send;
}

/// [`HeadlessApi`] backed by the `peerctl headless` subcommands.
#[derive(Debug, Clone)]
pub struct CtlHeadless {
    ctl_bin: PathBuf,
    config: HeadlessConfig,
}

impl CtlHeadless {
    pub fn new(ctl_bin: impl Into<PathBuf>, config: HeadlessConfig) -> Self {
        Self {
            ctl_bin: ctl_bin.into(),
            config,
        }
    }

    /// Run one `peerctl headless` subcommand and return its stdout.
    async fn run(&self, command: &str, args: &[&str]) -> Result<Vec<u8>, BootstrapError> {
        let server = format!("{},{}", self.config.server_addr, self.config.server_peer_id);
        let output = Command::new(&self.ctl_bin)
            .arg("headless")
            .arg("--json")
            .arg("-s")
            .arg(&server)
            .arg("-u")
            .arg(&self.config.admin_user_key)
            .arg("-k")
            .arg(&self.config.client_peer_key)
            .args(args)
            .output()
            .await
            .map_err(|source| BootstrapError::Spawn {
                binary: self.ctl_bin.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(BootstrapError::ExternalCall {
                command: command.to_string(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    fn parse<T: for<'de> Deserialize<'de>>(
        command: &str,
        stdout: &[u8],
    ) -> Result<T, BootstrapError> {
        serde_json::from_slice(stdout).map_err(|source| BootstrapError::ExternalCallOutput {
            command: command.to_string(),
            source,
        })
    }
}

impl HeadlessApi for CtlHeadless {
    async fn create_user(&self) -> Result<String, BootstrapError> {
        let stdout = self.run("headless create-user", &["create-user"]).await?;
        let created: UserCreated = Self::parse("headless create-user", &stdout)?;
        Ok(created.user_id)
    }

    async fn start_session(&self, user_id: &str) -> Result<SessionInfo, BootstrapError> {
        let stdout = self
            .run("headless session-start", &["session-start", user_id])
            .await?;
        Self::parse("headless session-start", &stdout)
    }

    async fn create_doc(&self, session_id: &str, repo_id: &str) -> Result<String, BootstrapError> {
        let stdout = self
            .run(
                "headless doc-create",
                &[
                    "doc-create",
                    session_id,
                    DOC_TYPE,
                    DOC_CONTENT_TYPE,
                    DOC_STORE_KIND,
                    DOC_STORE_ACCESS,
                    repo_id,
                ],
            )
            .await?;
        let created: DocCreated = Self::parse("headless doc-create", &stdout)?;
        Ok(created.doc_id)
    }

    async fn stop_session(&self, session_id: &str) -> Result<(), BootstrapError> {
        self.run("headless session-stop", &["session-stop", session_id])
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
