//! The provisioning workflow: one linear pass from key generation to the
//! persisted env file.
//!
//! Steps run strictly in sequence, each feeding its outputs to the next by
//! value. The daemon is the only resource that outlives a step; it is
//! stopped unconditionally once started, whether the steps after it succeed
//! or fail, before the run reports its outcome.

use peerboot_core::ctl::{self, KeyPair};
use peerboot_core::daemon::{self, DaemonConfig, DaemonHandle};
use peerboot_core::envfile;
use peerboot_core::headless::{self, HeadlessApi, HeadlessConfig};
use peerboot_core::BootstrapError;

use crate::config::BootstrapConfig;

/// Env key for the admin user's private key.
pub const KEY_ADMIN_USER_KEY: &str = "PEERD_ADMIN_USER_KEY";
/// Env key for the client peer's private key.
pub const KEY_CLIENT_PEER_KEY: &str = "PEERD_CLIENT_PEER_KEY";
/// Env key for the daemon's peer identifier.
pub const KEY_PEER_ID: &str = "PEERD_PEER_ID";
/// Env key for the mappings document locator.
pub const KEY_MAPPINGS_DOC: &str = "PEERD_MAPPINGS_DOC";
/// Env key for the mappings user identifier.
pub const KEY_MAPPINGS_USER_ID: &str = "PEERD_MAPPINGS_USER_ID";

/// Loopback host the first-run daemon listens on.
const LISTEN_HOST: &str = "127.0.0.1";

/// Identifiers produced by the mappings sub-step.
#[derive(Debug, Clone)]
pub struct MappingArtifacts {
    pub user_id: String,
    pub doc_id: String,
}

/// Everything a successful run derived.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub peer_id: String,
    pub mappings: Option<MappingArtifacts>,
}

/// Run the full bootstrap sequence.
///
/// `make_headless` builds the headless client once the daemon's peer
/// identifier is known; production passes a [`headless::CtlHeadless`]
/// constructor, tests pass a fake.
///
/// On any failure after the daemon started, the daemon is stopped
/// best-effort before the error propagates.
pub async fn run<H, F>(
    config: &BootstrapConfig,
    make_headless: F,
) -> Result<Provisioned, BootstrapError>
where
    H: HeadlessApi,
    F: FnOnce(HeadlessConfig) -> H,
{
    tracing::info!("step 1: generating admin and client peer keys");
    let admin_key = ctl::gen_key(&config.peerctl_bin).await?;
    let client_key = ctl::gen_key(&config.peerctl_bin).await?;

    tracing::info!("step 2: starting peerd for its first run");
    let mut daemon_config = DaemonConfig::new(
        &config.peerd_bin,
        &config.base_dir,
        config.port,
        &admin_key.public,
    );
    daemon_config.probe = config.probe.clone();
    daemon_config.ready_timeout = config.start_timeout;
    let handle = daemon::start(&daemon_config).await?;

    let provisioned = provision(config, &admin_key, &client_key, &handle, make_headless).await;

    tracing::info!("stopping peerd");
    handle.stop().await;

    let provisioned = provisioned?;

    tracing::info!("updating the env file");
    let mut values = vec![
        (KEY_ADMIN_USER_KEY, admin_key.private.clone()),
        (KEY_CLIENT_PEER_KEY, client_key.private.clone()),
        (KEY_PEER_ID, provisioned.peer_id.clone()),
    ];
    if let Some(mappings) = &provisioned.mappings {
        values.push((KEY_MAPPINGS_DOC, mappings.doc_id.clone()));
        values.push((KEY_MAPPINGS_USER_ID, mappings.user_id.clone()));
    }
    envfile::merge_env_file(&config.env_file, &values).await?;

    tracing::info!("bootstrap complete");
    Ok(provisioned)
}

/// The steps that need the daemon running. Does NOT stop the daemon; the
/// caller owns cleanup so it happens on success and failure alike.
async fn provision<H, F>(
    config: &BootstrapConfig,
    admin_key: &KeyPair,
    client_key: &KeyPair,
    handle: &DaemonHandle,
    make_headless: F,
) -> Result<Provisioned, BootstrapError>
where
    H: HeadlessApi,
    F: FnOnce(HeadlessConfig) -> H,
{
    let peer_id = handle.peer_id().ok_or(BootstrapError::MissingPeerId)?;
    tracing::info!(%peer_id, "daemon peer identifier");

    tracing::info!("step 3: creating the admin user");
    let advisory = ctl::add_admin_user(
        &config.peerctl_bin,
        LISTEN_HOST,
        config.port,
        &peer_id,
        admin_key,
    )
    .await?;
    if !advisory.is_empty() {
        tracing::info!(%advisory, "admin add-user output");
    }

    tracing::info!("step 4: creating the mappings user and document");
    let api = make_headless(HeadlessConfig {
        server_peer_id: peer_id.clone(),
        admin_user_key: admin_key.private.clone(),
        client_peer_key: client_key.private.clone(),
        server_addr: format!("{LISTEN_HOST}:{}", config.port),
    });
    let mappings = match create_mappings(&api).await {
        Ok(artifacts) => Some(artifacts),
        Err(error) if !config.mappings_required => {
            tracing::warn!(
                %error,
                "mappings provisioning failed; continuing without mapping entries",
            );
            None
        }
        Err(error) => return Err(error),
    };

    Ok(Provisioned { peer_id, mappings })
}

/// Create the mappings user, then a document in that user's protected
/// store. The session is torn down best-effort on both outcomes.
async fn create_mappings<H: HeadlessApi>(api: &H) -> Result<MappingArtifacts, BootstrapError> {
    let user_id = api.create_user().await?;
    tracing::info!(%user_id, "mappings user created");

    let session = api.start_session(&user_id).await?;
    tracing::info!(session_id = %session.session_id, "headless session started");

    let created = async {
        let repo_id = headless::store_repo_id(&session.protected_store_id)?;
        let doc_id = api.create_doc(&session.session_id, repo_id).await?;
        tracing::info!(%doc_id, "mappings document created");
        Ok(doc_id)
    }
    .await;

    if let Err(error) = api.stop_session(&session.session_id).await {
        tracing::warn!(%error, "headless session stop failed");
    }

    Ok(MappingArtifacts {
        user_id,
        doc_id: created?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use peerboot_core::capture::{ProbeStream, ReadinessProbe};
    use peerboot_core::headless::SessionInfo;

    use super::*;

    /// In-memory [`HeadlessApi`] that records its calls.
    #[derive(Clone)]
    struct FakeHeadless {
        fail_doc_create: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeHeadless {
        fn succeeding() -> Self {
            Self {
                fail_doc_create: false,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing_doc_create() -> Self {
            Self {
                fail_doc_create: true,
                ..Self::succeeding()
            }
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl HeadlessApi for FakeHeadless {
        async fn create_user(&self) -> Result<String, BootstrapError> {
            self.record("create_user");
            Ok("u-1".to_string())
        }

        async fn start_session(&self, user_id: &str) -> Result<SessionInfo, BootstrapError> {
            self.record(&format!("start_session {user_id}"));
            Ok(SessionInfo {
                session_id: "s-1".to_string(),
                protected_store_id: format!("o:{}", "r".repeat(44)),
            })
        }

        async fn create_doc(
            &self,
            session_id: &str,
            repo_id: &str,
        ) -> Result<String, BootstrapError> {
            self.record(&format!("create_doc {session_id} {repo_id}"));
            if self.fail_doc_create {
                return Err(BootstrapError::ExternalCall {
                    command: "headless doc-create".to_string(),
                    exit_code: Some(1),
                    stderr: "store unavailable".to_string(),
                });
            }
            Ok("doc-1".to_string())
        }

        async fn stop_session(&self, session_id: &str) -> Result<(), BootstrapError> {
            self.record(&format!("stop_session {session_id}"));
            Ok(())
        }
    }

    fn fake_bin(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const FAKE_PEERCTL: &str = r#"
if [ "$1" = "gen-key" ]; then
  echo '{"public":"pub-k","private":"priv-k"}'
  exit 0
fi
echo 'User added as admin'
"#;

    const FAKE_PEERD: &str = r#"
echo '{"peer_id":"p-test"}'
sleep 0.2
echo 'Listening on lo 127.0.0.1:1440' >&2
exec sleep 30
"#;

    fn test_config(dir: &tempfile::TempDir) -> BootstrapConfig {
        BootstrapConfig {
            peerd_bin: fake_bin(dir, "peerd", FAKE_PEERD),
            peerctl_bin: fake_bin(dir, "peerctl", FAKE_PEERCTL),
            base_dir: dir.path().to_path_buf(),
            port: 1440,
            env_file: dir.path().join(".env"),
            probe: ReadinessProbe::new(ProbeStream::Stderr, "Listening on lo"),
            start_timeout: Duration::from_secs(5),
            mappings_required: true,
        }
    }

    #[tokio::test]
    async fn happy_path_persists_all_derived_values() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let fake = FakeHeadless::succeeding();

        let outcome = run(&config, |_| fake.clone()).await.unwrap();
        assert_eq!(outcome.peer_id, "p-test");
        let mappings = outcome.mappings.unwrap();
        assert_eq!(mappings.user_id, "u-1");
        assert_eq!(mappings.doc_id, "doc-1");

        let env = tokio::fs::read_to_string(&config.env_file).await.unwrap();
        assert_eq!(
            env,
            "PEERD_ADMIN_USER_KEY=priv-k\n\
             PEERD_CLIENT_PEER_KEY=priv-k\n\
             PEERD_PEER_ID=p-test\n\
             PEERD_MAPPINGS_DOC=doc-1\n\
             PEERD_MAPPINGS_USER_ID=u-1\n"
        );

        // The session is torn down after the document is created, and the
        // document targets the repo id sliced out of the store locator.
        assert_eq!(
            fake.calls(),
            vec![
                "create_user".to_string(),
                "start_session u-1".to_string(),
                format!("create_doc s-1 {}", "r".repeat(44)),
                "stop_session s-1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn existing_env_entries_are_updated_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        tokio::fs::write(
            &config.env_file,
            "# managed by ops\nDB_URL=postgres://db\nPEERD_PEER_ID=stale\n",
        )
        .await
        .unwrap();

        run(&config, |_| FakeHeadless::succeeding()).await.unwrap();

        let env = tokio::fs::read_to_string(&config.env_file).await.unwrap();
        assert!(env.starts_with("# managed by ops\nDB_URL=postgres://db\nPEERD_PEER_ID=p-test\n"));
        assert!(env.contains("PEERD_MAPPINGS_DOC=doc-1\n"));
    }

    #[tokio::test]
    async fn mappings_failure_aborts_when_required() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let fake = FakeHeadless::failing_doc_create();

        let result = run(&config, |_| fake.clone()).await;
        assert_matches!(result, Err(BootstrapError::ExternalCall { .. }));

        // The session was still torn down, and nothing was persisted.
        assert!(fake.calls().contains(&"stop_session s-1".to_string()));
        assert!(!config.env_file.exists());
    }

    #[tokio::test]
    async fn mappings_failure_degrades_when_optional() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.mappings_required = false;
        let fake = FakeHeadless::failing_doc_create();

        let outcome = run(&config, |_| fake.clone()).await.unwrap();
        assert!(outcome.mappings.is_none());

        let env = tokio::fs::read_to_string(&config.env_file).await.unwrap();
        assert!(env.contains("PEERD_PEER_ID=p-test\n"));
        assert!(!env.contains("PEERD_MAPPINGS_DOC"));
        assert!(!env.contains("PEERD_MAPPINGS_USER_ID"));
    }

    #[tokio::test]
    async fn payload_without_peer_id_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.peerd_bin = fake_bin(
            &dir,
            "peerd-no-id",
            r#"
echo '{"version":"0.4.1"}'
sleep 0.2
echo 'Listening on lo 127.0.0.1:1440' >&2
exec sleep 30
"#,
        );

        let result = run(&config, |_| FakeHeadless::succeeding()).await;
        assert_matches!(result, Err(BootstrapError::MissingPeerId));
        assert!(!config.env_file.exists());
    }

    #[tokio::test]
    async fn key_generation_failure_stops_the_run_before_the_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir);
        config.peerctl_bin = fake_bin(&dir, "peerctl-broken", "exit 9");

        let result = run(&config, |_| FakeHeadless::succeeding()).await;
        assert_matches!(result, Err(BootstrapError::KeyGeneration { .. }));
        assert!(!config.env_file.exists());
    }
}
