//! Self-update.
//!
//! Runs once per boot, before the poll loop:
//!
//! ```text
//! Idle -> CheckManifest -> UpToDate
//!                       -> Downloading -> NotFound
//!                                      -> Staged -> Installed -> restart
//!                                                -> Failed
//! ```
//!
//! The payload is written to a staging file, read back and verified, then
//! renamed over the running unit. The version record is only updated once the
//! rename has succeeded. Every step is reported through the operator log.

pub mod source;
pub mod store;

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::sink::NetContext;

pub use source::{HttpUpdateSource, Manifest, UpdateSource, raw_repo_url};
pub use store::VersionStore;

/// Exit status asking the service supervisor to start the new unit.
pub const RESTART_EXIT_CODE: i32 = 75;

/// Update state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// Not started.
    Idle,
    /// Fetching the remote manifest.
    CheckManifest,
    /// Remote version is not newer than the installed one.
    UpToDate,
    /// Fetching the payload of a newer version.
    Downloading,
    /// Newer version announced but its payload is missing.
    NotFound,
    /// Payload written to the staging file and verified.
    Staged,
    /// Staged file renamed over the running unit.
    Installed,
    /// Update abandoned; the current unit keeps running.
    Failed,
}

/// Result of one update run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Installed version is current.
    UpToDate { version: u64 },
    /// A newer version is announced but the payload is missing.
    NotFound,
    /// New unit published; a restart was requested.
    Installed { version: u64 },
    /// Something went wrong; the current unit keeps running.
    Failed { reason: String },
}

/// Restarts the process into the newly installed unit.
pub trait Restarter: Send + Sync {
    /// Requests a restart.
    fn restart(&self);
}

/// Exits with [`RESTART_EXIT_CODE`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExitRestarter;

impl Restarter for ExitRestarter {
    fn restart(&self) {
        tracing::info!("restarting into new unit");
        std::process::exit(RESTART_EXIT_CODE);
    }
}

/// Drives one update cycle.
pub struct UpdateManager<S> {
    source: S,
    store: VersionStore,
    staging: PathBuf,
    target: PathBuf,
    restarter: Box<dyn Restarter>,
    state: UpdateState,
}

impl<S: UpdateSource> UpdateManager<S> {
    /// Creates a manager that replaces `target` via `staging`.
    pub fn new(
        source: S,
        store: VersionStore,
        staging: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        restarter: impl Restarter + 'static,
    ) -> Self {
        Self {
            source,
            store,
            staging: staging.into(),
            target: target.into(),
            restarter: Box::new(restarter),
            state: UpdateState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> UpdateState {
        self.state
    }

    fn transition(&mut self, next: UpdateState) {
        tracing::debug!("update {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs the update cycle to completion. Consumes the manager so a boot
    /// cannot run it twice.
    ///
    /// Progress goes to `net`'s log. Every failure is reported as
    /// [`UpdateOutcome::Failed`]. Once the new unit is in place a restart is
    /// requested, even if the version record could not be written.
    pub async fn run(mut self, net: &NetContext) -> UpdateOutcome {
        let outcome = match self.check_and_install(net).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("update failed: {}", e);
                self.transition(UpdateState::Failed);
                net.log(&format!("Update failed: {e}"));
                UpdateOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        if let UpdateOutcome::Installed { .. } = outcome {
            net.log("Restarting unit...");
            self.restarter.restart();
        }
        outcome
    }

    async fn check_and_install(&mut self, net: &NetContext) -> Result<UpdateOutcome> {
        let current = self.store.load()?;
        net.log(&format!("Current unit version is {current}"));

        self.transition(UpdateState::CheckManifest);
        net.log("Checking for latest version");
        let latest = self.source.fetch_manifest().await?.version;
        net.log(&format!("Latest version is {latest}"));

        if latest <= current {
            self.transition(UpdateState::UpToDate);
            net.log("No new updates available.");
            return Ok(UpdateOutcome::UpToDate { version: current });
        }

        net.log(&format!("Newer version available: {latest}"));
        self.transition(UpdateState::Downloading);
        let Some(payload) = self.source.fetch_payload().await? else {
            self.transition(UpdateState::NotFound);
            net.log(&format!("Unit for version {latest} not found"));
            return Ok(UpdateOutcome::NotFound);
        };

        stage(&self.staging, &payload).await?;
        self.transition(UpdateState::Staged);

        net.log(&format!(
            "Updating unit... (Renaming {} to {})",
            self.staging.display(),
            self.target.display()
        ));
        tokio::fs::rename(&self.staging, &self.target)
            .await
            .map_err(|e| Error::Install {
                reason: format!(
                    "cannot replace {} with {}: {e}",
                    self.target.display(),
                    self.staging.display()
                ),
            })?;
        self.transition(UpdateState::Installed);

        // The new unit is already on disk, so the restart goes ahead. The next
        // boot reinstalls the same version and retries the record.
        if let Err(e) = self.store.save(latest) {
            tracing::warn!("version record not updated: {}", e);
            net.log(&format!("Version record not updated: {e}"));
        }

        Ok(UpdateOutcome::Installed { version: latest })
    }
}

/// Writes the payload to `path` and checks the file reads back identical.
async fn stage(path: &Path, payload: &Bytes) -> Result<()> {
    tokio::fs::write(path, payload)
        .await
        .map_err(|e| Error::Install {
            reason: format!("cannot write {}: {e}", path.display()),
        })?;

    let staged = tokio::fs::read(path).await?;
    if !same_content(&staged, payload) {
        let _ = tokio::fs::remove_file(path).await;
        return Err(Error::Install {
            reason: format!("staged file {} does not match payload", path.display()),
        });
    }

    tracing::debug!("staged {} bytes at {}", staged.len(), path.display());
    Ok(())
}

#[cfg(feature = "sha2")]
fn same_content(staged: &[u8], payload: &[u8]) -> bool {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(staged);
    tracing::debug!("staged digest {}", hex::encode(digest));
    digest == Sha256::digest(payload)
}

#[cfg(not(feature = "sha2"))]
fn same_content(staged: &[u8], payload: &[u8]) -> bool {
    staged == payload
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::sink::tests::{RecordingLog, RecordingMetrics};

    type Hook = Box<dyn Fn() + Send + Sync>;

    struct FakeSource {
        manifest: Result<Manifest>,
        payload: Option<&'static [u8]>,
        payload_requests: Arc<AtomicU32>,
        on_payload: Option<Hook>,
    }

    impl FakeSource {
        fn new(version: u64, payload: Option<&'static [u8]>) -> Self {
            Self {
                manifest: Ok(Manifest { version }),
                payload,
                payload_requests: Arc::new(AtomicU32::new(0)),
                on_payload: None,
            }
        }
    }

    impl UpdateSource for FakeSource {
        fn fetch_manifest(&self) -> BoxFuture<'_, Result<Manifest>> {
            Box::pin(async move {
                match &self.manifest {
                    Ok(m) => Ok(*m),
                    Err(e) => Err(Error::Fetch {
                        message: e.to_string(),
                    }),
                }
            })
        }

        fn fetch_payload(&self) -> BoxFuture<'_, Result<Option<Bytes>>> {
            self.payload_requests.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = &self.on_payload {
                hook();
            }
            Box::pin(async move { Ok(self.payload.map(Bytes::from_static)) })
        }
    }

    /// Counts restarts and marks them in the log so ordering can be checked.
    #[derive(Clone, Default)]
    struct CountingRestarter {
        count: Arc<AtomicU32>,
        log: RecordingLog,
    }

    impl Restarter for CountingRestarter {
        fn restart(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.log.messages.lock().unwrap().push("<restart>".into());
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        store: VersionStore,
        restarts: CountingRestarter,
        log: RecordingLog,
        net: NetContext,
    }

    impl Fixture {
        fn new(installed: u64) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = VersionStore::new(dir.path().join("version.json"));
            store.save(installed).unwrap();
            std::fs::write(dir.path().join("agent"), "old unit").unwrap();
            let log = RecordingLog::default();
            let net = NetContext::new(RecordingMetrics::default(), Some(Box::new(log.clone())));
            Self {
                dir,
                store,
                restarts: CountingRestarter {
                    count: Arc::default(),
                    log: log.clone(),
                },
                log,
                net,
            }
        }

        fn manager(&self, source: FakeSource) -> UpdateManager<FakeSource> {
            UpdateManager::new(
                source,
                self.store.clone(),
                self.dir.path().join("latest_unit"),
                self.dir.path().join("agent"),
                self.restarts.clone(),
            )
        }

        fn target(&self) -> String {
            std::fs::read_to_string(self.dir.path().join("agent")).unwrap()
        }

        fn restarts(&self) -> u32 {
            self.restarts.count.load(Ordering::SeqCst)
        }

        fn messages(&self) -> Vec<String> {
            self.log.messages.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_same_version_skips_download() {
        let fixture = Fixture::new(3);
        let source = FakeSource::new(3, Some(b"new unit"));
        let requests = Arc::clone(&source.payload_requests);

        let outcome = fixture.manager(source).run(&fixture.net).await;

        assert_eq!(outcome, UpdateOutcome::UpToDate { version: 3 });
        assert_eq!(requests.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.store.load().unwrap(), 3);
        assert_eq!(fixture.target(), "old unit");
        assert_eq!(
            fixture.messages(),
            vec![
                "Current unit version is 3",
                "Checking for latest version",
                "Latest version is 3",
                "No new updates available.",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_payload_keeps_version() {
        let fixture = Fixture::new(3);
        let outcome = fixture
            .manager(FakeSource::new(4, None))
            .run(&fixture.net)
            .await;

        assert_eq!(outcome, UpdateOutcome::NotFound);
        assert_eq!(fixture.store.load().unwrap(), 3);
        assert_eq!(fixture.target(), "old unit");
        assert_eq!(fixture.restarts(), 0);
        let messages = fixture.messages();
        assert!(messages.contains(&"Newer version available: 4".to_string()));
        assert_eq!(messages.last().unwrap(), "Unit for version 4 not found");
    }

    #[tokio::test]
    async fn test_missing_payload_state() {
        let fixture = Fixture::new(3);
        let mut manager = fixture.manager(FakeSource::new(4, None));

        let outcome = manager.check_and_install(&fixture.net).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::NotFound);
        assert_eq!(manager.state(), UpdateState::NotFound);
    }

    #[tokio::test]
    async fn test_newer_version_is_installed() {
        let fixture = Fixture::new(3);
        let outcome = fixture
            .manager(FakeSource::new(4, Some(b"new unit")))
            .run(&fixture.net)
            .await;

        assert_eq!(outcome, UpdateOutcome::Installed { version: 4 });
        assert_eq!(fixture.store.load().unwrap(), 4);
        assert_eq!(fixture.target(), "new unit");
        assert!(!fixture.dir.path().join("latest_unit").exists());
        assert_eq!(fixture.restarts(), 1);
    }

    #[tokio::test]
    async fn test_install_is_logged_before_restart() {
        let fixture = Fixture::new(3);
        fixture
            .manager(FakeSource::new(4, Some(b"new unit")))
            .run(&fixture.net)
            .await;

        let messages = fixture.messages();
        let n = messages.len();
        assert!(messages[n - 3].starts_with("Updating unit... (Renaming "));
        assert_eq!(messages[n - 2], "Restarting unit...");
        assert_eq!(messages[n - 1], "<restart>");
    }

    #[tokio::test]
    async fn test_manifest_failure_is_recovered() {
        let fixture = Fixture::new(3);
        let mut source = FakeSource::new(0, None);
        source.manifest = Err(Error::Fetch {
            message: "offline".into(),
        });

        let outcome = fixture.manager(source).run(&fixture.net).await;

        assert!(matches!(outcome, UpdateOutcome::Failed { .. }));
        assert_eq!(fixture.store.load().unwrap(), 3);
        assert_eq!(fixture.restarts(), 0);
        assert!(fixture.messages().last().unwrap().starts_with("Update failed: "));
    }

    #[tokio::test]
    async fn test_failed_rename_keeps_old_version() {
        let fixture = Fixture::new(3);
        let manager = UpdateManager::new(
            FakeSource::new(5, Some(b"new unit")),
            fixture.store.clone(),
            fixture.dir.path().join("latest_unit"),
            fixture.dir.path().join("missing/dir/agent"),
            fixture.restarts.clone(),
        );

        let outcome = manager.run(&fixture.net).await;

        assert!(matches!(outcome, UpdateOutcome::Failed { .. }));
        assert_eq!(fixture.store.load().unwrap(), 3);
        assert_eq!(fixture.restarts(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_record_still_restarts() {
        let fixture = Fixture::new(3);
        let record = fixture.store.path().to_path_buf();
        let mut source = FakeSource::new(6, Some(b"new unit"));
        // Turn the record into a directory so the final rename of the save fails.
        source.on_payload = Some(Box::new(move || {
            std::fs::remove_file(&record).unwrap();
            std::fs::create_dir(&record).unwrap();
        }));

        let outcome = fixture.manager(source).run(&fixture.net).await;

        assert_eq!(outcome, UpdateOutcome::Installed { version: 6 });
        assert_eq!(fixture.target(), "new unit");
        assert_eq!(fixture.restarts(), 1);
        assert!(
            fixture
                .messages()
                .iter()
                .any(|m| m.starts_with("Version record not updated: "))
        );
    }

    #[tokio::test]
    async fn test_first_boot_creates_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("version.json"));
        let manager = UpdateManager::new(
            FakeSource::new(0, None),
            store.clone(),
            dir.path().join("latest_unit"),
            dir.path().join("agent"),
            CountingRestarter::default(),
        );
        assert_eq!(manager.state(), UpdateState::Idle);

        let outcome = manager
            .run(&NetContext::new(RecordingMetrics::default(), None))
            .await;
        assert_eq!(outcome, UpdateOutcome::UpToDate { version: 0 });
        assert!(store.path().exists());
    }
}
