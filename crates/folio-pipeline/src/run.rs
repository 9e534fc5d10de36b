//! Pipeline runs.

use std::fs;
use std::future;
use std::path::PathBuf;
use std::time::Duration;

use folio_build::{BuildError, BuildResult, BuildStage, BuildStep, Workspace};
use folio_deploy::{Deployer, Deployment};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::PipelineError;
use crate::group::{ConcurrencyGroups, GroupLease};
use crate::marker::GroupMarker;
use crate::state::{Lifecycle, RunState};
use crate::trigger::{RunPlan, Trigger};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Branch whose pushes are published
    pub deploy_branch: String,

    /// Concurrency group publishing runs share
    pub group: String,

    /// Directory for cross-process group markers; `None` keeps groups in-process
    pub state_dir: Option<PathBuf>,

    /// How often a running pipeline checks its group marker
    pub marker_poll: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deploy_branch: "main".to_string(),
            group: "pages".to_string(),
            state_dir: None,
            marker_poll: Duration::from_millis(500),
        }
    }
}

/// Outcome of one run.
#[derive(Debug)]
pub struct RunReport {
    pub id: Uuid,
    pub trigger: Trigger,

    /// `None` when the trigger does not start a run
    pub plan: Option<RunPlan>,

    /// States visited, starting with `Idle`
    pub history: Vec<RunState>,

    pub build: Option<BuildResult>,
    pub deployment: Option<Deployment>,

    /// The error that ended the run, if any
    pub error: Option<PipelineError>,
}

impl RunReport {
    fn new(id: Uuid, trigger: Trigger) -> Self {
        Self {
            id,
            trigger,
            plan: None,
            history: vec![RunState::Idle],
            build: None,
            deployment: None,
            error: None,
        }
    }

    /// Final state of the run.
    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Idle)
    }

    pub fn is_skipped(&self) -> bool {
        self.plan.is_none()
    }

    /// Skipped runs count as successful.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (self.is_skipped() || self.state().is_success())
    }
}

/// Runs triggers through the build and deploy stages.
pub struct Pipeline {
    config: PipelineConfig,
    stage: BuildStage,
    deployer: Deployer,
    groups: ConcurrencyGroups,
}

impl Pipeline {
    /// Create a pipeline. Pipelines sharing `groups` supersede each other.
    pub fn new(
        config: PipelineConfig,
        stage: BuildStage,
        deployer: Deployer,
        groups: ConcurrencyGroups,
    ) -> Self {
        Self {
            config,
            stage,
            deployer,
            groups,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `trigger` to a terminal state.
    ///
    /// Failures are recorded in the report rather than returned, so the
    /// visited states are available either way.
    pub async fn run(&self, trigger: Trigger) -> RunReport {
        let id = Uuid::new_v4();
        let mut report = RunReport::new(id, trigger.clone());

        let Some(plan) = trigger.plan(&self.config.deploy_branch) else {
            tracing::info!(
                "Skipping {}: only pushes to '{}' start a run",
                trigger,
                self.config.deploy_branch
            );
            return report;
        };
        report.plan = Some(plan);
        tracing::info!("Run {} started by {}", id, trigger);

        let mut lifecycle = Lifecycle::new();
        let workspace = self.stage.config().run_workspace(&id.to_string());
        let outcome = match plan {
            RunPlan::BuildOnly => self.build_only(&workspace, &mut lifecycle, &mut report).await,
            RunPlan::BuildAndDeploy => {
                self.build_and_deploy(id, &workspace, &mut lifecycle, &mut report)
                    .await
            }
        };

        if let Err(err) = outcome {
            let terminal = err.terminal_state();
            if lifecycle.current() != terminal {
                if let Err(e) = lifecycle.advance(terminal) {
                    tracing::warn!("Run {} could not record failure: {}", id, e);
                }
            }
            tracing::error!("Run {} ended {}: {}", id, lifecycle.current(), err);
            report.error = Some(err);
            // A failed deploy keeps its artifact so it can be published by hand.
            if lifecycle.current() != RunState::DeployFailed {
                self.discard_run(id);
            }
        } else {
            tracing::info!("Run {} ended {}", id, lifecycle.current());
        }

        report.history = lifecycle.history().to_vec();
        report
    }

    async fn build_only(
        &self,
        workspace: &Workspace,
        lifecycle: &mut Lifecycle,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        lifecycle.advance(RunState::Building)?;
        let build = self.build(workspace, None).await?;
        lifecycle.advance(RunState::Built)?;
        report.build = Some(build);
        lifecycle.advance(RunState::Finished)
    }

    async fn build_and_deploy(
        &self,
        id: Uuid,
        workspace: &Workspace,
        lifecycle: &mut Lifecycle,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let lease = self.groups.enter(&self.config.group);
        lifecycle.advance(RunState::Building)?;

        let marker = match &self.config.state_dir {
            Some(dir) => Some(GroupMarker::claim(dir, &self.config.group, &id.to_string())?),
            None => None,
        };
        let watcher = marker
            .as_ref()
            .map(|m| m.watch(lease.token().clone(), self.config.marker_poll));

        let result = self
            .build_then_publish(workspace, &lease, marker.as_ref(), lifecycle, report)
            .await;

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        if let Some(marker) = marker {
            marker.release();
        }
        result
    }

    async fn build_then_publish(
        &self,
        workspace: &Workspace,
        lease: &GroupLease,
        marker: Option<&GroupMarker>,
        lifecycle: &mut Lifecycle,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        let build = self.build(workspace, Some(lease.token())).await?;
        lifecycle.advance(RunState::Built)?;

        let published = self.publish(&build, lease, marker, lifecycle).await;
        report.build = Some(build);
        report.deployment = Some(published?);

        lifecycle.advance(RunState::Deployed)
    }

    /// Build into the run's own workspace.
    ///
    /// With a token, cancellation stops the build at its next step or cuts
    /// short the step in flight.
    async fn build(
        &self,
        workspace: &Workspace,
        token: Option<&CancelToken>,
    ) -> Result<BuildResult, PipelineError> {
        let checkpoint = |step: BuildStep| match token {
            Some(token) if token.is_cancelled() => Err(BuildError::Interrupted(step)),
            _ => Ok(()),
        };
        let interrupted = async {
            match token {
                Some(token) => token.cancelled().await,
                None => future::pending().await,
            }
        };

        match self.stage.run_in(workspace, checkpoint, interrupted).await {
            Ok(build) => Ok(build),
            Err(BuildError::Interrupted(step)) => Err(self.superseded(step.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(
        &self,
        build: &BuildResult,
        lease: &GroupLease,
        marker: Option<&GroupMarker>,
        lifecycle: &mut Lifecycle,
    ) -> Result<Deployment, PipelineError> {
        if lease.is_superseded() {
            return Err(self.superseded("deploy"));
        }

        let _permit = lease.deploy_permit().await?;

        // Held through the deploy so another process cannot publish an older
        // artifact over this one.
        let _lock = match marker {
            Some(marker) => {
                let lock = match marker.lock_publish().await {
                    Ok(lock) => lock,
                    Err(e) => {
                        lifecycle.advance(RunState::Deploying)?;
                        return Err(e);
                    }
                };
                if !marker.is_current() {
                    lease.token().cancel();
                    return Err(self.superseded("deploy"));
                }
                Some(lock)
            }
            None => None,
        };

        lifecycle.advance(RunState::Deploying)?;
        Ok(self.deployer.deploy(&build.artifact).await?)
    }

    /// Remove the workspace of a run that ended without a publishable artifact.
    fn discard_run(&self, id: Uuid) {
        let dir = self.stage.config().run_dir(&id.to_string());
        if !dir.exists() {
            return;
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => tracing::debug!("Removed workspace {}", dir.display()),
            Err(e) => tracing::warn!("Failed to remove workspace {}: {}", dir.display(), e),
        }
    }

    fn superseded(&self, step: impl Into<String>) -> PipelineError {
        PipelineError::Superseded {
            group: self.config.group.clone(),
            step: step.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use folio_build::{Artifact, BuildConfig, Generator, ProvisionedTool, Provisioner};
    use folio_deploy::{
        DeployConfig, DeployError, DirectoryPlatform, HostingPlatform, IdToken,
        StaticTokenSource, TokenSource,
    };
    use folio_env::PinnedVersion;
    use tempfile::tempdir;
    use tokio::sync::Notify;

    struct FakeProvisioner;

    #[async_trait]
    impl Provisioner for FakeProvisioner {
        fn tool(&self) -> &str {
            "mdbook"
        }

        async fn provision(&self, pinned: &PinnedVersion) -> Result<ProvisionedTool, BuildError> {
            Ok(ProvisionedTool {
                name: "mdbook".into(),
                binary: PathBuf::from("mdbook"),
                version: pinned.version.clone(),
            })
        }
    }

    /// Renders a single page; optionally pauses mid-render until released.
    struct FakeGenerator {
        page: &'static str,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn generate(
            &self,
            _tool: &ProvisionedTool,
            _source: &Path,
            output: &Path,
        ) -> Result<(), BuildError> {
            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }
            fs::write(output.join("index.html"), self.page).unwrap();
            Ok(())
        }
    }

    /// The first render pauses until released, then writes a page of its
    /// own; later renders finish at once.
    struct FirstCallParks {
        calls: AtomicUsize,
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Generator for FirstCallParks {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn generate(
            &self,
            _tool: &ProvisionedTool,
            _source: &Path,
            output: &Path,
        ) -> Result<(), BuildError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.started.notify_one();
                self.release.notified().await;
                fs::write(output.join("from-superseded-run.html"), "stale").unwrap();
            }
            fs::write(output.join("index.html"), "latest").unwrap();
            Ok(())
        }
    }

    /// Records each publish once it completes; optionally pauses first.
    struct RecordingPlatform {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl HostingPlatform for RecordingPlatform {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn publish(
            &self,
            _artifact: &Artifact,
            environment: &str,
            _token: &IdToken,
        ) -> Result<String, DeployError> {
            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }
            self.log.lock().unwrap().push(self.label);
            Ok(format!("https://essays.example/{}/", environment))
        }
    }

    struct NoTokens;

    #[async_trait]
    impl TokenSource for NoTokens {
        async fn request(&self, _audience: &str) -> Result<IdToken, DeployError> {
            Err(DeployError::Token("id-token permission not granted".into()))
        }
    }

    fn workspace(root: &Path) {
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::write(root.join("book.toml"), "[book]\ntitle = \"Essays\"\n").unwrap();
        fs::write(root.join("src/SUMMARY.md"), "- [One](chapter_1.md)\n").unwrap();
        fs::write(root.join(".env"), "MDBOOK_VERSION=0.4.25\n").unwrap();
        fs::write(root.join("assets/intro_demo.mp4"), b"video").unwrap();
    }

    fn stage(root: &Path, generator: FakeGenerator) -> BuildStage {
        BuildStage::new(
            BuildConfig {
                root: root.to_path_buf(),
                ..Default::default()
            },
            FakeProvisioner,
            generator,
        )
    }

    fn deployer(public: &Path) -> Deployer {
        Deployer::new(
            DeployConfig::default(),
            DirectoryPlatform::new(public, "folio-pages").with_base_url("https://essays.example/"),
            StaticTokenSource::new("local"),
        )
    }

    fn pipeline(root: &Path, public: &Path, page: &'static str) -> Pipeline {
        workspace(root);
        Pipeline::new(
            PipelineConfig::default(),
            stage(root, FakeGenerator { page, gate: None }),
            deployer(public),
            ConcurrencyGroups::new(),
        )
    }

    #[tokio::test]
    async fn push_to_main_builds_and_deploys() {
        let temp = tempdir().unwrap();
        let public = temp.path().join("public");
        let pipeline = pipeline(&temp.path().join("repo"), &public, "<h1>Essays</h1>");

        let report = pipeline.run(Trigger::push("main")).await;

        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(
            report.history,
            vec![
                RunState::Idle,
                RunState::Building,
                RunState::Built,
                RunState::Deploying,
                RunState::Deployed
            ]
        );
        assert_eq!(report.deployment.unwrap().url, "https://essays.example/");
        assert!(public.join("index.html").exists());
        assert!(public.join("assets/intro_demo.mp4").exists());
    }

    #[tokio::test]
    async fn pull_request_builds_without_deploying() {
        let temp = tempdir().unwrap();
        let public = temp.path().join("public");
        let pipeline = pipeline(&temp.path().join("repo"), &public, "<h1>Essays</h1>");

        let report = pipeline.run(Trigger::pull_request(42)).await;

        assert!(report.is_success());
        assert_eq!(report.state(), RunState::Finished);
        assert!(report.build.is_some());
        assert!(report.deployment.is_none());
        assert!(!public.exists());
    }

    #[tokio::test]
    async fn push_to_other_branch_is_skipped() {
        let temp = tempdir().unwrap();
        let repo = temp.path().join("repo");
        let pipeline = pipeline(&repo, &temp.path().join("public"), "<h1>Essays</h1>");

        let report = pipeline.run(Trigger::push("feature/draft")).await;

        assert!(report.is_skipped());
        assert!(report.is_success());
        assert_eq!(report.history, vec![RunState::Idle]);
        assert!(!repo.join(".folio/runs").exists());
    }

    #[tokio::test]
    async fn missing_declaration_never_deploys() {
        let temp = tempdir().unwrap();
        let repo = temp.path().join("repo");
        let public = temp.path().join("public");
        let pipeline = pipeline(&repo, &public, "<h1>Essays</h1>");
        fs::remove_file(repo.join(".env")).unwrap();

        let report = pipeline.run(Trigger::push("main")).await;

        assert_eq!(
            report.history,
            vec![RunState::Idle, RunState::Building, RunState::BuildFailed]
        );
        assert!(matches!(report.error, Some(PipelineError::Build(_))));
        assert!(report.deployment.is_none());
        assert!(!public.exists());
    }

    #[tokio::test]
    async fn token_failure_ends_deploy_failed() {
        let temp = tempdir().unwrap();
        let repo = temp.path().join("repo");
        let public = temp.path().join("public");
        workspace(&repo);
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            stage(
                &repo,
                FakeGenerator {
                    page: "<h1>Essays</h1>",
                    gate: None,
                },
            ),
            Deployer::new(
                DeployConfig::default(),
                DirectoryPlatform::new(&public, "folio-pages"),
                NoTokens,
            ),
            ConcurrencyGroups::new(),
        );

        let report = pipeline.run(Trigger::push("main")).await;

        assert_eq!(report.state(), RunState::DeployFailed);
        assert!(matches!(report.error, Some(PipelineError::Deploy(_))));
        assert!(!public.exists());
        let build = report.build.unwrap();
        assert!(build.artifact.archive.exists());
    }

    #[tokio::test]
    async fn only_later_of_two_overlapping_runs_publishes() {
        let temp = tempdir().unwrap();
        let public = temp.path().join("public");
        let groups = ConcurrencyGroups::new();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let first_root = temp.path().join("first");
        workspace(&first_root);
        let first = Arc::new(Pipeline::new(
            PipelineConfig::default(),
            stage(
                &first_root,
                FakeGenerator {
                    page: "first",
                    gate: Some((Arc::clone(&started), Arc::clone(&release))),
                },
            ),
            deployer(&public),
            groups.clone(),
        ));

        let second_root = temp.path().join("second");
        workspace(&second_root);
        let second = Pipeline::new(
            PipelineConfig::default(),
            stage(
                &second_root,
                FakeGenerator {
                    page: "second",
                    gate: None,
                },
            ),
            deployer(&public),
            groups.clone(),
        );

        let running = Arc::clone(&first);
        let handle = tokio::spawn(async move { running.run(Trigger::push("main")).await });
        started.notified().await;

        let later = second.run(Trigger::push("main")).await;
        release.notify_one();
        let earlier = handle.await.unwrap();

        assert_eq!(later.state(), RunState::Deployed);
        assert_eq!(earlier.state(), RunState::Superseded);
        assert!(!earlier.history.contains(&RunState::Deploying));
        assert!(matches!(earlier.error, Some(PipelineError::Superseded { .. })));
        assert_eq!(fs::read_to_string(public.join("index.html")).unwrap(), "second");
    }

    #[tokio::test]
    async fn marker_claimed_elsewhere_supersedes_run() {
        let temp = tempdir().unwrap();
        let repo = temp.path().join("repo");
        let public = temp.path().join("public");
        let state = temp.path().join("state");
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        workspace(&repo);

        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig {
                state_dir: Some(state.clone()),
                marker_poll: Duration::from_millis(10),
                ..Default::default()
            },
            stage(
                &repo,
                FakeGenerator {
                    page: "<h1>Essays</h1>",
                    gate: Some((Arc::clone(&started), Arc::clone(&release))),
                },
            ),
            deployer(&public),
            ConcurrencyGroups::new(),
        ));

        let running = Arc::clone(&pipeline);
        let handle = tokio::spawn(async move { running.run(Trigger::push("main")).await });
        started.notified().await;

        // Another process enters the group.
        let other = GroupMarker::claim(&state, "pages", "other-process").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_one();

        let report = handle.await.unwrap();

        assert_eq!(report.state(), RunState::Superseded);
        assert!(!public.exists());
        assert!(other.is_current());
    }

    #[tokio::test]
    async fn superseded_run_sharing_a_checkout_publishes_nothing() {
        let temp = tempdir().unwrap();
        let repo = temp.path().join("repo");
        let public = temp.path().join("public");
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        workspace(&repo);

        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig::default(),
            BuildStage::new(
                BuildConfig {
                    root: repo.clone(),
                    ..Default::default()
                },
                FakeProvisioner,
                FirstCallParks {
                    calls: AtomicUsize::new(0),
                    started: Arc::clone(&started),
                    release: Arc::clone(&release),
                },
            ),
            deployer(&public),
            ConcurrencyGroups::new(),
        ));

        let running = Arc::clone(&pipeline);
        let handle = tokio::spawn(async move { running.run(Trigger::push("main")).await });
        started.notified().await;

        let later = pipeline.run(Trigger::push("main")).await;
        release.notify_one();
        let earlier = handle.await.unwrap();

        assert_eq!(earlier.state(), RunState::Superseded);
        assert_eq!(later.state(), RunState::Deployed);
        assert!(!public.join("from-superseded-run.html").exists());
        assert_eq!(fs::read_to_string(public.join("index.html")).unwrap(), "latest");

        let runs = repo.join(".folio/runs");
        assert!(!runs.join(earlier.id.to_string()).exists());
        assert!(runs.join(later.id.to_string()).exists());
    }

    #[tokio::test]
    async fn publishes_from_separate_processes_do_not_overlap() {
        let temp = tempdir().unwrap();
        let state = temp.path().join("state");
        let log = Arc::new(Mutex::new(Vec::new()));
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        // Separate group registries stand in for separate processes.
        let process = |name: &str, gate: Option<(Arc<Notify>, Arc<Notify>)>| {
            let root = temp.path().join(name);
            workspace(&root);
            let label = if gate.is_some() { "first" } else { "second" };
            Pipeline::new(
                PipelineConfig {
                    state_dir: Some(state.clone()),
                    marker_poll: Duration::from_millis(10),
                    ..Default::default()
                },
                stage(
                    &root,
                    FakeGenerator {
                        page: label,
                        gate: None,
                    },
                ),
                Deployer::new(
                    DeployConfig::default(),
                    RecordingPlatform {
                        label,
                        log: Arc::clone(&log),
                        gate,
                    },
                    StaticTokenSource::new("local"),
                ),
                ConcurrencyGroups::new(),
            )
        };
        let first = process("first", Some((Arc::clone(&started), Arc::clone(&release))));
        let second = process("second", None);

        let handle = tokio::spawn(async move { first.run(Trigger::push("main")).await });
        started.notified().await;

        let publishing = tokio::spawn(async move { second.run(Trigger::push("main")).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(log.lock().unwrap().is_empty());

        release.notify_one();
        let earlier = handle.await.unwrap();
        let later = publishing.await.unwrap();

        assert_eq!(earlier.state(), RunState::Deployed);
        assert_eq!(later.state(), RunState::Deployed);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }
}
