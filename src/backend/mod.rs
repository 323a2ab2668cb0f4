mod ansible;
mod helm;
mod process;

pub use ansible::{AnsibleBackend, AnsibleParser};
pub use helm::{HelmBackend, HelmParser};
pub use process::{CancelToken, OutputLine, ProcessError, ProcessOutcome, run_streaming};

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cluster::{Action, BackendKind, ClusterSnapshot};
use crate::error::{Error, Result};
use crate::progress::StatusReporter;
use crate::template::{Artifact, ArtifactSpec, TemplateContext, TemplateRenderer};
use crate::workspace::Workspace;

/// Stage/percent hint extracted from one line of backend output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressHint {
    pub stage: Option<String>,
    pub percent: Option<u8>,
}

impl ProgressHint {
    pub fn new(stage: impl Into<String>, percent: u8) -> Self {
        Self {
            stage: Some(stage.into()),
            percent: Some(percent),
        }
    }
}

/// Turns a backend's output stream into progress hints. Lines without a
/// recognisable hint are simply ignored.
pub trait ProgressParser: Send {
    fn parse_line(&mut self, line: &OutputLine) -> Option<ProgressHint>;
}

/// What differs between provisioning backends: templates, the command
/// line, and how output is read.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    fn executable(&self) -> &Path;

    fn artifacts(&self, action: Action) -> &'static [ArtifactSpec];

    fn command(&self, cluster: &ClusterSnapshot, action: Action, workspace: &Path) -> Command;

    fn parser(&self) -> Box<dyn ProgressParser>;

    fn validate(&self) -> Result<()> {
        let mut cmd = Command::new(self.executable());
        cmd.arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let ok = cmd.status().is_ok_and(|status| status.success());
        if ok {
            Ok(())
        } else {
            Err(Error::BackendFailed {
                backend: self.kind().to_string(),
                exit_code: None,
                detail: format!("{} is not executable", self.executable().display()),
            })
        }
    }

    fn version(&self) -> Option<String> {
        let output = Command::new(self.executable()).arg("--version").output().ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

/// Resolve a configured executable on `PATH` unless it already is a path.
pub(crate) fn resolve_executable(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.components().count() > 1 {
        return path.to_path_buf();
    }
    which::which(configured).unwrap_or_else(|_| path.to_path_buf())
}

pub(crate) fn split_extra_args(raw: &str) -> Result<Vec<String>> {
    shell_words::split(raw)
        .map_err(|e| Error::InvalidConfig(format!("cannot parse extra_args '{raw}': {e}")))
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the configured backend timeout.
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
    /// Render artifacts into the workspace but do not invoke the backend.
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct RunReport {
    pub cluster_id: String,
    pub action: Action,
    pub backend: BackendKind,
    pub workspace: PathBuf,
    pub artifacts: Vec<PathBuf>,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// Progress writes that failed without affecting the outcome.
    pub warnings: Vec<Error>,
}

/// One provisioning run for one (cluster, action) pair. Consumed by
/// [`Provisioner::run`], so an instance never outlives its action.
pub struct Provisioner {
    cluster: ClusterSnapshot,
    action: Action,
    backend: Box<dyn Backend>,
    workspace: Workspace,
    renderer: Arc<TemplateRenderer>,
    reporter: StatusReporter,
    timeout: Duration,
}

impl Provisioner {
    pub fn new(
        cluster: ClusterSnapshot,
        action: Action,
        backend: Box<dyn Backend>,
        workspace: Workspace,
        renderer: Arc<TemplateRenderer>,
        reporter: StatusReporter,
        timeout: Duration,
    ) -> Self {
        Self {
            cluster,
            action,
            backend,
            workspace,
            renderer,
            reporter,
            timeout,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn cluster(&self) -> &ClusterSnapshot {
        &self.cluster
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn run(mut self, options: &RunOptions) -> Result<RunReport> {
        let started = Instant::now();
        let kind = self.backend.kind();

        if self.cluster.is_empty() {
            return Err(Error::EmptyCluster(self.cluster.uuid.clone()));
        }

        let artifacts = {
            let ctx = TemplateContext::new(
                &self.cluster,
                self.action,
                kind.id(),
                self.workspace.path(),
            );
            self.renderer
                .render_all(kind.id(), self.backend.artifacts(self.action), &ctx)?
        };

        info!(
            cluster = %self.cluster.uuid,
            action = %self.action,
            backend = %kind,
            workspace = %self.workspace.path().display(),
            "provisioning started"
        );

        if options.dry_run {
            let written = self.write_artifacts(&artifacts)?;
            return Ok(self.finish(started, written, None));
        }

        self.reporter.begin("preparing");
        let written = match self.write_artifacts(&artifacts) {
            Ok(written) => written,
            Err(err) => {
                self.reporter.fail(&format!("workspace error: {err}"));
                return Err(err.with_warnings(self.reporter.take_warnings()));
            }
        };
        self.reporter.advance(Some("running"), Some(5));

        let mut cmd = self
            .backend
            .command(&self.cluster, self.action, self.workspace.path());
        cmd.current_dir(self.workspace.path());
        debug!(command = ?cmd, "invoking backend");

        let timeout = options.timeout.unwrap_or(self.timeout);
        let mut parser = self.backend.parser();
        let reporter = &mut self.reporter;
        let result = run_streaming(cmd, timeout, &options.cancel, |line| {
            debug!(stderr = line.is_stderr(), "{}", line.text());
            reporter.append_log(line.text());
            if let Some(hint) = parser.parse_line(line) {
                reporter.advance(hint.stage.as_deref(), hint.percent);
            }
        });

        let backend = kind.to_string();
        let cluster = self.cluster.uuid.clone();
        let err = match result {
            Ok(outcome) if outcome.success() => {
                self.reporter.succeed();
                let report = self.finish(started, written, outcome.exit_code);
                info!(cluster = %cluster, backend = %backend, duration_ms = report.duration.as_millis() as u64, "provisioning succeeded");
                return Ok(report);
            }
            Ok(outcome) => {
                let mut detail = process::tail_lines(&outcome.stderr, 5);
                if detail.is_empty() {
                    detail = process::tail_lines(&outcome.stdout, 5);
                }
                let err = Error::BackendFailed {
                    backend,
                    exit_code: outcome.exit_code,
                    detail,
                };
                self.reporter.fail(&err.to_string());
                warn!(cluster = %cluster, error = %err, "provisioning failed");
                err
            }
            Err(ProcessError::Spawn(e)) => {
                let err = Error::BackendFailed {
                    backend,
                    exit_code: None,
                    detail: format!(
                        "failed to start {}: {e}",
                        self.backend.executable().display()
                    ),
                };
                self.reporter.fail(&err.to_string());
                err
            }
            Err(ProcessError::Wait(e)) => {
                let err = Error::BackendFailed {
                    backend,
                    exit_code: None,
                    detail: format!("lost track of backend process: {e}"),
                };
                self.reporter.fail(&err.to_string());
                err
            }
            Err(ProcessError::Cancelled) => {
                self.reporter.fail(&format!(
                    "provisioning cancelled; workspace kept at {}",
                    self.workspace.path().display()
                ));
                warn!(cluster = %cluster, "provisioning cancelled");
                Error::Cancelled { cluster, backend }
            }
            Err(ProcessError::TimedOut(limit)) => {
                self.reporter.fail(&format!(
                    "provisioning timed out after {}s; workspace kept at {}",
                    limit.as_secs(),
                    self.workspace.path().display()
                ));
                warn!(cluster = %cluster, limit_secs = limit.as_secs(), "provisioning timed out");
                Error::TimedOut {
                    cluster,
                    backend,
                    limit_secs: limit.as_secs(),
                }
            }
        };
        Err(err.with_warnings(self.reporter.take_warnings()))
    }

    fn write_artifacts(&mut self, artifacts: &[Artifact]) -> Result<Vec<PathBuf>> {
        self.workspace.ensure()?;
        let mut written = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let path = self.workspace.write(&artifact.file, &artifact.content)?;
            if !written.contains(&path) {
                written.push(path);
            }
        }
        Ok(written)
    }

    fn finish(&mut self, started: Instant, artifacts: Vec<PathBuf>, exit_code: Option<i32>) -> RunReport {
        RunReport {
            cluster_id: self.cluster.uuid.clone(),
            action: self.action,
            backend: self.backend.kind(),
            workspace: self.workspace.path().to_path_buf(),
            artifacts,
            exit_code,
            duration: started.elapsed(),
            warnings: self.reporter.take_warnings(),
        }
    }
}
