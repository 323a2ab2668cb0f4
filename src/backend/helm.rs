use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;

use super::{Backend, OutputLine, ProgressHint, ProgressParser, resolve_executable, split_extra_args};
use crate::cluster::{Action, BackendKind, ClusterSnapshot};
use crate::config::HelmConfig;
use crate::error::Result;
use crate::template::ArtifactSpec;

pub const VALUES_FILE: &str = "values.yaml";

const ARTIFACTS: &[ArtifactSpec] = &[ArtifactSpec {
    template: "values.yaml.j2",
    file: VALUES_FILE,
}];

pub struct HelmBackend {
    executable: PathBuf,
    chart: String,
    namespace: Option<String>,
    extra_args: Vec<String>,
}

impl HelmBackend {
    pub fn new(config: &HelmConfig) -> Result<Self> {
        Ok(Self {
            executable: resolve_executable(&config.executable),
            chart: config.chart.clone(),
            namespace: config.namespace.clone().filter(|ns| !ns.trim().is_empty()),
            extra_args: split_extra_args(&config.extra_args)?,
        })
    }

    pub fn release_name(cluster: &ClusterSnapshot) -> String {
        let id: String = cluster
            .uuid
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let mut name = format!("cluster-{}", id.trim_matches('-'));
        // Helm release names are capped at 53 characters.
        name.truncate(53);
        name.trim_end_matches('-').to_string()
    }
}

impl Backend for HelmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Helm
    }

    fn executable(&self) -> &Path {
        &self.executable
    }

    fn artifacts(&self, _action: Action) -> &'static [ArtifactSpec] {
        ARTIFACTS
    }

    fn command(&self, cluster: &ClusterSnapshot, action: Action, workspace: &Path) -> Command {
        let release = Self::release_name(cluster);
        let mut cmd = Command::new(&self.executable);
        match action {
            Action::Install | Action::Update => {
                cmd.arg("upgrade")
                    .arg("--install")
                    .arg(&release)
                    .arg(&self.chart)
                    .arg("-f")
                    .arg(workspace.join(VALUES_FILE));
            }
            Action::Uninstall => {
                cmd.arg("uninstall").arg(&release);
            }
        }
        if let Some(namespace) = &self.namespace {
            cmd.arg("--namespace").arg(namespace);
        }
        cmd.args(&self.extra_args);
        cmd
    }

    fn parser(&self) -> Box<dyn ProgressParser> {
        Box::new(HelmParser)
    }
}

static INSTALLING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^Release "[^"]+" does not exist\. Installing it now"#).expect("valid regex"));
static UPGRADED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^Release "[^"]+" has been upgraded"#).expect("valid regex"));
static UNINSTALLED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^release "[^"]+" uninstalled"#).expect("valid regex"));
static STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^STATUS:\s*(?P<status>\S+)").expect("valid regex"));

/// Reads the banners `helm upgrade --install` and `helm uninstall` print.
#[derive(Debug, Default)]
pub struct HelmParser;

impl ProgressParser for HelmParser {
    fn parse_line(&mut self, line: &OutputLine) -> Option<ProgressHint> {
        let text = line.text().trim();
        if INSTALLING_RE.is_match(text) {
            return Some(ProgressHint::new("installing release", 20));
        }
        if UPGRADED_RE.is_match(text) {
            return Some(ProgressHint::new("release upgraded", 70));
        }
        if text.starts_with("NAME:") {
            return Some(ProgressHint::new("release applied", 60));
        }
        if let Some(caps) = STATUS_RE.captures(text) {
            return Some(ProgressHint::new(format!("status: {}", &caps["status"]), 90));
        }
        if UNINSTALLED_RE.is_match(text) {
            return Some(ProgressHint::new("release uninstalled", 90));
        }
        None
    }
}
