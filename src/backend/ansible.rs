use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;

use super::{Backend, OutputLine, ProgressHint, ProgressParser, resolve_executable, split_extra_args};
use crate::cluster::{Action, BackendKind, ClusterSnapshot};
use crate::config::AnsibleConfig;
use crate::error::Result;
use crate::template::ArtifactSpec;

pub const INVENTORY_FILE: &str = "inventory.yml";
pub const VARS_FILE: &str = "vars.yml";
pub const PLAYBOOK_FILE: &str = "playbook.yml";

const ARTIFACTS: &[ArtifactSpec] = &[
    ArtifactSpec {
        template: "inventory.yml.j2",
        file: INVENTORY_FILE,
    },
    ArtifactSpec {
        template: "vars.yml.j2",
        file: VARS_FILE,
    },
    ArtifactSpec {
        template: "playbook.yml.j2",
        file: PLAYBOOK_FILE,
    },
];

pub struct AnsibleBackend {
    executable: PathBuf,
    extra_args: Vec<String>,
}

impl AnsibleBackend {
    pub fn new(config: &AnsibleConfig) -> Result<Self> {
        Ok(Self {
            executable: resolve_executable(&config.executable),
            extra_args: split_extra_args(&config.extra_args)?,
        })
    }
}

impl Backend for AnsibleBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ansible
    }

    fn executable(&self) -> &Path {
        &self.executable
    }

    fn artifacts(&self, _action: Action) -> &'static [ArtifactSpec] {
        ARTIFACTS
    }

    fn command(&self, _cluster: &ClusterSnapshot, action: Action, workspace: &Path) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-i")
            .arg(workspace.join(INVENTORY_FILE))
            .arg(workspace.join(PLAYBOOK_FILE))
            .arg("-e")
            .arg(format!("@{}", workspace.join(VARS_FILE).display()))
            .arg("-e")
            .arg(format!("cluster_action={action}"))
            .args(&self.extra_args)
            .env("ANSIBLE_FORCE_COLOR", "false")
            .env("ANSIBLE_NOCOLOR", "true");
        cmd
    }

    fn parser(&self) -> Box<dyn ProgressParser> {
        Box::new(AnsibleParser::default())
    }
}

static PLAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PLAY \[(?P<name>[^\]]*)\]").expect("valid regex"));
static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^TASK \[(?P<name>[^\]]*)\]").expect("valid regex"));
static RECAP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PLAY RECAP").expect("valid regex"));

/// Reads `ansible-playbook` headers. The task count is unknown up front, so
/// percent grows with every task and levels off below 95 until the recap.
#[derive(Debug, Default)]
pub struct AnsibleParser {
    tasks: u32,
}

impl AnsibleParser {
    fn percent(&self) -> u8 {
        let tasks = self.tasks as u64;
        (5 + 90 * tasks / (tasks + 10)) as u8
    }
}

impl ProgressParser for AnsibleParser {
    fn parse_line(&mut self, line: &OutputLine) -> Option<ProgressHint> {
        if line.is_stderr() {
            return None;
        }
        let text = line.text().trim_start();
        if RECAP_RE.is_match(text) {
            return Some(ProgressHint::new("recap", 95));
        }
        if let Some(caps) = PLAY_RE.captures(text) {
            return Some(ProgressHint {
                stage: Some(format!("play: {}", caps["name"].trim())),
                percent: None,
            });
        }
        if let Some(caps) = TASK_RE.captures(text) {
            self.tasks += 1;
            return Some(ProgressHint::new(caps["name"].trim(), self.percent()));
        }
        None
    }
}
