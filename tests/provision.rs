#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use provision::Error;
use provision::backend::{CancelToken, RunOptions};
use provision::cluster::{Action, BackendKind, ClusterSnapshot, Node, NodeRole};
use provision::config::ProvisionConfig;
use provision::orchestrator::Orchestrator;
use provision::progress::ProvisioningState;
use provision::store::{MemoryStore, Stores};
use tempfile::TempDir;

const OK_PLAYBOOK: &str = r#"echo "$@" > args.txt
echo "PLAY [contrail] ****"
echo "TASK [Gathering Facts] ****"
echo "ok: [n1]"
echo "TASK [install packages] ****"
echo "PLAY RECAP ****"
exit 0"#;

struct Harness {
    dir: TempDir,
    store: Arc<MemoryStore>,
    orchestrator: Arc<Orchestrator>,
}

impl Harness {
    fn new(ansible_body: &str) -> Self {
        Self::with(ansible_body, "exit 0", |_| {})
    }

    fn with(ansible_body: &str, helm_body: &str, tweak: impl FnOnce(&mut ProvisionConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ansible = fake_backend(dir.path(), "ansible-playbook", ansible_body);
        let helm = fake_backend(dir.path(), "helm", helm_body);

        let mut config = ProvisionConfig {
            work_root: dir.path().join("work"),
            template_root: Path::new(env!("CARGO_MANIFEST_DIR")).join("templates"),
            default_backend: BackendKind::Ansible,
            timeout_secs: 30,
            ..Default::default()
        };
        config.ansible.executable = ansible.display().to_string();
        config.helm.executable = helm.display().to_string();
        tweak(&mut config);

        let store = Arc::new(
            MemoryStore::new()
                .with_cluster(cluster("c1", "ansible", 1))
                .with_cluster(cluster("c2", "helm", 2))
                .with_cluster(cluster("c3", "ansible", 1))
                .with_cluster(cluster("odd", "salt", 1))
                .with_cluster(cluster("empty", "ansible", 0)),
        );
        let orchestrator = Arc::new(Orchestrator::new(config, Stores::shared(store.clone())));
        Self {
            dir,
            store,
            orchestrator,
        }
    }

    fn work(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn provision(&self, id: &str, action: Action) -> provision::Result<provision::backend::RunReport> {
        self.orchestrator.provision(id, action, &RunOptions::default())
    }

    fn wait_until_running(&self, id: &str, action: Action) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.orchestrator.guards().is_active(id, action) {
            assert!(Instant::now() < deadline, "run never started");
            std::thread::sleep(Duration::from_millis(10));
        }
        // Percent 5 is published right before the backend starts.
        let started = Instant::now() + Duration::from_secs(10);
        while self.store.latest(&format!("{id}-r1")).is_none_or(|r| r.percent < 5) {
            assert!(Instant::now() < started, "backend never started");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

fn fake_backend(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn cluster(id: &str, tag: &str, roles: usize) -> ClusterSnapshot {
    ClusterSnapshot {
        uuid: id.into(),
        name: format!("{id}-lab"),
        provisioner_type: tag.into(),
        nodes: vec![Node {
            name: "n1".into(),
            ip_address: "10.0.0.1".into(),
            roles: (1..=roles)
                .map(|i| NodeRole {
                    uuid: format!("{id}-r{i}"),
                    kind: "contrail_controller_node_role".into(),
                    ..Default::default()
                })
                .collect(),
        }],
        ..Default::default()
    }
}

#[test]
fn ansible_install_succeeds_with_monotonic_progress() {
    let h = Harness::new(OK_PLAYBOOK);
    let report = h.provision("c1", Action::Install).unwrap();

    let workspace = h.work().join("c1").join("install");
    assert_eq!(report.workspace, workspace);
    assert_eq!(report.exit_code, Some(0));
    assert!(report.warnings.is_empty());

    let inventory = fs::read_to_string(workspace.join("inventory.yml")).unwrap();
    assert!(inventory.contains("ansible_host: 10.0.0.1"));
    assert!(inventory.contains("contrail_controller_node_role:"));
    let args = fs::read_to_string(workspace.join("args.txt")).unwrap();
    assert!(args.contains("cluster_action=install"));

    let history = h.store.history("c1-r1");
    let percents: Vec<_> = history.iter().map(|r| r.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert!(history.iter().any(|r| r.stage == "install packages"));
    assert!(history.iter().all(|r| r.start_time == history[0].start_time));

    let last = history.last().unwrap();
    assert_eq!(last.state, ProvisioningState::Succeeded);
    assert_eq!(last.stage, "complete");
    assert_eq!(last.percent, 100);
    assert!(last.log.contains("PLAY RECAP"));
}

#[test]
fn backend_failure_is_reported_and_returned() {
    let h = Harness::new("echo 'fatal: [n1]: UNREACHABLE' ; echo 'connection refused' 1>&2; exit 1");
    let err = h.provision("c1", Action::Install).unwrap_err();
    match &err {
        Error::BackendFailed {
            exit_code, detail, ..
        } => {
            assert_eq!(*exit_code, Some(1));
            assert!(detail.contains("connection refused"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let last = h.store.latest("c1-r1").unwrap();
    assert_eq!(last.state, ProvisioningState::Failed);
    assert!(last.log.contains("connection refused"));
}

#[test]
fn unknown_cluster_leaves_no_trace() {
    let h = Harness::new(OK_PLAYBOOK);
    assert!(matches!(
        h.provision("ghost", Action::Install),
        Err(Error::NotFound(_))
    ));
    assert!(h.store.writes().is_empty());
    assert!(!h.work().exists());
}

#[test]
fn unsupported_and_empty_clusters_fail_before_any_side_effect() {
    let h = Harness::new(OK_PLAYBOOK);
    assert!(matches!(
        h.provision("odd", Action::Install),
        Err(Error::UnsupportedBackend(tag)) if tag == "salt"
    ));
    assert!(matches!(
        h.provision("empty", Action::Install),
        Err(Error::EmptyCluster(_))
    ));
    assert!(h.store.writes().is_empty());
    assert!(!h.work().exists());
}

#[test]
fn template_error_aborts_before_workspace_and_backend() {
    let templates = tempfile::tempdir().unwrap();
    let ansible = templates.path().join("ansible");
    fs::create_dir_all(&ansible).unwrap();
    fs::write(ansible.join("inventory.yml.j2"), "{{ nodes }}").unwrap();
    fs::write(ansible.join("vars.yml.j2"), "{{ cluster.no_such_key }}").unwrap();
    fs::write(ansible.join("playbook.yml.j2"), "- hosts: all").unwrap();
    let root = templates.path().to_path_buf();

    let h = Harness::with("touch ran; exit 0", "exit 0", |config| {
        config.template_root = root;
    });
    let err = h.provision("c1", Action::Install).unwrap_err();
    assert_eq!(err.kind(), "template_error");
    assert!(h.store.writes().is_empty());
    assert!(!h.work().exists());
}

#[test]
fn helm_backend_upgrades_release_with_rendered_values() {
    let helm = r#"echo "$@" > args.txt
echo 'Release "cluster-c2" does not exist. Installing it now.'
echo 'NAME: cluster-c2'
echo 'STATUS: deployed'"#;
    let h = Harness::with("exit 1", helm, |_| {});
    let report = h.provision("c2", Action::Install).unwrap();
    assert_eq!(report.backend, BackendKind::Helm);

    let args = fs::read_to_string(report.workspace.join("args.txt")).unwrap();
    assert!(args.starts_with("upgrade --install cluster-c2 contrail/contrail -f"));
    let values = fs::read_to_string(report.workspace.join("values.yaml")).unwrap();
    assert!(values.contains("\"c2-lab\""));

    for role in ["c2-r1", "c2-r2"] {
        let history = h.store.history(role);
        assert!(history.iter().any(|r| r.stage == "status: deployed"));
        assert_eq!(history.last().unwrap().percent, 100);
    }
}

#[test]
fn concurrent_runs_of_same_pair_are_exclusive() {
    let h = Harness::new("echo run >> invocations.log; sleep 2; exit 0");
    let first = h
        .orchestrator
        .spawn("c1", Action::Install, RunOptions::default())
        .unwrap();
    h.wait_until_running("c1", Action::Install);

    assert!(matches!(
        h.provision("c1", Action::Install),
        Err(Error::AlreadyRunning { .. })
    ));
    // Teardown must not pull the workspace out from under a run.
    assert!(matches!(
        h.orchestrator.teardown("c1"),
        Err(Error::AlreadyRunning { .. })
    ));

    first.join().unwrap().unwrap();
    let log = fs::read_to_string(h.work().join("c1/install/invocations.log")).unwrap();
    assert_eq!(log.lines().count(), 1);

    // Claim is released once the run finished.
    h.provision("c1", Action::Install).unwrap();
}

#[test]
fn different_clusters_run_in_parallel() {
    let h = Harness::new("sleep 1; exit 0");
    let started = Instant::now();
    let handles: Vec<_> = ["c1", "c3"]
        .into_iter()
        .map(|id| {
            h.orchestrator
                .spawn(id, Action::Update, RunOptions::default())
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(1900));
    assert!(h.work().join("c1/update").is_dir());
    assert!(h.work().join("c3/update").is_dir());
}

#[test]
fn cancellation_kills_backend_and_keeps_workspace() {
    let h = Harness::new("exec sleep 30");
    let cancel = CancelToken::new();
    let options = RunOptions {
        cancel: cancel.clone(),
        ..Default::default()
    };
    let run = h.orchestrator.spawn("c1", Action::Install, options).unwrap();
    h.wait_until_running("c1", Action::Install);
    cancel.cancel();

    let err = run.join().unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
    let last = h.store.latest("c1-r1").unwrap();
    assert_eq!(last.state, ProvisioningState::Failed);
    assert!(last.log.contains("cancelled"));
    assert!(h.work().join("c1/install/inventory.yml").exists());
}

#[test]
fn timeout_marks_run_failed() {
    let h = Harness::new("exec sleep 30");
    let options = RunOptions {
        timeout: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let err = h
        .orchestrator
        .provision("c1", Action::Install, &options)
        .unwrap_err();
    assert!(matches!(err, Error::TimedOut { .. }));
    let last = h.store.latest("c1-r1").unwrap();
    assert_eq!(last.state, ProvisioningState::Failed);
    assert!(last.log.contains("timed out"));
}

#[test]
fn progress_store_outage_does_not_fail_the_run() {
    let h = Harness::new(OK_PLAYBOOK);
    h.store.fail_progress_writes(true);
    let report = h.provision("c1", Action::Install).unwrap();
    assert!(!report.warnings.is_empty());
    assert!(report.warnings.iter().all(|w| w.kind() == "report_failed"));
}

#[test]
fn rerun_reproduces_artifacts_and_teardown_clears_them() {
    let h = Harness::new(OK_PLAYBOOK);
    h.provision("c1", Action::Install).unwrap();
    let inventory = h.work().join("c1/install/inventory.yml");
    let first = fs::read_to_string(&inventory).unwrap();
    h.provision("c1", Action::Install).unwrap();
    assert_eq!(fs::read_to_string(&inventory).unwrap(), first);

    h.provision("c1", Action::Update).unwrap();
    h.orchestrator.teardown("c1").unwrap();
    assert!(!h.work().join("c1").exists());

    let fresh = h
        .orchestrator
        .factory()
        .workspaces()
        .ensure("c1", Action::Install)
        .unwrap();
    assert_eq!(fs::read_dir(fresh).unwrap().count(), 0);
}

#[test]
fn dry_run_renders_without_backend_or_progress() {
    let h = Harness::new("touch ran; exit 0");
    let options = RunOptions {
        dry_run: true,
        ..Default::default()
    };
    let report = h
        .orchestrator
        .provision("c1", Action::Install, &options)
        .unwrap();
    assert_eq!(report.artifacts.len(), 3);
    assert!(report.workspace.join("playbook.yml").exists());
    assert!(!report.workspace.join("ran").exists());
    assert!(h.store.writes().is_empty());
}

#[test]
fn missing_executable_is_backend_failure() {
    let h = Harness::with(OK_PLAYBOOK, "exit 0", |config| {
        config.ansible.executable = "/nonexistent/ansible-playbook".into();
    });
    let err = h.provision("c1", Action::Install).unwrap_err();
    assert_eq!(err.kind(), "backend_failed");
    assert_eq!(
        h.store.latest("c1-r1").unwrap().state,
        ProvisioningState::Failed
    );
}

#[test]
fn backend_leaving_a_background_child_still_succeeds() {
    let h = Harness::new("sleep 10 & echo 'PLAY RECAP ****'; exit 0");
    let options = RunOptions {
        timeout: Some(Duration::from_secs(4)),
        ..Default::default()
    };
    let started = Instant::now();
    h.orchestrator
        .provision("c1", Action::Install, &options)
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(
        h.store.latest("c1-r1").unwrap().state,
        ProvisioningState::Succeeded
    );
}

#[test]
fn failed_run_carries_lost_progress_reports() {
    let h = Harness::new("echo 'connection refused' 1>&2; exit 1");
    h.store.fail_progress_writes(true);
    let err = h.provision("c1", Action::Install).unwrap_err();

    assert_eq!(err.kind(), "backend_failed");
    assert_eq!(err.exit_code(), 30);
    assert!(matches!(
        err.inner(),
        Error::BackendFailed { detail, .. } if detail.contains("connection refused")
    ));
    assert!(!err.warnings().is_empty());
    assert!(err.warnings().iter().all(|w| w.kind() == "report_failed"));
}

#[test]
fn unwritable_work_root_fails_the_run_with_cause_in_log() {
    let h = Harness::new("touch ran; exit 0");
    // A regular file where the workspace root should be.
    fs::write(h.work(), b"not a directory").unwrap();

    let err = h.provision("c1", Action::Install).unwrap_err();
    assert!(matches!(err, Error::WorkspaceError { .. }), "{err}");

    let last = h.store.latest("c1-r1").unwrap();
    assert_eq!(last.state, ProvisioningState::Failed);
    assert!(last.log.contains("workspace error"), "{}", last.log);
    assert!(last.log.to_lowercase().contains("not a directory"), "{}", last.log);
}
