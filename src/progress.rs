//! Progress Reporting
//!
//! Per-node-role provisioning status and the reporter that writes it through
//! to the progress store while a run is in flight.

use std::fmt;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cluster::ClusterSnapshot;
use crate::error::{Error, Result};
use crate::store::ProgressStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    #[default]
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl ProvisioningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisioningState::Succeeded | ProvisioningState::Failed)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningState::Pending => write!(f, "pending"),
            ProvisioningState::InProgress => write!(f, "in_progress"),
            ProvisioningState::Succeeded => write!(f, "succeeded"),
            ProvisioningState::Failed => write!(f, "failed"),
        }
    }
}

/// Complete progress record; every write replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(rename = "provisioning_state")]
    pub state: ProvisioningState,
    #[serde(rename = "provisioning_progress_stage")]
    pub stage: String,
    #[serde(rename = "provisioning_progress")]
    pub percent: u8,
    #[serde(rename = "provisioning_log")]
    pub log: String,
    #[serde(rename = "provisioning_start_time")]
    pub start_time: String,
}

/// Where a record is written: one node role of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgressTarget {
    pub cluster_id: String,
    pub node_role_id: String,
    /// Resource type in the API, e.g. `contrail-controller-node-role`.
    pub resource: String,
}

impl ProgressTarget {
    pub fn new(cluster_id: &str, node_role_id: &str, kind: &str) -> Self {
        let resource = if kind.trim().is_empty() {
            "node-role".to_string()
        } else {
            kind.trim().replace('_', "-")
        };
        Self {
            cluster_id: cluster_id.to_string(),
            node_role_id: node_role_id.to_string(),
            resource,
        }
    }
}

impl fmt::Display for ProgressTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource, self.node_role_id)
    }
}

pub const STAGE_COMPLETE: &str = "complete";
pub const STAGE_FAILED: &str = "failed";

/// Writes progress for every node role of one cluster during one run.
///
/// Holds the run's current record so that percent never moves backwards and
/// nothing is written once the run reached a terminal state. Store failures
/// never abort the run; they are logged and kept as warnings.
pub struct StatusReporter {
    store: Arc<dyn ProgressStore>,
    cluster_id: String,
    targets: Vec<ProgressTarget>,
    log_limit: usize,
    current: Option<ProgressRecord>,
    warnings: Vec<Error>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn ProgressStore>, cluster: &ClusterSnapshot, log_limit: usize) -> Self {
        let targets = cluster
            .node_roles()
            .map(|entry| ProgressTarget::new(&cluster.uuid, &entry.role.uuid, &entry.role.kind))
            .collect();
        Self {
            store,
            cluster_id: cluster.uuid.clone(),
            targets,
            log_limit,
            current: None,
            warnings: Vec::new(),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn targets(&self) -> &[ProgressTarget] {
        &self.targets
    }

    /// One write of a complete record for one node role.
    pub fn report(&self, target: &ProgressTarget, record: &ProgressRecord) -> Result<()> {
        self.store
            .put_progress(target, record)
            .map_err(|err| match err {
                Error::ReportFailed { .. } => err,
                other => Error::ReportFailed {
                    target: target.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    /// Starts a new run: stamps the start time and publishes `in_progress`.
    pub fn begin(&mut self, stage: &str) {
        self.current = Some(ProgressRecord {
            state: ProvisioningState::InProgress,
            stage: stage.to_string(),
            percent: 0,
            log: String::new(),
            start_time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        self.publish();
    }

    /// Moves the run forward. Lower percentages than already reported are
    /// raised to the previous value.
    pub fn advance(&mut self, stage: Option<&str>, percent: Option<u8>) {
        let Some(record) = self.current.as_mut() else {
            return;
        };
        if record.state.is_terminal() {
            debug!(cluster = %self.cluster_id, "ignoring progress after terminal state");
            return;
        }
        let mut changed = false;
        if let Some(stage) = stage
            && record.stage != stage
        {
            record.stage = stage.to_string();
            changed = true;
        }
        if let Some(percent) = percent {
            let percent = percent.min(100).max(record.percent);
            if percent != record.percent {
                record.percent = percent;
                changed = true;
            }
        }
        if changed {
            self.publish();
        }
    }

    /// Adds a line to the cumulative log without writing it out.
    pub fn append_log(&mut self, line: &str) {
        let limit = self.log_limit;
        let Some(record) = self.current.as_mut() else {
            return;
        };
        if record.state.is_terminal() {
            return;
        }
        record.log.push_str(line);
        if !line.ends_with('\n') {
            record.log.push('\n');
        }
        trim_front(&mut record.log, limit);
    }

    pub fn succeed(&mut self) {
        self.finish(ProvisioningState::Succeeded, STAGE_COMPLETE, None);
    }

    pub fn fail(&mut self, reason: &str) {
        self.finish(ProvisioningState::Failed, STAGE_FAILED, Some(reason));
    }

    fn finish(&mut self, state: ProvisioningState, stage: &str, reason: Option<&str>) {
        if self.current.as_ref().is_none_or(|r| r.state.is_terminal()) {
            return;
        }
        if let Some(reason) = reason {
            self.append_log(reason);
        }
        if let Some(record) = self.current.as_mut() {
            record.state = state;
            record.stage = stage.to_string();
            if state == ProvisioningState::Succeeded {
                record.percent = 100;
            }
        }
        self.publish();
    }

    pub fn record(&self) -> Option<&ProgressRecord> {
        self.current.as_ref()
    }

    pub fn take_warnings(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.warnings)
    }

    fn publish(&mut self) {
        let Some(record) = self.current.as_ref() else {
            return;
        };
        let mut failures = Vec::new();
        for target in &self.targets {
            if let Err(err) = self.report(target, record) {
                warn!(cluster = %self.cluster_id, target = %target, error = %err, "progress write failed");
                failures.push(err);
            }
        }
        self.warnings.extend(failures);
    }
}

fn trim_front(log: &mut String, limit: usize) {
    if limit == 0 || log.len() <= limit {
        return;
    }
    let mut cut = log.len() - limit;
    while !log.is_char_boundary(cut) {
        cut += 1;
    }
    log.drain(..cut);
}
