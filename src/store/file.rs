use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::cluster::ClusterSnapshot;
use crate::error::{Error, Result};
use crate::progress::{ProgressRecord, ProgressTarget};

use super::{ClusterStore, ProgressStore};

/// Directory-backed store.
///
/// Clusters are read from `<root>/<id>.json`, `<id>.yaml` or `<id>.yml`;
/// progress is written to `<root>/progress/<node_role_id>.json`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn progress_path(&self, node_role_id: &str) -> PathBuf {
        self.root
            .join("progress")
            .join(format!("{}.json", sanitize(node_role_id)))
    }

    /// Reads back the last record written for a node role.
    pub fn read_progress(&self, node_role_id: &str) -> Result<Option<ProgressRecord>> {
        let path = self.progress_path(node_role_id);
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| Error::workspace(&path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::workspace(&path, e)),
        }
    }

    fn cluster_candidates(&self, id: &str) -> Vec<PathBuf> {
        ["json", "yaml", "yml"]
            .iter()
            .map(|ext| self.root.join(format!("{id}.{ext}")))
            .collect()
    }
}

impl ClusterStore for FileStore {
    fn get_cluster(&self, id: &str) -> Result<ClusterSnapshot> {
        if id.is_empty() || sanitize(id) != id {
            return Err(Error::NotFound(id.to_string()));
        }
        for path in self.cluster_candidates(id) {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::load_failed(id, format!("{}: {e}", path.display()))),
            };
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            let mut cluster: ClusterSnapshot = if is_json {
                serde_json::from_str(&text)
                    .map_err(|e| Error::load_failed(id, format!("{}: {e}", path.display())))?
            } else {
                serde_yaml::from_str(&text)
                    .map_err(|e| Error::load_failed(id, format!("{}: {e}", path.display())))?
            };
            if cluster.uuid.is_empty() {
                cluster.uuid = id.to_string();
            }
            return Ok(cluster);
        }
        Err(Error::NotFound(id.to_string()))
    }
}

impl ProgressStore for FileStore {
    fn put_progress(&self, target: &ProgressTarget, record: &ProgressRecord) -> Result<()> {
        let report_err = |reason: String| Error::ReportFailed {
            target: target.to_string(),
            reason,
        };
        let path = self.progress_path(&target.node_role_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| report_err(e.to_string()))?;
        }
        let body = serde_json::to_string_pretty(record).map_err(|e| report_err(e.to_string()))?;
        fs::write(&path, body).map_err(|e| report_err(format!("{}: {e}", path.display())))
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect::<String>()
        .replace("..", "__")
}
