//! Workspace Manager
//!
//! Owns `<root>/<cluster>/<action>/` directories and is the only component
//! that touches the filesystem on behalf of a run.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::cluster::Action;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cluster_dir(&self, cluster_id: &str) -> Result<PathBuf> {
        validate_cluster_id(&self.root, cluster_id)?;
        Ok(self.root.join(cluster_id))
    }

    /// Path of the action directory, without creating it.
    pub fn path_for(&self, cluster_id: &str, action: Action) -> Result<PathBuf> {
        Ok(self.cluster_dir(cluster_id)?.join(action.as_str()))
    }

    /// Create every missing level of `<root>/<cluster>/<action>`.
    pub fn ensure(&self, cluster_id: &str, action: Action) -> Result<PathBuf> {
        let path = self.path_for(cluster_id, action)?;
        create_private_dir(&path)?;
        Ok(path)
    }

    /// Append `content` to `<path>/<name>`, creating parents as needed.
    pub fn append(&self, path: &Path, name: &str, content: &[u8]) -> Result<PathBuf> {
        write_private(path, name, content, true)
    }

    /// Remove the whole cluster tree, all actions included.
    pub fn teardown(&self, cluster_id: &str) -> Result<()> {
        let dir = self.cluster_dir(cluster_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::workspace(&dir, e)),
        }
        if dir.exists() {
            return Err(Error::workspace(&dir, "directory still present after removal"));
        }
        info!(cluster = cluster_id, path = %dir.display(), "workspace removed");
        Ok(())
    }

    /// Handle for one run of `action`; see [`Workspace`].
    pub fn open(&self, cluster_id: &str, action: Action) -> Result<Workspace> {
        Ok(Workspace {
            path: self.path_for(cluster_id, action)?,
            touched: HashSet::new(),
        })
    }
}

/// Workspace view for a single run.
///
/// The first write of a file during the run replaces what a previous run
/// left there; later writes of the same file append. Re-running an action
/// therefore reproduces the same artifacts.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    touched: HashSet<String>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ensure(&self) -> Result<()> {
        create_private_dir(&self.path)
    }

    pub fn write(&mut self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let append = !self.touched.insert(name.to_string());
        write_private(&self.path, name, content, append)
    }
}

fn validate_cluster_id(root: &Path, cluster_id: &str) -> Result<()> {
    let unsafe_id = cluster_id.trim().is_empty()
        || cluster_id == "."
        || cluster_id.contains("..")
        || cluster_id.contains(['/', '\\', '\0']);
    if unsafe_id {
        return Err(Error::workspace(
            root,
            format!("invalid cluster id '{cluster_id}'"),
        ));
    }
    Ok(())
}

fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path).map_err(|e| Error::workspace(path, e))
}

/// File names are relative paths that stay below the workspace.
fn validate_file_name(dir: &Path, name: &str) -> Result<()> {
    let relative = Path::new(name);
    let unsafe_name = name.trim().is_empty()
        || name.contains('\0')
        || !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if unsafe_name {
        return Err(Error::workspace(dir, format!("invalid file name '{name}'")));
    }
    Ok(())
}

fn write_private(dir: &Path, name: &str, content: &[u8], append: bool) -> Result<PathBuf> {
    validate_file_name(dir, name)?;
    let target = dir.join(name);
    if let Some(parent) = target.parent() {
        create_private_dir(parent)?;
    }

    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(&target)
        .map_err(|e| Error::workspace(&target, e))?;
    file.write_all(content)
        .map_err(|e| Error::workspace(&target, e))?;

    // Files created by an older run may carry wider bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&target, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::workspace(&target, e))?;
    }

    debug!(path = %target.display(), bytes = content.len(), append, "artifact written");
    Ok(target)
}
