//! Provisioner Factory
//!
//! Loads the cluster, picks the backend from its `provisioner_type` and
//! wires the shared collaborators into a fresh [`Provisioner`].

use std::sync::Arc;

use tracing::debug;

use crate::backend::{AnsibleBackend, Backend, HelmBackend, Provisioner};
use crate::cluster::{Action, BackendKind};
use crate::config::ProvisionConfig;
use crate::error::Result;
use crate::progress::StatusReporter;
use crate::store::Stores;
use crate::template::TemplateRenderer;
use crate::workspace::WorkspaceManager;

pub struct ProvisionerFactory {
    config: Arc<ProvisionConfig>,
    stores: Stores,
    workspaces: WorkspaceManager,
    renderer: Arc<TemplateRenderer>,
}

impl ProvisionerFactory {
    pub fn new(config: Arc<ProvisionConfig>, stores: Stores) -> Self {
        let workspaces = WorkspaceManager::new(&config.work_root);
        let renderer = Arc::new(TemplateRenderer::new(&config.template_root));
        Self {
            config,
            stores,
            workspaces,
            renderer,
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Build the backend for `kind`. Every known backend has exactly one arm.
    pub fn backend(&self, kind: BackendKind) -> Result<Box<dyn Backend>> {
        Ok(match kind {
            BackendKind::Ansible => Box::new(AnsibleBackend::new(&self.config.ansible)?),
            BackendKind::Helm => Box::new(HelmBackend::new(&self.config.helm)?),
        })
    }

    pub fn resolve(&self, cluster_id: &str, action: Action) -> Result<Provisioner> {
        let cluster = self.stores.clusters.get_cluster(cluster_id)?;
        let kind = cluster.backend(self.config.default_backend)?;
        debug!(cluster = cluster_id, action = %action, backend = %kind, "resolved provisioner");

        let backend = self.backend(kind)?;
        let workspace = self.workspaces.open(cluster_id, action)?;
        let reporter = StatusReporter::new(
            self.stores.progress.clone(),
            &cluster,
            self.config.log_limit_bytes,
        );

        Ok(Provisioner::new(
            cluster,
            action,
            backend,
            workspace,
            self.renderer.clone(),
            reporter,
            self.config.timeout(),
        ))
    }
}
