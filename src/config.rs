use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cluster::BackendKind;
use crate::error::{Error, Result};

const CONFIG_NAMES: &[&str] = &["provision.toml", ".provisionrc"];

/// Orchestrator configuration loaded from `provision.toml` or `.provisionrc`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Root holding one workspace directory per cluster.
    pub work_root: PathBuf,
    /// Root of `<backend>/<artifact>.j2` templates.
    pub template_root: PathBuf,
    /// Backend used when a cluster leaves `provisioner_type` empty.
    pub default_backend: BackendKind,
    /// Backend process timeout in seconds.
    pub timeout_secs: u64,
    /// Upper bound for the cumulative provisioning log.
    pub log_limit_bytes: usize,
    pub store: StoreConfig,
    pub ansible: AnsibleConfig,
    pub helm: HelmConfig,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("/var/tmp/provision"),
            template_root: PathBuf::from("templates"),
            default_backend: BackendKind::Ansible,
            timeout_secs: 3600,
            log_limit_bytes: 64 * 1024,
            store: StoreConfig::default(),
            ansible: AnsibleConfig::default(),
            helm: HelmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    File,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// Directory for the file store.
    pub path: PathBuf,
    /// Base URL of the resource API for the http store.
    pub endpoint: String,
    pub token: Option<String>,
    pub request_timeout_secs: u64,
    pub cluster_resource: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::File,
            path: PathBuf::from("clusters"),
            endpoint: "http://127.0.0.1:9091".to_string(),
            token: None,
            request_timeout_secs: 30,
            cluster_resource: "contrail-cluster".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnsibleConfig {
    pub executable: String,
    /// Extra arguments, split with shell quoting rules.
    pub extra_args: String,
}

impl Default for AnsibleConfig {
    fn default() -> Self {
        Self {
            executable: "ansible-playbook".to_string(),
            extra_args: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    pub executable: String,
    /// Chart reference passed to `helm upgrade --install`.
    pub chart: String,
    pub namespace: Option<String>,
    pub extra_args: String,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            executable: "helm".to_string(),
            chart: "contrail/contrail".to_string(),
            namespace: None,
            extra_args: String::new(),
        }
    }
}

impl ProvisionConfig {
    /// Search for a config file in the current directory and ancestors.
    /// Falls back to defaults when none is found.
    pub fn discover() -> Result<Self> {
        match Self::find_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("failed to read {}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfig(format!("invalid config in {}: {e}", path.display())))?;

        // Relative roots are taken relative to the config file.
        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    pub fn find_config_path() -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        for dir in cwd.ancestors() {
            for name in CONFIG_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Apply `PROVISION_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = lookup("PROVISION_WORK_ROOT") {
            self.work_root = PathBuf::from(root);
        }
        if let Some(root) = lookup("PROVISION_TEMPLATE_ROOT") {
            self.template_root = PathBuf::from(root);
        }
        if let Some(tag) = lookup("PROVISION_DEFAULT_BACKEND") {
            self.default_backend = tag.parse()?;
        }
        if let Some(secs) = lookup("PROVISION_TIMEOUT_SECS") {
            self.timeout_secs = secs.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("PROVISION_TIMEOUT_SECS is not a number: {secs}"))
            })?;
        }
        if let Some(endpoint) = lookup("PROVISION_STORE_ENDPOINT") {
            self.store.kind = StoreKind::Http;
            self.store.endpoint = endpoint;
        }
        if let Some(token) = lookup("PROVISION_STORE_TOKEN") {
            self.store.token = Some(token);
        }
        Ok(())
    }

    fn resolve_relative(&mut self, base: &Path) {
        for path in [
            &mut self.work_root,
            &mut self.template_root,
            &mut self.store.path,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn load_resolves_relative_paths_against_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provision.toml");
        std::fs::write(
            &path,
            "work_root = \"work\"\ndefault_backend = \"helm\"\n[helm]\nchart = \"repo/app\"\n",
        )
        .unwrap();

        let config = ProvisionConfig::load(&path).unwrap();
        assert_eq!(config.work_root, dir.path().join("work"));
        assert_eq!(config.template_root, dir.path().join("templates"));
        assert_eq!(config.default_backend, BackendKind::Helm);
        assert_eq!(config.helm.chart, "repo/app");
        assert_eq!(config.ansible.executable, "ansible-playbook");
    }

    #[test]
    fn unknown_default_backend_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provision.toml");
        std::fs::write(&path, "default_backend = \"salt\"\n").unwrap();
        assert!(matches!(
            ProvisionConfig::load(&path),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            ("PROVISION_TIMEOUT_SECS", "90"),
            ("PROVISION_DEFAULT_BACKEND", "helm"),
            ("PROVISION_STORE_ENDPOINT", "http://api:8082"),
        ]
        .into_iter()
        .collect();
        let mut config = ProvisionConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(90));
        assert_eq!(config.default_backend, BackendKind::Helm);
        assert_eq!(config.store.kind, StoreKind::Http);
        assert_eq!(config.store.endpoint, "http://api:8082");
    }

    #[test]
    fn bad_env_backend_is_unsupported() {
        let mut config = ProvisionConfig::default();
        let err = config
            .apply_overrides(|key| (key == "PROVISION_DEFAULT_BACKEND").then(|| "puppet".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), "unsupported_backend");
    }
}
