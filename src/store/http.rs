//! HTTP client for the resource API.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};

use crate::cluster::ClusterSnapshot;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::progress::{ProgressRecord, ProgressTarget};

use super::{ClusterStore, ProgressStore};

#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    pub endpoint: String,

    pub cluster_resource: String,

    pub auth_token: Option<String>,

    pub timeout_secs: u64,

    pub user_agent: String,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9091".to_string(),
            cluster_resource: "contrail-cluster".to_string(),
            auth_token: None,
            timeout_secs: 30,
            user_agent: format!("provision/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&StoreConfig> for HttpStoreConfig {
    fn from(config: &StoreConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            cluster_resource: config.cluster_resource.clone(),
            auth_token: config.token.clone(),
            timeout_secs: config.request_timeout_secs,
            ..Default::default()
        }
    }
}

pub struct HttpStore {
    config: HttpStoreConfig,
    http: Client,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    fn cluster_url(&self, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint,
            self.config.cluster_resource,
            urlencoding::encode(id)
        )
    }

    fn progress_url(&self, target: &ProgressTarget) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint,
            target.resource,
            urlencoding::encode(&target.node_role_id)
        )
    }

    fn snapshot_from_body(&self, id: &str, body: serde_json::Value) -> Result<ClusterSnapshot> {
        // The API wraps single resources as {"<resource>": {...}}.
        let inner = body
            .get(&self.config.cluster_resource)
            .cloned()
            .unwrap_or(body);
        let mut cluster: ClusterSnapshot =
            serde_json::from_value(inner).map_err(|e| Error::load_failed(id, e))?;
        if cluster.uuid.is_empty() {
            cluster.uuid = id.to_string();
        }
        Ok(cluster)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl ClusterStore for HttpStore {
    fn get_cluster(&self, id: &str) -> Result<ClusterSnapshot> {
        let url = self.cluster_url(id);
        let response = self
            .authorize(self.http.get(&url))
            .send()
            .map_err(|e| Error::load_failed(id, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound(id.to_string())),
            status if status.is_success() => {
                let body: serde_json::Value =
                    response.json().map_err(|e| Error::load_failed(id, e))?;
                self.snapshot_from_body(id, body)
            }
            status => Err(Error::load_failed(id, format!("GET {url} returned {status}"))),
        }
    }
}

impl ProgressStore for HttpStore {
    fn put_progress(&self, target: &ProgressTarget, record: &ProgressRecord) -> Result<()> {
        let url = self.progress_url(target);
        let record = serde_json::to_value(record).map_err(|e| Error::ReportFailed {
            target: target.to_string(),
            reason: e.to_string(),
        })?;
        let mut body = serde_json::Map::new();
        body.insert(target.resource.clone(), record);
        let response = self
            .authorize(self.http.put(&url))
            .json(&body)
            .send()
            .map_err(|e| Error::ReportFailed {
                target: target.to_string(),
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::ReportFailed {
                target: target.to_string(),
                reason: format!("PUT {url} returned {}", response.status()),
            })
        }
    }
}
