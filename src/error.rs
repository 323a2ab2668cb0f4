//! Error Types

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    #[error("cluster not found: {0}")]
    NotFound(String),

    #[error("failed to load cluster {cluster}: {reason}")]
    LoadFailed { cluster: String, reason: String },

    #[error("unsupported provisioner type: '{0}'")]
    UnsupportedBackend(String),

    #[error("cluster {0} has no node roles to provision")]
    EmptyCluster(String),

    #[error("template {template} failed: {reason}")]
    TemplateError { template: String, reason: String },

    #[error("workspace error at {path}: {reason}")]
    WorkspaceError { path: PathBuf, reason: String },

    #[error("{backend} exited with {}: {detail}", exit_label(*.exit_code))]
    BackendFailed {
        backend: String,
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("progress report for {target} failed: {reason}")]
    ReportFailed { target: String, reason: String },

    #[error("{action} already running for cluster {cluster}")]
    AlreadyRunning { cluster: String, action: String },

    #[error("{backend} cancelled for cluster {cluster}")]
    Cancelled { cluster: String, backend: String },

    #[error("{backend} timed out after {limit_secs}s for cluster {cluster}")]
    TimedOut {
        cluster: String,
        backend: String,
        limit_secs: u64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A failed run together with the progress writes that were lost on the
    /// way. Kind and exit code are those of `source`.
    #[error("{source}")]
    WithWarnings {
        source: Box<Error>,
        warnings: Vec<Error>,
    },
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status".to_string(),
    }
}

impl Error {
    pub fn workspace(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::WorkspaceError {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    pub fn load_failed(cluster: &str, err: impl std::fmt::Display) -> Self {
        Error::LoadFailed {
            cluster: cluster.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_) => 2,
            Error::NotFound(_) => 10,
            Error::LoadFailed { .. } => 11,
            Error::UnsupportedBackend(_) => 12,
            Error::EmptyCluster(_) => 13,
            Error::TemplateError { .. } => 20,
            Error::WorkspaceError { .. } => 21,
            Error::BackendFailed { .. } => 30,
            Error::Cancelled { .. } => 31,
            Error::TimedOut { .. } => 32,
            Error::ReportFailed { .. } => 40,
            Error::AlreadyRunning { .. } => 50,
            Error::WithWarnings { source, .. } => source.exit_code(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::LoadFailed { .. } => "load_failed",
            Error::UnsupportedBackend(_) => "unsupported_backend",
            Error::EmptyCluster(_) => "empty_cluster",
            Error::TemplateError { .. } => "template_error",
            Error::WorkspaceError { .. } => "workspace_error",
            Error::BackendFailed { .. } => "backend_failed",
            Error::ReportFailed { .. } => "report_failed",
            Error::AlreadyRunning { .. } => "already_running",
            Error::Cancelled { .. } => "cancelled",
            Error::TimedOut { .. } => "timed_out",
            Error::InvalidConfig(_) => "invalid_config",
            Error::WithWarnings { source, .. } => source.kind(),
        }
    }

    /// Failures that happen before any backend process is spawned and leave
    /// no workspace or progress behind.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self.inner(),
            Error::NotFound(_)
                | Error::LoadFailed { .. }
                | Error::UnsupportedBackend(_)
                | Error::EmptyCluster(_)
                | Error::TemplateError { .. }
                | Error::AlreadyRunning { .. }
        )
    }

    /// Attach undelivered progress reports; a no-op when there are none.
    pub fn with_warnings(self, warnings: Vec<Error>) -> Self {
        if warnings.is_empty() {
            return self;
        }
        match self {
            Error::WithWarnings {
                source,
                warnings: mut earlier,
            } => {
                earlier.extend(warnings);
                Error::WithWarnings {
                    source,
                    warnings: earlier,
                }
            }
            other => Error::WithWarnings {
                source: Box::new(other),
                warnings,
            },
        }
    }

    pub fn warnings(&self) -> &[Error] {
        match self {
            Error::WithWarnings { warnings, .. } => warnings,
            _ => &[],
        }
    }

    /// The failure itself, without attached warnings.
    pub fn inner(&self) -> &Error {
        match self {
            Error::WithWarnings { source, .. } => source,
            other => other,
        }
    }

    pub fn to_json(&self) -> String {
        let warnings: Vec<String> = self.warnings().iter().map(ToString::to_string).collect();
        serde_json::json!({
            "error": true,
            "kind": self.kind(),
            "exit_code": self.exit_code(),
            "message": self.to_string(),
            "warnings": warnings,
        })
        .to_string()
    }
}
