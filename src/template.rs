//! Template Renderer
//!
//! Renders backend artifacts (inventories, value files, playbooks) from
//! `<template_root>/<backend>/<name>` with minijinja. Undefined context keys
//! are errors, so a half-filled artifact never reaches the workspace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::cluster::{Action, ClusterSnapshot};
use crate::error::{Error, Result};

/// A template to render and the workspace file it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactSpec {
    pub template: &'static str,
    pub file: &'static str,
}

/// Rendered bytes waiting to be written into a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub template: String,
    pub file: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct NodeContext<'a> {
    name: &'a str,
    ip_address: &'a str,
    roles: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct RoleContext<'a> {
    uuid: &'a str,
    kind: &'a str,
    node: &'a str,
    ip_address: &'a str,
    parameters: &'a BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    cluster: &'a ClusterSnapshot,
    parameters: &'a BTreeMap<String, serde_json::Value>,
    nodes: Vec<NodeContext<'a>>,
    node_roles: Vec<RoleContext<'a>>,
    roles: BTreeMap<String, Vec<String>>,
    action: &'static str,
    backend: &'a str,
    workspace: String,
}

impl<'a> TemplateContext<'a> {
    pub fn new(
        cluster: &'a ClusterSnapshot,
        action: Action,
        backend: &'a str,
        workspace: &Path,
    ) -> Self {
        let nodes = cluster
            .nodes
            .iter()
            .map(|node| NodeContext {
                name: &node.name,
                ip_address: &node.ip_address,
                roles: node.roles.iter().map(|r| r.kind.as_str()).collect(),
            })
            .collect();
        let node_roles = cluster
            .node_roles()
            .map(|entry| RoleContext {
                uuid: &entry.role.uuid,
                kind: &entry.role.kind,
                node: &entry.node.name,
                ip_address: &entry.node.ip_address,
                parameters: &entry.role.parameters,
            })
            .collect();
        Self {
            cluster,
            parameters: &cluster.parameters,
            nodes,
            node_roles,
            roles: cluster.role_groups(),
            action: action.as_str(),
            backend,
            workspace: workspace.display().to_string(),
        }
    }
}

pub struct TemplateRenderer {
    root: PathBuf,
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.set_loader(minijinja::path_loader(&root));
        Self { root, env }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Render `<backend>/<name>` against the context.
    pub fn render(&self, backend: &str, name: &str, ctx: &TemplateContext<'_>) -> Result<Vec<u8>> {
        let full_name = format!("{backend}/{name}");
        let template_err = |e: minijinja::Error| Error::TemplateError {
            template: full_name.clone(),
            reason: e.to_string(),
        };
        let template = self.env.get_template(&full_name).map_err(template_err)?;
        let output = template.render(ctx).map_err(template_err)?;
        Ok(output.into_bytes())
    }

    /// Render every artifact of a backend, or none.
    pub fn render_all(
        &self,
        backend: &str,
        specs: &[ArtifactSpec],
        ctx: &TemplateContext<'_>,
    ) -> Result<Vec<Artifact>> {
        specs
            .iter()
            .map(|spec| {
                Ok(Artifact {
                    template: spec.template.to_string(),
                    file: spec.file.to_string(),
                    content: self.render(backend, spec.template, ctx)?,
                })
            })
            .collect()
    }
}
