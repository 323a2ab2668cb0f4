use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Immutable view of a cluster as loaded from the cluster store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSnapshot {
    pub uuid: String,
    pub name: String,
    /// Backend tag; empty means "use the configured default".
    pub provisioner_type: String,
    /// Cluster-wide configuration handed to templates as-is.
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub name: String,
    pub ip_address: String,
    pub roles: Vec<NodeRole>,
}

/// A role assigned to a node; the unit progress is tracked for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRole {
    pub uuid: String,
    /// Role resource type, e.g. `contrail_controller_node_role`.
    pub kind: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// Borrowed pairing of a role with the node that carries it.
#[derive(Debug, Clone, Copy)]
pub struct NodeRoleRef<'a> {
    pub node: &'a Node,
    pub role: &'a NodeRole,
}

impl ClusterSnapshot {
    /// Node roles in node order, then role order within each node.
    pub fn node_roles(&self) -> impl Iterator<Item = NodeRoleRef<'_>> {
        self.nodes
            .iter()
            .flat_map(|node| node.roles.iter().map(move |role| NodeRoleRef { node, role }))
    }

    pub fn is_empty(&self) -> bool {
        self.node_roles().next().is_none()
    }

    /// Role kind to the names of the nodes carrying it, for inventory groups.
    pub fn role_groups(&self) -> BTreeMap<String, Vec<String>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in self.node_roles() {
            let members = groups.entry(entry.role.kind.clone()).or_default();
            if !members.contains(&entry.node.name) {
                members.push(entry.node.name.clone());
            }
        }
        groups
    }

    /// Backend to use, falling back to `default` when the tag is empty.
    pub fn backend(&self, default: BackendKind) -> Result<BackendKind, Error> {
        let tag = self.provisioner_type.trim();
        if tag.is_empty() {
            return Ok(default);
        }
        tag.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Install,
    Update,
    Uninstall,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Install, Action::Update, Action::Uninstall];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Update => "update",
            Action::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "install" | "create" => Ok(Action::Install),
            "update" | "upgrade" => Ok(Action::Update),
            "uninstall" | "delete" => Ok(Action::Uninstall),
            other => Err(format!(
                "unknown action '{other}' (expected install, update or uninstall)"
            )),
        }
    }
}

/// Closed set of provisioning backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Ansible,
    Helm,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Ansible, BackendKind::Helm];

    pub fn id(&self) -> &'static str {
        match self {
            BackendKind::Ansible => "ansible",
            BackendKind::Helm => "helm",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ansible" => Ok(BackendKind::Ansible),
            "helm" => Ok(BackendKind::Helm),
            other => Err(Error::UnsupportedBackend(other.to_string())),
        }
    }
}
