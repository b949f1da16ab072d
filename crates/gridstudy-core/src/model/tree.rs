// ── Modification tree and node aliases ──

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::NodeId;

/// Prefix shared by every "built" build status.
pub const BUILT_MARKER: &str = "BUILT";

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// The study root. Its network always exists.
    Root,
    NetworkModification,
    #[serde(other)]
    Other,
}

impl NodeType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "ROOT" => Self::Root,
            "NETWORK_MODIFICATION" => Self::NetworkModification,
            _ => Self::Other,
        }
    }
}

/// Global build status of a node's network.
///
/// Unrecognized statuses are preserved verbatim; a node counts as built
/// whenever its status string starts with [`BUILT_MARKER`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum BuildStatus {
    Built,
    BuiltWithWarning,
    BuiltWithError,
    Building,
    #[default]
    NotBuilt,
    Other(String),
}

impl BuildStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Built => "BUILT",
            Self::BuiltWithWarning => "BUILT_WITH_WARNING",
            Self::BuiltWithError => "BUILT_WITH_ERROR",
            Self::Building => "BUILDING",
            Self::NotBuilt => "NOT_BUILT",
            Self::Other(s) => s,
        }
    }

    pub fn is_built(&self) -> bool {
        self.as_str().starts_with(BUILT_MARKER)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "BUILT" => Self::Built,
            "BUILT_WITH_WARNING" => Self::BuiltWithWarning,
            "BUILT_WITH_ERROR" => Self::BuiltWithError,
            "BUILDING" => Self::Building,
            "NOT_BUILT" => Self::NotBuilt,
            other => Self::Other(other.to_owned()),
        })
    }
}

impl From<String> for BuildStatus {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

impl From<BuildStatus> for String {
    fn from(status: BuildStatus) -> Self {
        match status {
            BuildStatus::Other(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

/// A node of the modification tree, flattened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    pub build_status: BuildStatus,
    /// `None` for the root.
    pub parent: Option<NodeId>,
}

impl TreeNode {
    pub fn is_root(&self) -> bool {
        self.node_type == NodeType::Root
    }

    /// Whether equipment data can be read from this node's network.
    pub fn has_network(&self) -> bool {
        self.is_root() || self.build_status.is_built()
    }
}

/// A user-defined alias pointing at a tree node.
///
/// An alias is *valid* only when both `id` and `name` are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAlias {
    pub id: Option<NodeId>,
    pub name: Option<String>,
    pub alias: String,
}

impl NodeAlias {
    pub fn is_valid(&self) -> bool {
        self.id.is_some() && self.name.is_some()
    }

    /// The aliased node, if the alias is valid.
    pub fn target(&self) -> Option<NodeId> {
        if self.is_valid() { self.id } else { None }
    }
}
