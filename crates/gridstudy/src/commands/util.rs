//! Shared helpers for command handlers.

use std::collections::BTreeSet;
use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use gridstudy_core::{CoreError, EquipmentType, NodeAlias, NodeId, TreeNode};

use crate::config::parse_types;
use crate::error::CliError;

/// Resolve a node identifier (UUID, alias, or node name) against the tree.
///
/// `None` selects the root node.
pub fn resolve_node(
    identifier: Option<&str>,
    tree: &[TreeNode],
    aliases: Option<&[NodeAlias]>,
) -> Result<Option<NodeId>, CoreError> {
    let Some(identifier) = identifier else {
        return Ok(tree.iter().find(|n| n.is_root()).map(|n| n.id));
    };

    if let Ok(id) = identifier.parse::<NodeId>() {
        if tree.iter().any(|n| n.id == id) {
            return Ok(Some(id));
        }
    }
    if let Some(target) = aliases
        .unwrap_or_default()
        .iter()
        .find(|a| a.alias == identifier)
        .and_then(NodeAlias::target)
    {
        return Ok(Some(target));
    }
    if let Some(node) = tree.iter().find(|n| n.name == identifier) {
        return Ok(Some(node.id));
    }

    Err(CoreError::NotFound {
        entity_type: "node".into(),
        identifier: identifier.into(),
    })
}

/// Parse `--type` style arguments; `None` when none were given.
pub fn parse_type_args(raw: &[String]) -> Result<Option<BTreeSet<EquipmentType>>, CliError> {
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(parse_types(raw)?))
}

/// A stderr spinner, hidden when stderr is not a terminal or `quiet` is set.
pub fn spinner(message: &'static str, quiet: bool) -> ProgressBar {
    if quiet || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use gridstudy_core::{BuildStatus, NodeType};

    fn id(n: u128) -> NodeId {
        format!("00000000-0000-0000-0000-{n:012}").parse().unwrap()
    }

    fn node(n: u128, name: &str, parent: Option<u128>) -> TreeNode {
        TreeNode {
            id: id(n),
            name: name.into(),
            node_type: if parent.is_none() {
                NodeType::Root
            } else {
                NodeType::NetworkModification
            },
            build_status: BuildStatus::Built,
            parent: parent.map(id),
        }
    }

    fn tree() -> Vec<TreeNode> {
        vec![node(1, "Root", None), node(2, "N1", Some(1))]
    }

    #[test]
    fn defaults_to_root() {
        let root = resolve_node(None, &tree(), None).unwrap();
        assert_eq!(root, Some(id(1)));
    }

    #[test]
    fn accepts_uuid_alias_or_name() {
        let n2 = id(2);
        let aliases = vec![NodeAlias {
            id: Some(n2),
            name: Some("N1".into()),
            alias: "base".into(),
        }];

        assert_eq!(resolve_node(Some(n2.to_string().as_str()), &tree(), None).unwrap(), Some(n2));
        assert_eq!(resolve_node(Some("base"), &tree(), Some(aliases.as_slice())).unwrap(), Some(n2));
        assert_eq!(resolve_node(Some("N1"), &tree(), None).unwrap(), Some(n2));
    }

    #[test]
    fn unknown_node_is_not_found() {
        assert!(matches!(
            resolve_node(Some("nowhere"), &tree(), None),
            Err(CoreError::NotFound { .. })
        ));
    }
}
