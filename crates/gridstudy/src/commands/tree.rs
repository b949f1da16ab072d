//! Tree, alias, and built-node command handlers.
//!
//! These only need the session primed (tree + aliases); no equipment
//! is fetched.

use serde::Serialize;
use tabled::Tabled;

use gridstudy_core::{NodeAlias, NodeId, Session, SessionConfig, TreeNode};

use crate::cli::{GlobalOpts, NodeArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct TreeRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Build")]
    build: String,
}

#[derive(Tabled)]
struct AliasRow {
    #[tabled(rename = "Alias")]
    alias: String,
    #[tabled(rename = "Node")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
}

#[derive(Serialize)]
struct BuiltNode {
    id: NodeId,
    name: String,
    aliases: Vec<String>,
}

#[derive(Tabled)]
struct BuiltRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Aliases")]
    aliases: String,
}

async fn primed(config: SessionConfig, quiet: bool) -> Result<Session, CliError> {
    let mut config = config;
    config.notifications_enabled = false;

    let spinner = util::spinner("Loading study tree…", quiet);
    let session = Session::new(config)?;
    let primed = session.prime().await;
    spinner.finish_and_clear();
    primed?;
    Ok(session)
}

// ── Handlers ─────────────────────────────────────────────────────────

pub async fn tree(config: SessionConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let session = primed(config, global.quiet).await?;
    let nodes = session.tree();
    let color = output::should_color(&global.color);

    let name_of = |id: Option<NodeId>| {
        id.and_then(|id| nodes.iter().find(|n| n.id == id))
            .map(|n| n.name.clone())
            .unwrap_or_default()
    };
    let out = output::render_list(
        &global.output,
        nodes.as_slice(),
        |n: &TreeNode| TreeRow {
            id: n.id.to_string(),
            name: n.name.clone(),
            parent: name_of(n.parent),
            build: output::paint_build_status(&n.build_status, color),
        },
        |n| n.id.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn aliases(config: SessionConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let session = primed(config, global.quiet).await?;
    let Some(aliases) = session.aliases() else {
        return Err(CliError::ApiError {
            message: "node aliases could not be loaded".into(),
        });
    };

    let out = output::render_list(
        &global.output,
        aliases.as_slice(),
        |a: &NodeAlias| AliasRow {
            alias: a.alias.clone(),
            name: a.name.clone().unwrap_or_else(|| "-".into()),
            id: a.id.map_or_else(|| "-".into(), |id| id.to_string()),
        },
        |a| a.alias.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn built_nodes(
    config: SessionConfig,
    args: &NodeArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let session = primed(config, global.quiet).await?;
    let nodes = session.tree();
    let aliases = session.aliases();
    let aliases = aliases.as_deref().map(Vec::as_slice);

    let selected = util::resolve_node(args.node.as_deref(), &nodes, aliases)?;
    session.select_node(selected);

    let built: Vec<BuiltNode> = session
        .desired_nodes()
        .iter()
        .map(|id| BuiltNode {
            id: *id,
            name: nodes
                .iter()
                .find(|n| n.id == *id)
                .map(|n| n.name.clone())
                .unwrap_or_default(),
            aliases: aliases
                .unwrap_or_default()
                .iter()
                .filter(|a| a.target() == Some(*id))
                .map(|a| a.alias.clone())
                .collect(),
        })
        .collect();

    let out = output::render_list(
        &global.output,
        &built,
        |b| BuiltRow {
            id: b.id.to_string(),
            name: b.name.clone(),
            aliases: b.aliases.join(", "),
        },
        |b| b.id.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
