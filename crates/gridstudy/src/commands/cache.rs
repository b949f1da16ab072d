//! Equipment cache command handlers: snapshot, equipments, watch.

use std::collections::BTreeSet;

use serde::Serialize;
use tabled::Tabled;
use tabled::builder::Builder;
use tabled::settings::Style;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use gridstudy_core::{
    CoreError, EquipmentRecord, EquipmentState, EquipmentType, NodeId, Session, SessionConfig,
};

use crate::cli::{EquipmentsArgs, GlobalOpts, OutputFormat, SnapshotArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Summary ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct TypeSummary {
    equipment_type: EquipmentType,
    loaded_nodes: usize,
    records: usize,
    failed_nodes: usize,
    fetching: bool,
    optional_fields: bool,
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Type")]
    equipment_type: String,
    #[tabled(rename = "Nodes")]
    loaded_nodes: usize,
    #[tabled(rename = "Records")]
    records: usize,
    #[tabled(rename = "Failed")]
    failed_nodes: String,
    #[tabled(rename = "Optional")]
    optional_fields: String,
}

fn summarize(state: &EquipmentState, active: &BTreeSet<EquipmentType>) -> Vec<TypeSummary> {
    active
        .iter()
        .map(|&ty| {
            let cache = state.type_cache(ty);
            TypeSummary {
                equipment_type: ty,
                loaded_nodes: cache.map_or(0, |c| c.loaded_node_ids().len()),
                records: cache.map_or(0, gridstudy_core::TypeCache::record_count),
                failed_nodes: cache.map_or(0, |c| c.failed_node_ids().len()),
                fetching: state.is_fetching(ty),
                optional_fields: cache.is_some_and(gridstudy_core::TypeCache::optional_fields),
            }
        })
        .collect()
}

fn render_summary(summary: &[TypeSummary], global: &GlobalOpts) -> Result<String, CliError> {
    let color = output::should_color(&global.color);
    output::render_list(
        &global.output,
        summary,
        |s| SummaryRow {
            equipment_type: s.equipment_type.to_string(),
            loaded_nodes: s.loaded_nodes,
            records: s.records,
            failed_nodes: output::paint_failures(s.failed_nodes, color),
            optional_fields: if s.optional_fields { "yes" } else { "-" }.into(),
        },
        |s| format!("{}\t{}", s.equipment_type, s.records),
    )
}

/// Apply `--type` to the session config; returns the optional-column types.
fn apply_type_args(
    config: &mut SessionConfig,
    args: &SnapshotArgs,
) -> Result<BTreeSet<EquipmentType>, CliError> {
    if let Some(types) = util::parse_type_args(&args.types)? {
        config.active_types = types;
    }
    Ok(util::parse_type_args(&args.optional_fields)?.unwrap_or_default())
}

/// Select the requested node and fetch until the cache settles.
async fn load(
    session: &Session,
    node: Option<&str>,
    optional: &BTreeSet<EquipmentType>,
) -> Result<Option<NodeId>, CoreError> {
    let tree = session.tree();
    let aliases = session.aliases();
    let selected = util::resolve_node(node, &tree, aliases.as_deref().map(Vec::as_slice))?;

    for &ty in optional {
        session.request_optional_fields(ty, true);
    }
    session.select_node(selected);
    session.settle().await;
    Ok(selected)
}

// ── Handlers ─────────────────────────────────────────────────────────

pub async fn snapshot(
    config: SessionConfig,
    args: &SnapshotArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut config = config;
    let optional = apply_type_args(&mut config, args)?;
    let node = args.node.node.clone();

    let spinner = util::spinner("Loading equipments…", global.quiet);
    let result = Session::oneshot(config, None, |session| async move {
        load(&session, node.as_deref(), &optional).await?;
        Ok(summarize(&session.snapshot(), &session.active_types()))
    })
    .await;
    spinner.finish_and_clear();

    let out = render_summary(&result?, global)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn equipments(
    config: SessionConfig,
    args: &EquipmentsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let ty = util::parse_type_args(std::slice::from_ref(&args.equipment_type))?
        .and_then(|types| types.into_iter().next())
        .ok_or_else(|| CliError::Validation {
            field: "equipment_type".into(),
            reason: "missing equipment type".into(),
        })?;

    let mut config = config;
    config.active_types = [ty].into();
    let optional: BTreeSet<_> = if args.optional_fields {
        [ty].into()
    } else {
        BTreeSet::new()
    };
    let node = args.node.node.clone();

    let spinner = util::spinner("Loading equipments…", global.quiet);
    let result = Session::oneshot(config, None, |session| async move {
        let selected = load(&session, node.as_deref(), &optional).await?;
        let Some(selected) = selected else {
            return Err(CoreError::NotFound {
                entity_type: "node".into(),
                identifier: "root".into(),
            });
        };
        let state = session.snapshot();
        match state.equipments(ty, &selected) {
            Some(records) => Ok(records.to_vec()),
            None if state.failed_node_ids().contains(&selected) => Err(CoreError::Api {
                message: format!("{ty} equipments could not be loaded for node {selected}"),
                status: None,
            }),
            None => Err(CoreError::NotFound {
                entity_type: "built node".into(),
                identifier: selected.to_string(),
            }),
        }
    })
    .await;
    spinner.finish_and_clear();

    let records = result?;
    let out = render_records(&records, &global.output)?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn watch(
    config: SessionConfig,
    args: &SnapshotArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut config = config;
    let optional = apply_type_args(&mut config, args)?;

    let session = Session::new(config)?;
    session.start().await?;
    let mut notices = session.notices();
    let mut states = session.subscribe();

    let tree = session.tree();
    let aliases = session.aliases();
    let selected =
        util::resolve_node(args.node.node.as_deref(), &tree, aliases.as_deref().map(Vec::as_slice));
    let selected = match selected {
        Ok(selected) => selected,
        Err(e) => {
            session.shutdown().await;
            return Err(e.into());
        }
    };
    for &ty in &optional {
        session.request_optional_fields(ty, true);
    }
    session.select_node(selected);

    let mut last: Option<Vec<TypeSummary>> = None;
    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            state = states.changed() => {
                let Some(state) = state else {
                    break Err(CliError::Disconnected);
                };
                let summary = summarize(&state, &session.active_types());
                if summary.iter().any(|s| s.fetching) || last.as_ref() == Some(&summary) {
                    continue;
                }
                match render_summary(&summary, global) {
                    Ok(out) => output::print_output(&out, global.quiet),
                    Err(e) => break Err(e),
                }
                last = Some(summary);
            }
            notice = notices.recv() => match notice {
                Ok(notice) => eprintln!("warning: {}: {}", notice.header_id, notice.message),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "notices dropped"),
                Err(RecvError::Closed) => break Err(CliError::Disconnected),
            },
        }
    };

    session.shutdown().await;
    result
}

// ── Records ──────────────────────────────────────────────────────────

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Records have no fixed shape; the table takes the union of their keys.
fn render_records(records: &[EquipmentRecord], format: &OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Table => {
            let mut columns: Vec<&str> = Vec::new();
            for record in records {
                for key in record.attributes.keys() {
                    if !columns.contains(&key.as_str()) {
                        columns.push(key);
                    }
                }
            }

            let mut builder = Builder::default();
            builder.push_record(
                std::iter::once("id")
                    .chain(columns.iter().copied())
                    .map(str::to_owned),
            );
            for record in records {
                builder.push_record(
                    std::iter::once(record.id.clone())
                        .chain(columns.iter().map(|c| record.get(c).map(cell).unwrap_or_default())),
                );
            }
            Ok(builder.build().with(Style::rounded()).to_string())
        }
        OutputFormat::Json => output::render_json(records, false),
        OutputFormat::JsonCompact => output::render_json(records, true),
        OutputFormat::Yaml => output::render_yaml(records),
        OutputFormat::Plain => Ok(records
            .iter()
            .map(|r| r.id.as_str())
            .collect::<Vec<_>>()
            .join("\n")),
    }
}
