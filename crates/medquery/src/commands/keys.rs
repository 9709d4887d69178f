//! `medquery keys`: the query keys and invalidation patterns of a resource.

use std::collections::BTreeMap;

use serde::Serialize;
use tabled::Tabled;

use medquery_config::{self as config, Config};
use medquery_core::{ListParams, ResourceKeys, WriteOp, invalidation_patterns};

use crate::cli::{GlobalOpts, KeysArgs};
use crate::config::output_format;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct KeyEntry {
    name: String,
    key: String,
}

#[derive(Tabled)]
struct KeyRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Key")]
    key: String,
}

pub fn handle(args: &KeysArgs, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let defaults = config::to_query_defaults(cfg)?;
    let kind = args.resource;

    let mut params = ListParams::new(&defaults).with_page(args.page);
    if let Some(size) = args.page_size {
        params = params.with_page_size(size, &defaults);
    }
    params.set_filters(parse_filters(&args.filters)?);
    if let Some(search) = &args.search {
        params.set_search(Some(search.clone()));
    }
    // Filters and search reset paging; an explicit --page still wins.
    params.set_page(args.page);

    let mut entries = vec![
        entry("all", ResourceKeys::all(kind).to_string()),
        entry("list", ResourceKeys::list(kind, &params).to_string()),
    ];
    let query = params
        .query_pairs()
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    entries.push(entry("list request", format!("GET {}?{query}", kind.endpoint())));

    let mut ops = vec![WriteOp::Create];
    if let Some(id) = &args.id {
        entries.push(entry("detail", ResourceKeys::detail(kind, id).to_string()));
        entries.push(entry("detail request", format!("GET {}", kind.detail_endpoint(id))));
        ops.push(WriteOp::Update { id: id.clone() });
        ops.push(WriteOp::Delete { id: id.clone() });
    }
    for op in &ops {
        let patterns = invalidation_patterns(kind, op)
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        entries.push(entry(&format!("on {op}"), patterns));
    }

    let out = output::render_list(
        output_format(global, cfg)?,
        &entries,
        |e| KeyRow {
            name: e.name.clone(),
            key: e.key.clone(),
        },
        |e| e.key.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn entry(name: &str, key: String) -> KeyEntry {
    KeyEntry {
        name: name.into(),
        key,
    }
}

fn parse_filters(raw: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((field, value)) if !field.is_empty() => Ok((field.into(), value.into())),
            _ => Err(CliError::Validation {
                field: "filter".into(),
                reason: format!("expected FIELD=VALUE, got '{pair}'"),
            }),
        })
        .collect()
}
