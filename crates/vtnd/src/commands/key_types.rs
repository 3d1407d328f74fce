//! `vtnd key-types`: the containment hierarchy in preorder.

use serde::Serialize;
use tabled::Tabled;

use vtnd_core::{KeyType, KeyTypeTree};

use crate::cli::{GlobalOpts, KeyTypesArgs};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct KeyTypeEntry {
    key_type: KeyType,
    parent: Option<KeyType>,
    depth: usize,
    scope: &'static str,
}

#[derive(Tabled)]
struct KeyTypeRow {
    #[tabled(rename = "Key type")]
    key_type: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Depth")]
    depth: usize,
    #[tabled(rename = "Scope")]
    scope: &'static str,
}

fn entries(tree: &KeyTypeTree) -> Vec<KeyTypeEntry> {
    tree.preorder()
        .iter()
        .map(|&kt| KeyTypeEntry {
            key_type: kt,
            parent: tree.parent(kt),
            depth: tree.depth(kt).unwrap_or_default(),
            scope: if kt == tree.root() {
                "-"
            } else if kt.is_vtn_scoped() {
                "vtn"
            } else {
                "virtual"
            },
        })
        .collect()
}

pub fn handle(args: &KeyTypesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let tree = if args.import {
        KeyTypeTree::import()
    } else {
        KeyTypeTree::live()
    }
    .map_err(vtnd_core::CoreError::from)?;

    let data = entries(&tree);
    let rendered = output::render_list(
        &global.output,
        &data,
        |e| KeyTypeRow {
            key_type: format!("{}{}", "  ".repeat(e.depth), e.key_type),
            parent: e.parent.map(|p| p.to_string()).unwrap_or_default(),
            depth: e.depth,
            scope: e.scope,
        },
        |e| e.key_type.to_string(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
