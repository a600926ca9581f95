//! Table and tree rendering for the CLI's catalog-inspection subcommands.

use std::collections::HashMap;
use std::fmt::Display;
use std::io::Write;

use anyhow::{Error, Result};
use colored::Colorize;

use crate::catalog::Task;
use crate::status::Status;

pub fn mk_header(names: Vec<&str>) -> Vec<ascii_table::Column> {
    names
        .into_iter()
        .map(|name| {
            let mut column = ascii_table::Column::default();
            column.header = name.into();
            column.align = ascii_table::Align::Left;
            column
        })
        .collect()
}

/// Render as an ASCII table on a terminal, or as CSV when requested or when
/// stdout is a pipe.
pub fn display_data<D: Display>(headers: Vec<ascii_table::Column>, data: Vec<Vec<D>>, csv: bool) -> Result<()> {
    if csv || !atty::is(atty::Stream::Stdout) {
        let mut writer = ::csv::WriterBuilder::new().from_writer(vec![]);
        for record in data {
            let row: Vec<String> = record.into_iter().map(|e| e.to_string()).collect();
            writer.write_record(&row)?;
        }
        let out = writer.into_inner().map_err(Error::from)?;
        let text = String::from_utf8(out).map_err(Error::from)?;
        print!("{}", text);
        Ok(())
    } else {
        let mut table = ascii_table::AsciiTable::default();
        table.max_width = terminal_size::terminal_size().map(|(w, _)| w.0 as usize).unwrap_or(80);

        for (i, column) in headers.into_iter().enumerate() {
            table.columns.insert(i, column);
        }

        let rows: Vec<Vec<String>> =
            data.into_iter().map(|row| row.into_iter().map(|c| c.to_string()).collect()).collect();
        table.print(rows);
        Ok(())
    }
}

pub fn tasks_table(tasks: &[Task], csv: bool) -> Result<()> {
    let headers = mk_header(vec!["name", "category", "triggers", "command"]);
    let rows: Vec<Vec<String>> = tasks
        .iter()
        .map(|t| {
            vec![
                t.name().clone(),
                t.category(),
                t.triggers().iter().cloned().collect::<Vec<_>>().join(","),
                t.command().clone(),
            ]
        })
        .collect();
    display_data(headers, rows, csv)
}

/// Render task lifecycle rows (as returned by `db::get_tasks`) with the
/// `status` column colorized: success green, fail red, replay yellow,
/// start left uncolored. CSV output and non-terminal stdout fall back to
/// plain text via `display_data`'s own TTY detection.
pub fn tasks_history_table(rows: &[crate::db::models::TaskRow], csv: bool) -> Result<()> {
    let headers = mk_header(vec!["time_stamp", "name", "trigger", "status", "command"]);
    let data: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            let status_cell = match row.status() {
                Some(status) => colorize_status(status).to_string(),
                None => row.status.clone(),
            };
            vec![
                row.time_stamp.to_rfc3339(),
                row.name.clone(),
                row.trigger.clone(),
                status_cell,
                row.command.clone(),
            ]
        })
        .collect();
    display_data(headers, data, csv)
}

pub fn colorize_status(status: Status) -> colored::ColoredString {
    match status {
        Status::Success => status.as_str().green(),
        Status::Fail => status.as_str().red(),
        Status::Replay => status.as_str().yellow(),
        Status::Start => status.as_str().normal(),
    }
}

/// Render a `{name -> immediate children/parents}` map (as returned by
/// `Catalog::get_child_tree`/`get_parent_tree`) as an actual tree, rooted at
/// `root`.
pub fn print_tree(out: &mut dyn Write, root: &str, tree: &HashMap<String, Vec<String>>) -> Result<()> {
    let mut builder = ptree::TreeBuilder::new(root.to_string());
    build_subtree(&mut builder, root, tree, &mut std::collections::BTreeSet::new());
    let rendered = builder.build();
    ptree::write_tree(&rendered, out).map_err(Error::from)
}

fn build_subtree(
    builder: &mut ptree::TreeBuilder,
    node: &str,
    tree: &HashMap<String, Vec<String>>,
    visited: &mut std::collections::BTreeSet<String>,
) {
    if !visited.insert(node.to_string()) {
        return;
    }

    if let Some(children) = tree.get(node) {
        for child in children {
            builder.begin_child(child.clone());
            build_subtree(builder, child, tree, visited);
            builder.end_child();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_tree_renders_without_error_on_cyclic_input() {
        let mut tree = HashMap::new();
        tree.insert("A".to_string(), vec!["B".to_string()]);
        tree.insert("B".to_string(), vec!["A".to_string()]);

        let mut out = Vec::new();
        print_tree(&mut out, "A", &tree).unwrap();
        assert!(String::from_utf8(out).unwrap().contains('A'));
    }
}
