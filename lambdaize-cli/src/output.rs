use std::io::{self, Write};

use comfy_table::{presets, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::app::GlobalOptions;

/// Print `data` as pretty JSON under `--json`, otherwise hand it to `render`.
pub fn print_output<T: Serialize>(
    data: &T,
    opts: &GlobalOptions,
    render: impl FnOnce(&T),
) -> anyhow::Result<()> {
    if !opts.json {
        render(data);
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, data)?;
    writeln!(stdout)?;
    Ok(())
}

/// Column alignment for tabular output.
#[derive(Clone, Copy)]
pub enum Align {
    Left,
    Right,
}

impl From<Align> for CellAlignment {
    fn from(align: Align) -> Self {
        match align {
            Align::Left => CellAlignment::Left,
            Align::Right => CellAlignment::Right,
        }
    }
}

/// Borderless table: a header row, then rows whose columns are padded to the
/// widest cell and separated by two spaces.
pub struct TabWriter {
    table: Table,
    indent: String,
}

impl TabWriter {
    /// Create a table from `(header, alignment)` column definitions.
    pub fn new(columns: Vec<(&str, Align)>) -> Self {
        let mut table = Table::new();
        table
            .load_preset(presets::NOTHING)
            .set_content_arrangement(ContentArrangement::Disabled)
            .set_header(columns.iter().map(|(header, _)| *header));

        let last = columns.len().saturating_sub(1);
        for (index, column) in table.column_iter_mut().enumerate() {
            let (_, align) = columns[index];
            column.set_cell_alignment(align.into());
            // The gap sits on the right of every column but the last.
            column.set_padding((0, if index == last { 0 } else { 2 }));
        }

        Self {
            table,
            indent: String::new(),
        }
    }

    /// Prefix every printed line with `prefix`.
    pub fn indent(mut self, prefix: &str) -> Self {
        prefix.clone_into(&mut self.indent);
        self
    }

    /// Append a row, one value per column.
    pub fn row(&mut self, values: Vec<String>) {
        self.table.add_row(values);
    }

    /// Write the table to stdout, trimming trailing padding.
    pub fn print(&self) {
        let rendered = self.table.to_string();
        let mut stdout = io::stdout().lock();
        for line in rendered.lines() {
            // Broken pipes (`| head`) end the listing quietly.
            if writeln!(stdout, "{}{}", self.indent, line.trim_end()).is_err() {
                return;
            }
        }
    }
}

/// Print `label: value` pairs with the labels padded to a common width.
pub fn print_fields(fields: &[(&str, String)]) {
    let width = fields.iter().map(|(label, _)| label.len() + 1).max().unwrap_or(0);
    for (label, value) in fields {
        println!("{:<width$}  {value}", format!("{label}:"));
    }
}
