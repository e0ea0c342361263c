//! Fixed-column CSV rendering of retrieve tasks (RFC 4180).

use std::io::Write;

use super::{COLUMNS, ExportOptions, task_fields};
use crate::Result;
use crate::db::{QueueMessage, RetrieveTask};

/// Header row, one name per column
pub const HEADER: [&str; 26] = COLUMNS;

const LINE_END: &str = "\r\n";

/// Cells of one task, in [`HEADER`] order
///
/// Absent values become empty strings, so every row has the same shape.
pub fn to_csv_row(
    task: &RetrieveTask,
    message: Option<&QueueMessage>,
    options: &ExportOptions,
) -> Vec<String> {
    task_fields(task, message)
        .into_iter()
        .map(|(_, cell)| cell.map(|c| c.render(options)).unwrap_or_default())
        .collect()
}

/// Write the header line
pub fn write_header<W: Write>(writer: &mut W) -> Result<()> {
    write_line(writer, HEADER)
}

/// Write one task as a record line
pub fn write_record<W: Write>(
    writer: &mut W,
    task: &RetrieveTask,
    message: Option<&QueueMessage>,
    options: &ExportOptions,
) -> Result<()> {
    write_line(writer, to_csv_row(task, message, options))
}

fn write_line<W, I, S>(writer: &mut W, cells: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let line = cells
        .into_iter()
        .map(|cell| quote(cell.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    writer.write_all(line.as_bytes())?;
    writer.write_all(LINE_END.as_bytes())?;
    Ok(())
}

/// Quote a cell if it contains a separator, a quote or a line break
fn quote(cell: &str) -> String {
    if cell.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
