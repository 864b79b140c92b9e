//! Rendering of command results as JSON, Markdown or plain text.
//!
//! Results are serialized to a `serde_json::Value` first, so every report type
//! only needs `Serialize`. Multi-line strings (test code) render as code
//! blocks; arrays of flat records render as tables.

use std::io::Write;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::Result;

/// Output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Json,
    Markdown,
    Text,
}

impl Format {
    pub fn format<T: Serialize, W: Write>(&self, data: &T, writer: &mut W) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.format_value(&value, writer)
    }

    pub fn format_value<W: Write>(&self, value: &Value, writer: &mut W) -> Result<()> {
        match self {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)?;
                writeln!(writer)?;
            }
            Format::Markdown => markdown(value, writer, 1)?,
            Format::Text => text(value, writer, 0)?,
        }
        Ok(())
    }

    /// Render into a string.
    pub fn render<T: Serialize>(&self, data: &T) -> Result<String> {
        let mut buf = Vec::new();
        self.format(data, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn markdown<W: Write>(value: &Value, writer: &mut W, level: usize) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        writeln!(writer, "{} {}\n", "#".repeat(level.min(6)), title(key))?;
                        markdown(val, writer, level + 1)?;
                    }
                    Value::String(s) if s.contains('\n') => {
                        writeln!(writer, "**{}**:\n\n```python\n{}\n```\n", title(key), s.trim_end())?;
                    }
                    _ => writeln!(writer, "**{}**: {}\n", title(key), scalar(val))?,
                }
            }
        }
        Value::Array(items) if items.is_empty() => writeln!(writer, "_None_\n")?,
        Value::Array(items) => match flat_records(items) {
            Some(rows) => markdown_table(&rows, writer)?,
            None => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(writer, "---\n")?;
                    }
                    markdown(item, writer, level)?;
                }
            }
        },
        _ => writeln!(writer, "{}\n", scalar(value))?,
    }
    Ok(())
}

fn markdown_table<W: Write>(rows: &[&Map<String, Value>], writer: &mut W) -> Result<()> {
    let headers: Vec<&String> = rows[0].keys().collect();
    let titles: Vec<String> = headers.iter().map(|h| title(h)).collect();
    writeln!(writer, "| {} |", titles.join(" | "))?;
    writeln!(writer, "|{}", " --- |".repeat(headers.len()))?;
    for row in rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|h| row.get(*h).map(scalar).unwrap_or_else(|| "-".into()))
            .collect();
        writeln!(writer, "| {} |", cells.join(" | "))?;
    }
    writeln!(writer)?;
    Ok(())
}

fn text<W: Write>(value: &Value, writer: &mut W, indent: usize) -> Result<()> {
    let pad = "  ".repeat(indent);
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                match val {
                    Value::Object(_) | Value::Array(_) => {
                        writeln!(writer, "{pad}{}:", title(key))?;
                        text(val, writer, indent + 1)?;
                    }
                    Value::String(s) if s.contains('\n') => {
                        writeln!(writer, "{pad}{}:", title(key))?;
                        for line in s.lines() {
                            writeln!(writer, "{pad}  | {line}")?;
                        }
                    }
                    _ => writeln!(writer, "{pad}{}: {}", title(key), scalar(val))?,
                }
            }
        }
        Value::Array(items) if items.is_empty() => writeln!(writer, "{pad}(none)")?,
        Value::Array(items) => match flat_records(items) {
            Some(rows) => text_columns(&rows, writer, &pad)?,
            None => {
                for item in items {
                    match item {
                        Value::Object(_) | Value::Array(_) => {
                            writeln!(writer, "{pad}-")?;
                            text(item, writer, indent + 1)?;
                        }
                        _ => writeln!(writer, "{pad}- {}", scalar(item))?,
                    }
                }
            }
        },
        _ => writeln!(writer, "{pad}{}", scalar(value))?,
    }
    Ok(())
}

/// Aligned columns, one line per record.
fn text_columns<W: Write>(rows: &[&Map<String, Value>], writer: &mut W, pad: &str) -> Result<()> {
    let headers: Vec<&String> = rows[0].keys().collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|h| row.get(*h).map(scalar).unwrap_or_else(|| "-".into()))
                .collect()
        })
        .collect();
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|row| row[i].len())
                .chain(std::iter::once(h.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<&str>| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{v:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    writeln!(writer, "{pad}{}", line(headers.iter().map(|h| h.as_str()).collect()))?;
    for row in &cells {
        writeln!(writer, "{pad}{}", line(row.iter().map(String::as_str).collect()))?;
    }
    Ok(())
}

/// Records whose values are all scalars and single-line strings.
fn flat_records(items: &[Value]) -> Option<Vec<&Map<String, Value>>> {
    items
        .iter()
        .map(|item| match item {
            Value::Object(map)
                if map.values().all(|v| match v {
                    Value::Object(_) | Value::Array(_) => false,
                    Value::String(s) => !s.contains('\n'),
                    _ => true,
                }) =>
            {
                Some(map)
            }
            _ => None,
        })
        .collect()
}

fn title(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(u), _, _) => u.to_string(),
            (_, Some(i), _) => i.to_string(),
            (_, _, Some(f)) => format!("{f:.2}"),
            _ => n.to_string(),
        },
        Value::Bool(b) => if *b { "yes" } else { "no" }.to_string(),
        Value::Null => "-".to_string(),
        _ => value.to_string(),
    }
}
