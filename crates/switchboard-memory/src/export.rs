//! Export formats for a full agent log

use crate::entry::MemoryEntry;
use crate::error::{MemoryError, Result};

const CSV_HEADER: [&str; 5] = ["timestamp", "type", "input", "result", "agent"];

/// Serialization format for `MemoryStore::export`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Hierarchical: the log as a pretty-printed JSON array
    Json,
    /// Tabular: one row per entry with a fixed column set
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(MemoryError::UnknownFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

impl ExportFormat {
    pub fn render(&self, entries: &[MemoryEntry]) -> Result<String> {
        match self {
            Self::Json => Ok(serde_json::to_string_pretty(entries)?),
            Self::Csv => Ok(to_csv(entries)),
        }
    }
}

/// An empty log exports as an empty document, without a header row.
fn to_csv(entries: &[MemoryEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().map(|s| s.to_string()));
    for entry in entries {
        push_row(
            &mut out,
            [
                entry.timestamp().to_rfc3339(),
                entry.kind().to_string(),
                entry.input_text(),
                entry.result_text(),
                entry.agent().to_string(),
            ]
            .into_iter(),
        );
    }
    out
}

fn push_row(out: &mut String, fields: impl Iterator<Item = String>) {
    let row: Vec<String> = fields.map(|f| escape_field(&f)).collect();
    out.push_str(&row.join(","));
    out.push_str("\r\n");
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(MemoryError::UnknownFormat(f)) if f == "xml"
        ));
    }

    #[test]
    fn test_csv_header_and_rows() {
        let entries = vec![
            MemoryEntry::input("builder", "build it", Value::Null),
            MemoryEntry::result("builder", "t1", json!("done"), Value::Null),
        ];
        let csv = ExportFormat::Csv.render(&entries).unwrap();
        let lines: Vec<&str> = csv.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,type,input,result,agent");
        assert!(lines[1].contains(",task_input,build it,,builder"));
        assert!(lines[2].contains(",task_result,,done,builder"));
    }

    #[test]
    fn test_csv_quotes_special_characters() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_empty_log() {
        assert_eq!(ExportFormat::Csv.render(&[]).unwrap(), "");
    }

    #[test]
    fn test_json_export_is_array() {
        let entries = vec![MemoryEntry::input("scribe", "write notes", Value::Null)];
        let json = ExportFormat::Json.render(&entries).unwrap();
        let parsed: Vec<MemoryEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entries);
    }
}
