//! CSV export of accepted cycles.
//!
//! One row per accepted cycle: epoch seconds, local datetime, then one value
//! per parameter in discovery order. The header is written once, when the
//! file is created, and is never rewritten even if the parameter set changes
//! later.

use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{ensure_parent, StoreError};
use crate::sync::{DeviceConfig, ParameterSnapshot};

pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const DATETIME_COLUMN: &str = "datetime";

/// Append contract for the cycle archive.
pub trait ExportSink: Send + Sync {
    /// Prepare the sink for rows shaped by `config`.
    fn initialize(&mut self, config: &DeviceConfig) -> Result<(), StoreError>;

    fn append(&mut self, row: &ExportRow) -> Result<(), StoreError>;
}

/// One archived cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub recorded_at: DateTime<Local>,
    /// Cell text per parameter, in `parameter_ids` order.
    pub values: Vec<String>,
    /// The indicator cell holds the pre-toggle value because the write failed.
    pub indicator_stale: bool,
}

impl ExportRow {
    pub fn from_snapshot(
        config: &DeviceConfig,
        snapshot: &ParameterSnapshot,
        recorded_at: DateTime<Local>,
    ) -> Self {
        Self {
            recorded_at,
            values: config.parameter_ids.iter().map(|&id| snapshot.cell(id)).collect(),
            indicator_stale: false,
        }
    }

    fn fields(&self) -> Vec<String> {
        let epoch = self.recorded_at.timestamp_micros() as f64 / 1_000_000.0;
        let mut fields = Vec::with_capacity(self.values.len() + 2);
        fields.push(format!("{:.6}", epoch));
        fields.push(self.recorded_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string());
        fields.extend(self.values.iter().cloned());
        fields
    }
}

/// Header columns for `config`: `timestamp`, `datetime`, `<name> (ID:<id>)`...
pub fn header_columns(config: &DeviceConfig) -> Vec<String> {
    let mut columns = vec![TIMESTAMP_COLUMN.to_string(), DATETIME_COLUMN.to_string()];
    columns.extend(
        config
            .parameter_ids
            .iter()
            .map(|&id| format!("{} (ID:{})", config.parameter_name(id), id)),
    );
    columns
}

/// Append-only CSV file.
#[derive(Debug)]
pub struct CsvExporter {
    path: PathBuf,
    header: Option<Vec<String>>,
}

impl CsvExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            header: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn has_content(&self) -> bool {
        fs::metadata(&self.path).map(|m| m.len() > 0).unwrap_or(false)
    }

    fn write_line(&self, fields: &[String]) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        writeln!(file, "{}", csv_join(fields)).map_err(|e| StoreError::io(&self.path, e))
    }
}

impl ExportSink for CsvExporter {
    fn initialize(&mut self, config: &DeviceConfig) -> Result<(), StoreError> {
        let header = header_columns(config);
        self.header = Some(header.clone());
        if self.has_content() {
            tracing::info!(path = %self.path.display(), "Appending to existing export, header kept");
            return Ok(());
        }
        ensure_parent(&self.path)?;
        self.write_line(&header)?;
        tracing::info!(path = %self.path.display(), columns = header.len(), "Export file created");
        Ok(())
    }

    fn append(&mut self, row: &ExportRow) -> Result<(), StoreError> {
        // File removed or never initialised successfully.
        if !self.has_content() {
            if let Some(header) = &self.header {
                ensure_parent(&self.path)?;
                self.write_line(header)?;
            }
        }
        self.write_line(&row.fields())
    }
}

// ============================================================================
// CSV Quote-Aware Encoding
// ============================================================================

fn needs_quotes(field: &str) -> bool {
    field.contains([',', '"', '\n', '\r'])
}

fn csv_join(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| {
            if needs_quotes(f) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Split CSV text into records of fields. Quoted fields may contain commas,
/// doubled quotes and line breaks; blank lines are skipped.
fn csv_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    let mut end_record = |fields: &mut Vec<String>, current: &mut String| {
        fields.push(std::mem::take(current));
        let record = std::mem::take(fields);
        if !(record.len() == 1 && record[0].trim().is_empty()) {
            records.push(record);
        }
    };

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            _ if in_quotes => current.push(ch),
            ',' => fields.push(std::mem::take(&mut current)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => end_record(&mut fields, &mut current),
            _ => current.push(ch),
        }
    }
    if !current.is_empty() || !fields.is_empty() {
        end_record(&mut fields, &mut current);
    }
    records
}

/// Parsed export file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub columns: Vec<String>,
    /// Chronological order, as stored.
    pub rows: Vec<Vec<String>>,
}

/// Read the export for display. `Ok(None)` when the file is absent or has no header.
pub fn read_table(path: &Path) -> Result<Option<CsvTable>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let mut records = csv_records(&contents).into_iter();
    let Some(columns) = records.next() else {
        return Ok(None);
    };
    Ok(Some(CsvTable {
        columns,
        rows: records.collect(),
    }))
}
