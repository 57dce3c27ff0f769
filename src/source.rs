//! Source tier: yearly JSON files and the external-id CSV export

use crate::error::{Result, SyncError};
use crate::models::{id_set_from_records, IdSet, Record, SOURCE_ID_FIELD};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Years covered by the source dataset
pub const DEFAULT_YEARS: [i32; 9] = [2012, 2013, 2014, 2015, 2016, 2017, 2023, 2024, 2025];

/// Years written by the id export
pub const EXPORT_YEARS: std::ops::RangeInclusive<i32> = 2012..=2025;

pub const EXPORT_CSV_NAME: &str = "setlists_external_ids.csv";

pub fn year_file_path(dir: &Path, year: i32) -> PathBuf {
    dir.join(format!("setlists_{}.json", year))
}

/// Parse a yearly file body: an object with a `data` array.
pub fn parse_year_payload(text: &str) -> std::result::Result<Vec<Value>, String> {
    // files exported from some tools carry a UTF-8 BOM
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let payload: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    match payload {
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err("unexpected JSON structure - expected object with 'data' array".into()),
        },
        _ => Err("unexpected JSON structure - expected object with 'data' array".into()),
    }
}

/// Load one year's records.
///
/// Payloads without an identifier are skipped; a missing file is an error.
pub fn load_year_file(dir: &Path, year: i32) -> Result<Vec<Record>> {
    let path = year_file_path(dir, year);
    if !path.is_file() {
        return Err(SyncError::source_file(&path, "missing file"));
    }
    let text = fs::read_to_string(&path)?;
    let items = parse_year_payload(&text).map_err(|reason| SyncError::source_file(&path, reason))?;

    let total = items.len();
    let mut records = Vec::with_capacity(total);
    for item in items {
        if let Some(record) = Record::from_source(item, year)? {
            records.push(record);
        }
    }

    let skipped = total - records.len();
    if skipped > 0 {
        debug!(
            "{}: skipped {} records without {}",
            path.display(),
            skipped,
            SOURCE_ID_FIELD
        );
    }
    Ok(records)
}

/// Source ids for each year, loading each year's file.
pub fn load_source_ids(dir: &Path, years: &[i32]) -> Result<IdSet> {
    let mut ids = IdSet::new();
    for &year in years {
        let records = load_year_file(dir, year)?;
        ids.extend(id_set_from_records(&records));
        ids.entry(year).or_default();
    }
    Ok(ids)
}

/// Write a `year,external_id` CSV for every year file present in `dir`.
///
/// Missing years are skipped with a warning. Returns the number of ids written.
pub fn export_ids_csv(
    dir: &Path,
    years: impl IntoIterator<Item = i32>,
    out: &Path,
) -> Result<usize> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(fs::File::create(out)?);
    writeln!(writer, "year,external_id")?;

    let mut written = 0;
    for year in years {
        if !year_file_path(dir, year).is_file() {
            warn!("Skipping missing file: {}", year_file_path(dir, year).display());
            continue;
        }
        let records = load_year_file(dir, year)?;
        for record in &records {
            writeln!(writer, "{},{}", year, csv_field(&record.external_id))?;
        }
        info!("Year {}: wrote {} IDs", year, records.len());
        written += records.len();
    }

    writer.flush()?;
    Ok(written)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Read the distinct ids from an export CSV with an `external_id` column.
///
/// Rows with an empty id are skipped.
pub fn read_ids_csv(path: &Path) -> Result<BTreeSet<String>> {
    let file = fs::File::open(path)
        .map_err(|e| SyncError::source_file(path, format!("cannot open: {}", e)))?;
    let mut lines = BufReader::new(file).lines();

    let header = match lines.next() {
        Some(line) => line?,
        None => return Ok(BTreeSet::new()),
    };
    let column = split_csv_line(header.trim_start_matches('\u{feff}'))
        .iter()
        .position(|h| h.trim() == "external_id")
        .ok_or_else(|| SyncError::source_file(path, "no external_id column"))?;

    let mut ids = BTreeSet::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(id) = split_csv_line(&line).into_iter().nth(column) {
            if !id.is_empty() {
                ids.insert(id);
            }
        }
    }
    Ok(ids)
}

/// Split one CSV line, honoring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            ('"', _) => quoted = !quoted,
            (',', false) => fields.push(std::mem::take(&mut cur)),
            (c, _) => cur.push(c),
        }
    }
    fields.push(cur);
    fields
}
