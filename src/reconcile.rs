//! Three-way reconciliation: source files vs raw sink vs derived sink
//!
//! For each year the distinct id sets of all three tiers are compared and
//! the four directional differences recorded. Counts are exact; the id lists
//! are sorted samples for human inspection.

use crate::error::{Result, SyncError};
use crate::fetch::{fetch_all, fetch_distinct_ids, DateWindow, PageSource, RowQuery, TableRef};
use crate::models::{id_text, lookup_path, year_from_date, IdSet, SHOWDATE_FIELD};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::info;

/// Cap on each persisted diff sample
pub const SAMPLE_LIMIT: usize = 50;

/// Cap on the export-vs-raw sample files
pub const EXPORT_SAMPLE_LIMIT: usize = 200;

pub const KEY_FIELD: &str = "external_id";

/// How a sink tier is narrowed to one year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YearFilter {
    /// Server-side `[Jan 1, next Jan 1)` window on a date column expression
    Column(String),
    /// Fetch every row and match the year of an embedded date client-side
    Embedded {
        select: String,
        /// Path to the date, e.g. `["data", "showdate"]`
        path: Vec<String>,
    },
}

/// One sink tier to read ids from.
#[derive(Debug, Clone)]
pub struct TierSpec {
    pub name: String,
    pub table: TableRef,
    pub key_field: String,
    pub year_filter: YearFilter,
}

impl TierSpec {
    /// `raw_data.setlists`: the ingested payload lives in a JSON `data` column.
    pub fn raw(client_side_dates: bool) -> Self {
        let year_filter = if client_side_dates {
            YearFilter::Embedded {
                select: "external_id,data".into(),
                path: vec!["data".into(), SHOWDATE_FIELD.into()],
            }
        } else {
            YearFilter::Column("data->>showdate".into())
        };
        Self {
            name: "raw".into(),
            table: TableRef::new("raw_data", "setlists"),
            key_field: KEY_FIELD.into(),
            year_filter,
        }
    }

    /// `silver.setlists`: has a native `showdate` column.
    pub fn derived(client_side_dates: bool) -> Self {
        let year_filter = if client_side_dates {
            YearFilter::Embedded {
                select: "external_id,showdate".into(),
                path: vec![SHOWDATE_FIELD.into()],
            }
        } else {
            YearFilter::Column("showdate".into())
        };
        Self {
            name: "derived".into(),
            table: TableRef::new("silver", "setlists"),
            key_field: KEY_FIELD.into(),
            year_filter,
        }
    }

    /// Distinct ids of this tier for `year`.
    pub fn ids_for_year<S: PageSource>(&self, source: &S, year: i32) -> Result<BTreeSet<String>> {
        match &self.year_filter {
            YearFilter::Column(column) => {
                let window = DateWindow::year(column.clone(), year)
                    .ok_or_else(|| SyncError::Config(format!("year {} out of range", year)))?;
                let query = RowQuery::new(self.table.clone(), self.key_field.clone())
                    .distinct()
                    .with_window(window);
                fetch_distinct_ids(source, &query, &self.key_field)
            }
            YearFilter::Embedded { select, path } => {
                let query = RowQuery::new(self.table.clone(), select.clone());
                let rows = fetch_all(source, &query)?;
                Ok(rows
                    .iter()
                    .filter(|row| {
                        lookup_path(row, path)
                            .and_then(|v| v.as_str())
                            .and_then(year_from_date)
                            == Some(year)
                    })
                    .filter_map(|row| row.get(&self.key_field).and_then(id_text))
                    .collect())
            }
        }
    }

    /// Every distinct id in the tier, regardless of year.
    pub fn all_ids<S: PageSource>(&self, source: &S) -> Result<BTreeSet<String>> {
        let query = RowQuery::new(self.table.clone(), self.key_field.clone());
        fetch_distinct_ids(source, &query, &self.key_field)
    }
}

/// Sorted, capped sample of a set difference.
fn sample(diff: &BTreeSet<&String>, limit: usize) -> Vec<String> {
    diff.iter().take(limit).map(|s| (*s).clone()).collect()
}

fn difference<'a>(a: &'a BTreeSet<String>, b: &'a BTreeSet<String>) -> BTreeSet<&'a String> {
    a.difference(b).collect()
}

/// Per-year comparison across the three tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearReconciliation {
    pub source_count: usize,
    pub raw_count: usize,
    pub derived_count: usize,
    pub source_minus_raw: Vec<String>,
    pub raw_minus_source: Vec<String>,
    pub raw_minus_derived: Vec<String>,
    pub derived_minus_raw: Vec<String>,
    pub source_minus_raw_count: usize,
    pub raw_minus_source_count: usize,
    pub raw_minus_derived_count: usize,
    pub derived_minus_raw_count: usize,
}

impl YearReconciliation {
    pub fn compute(
        source: &BTreeSet<String>,
        raw: &BTreeSet<String>,
        derived: &BTreeSet<String>,
    ) -> Self {
        let source_minus_raw = difference(source, raw);
        let raw_minus_source = difference(raw, source);
        let raw_minus_derived = difference(raw, derived);
        let derived_minus_raw = difference(derived, raw);

        Self {
            source_count: source.len(),
            raw_count: raw.len(),
            derived_count: derived.len(),
            source_minus_raw: sample(&source_minus_raw, SAMPLE_LIMIT),
            raw_minus_source: sample(&raw_minus_source, SAMPLE_LIMIT),
            raw_minus_derived: sample(&raw_minus_derived, SAMPLE_LIMIT),
            derived_minus_raw: sample(&derived_minus_raw, SAMPLE_LIMIT),
            source_minus_raw_count: source_minus_raw.len(),
            raw_minus_source_count: raw_minus_source.len(),
            raw_minus_derived_count: raw_minus_derived.len(),
            derived_minus_raw_count: derived_minus_raw.len(),
        }
    }

    /// True when all three tiers hold exactly the same ids.
    pub fn is_consistent(&self) -> bool {
        self.source_minus_raw_count == 0
            && self.raw_minus_source_count == 0
            && self.raw_minus_derived_count == 0
            && self.derived_minus_raw_count == 0
    }
}

/// Reconciliation output, keyed by year.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReconciliationReport {
    pub years: BTreeMap<i32, YearReconciliation>,
}

impl ReconciliationReport {
    /// Persist as pretty-printed JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// Compares the source tier against the raw and derived sinks.
pub struct Reconciler<'a, S: PageSource> {
    source: &'a S,
    raw: TierSpec,
    derived: TierSpec,
}

impl<'a, S: PageSource> Reconciler<'a, S> {
    pub fn new(source: &'a S, raw: TierSpec, derived: TierSpec) -> Self {
        Self {
            source,
            raw,
            derived,
        }
    }

    /// Reconcile each year. Any fetch failure aborts the whole run.
    pub fn reconcile(&self, years: &[i32], source_ids: &IdSet) -> Result<ReconciliationReport> {
        let empty = BTreeSet::new();
        let mut report = ReconciliationReport::default();

        for &year in years {
            let source = source_ids.get(&year).unwrap_or(&empty);
            let raw = self.raw.ids_for_year(self.source, year)?;
            let derived = self.derived.ids_for_year(self.source, year)?;

            let entry = YearReconciliation::compute(source, &raw, &derived);
            info!(
                "Reconcile {}: source={} {}={} {}={} consistent={}",
                year,
                entry.source_count,
                self.raw.name,
                entry.raw_count,
                self.derived.name,
                entry.derived_count,
                entry.is_consistent()
            );
            report.years.insert(year, entry);
        }

        Ok(report)
    }
}

/// Drift between an exported id list and the raw sink, all years together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDrift {
    pub export_count: usize,
    pub raw_count: usize,
    pub only_in_export_count: usize,
    pub only_in_raw_count: usize,
    pub only_in_export: Vec<String>,
    pub only_in_raw: Vec<String>,
}

impl ExportDrift {
    pub fn compute(export_ids: &BTreeSet<String>, raw_ids: &BTreeSet<String>) -> Self {
        let only_in_export = difference(export_ids, raw_ids);
        let only_in_raw = difference(raw_ids, export_ids);
        Self {
            export_count: export_ids.len(),
            raw_count: raw_ids.len(),
            only_in_export_count: only_in_export.len(),
            only_in_raw_count: only_in_raw.len(),
            only_in_export: sample(&only_in_export, EXPORT_SAMPLE_LIMIT),
            only_in_raw: sample(&only_in_raw, EXPORT_SAMPLE_LIMIT),
        }
    }

    /// Write `only_in_csv_sample.txt` and `only_in_bronze_sample.txt` into `dir`.
    pub fn write_samples(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join("only_in_csv_sample.txt"), self.only_in_export.join("\n"))?;
        fs::write(dir.join("only_in_bronze_sample.txt"), self.only_in_raw.join("\n"))?;
        Ok(())
    }
}

/// Compare an id export against every id in the raw tier.
pub fn compare_export<S: PageSource>(
    source: &S,
    raw: &TierSpec,
    export_ids: &BTreeSet<String>,
) -> Result<ExportDrift> {
    let raw_ids = raw.all_ids(source)?;
    let drift = ExportDrift::compute(export_ids, &raw_ids);
    info!(
        "csv_unique={} raw_unique={} only_in_csv={} only_in_raw={}",
        drift.export_count, drift.raw_count, drift.only_in_export_count, drift.only_in_raw_count
    );
    Ok(drift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{Page, PageRange};
    use serde_json::{json, Value};

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    /// Serves rows per table, honoring the year window on `showdate`-like
    /// columns the way the server would.
    struct FakeSinks {
        tables: BTreeMap<String, Vec<Value>>,
        fail_table: Option<String>,
    }

    impl FakeSinks {
        fn row_date<'v>(row: &'v Value, column: &str) -> Option<&'v str> {
            match column {
                "data->>showdate" => row.get("data")?.get("showdate")?.as_str(),
                other => row.get(other)?.as_str(),
            }
        }
    }

    impl PageSource for FakeSinks {
        fn fetch_page(&self, query: &RowQuery, range: PageRange) -> Result<Page> {
            if self.fail_table.as_deref() == Some(query.table.schema.as_str()) {
                return Err(SyncError::Fetch {
                    status: 500,
                    body: "down".into(),
                });
            }
            let rows: Vec<Value> = self.tables[&query.table.to_string()]
                .iter()
                .filter(|row| match &query.window {
                    Some(w) => Self::row_date(row, &w.column).map_or(false, |d| {
                        let start = w.start.format("%Y-%m-%d").to_string();
                        let end = w.end.format("%Y-%m-%d").to_string();
                        d >= start.as_str() && d < end.as_str()
                    }),
                    None => true,
                })
                .cloned()
                .collect();
            let total = rows.len();
            let page = rows.into_iter().skip(range.from).take(range.len()).collect();
            Ok(Page {
                rows: page,
                total: Some(total),
            })
        }
    }

    fn sinks() -> FakeSinks {
        let raw = vec![
            json!({"external_id": "2", "data": {"showdate": "2014-02-01"}}),
            json!({"external_id": 3, "data": {"showdate": "2014-03-01"}}),
            json!({"external_id": "4", "data": {"showdate": "2014-04-01"}}),
            json!({"external_id": "90", "data": {"showdate": "2015-01-01"}}),
            json!({"external_id": "91", "data": {"showdate": "bad"}}),
        ];
        let derived = vec![
            json!({"external_id": "3", "showdate": "2014-03-01"}),
            json!({"external_id": "4", "showdate": "2014-04-01"}),
            json!({"external_id": 5, "showdate": "2014-05-01"}),
        ];
        FakeSinks {
            tables: BTreeMap::from([
                ("raw_data.setlists".to_string(), raw),
                ("silver.setlists".to_string(), derived),
            ]),
            fail_table: None,
        }
    }

    #[test]
    fn test_set_algebra() {
        let r = YearReconciliation::compute(
            &set(&["1", "2", "3"]),
            &set(&["2", "3", "4"]),
            &set(&["3", "4", "5"]),
        );
        assert_eq!(r.source_minus_raw, vec!["1"]);
        assert_eq!(r.raw_minus_source, vec!["4"]);
        assert_eq!(r.raw_minus_derived, vec!["2"]);
        assert_eq!(r.derived_minus_raw, vec!["5"]);
        assert_eq!((r.source_count, r.raw_count, r.derived_count), (3, 3, 3));
        assert!(!r.is_consistent());
    }

    #[test]
    fn test_samples_capped_counts_exact() {
        let source: BTreeSet<String> = (0..120).map(|i| format!("{:03}", i)).collect();
        let r = YearReconciliation::compute(&source, &BTreeSet::new(), &BTreeSet::new());
        assert_eq!(r.source_minus_raw.len(), SAMPLE_LIMIT);
        assert_eq!(r.source_minus_raw_count, 120);
        assert_eq!(r.source_minus_raw[0], "000");
        assert_eq!(r.source_minus_raw[49], "049");
    }

    #[test]
    fn test_export_samples_capped_counts_exact() {
        let export: BTreeSet<String> = (0..250).map(|i| format!("{:04}", i)).collect();
        let raw = set(&["0000", "9999"]);

        let drift = ExportDrift::compute(&export, &raw);
        assert_eq!(drift.only_in_export.len(), EXPORT_SAMPLE_LIMIT);
        assert_eq!(drift.only_in_export_count, 249);
        assert_eq!(drift.only_in_export[0], "0001");
        assert_eq!(drift.only_in_export[EXPORT_SAMPLE_LIMIT - 1], "0200");
        assert_eq!(drift.only_in_raw, vec!["9999"]);
        assert_eq!(drift.only_in_raw_count, 1);
    }

    #[test]
    fn test_year_out_of_range_is_an_error() {
        let sinks = sinks();
        let err = TierSpec::raw(false).ids_for_year(&sinks, i32::MAX).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_reconcile_with_server_windows() {
        let sinks = sinks();
        let reconciler = Reconciler::new(&sinks, TierSpec::raw(false), TierSpec::derived(false));
        let source_ids = IdSet::from([(2014, set(&["1", "2", "3"]))]);

        let report = reconciler.reconcile(&[2014], &source_ids).unwrap();
        let r = &report.years[&2014];
        assert_eq!(r.source_minus_raw, vec!["1"]);
        assert_eq!(r.raw_minus_source, vec!["4"]);
        assert_eq!(r.raw_minus_derived, vec!["2"]);
        assert_eq!(r.derived_minus_raw, vec!["5"]);
    }

    #[test]
    fn test_client_side_dates_match_server_windows() {
        let sinks = sinks();
        let server = Reconciler::new(&sinks, TierSpec::raw(false), TierSpec::derived(false));
        let client = Reconciler::new(&sinks, TierSpec::raw(true), TierSpec::derived(true));
        let source_ids = IdSet::from([(2014, set(&["1", "2", "3"]))]);

        let years = [2014, 2015];
        assert_eq!(
            server.reconcile(&years, &source_ids).unwrap(),
            client.reconcile(&years, &source_ids).unwrap()
        );

        let report = client.reconcile(&years, &source_ids).unwrap();
        assert_eq!(report.years[&2015].raw_minus_source, vec!["90"]);
        assert_eq!(report.years[&2015].source_count, 0);
    }

    #[test]
    fn test_fetch_failure_aborts_run() {
        let mut sinks = sinks();
        sinks.fail_table = Some("silver".into());
        let reconciler = Reconciler::new(&sinks, TierSpec::raw(false), TierSpec::derived(false));
        let err = reconciler.reconcile(&[2014], &IdSet::new()).unwrap_err();
        assert!(matches!(err, SyncError::Fetch { status: 500, .. }));
    }

    #[test]
    fn test_report_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("reconciliation_report.json");

        let mut report = ReconciliationReport::default();
        report.years.insert(
            2014,
            YearReconciliation::compute(&set(&["1"]), &set(&["1"]), &set(&["1"])),
        );
        report.write_to(&path).unwrap();

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["2014"]["source_count"], json!(1));
        assert_eq!(raw["2014"]["raw_minus_derived"], json!([]));
        assert_eq!(ReconciliationReport::read_from(&path).unwrap(), report);
        assert!(report.years[&2014].is_consistent());
    }

    #[test]
    fn test_compare_export() {
        let sinks = sinks();
        let export = set(&["2", "3", "77"]);
        let drift = compare_export(&sinks, &TierSpec::raw(false), &export).unwrap();
        assert_eq!(drift.raw_count, 5);
        assert_eq!(drift.only_in_export, vec!["77"]);
        assert_eq!(drift.only_in_raw, vec!["4", "90", "91"]);

        let dir = tempfile::tempdir().unwrap();
        drift.write_samples(dir.path()).unwrap();
        let text = fs::read_to_string(dir.path().join("only_in_bronze_sample.txt")).unwrap();
        assert_eq!(text, "4\n90\n91");
    }
}
