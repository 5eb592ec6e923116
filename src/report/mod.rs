//! Tabulation of benchmark result files into CSV tables.
//!
//! Result files are JSON documents named
//! `<engine>-m-<m>-ef-<ef>-<dataset>-<search|upload>[-<n>-]-<date>.json`.
//! Search results become one table per engine, parallelism and dataset;
//! upload results one table per engine and dataset.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

static RESULT_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<engine>[a-z0-9.\-]+)-m-(?P<m>[0-9]+)-ef-(?P<ef>[0-9]+)-(?P<dataset>[a-zA-Z0-9\-]+)-(?P<operation>search|upload)(-(?P<search_index>[0-9]{1,2})-)?-?(?P<date>.*)\.json$",
    )
    .expect("result file pattern is valid")
});

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to read {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("Failed to parse result file {1}: {0}")]
    Parse(serde_json::Error, PathBuf),

    #[error("Failed to write {1}: {0}")]
    Csv(csv::Error, PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Search,
    Upload,
}

/// Experiment coordinates encoded in a result file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFileName {
    pub engine: String,
    pub m: u32,
    pub ef: u32,
    pub dataset: String,
    pub operation: Operation,
    pub search_index: Option<u32>,
    pub date: String,
}

impl ResultFileName {
    /// `None` for names that are not result files.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = RESULT_FILE.captures(name)?;
        Some(Self {
            engine: caps["engine"].to_string(),
            m: caps["m"].parse().ok()?,
            ef: caps["ef"].parse().ok()?,
            dataset: caps["dataset"].to_string(),
            operation: match &caps["operation"] {
                "search" => Operation::Search,
                _ => Operation::Upload,
            },
            search_index: caps
                .name("search_index")
                .and_then(|m| m.as_str().parse().ok()),
            date: caps["date"].to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRow {
    pub m: u32,
    pub ef: u32,
    pub mean_precisions: f64,
    pub rps: f64,
    pub mean_time: f64,
    pub p95_time: f64,
    pub p99_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRow {
    pub m: u32,
    pub ef: u32,
    pub upload_time: f64,
    pub total_time: f64,
}

#[derive(Debug, Deserialize)]
struct SearchStats {
    params: SearchStatsParams,
    results: SearchStatsResults,
}

#[derive(Debug, Deserialize)]
struct SearchStatsParams {
    parallel: Value,
}

#[derive(Debug, Deserialize)]
struct SearchStatsResults {
    mean_precisions: f64,
    rps: f64,
    mean_time: f64,
    p95_time: f64,
    p99_time: f64,
}

#[derive(Debug, Deserialize)]
struct UploadStats {
    results: UploadStatsResults,
}

#[derive(Debug, Deserialize)]
struct UploadStatsResults {
    upload_time: f64,
    total_time: f64,
}

/// `(engine, parallel, dataset)`.
pub type SearchKey = (String, String, String);
/// `(engine, dataset)`.
pub type UploadKey = (String, String);

/// Result rows grouped by table, in sorted key order.
#[derive(Debug, Default)]
pub struct ResultTables {
    pub search: BTreeMap<SearchKey, Vec<SearchRow>>,
    pub upload: BTreeMap<UploadKey, Vec<UploadRow>>,
}

impl ResultTables {
    /// Read every result file in `dir`. Files whose names do not match the
    /// result pattern are skipped.
    pub fn load(dir: &Path) -> Result<Self, ReportError> {
        let entries =
            std::fs::read_dir(dir).map_err(|e| ReportError::Io(e, dir.to_path_buf()))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ReportError::Io(e, dir.to_path_buf()))?;
            paths.push(entry.path());
        }
        // Rows within a table follow file name order
        paths.sort();

        let mut tables = Self::default();
        for path in paths {
            let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(ResultFileName::parse)
            else {
                debug!(path = %path.display(), "Skipping non-result file");
                continue;
            };
            let contents =
                std::fs::read_to_string(&path).map_err(|e| ReportError::Io(e, path.clone()))?;
            tables.add(&name, &contents, &path)?;
        }
        Ok(tables)
    }

    fn add(&mut self, name: &ResultFileName, contents: &str, path: &Path) -> Result<(), ReportError> {
        match name.operation {
            Operation::Search => {
                let stats: SearchStats = serde_json::from_str(contents)
                    .map_err(|e| ReportError::Parse(e, path.to_path_buf()))?;
                let key = (
                    name.engine.clone(),
                    value_text(&stats.params.parallel),
                    name.dataset.clone(),
                );
                self.search.entry(key).or_default().push(SearchRow {
                    m: name.m,
                    ef: name.ef,
                    mean_precisions: stats.results.mean_precisions,
                    rps: stats.results.rps,
                    mean_time: stats.results.mean_time,
                    p95_time: stats.results.p95_time,
                    p99_time: stats.results.p99_time,
                });
            }
            Operation::Upload => {
                let stats: UploadStats = serde_json::from_str(contents)
                    .map_err(|e| ReportError::Parse(e, path.to_path_buf()))?;
                let key = (name.engine.clone(), name.dataset.clone());
                self.upload.entry(key).or_default().push(UploadRow {
                    m: name.m,
                    ef: name.ef,
                    upload_time: stats.results.upload_time,
                    total_time: stats.results.total_time,
                });
            }
        }
        Ok(())
    }

    /// Write one CSV per table into `out_dir`; returns the written paths.
    pub fn write_csv(&self, out_dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
        let mut written = Vec::new();
        for ((engine, parallel, dataset), rows) in &self.search {
            let path = out_dir.join(format!("data-search-{engine}-{parallel}-{dataset}.csv"));
            write_table(&path, rows)?;
            written.push(path);
        }
        for ((engine, dataset), rows) in &self.upload {
            let path = out_dir.join(format!("data-upload-{engine}-{dataset}.csv"));
            write_table(&path, rows)?;
            written.push(path);
        }
        info!(
            out_dir = %out_dir.display(),
            table_count = written.len(),
            "Wrote result tables"
        );
        Ok(written)
    }
}

fn write_table<R: Serialize>(path: &Path, rows: &[R]) -> Result<(), ReportError> {
    let mut writer =
        csv::Writer::from_path(path).map_err(|e| ReportError::Csv(e, path.to_path_buf()))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| ReportError::Csv(e, path.to_path_buf()))?;
    }
    writer
        .flush()
        .map_err(|e| ReportError::Io(e, path.to_path_buf()))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_search_file_name() {
        let name =
            ResultFileName::parse("pgvector-hnsw-m-16-ef-128-arxiv-titles-384-angular-search-3-2024-01-05-10-00-00.json")
                .unwrap();
        assert_eq!(name.engine, "pgvector-hnsw");
        assert_eq!(name.m, 16);
        assert_eq!(name.ef, 128);
        assert_eq!(name.dataset, "arxiv-titles-384-angular");
        assert_eq!(name.operation, Operation::Search);
        assert_eq!(name.search_index, Some(3));
        assert_eq!(name.date, "2024-01-05-10-00-00");
    }

    #[test]
    fn test_parse_upload_file_name() {
        let name = ResultFileName::parse("qdrant-m-32-ef-64-glove-100-upload-2024-01-05.json").unwrap();
        assert_eq!(name.engine, "qdrant");
        assert_eq!(name.operation, Operation::Upload);
        assert_eq!(name.search_index, None);
        assert_eq!(name.dataset, "glove-100");
    }

    #[test]
    fn test_unrelated_names_are_skipped() {
        assert_eq!(ResultFileName::parse("notes.json"), None);
        assert_eq!(ResultFileName::parse("data-search-x-8-glove.csv"), None);
        assert_eq!(ResultFileName::parse("engine-m-x-ef-1-d-search-1.json"), None);
    }

    fn write(dir: &Path, name: &str, value: serde_json::Value) {
        std::fs::write(dir.join(name), value.to_string()).unwrap();
    }

    fn search_stats(parallel: u32, rps: f64) -> serde_json::Value {
        json!({
            "params": {"parallel": parallel, "top": 10},
            "results": {
                "mean_precisions": 0.95,
                "rps": rps,
                "mean_time": 0.002,
                "p95_time": 0.004,
                "p99_time": 0.006,
                "total_time": 10.0
            }
        })
    }

    #[test]
    fn test_tabulates_directory() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write(
            input.path(),
            "pgvector-m-16-ef-64-glove-100-search-0-2024-01-01.json",
            search_stats(8, 1200.0),
        );
        write(
            input.path(),
            "pgvector-m-32-ef-64-glove-100-search-1-2024-01-01.json",
            search_stats(8, 900.0),
        );
        write(
            input.path(),
            "pgvector-m-16-ef-64-glove-100-search-2-2024-01-01.json",
            search_stats(1, 300.0),
        );
        write(
            input.path(),
            "pgvector-m-16-ef-64-glove-100-upload-2024-01-01.json",
            json!({"params": {}, "results": {"upload_time": 12.5, "total_time": 40.0}}),
        );
        write(input.path(), "README.json", json!({}));

        let tables = ResultTables::load(input.path()).unwrap();
        assert_eq!(tables.search.len(), 2);
        let key = ("pgvector".to_string(), "8".to_string(), "glove-100".to_string());
        let rows = &tables.search[&key];
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].m, rows[0].rps), (16, 1200.0));
        assert_eq!((rows[1].m, rows[1].rps), (32, 900.0));

        let written = tables.write_csv(output.path()).unwrap();
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "data-search-pgvector-1-glove-100.csv",
                "data-search-pgvector-8-glove-100.csv",
                "data-upload-pgvector-glove-100.csv",
            ]
        );

        let upload = std::fs::read_to_string(&written[2]).unwrap();
        assert_eq!(upload, "m,ef,upload_time,total_time\n16,64,12.5,40.0\n");

        let search = std::fs::read_to_string(&written[1]).unwrap();
        assert!(search.starts_with("m,ef,mean_precisions,rps,mean_time,p95_time,p99_time\n"));
        assert_eq!(search.lines().count(), 3);
    }

    #[test]
    fn test_malformed_result_file_is_an_error() {
        let input = tempfile::tempdir().unwrap();
        write(
            input.path(),
            "pgvector-m-16-ef-64-glove-100-upload-2024-01-01.json",
            json!({"results": {}}),
        );
        assert!(matches!(
            ResultTables::load(input.path()),
            Err(ReportError::Parse(..))
        ));
    }
}
