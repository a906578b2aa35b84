//! NDJSON stage tables and their JSON quality summaries.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Reads every non-blank line of `path` as one `T`.
pub fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(PipelineError::MissingFile(path.display().to_string()));
    }
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|source| PipelineError::Row {
            path: path.display().to_string(),
            line: idx + 1,
            source,
        })?;
        rows.push(row);
    }
    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Like `read_table`, but a missing file is an empty table.
pub fn read_table_or_empty<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match read_table(path) {
        Err(PipelineError::MissingFile(_)) => Ok(Vec::new()),
        other => other,
    }
}

/// Overwrites `path` with one JSON line per row, creating parent directories.
pub fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// `data/x/reviews_tagged.ndjson` -> `data/x/reviews_tagged_summary.json`
pub fn summary_path(table_path: &Path) -> PathBuf {
    sibling(table_path, "_summary", "json")
}

/// `data/x/reviews_tagged.ndjson` -> `data/x/reviews_tagged_partial.ndjson`
pub fn partial_path(table_path: &Path) -> PathBuf {
    sibling(table_path, "_partial", "ndjson")
}

fn sibling(table_path: &Path, suffix: &str, ext: &str) -> PathBuf {
    let stem = table_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table");
    table_path.with_file_name(format!("{}{}.{}", stem, suffix, ext))
}

/// Pretty-printed quality summary written next to the table at `table_path`.
pub fn write_summary<S: Serialize>(table_path: &Path, summary: &S) -> Result<PathBuf> {
    let path = summary_path(table_path);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(&path, serde_json::to_string_pretty(summary)?)?;
    debug!("Wrote summary {}", path.display());
    Ok(path)
}

/// Writes the table and its summary; if that fails, tries to leave a partial
/// copy of the rows behind before returning the original error.
pub fn persist_stage<T: Serialize, S: Serialize>(
    table_path: &Path,
    rows: &[T],
    summary: &S,
) -> Result<()> {
    let result = write_table(table_path, rows).and_then(|_| write_summary(table_path, summary).map(|_| ()));
    if let Err(e) = &result {
        save_partial(table_path, rows, e);
    }
    result
}

/// Best-effort emergency save of `rows` after `cause`.
pub fn save_partial<T: Serialize>(table_path: &Path, rows: &[T], cause: &PipelineError) {
    let partial = partial_path(table_path);
    tracing::error!(
        "Stage failed ({}); saving {} rows to {}",
        cause,
        rows.len(),
        partial.display()
    );
    if let Err(e) = write_table(&partial, rows) {
        tracing::error!("Emergency save to {} failed: {}", partial.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        id: String,
        #[serde(default)]
        score: Option<u32>,
    }

    #[test]
    fn test_write_then_read_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/rows.ndjson");
        let rows = vec![
            Row { id: "a".into(), score: Some(1) },
            Row { id: "b".into(), score: None },
        ];

        write_table(&path, &rows).unwrap();
        let back: Vec<Row> = read_table(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_missing_columns_and_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.ndjson");
        fs::write(&path, "{\"id\":\"a\"}\n\n{\"id\":\"b\",\"extra\":true}\n").unwrap();

        let rows: Vec<Row> = read_table(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].score, None);
    }

    #[test]
    fn test_bad_row_reports_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.ndjson");
        fs::write(&path, "{\"id\":\"a\"}\nnot json\n").unwrap();

        match read_table::<Row>(&path) {
            Err(PipelineError::Row { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected row error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.ndjson");

        assert!(matches!(
            read_table::<Row>(&path),
            Err(PipelineError::MissingFile(_))
        ));
        assert!(read_table_or_empty::<Row>(&path).unwrap().is_empty());
    }

    #[test]
    fn test_sibling_paths() {
        let table = Path::new("data/processed/reviews_tagged.ndjson");
        assert_eq!(
            summary_path(table),
            PathBuf::from("data/processed/reviews_tagged_summary.json")
        );
        assert_eq!(
            partial_path(table),
            PathBuf::from("data/processed/reviews_tagged_partial.ndjson")
        );
    }

    #[test]
    fn test_persist_stage_writes_summary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.ndjson");
        let rows = vec![Row { id: "a".into(), score: None }];

        persist_stage(&path, &rows, &serde_json::json!({"total": 1})).unwrap();
        let summary = fs::read_to_string(summary_path(&path)).unwrap();
        assert!(summary.contains("\"total\": 1"));
    }
}
