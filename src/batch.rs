//! Reads the batch table: one row per task, one or more screenshot path
//! columns per row. Each non-empty path cell becomes one [`ImageTask`].

use crate::config::Batch;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTask {
    pub task_id: String,
    pub column: String,
    pub path: PathBuf,
}

impl ImageTask {
    pub fn new(
        task_id: impl Into<String>,
        column: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            column: column.into(),
            path: path.into(),
        }
    }
}

pub fn read_tasks(path: &Path, cfg: &Batch) -> Result<Vec<ImageTask>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading batch table: {}", path.display()))?;
    parse_tasks(&raw, cfg)
}

/// Rows are processed in file order and path columns in configured order.
/// A missing task id becomes `row_<index>` (0-based data row index).
pub fn parse_tasks(raw: &str, cfg: &Batch) -> Result<Vec<ImageTask>> {
    let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| anyhow!("batch table is empty"))?;
    let header: Vec<String> = split_row(header.trim_start_matches('\u{feff}'))
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();

    let column_index = |name: &str| header.iter().position(|h| h == name);
    let task_col = column_index(&cfg.task_id_column);
    let path_cols: Vec<(String, usize)> = cfg
        .path_columns
        .iter()
        .filter_map(|c| match column_index(c) {
            Some(i) => Some((c.clone(), i)),
            None => {
                debug!("path column {c} not in batch table header");
                None
            }
        })
        .collect();
    if path_cols.is_empty() {
        return Err(anyhow!(
            "none of the path columns {:?} appear in the header {:?}",
            cfg.path_columns,
            header
        ));
    }

    let mut tasks = Vec::new();
    for (row_idx, line) in lines.enumerate() {
        let cells = split_row(line);
        if cells.len() != header.len() {
            warn!(
                "batch row {row_idx} has {} cells, header has {}",
                cells.len(),
                header.len()
            );
        }
        let cell = |i: usize| cells.get(i).map(|c| c.trim()).unwrap_or("");

        let task_id = task_col
            .map(cell)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("row_{row_idx}"));

        for (name, i) in &path_cols {
            let value = cell(*i);
            if value.is_empty()
                || value.eq_ignore_ascii_case("na")
                || value.eq_ignore_ascii_case("nan")
            {
                continue;
            }
            tasks.push(ImageTask::new(
                task_id.clone(),
                name.clone(),
                crate::util::expand_tilde(value),
            ));
        }
    }
    Ok(tasks)
}

/// Splits one CSV record. Quoted fields may contain commas and `""` escapes.
fn split_row(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    cur.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if cur.is_empty() => in_quotes = true,
            ',' if !in_quotes => cells.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    cells.push(cur);
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_handles_quotes() {
        assert_eq!(split_row("a,\"b,c\",\"d \"\"e\"\"\""), vec!["a", "b,c", "d \"e\""]);
        assert_eq!(split_row("a,,"), vec!["a", "", ""]);
    }
}
