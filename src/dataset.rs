// file: src/dataset.rs
// description: Resolves dataset names to CSV files and loads them into an in-memory table.
// author: cipher-rc5

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::CandidateError;

pub const TEXT_COLUMN: &str = "text";

const REVIEW_YEARS: std::ops::RangeInclusive<i64> = 2017..=2020;

/// Maps a dataset name to its file under `dir`.
///
/// A bare review year (2017 through 2020) selects `all_reviews_{year}.csv`;
/// any other name is used as the file stem directly.
pub fn resolve_dataset_path(name: &str, dir: &Path) -> PathBuf {
    let is_review_year = name
        .parse::<i64>()
        .map(|year| REVIEW_YEARS.contains(&year))
        .unwrap_or(false);
    if is_review_year {
        dir.join(format!("all_reviews_{name}.csv"))
    } else {
        dir.join(format!("{name}.csv"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    text_idx: usize,
}

impl Dataset {
    pub fn load(name: &str, dir: &Path) -> Result<Self, CandidateError> {
        let path = resolve_dataset_path(name, dir);
        info!("Loading dataset {} from {}", name, path.display());
        let unknown = |source| CandidateError::UnknownDataset {
            name: name.to_string(),
            path: path.clone(),
            source,
        };

        let mut reader = csv::Reader::from_path(&path).map_err(unknown)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(unknown)?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(unknown)?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        let dataset = Self::from_parts(headers, rows).map_err(|_| CandidateError::MissingColumn {
            path: path.clone(),
            column: TEXT_COLUMN.to_string(),
        })?;
        info!("Loaded {} rows", dataset.len());
        Ok(dataset)
    }

    /// Builds a table from already-parsed parts. Fails when no `text` column
    /// is present.
    pub fn from_parts(
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Result<Self, CandidateError> {
        let text_idx = headers
            .iter()
            .position(|h| h == TEXT_COLUMN)
            .ok_or_else(|| CandidateError::MissingColumn {
                path: PathBuf::new(),
                column: TEXT_COLUMN.to_string(),
            })?;
        Ok(Self {
            headers,
            rows,
            text_idx,
        })
    }

    pub fn limit(&mut self, n: usize) {
        self.rows.truncate(n.min(self.rows.len()));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn texts(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| row.get(self.text_idx).cloned().unwrap_or_default())
            .collect()
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<Vec<String>>) {
        (self.headers, self.rows)
    }
}
