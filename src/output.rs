// file: src/output.rs
// description: Assigns candidate lists back to rows, explodes them, and writes the timestamped CSV.
// author: cipher-rc5

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::summarizer::CandidateQueue;

pub const SUMMARY_COLUMN: &str = "summary";
pub const CANDIDATE_ID_COLUMN: &str = "id_candidate";
const FIELD_SEPARATOR: &str = "-_-";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// A dataset row paired with its candidate list.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizedRow {
    pub position: usize,
    pub fields: Vec<String>,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarizedDataset {
    pub headers: Vec<String>,
    pub rows: Vec<SummarizedRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

/// Pops one candidate list per row, front first.
///
/// Rows are matched to lists by order alone. Rows left without a list are
/// omitted; lists left over after the last row are discarded.
pub fn attach_candidates(dataset: Dataset, mut summaries: CandidateQueue) -> SummarizedDataset {
    let (headers, rows) = dataset.into_parts();
    let total = rows.len();
    let mut out = Vec::with_capacity(total);
    for (position, fields) in rows.into_iter().enumerate() {
        match summaries.pop_front() {
            Some(candidates) => out.push(SummarizedRow {
                position,
                fields,
                candidates,
            }),
            None => {
                warn!(
                    "{} rows received no candidates and are omitted",
                    total - position
                );
                break;
            }
        }
    }
    if !summaries.is_empty() {
        warn!(
            "{} candidate lists from padded slots were not assigned",
            summaries.len()
        );
    }
    SummarizedDataset { headers, rows: out }
}

/// One output record per candidate, with `id_candidate` counting from zero
/// within each source row.
pub fn explode(summarized: SummarizedDataset) -> CandidateTable {
    let index_column = if summarized.headers.iter().any(|h| h == "index") {
        "level_0"
    } else {
        "index"
    };
    let mut headers = Vec::with_capacity(summarized.headers.len() + 3);
    headers.push(index_column.to_string());
    headers.extend(summarized.headers);
    headers.push(SUMMARY_COLUMN.to_string());
    headers.push(CANDIDATE_ID_COLUMN.to_string());

    let mut records = Vec::new();
    for row in summarized.rows {
        for (id_candidate, summary) in row.candidates.into_iter().enumerate() {
            let mut record = Vec::with_capacity(headers.len());
            record.push(row.position.to_string());
            record.extend(row.fields.iter().cloned());
            record.push(summary);
            record.push(id_candidate.to_string());
            records.push(record);
        }
    }
    CandidateTable { headers, records }
}

pub fn sanitize_model_name(model_name: &str) -> String {
    model_name.replace('/', "_")
}

pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub fn output_path(
    output_dir: &Path,
    model_name: &str,
    dataset_name: &str,
    decoding_config: &str,
    timestamp: &str,
) -> PathBuf {
    let stem = [
        sanitize_model_name(model_name).as_str(),
        dataset_name,
        decoding_config,
        timestamp,
    ]
    .join(FIELD_SEPARATOR);
    output_dir.join(format!("{stem}.csv"))
}

pub fn write_csv(path: &Path, table: &CandidateTable) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create output dir {}", parent.display()))?;
        }
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(&table.headers)?;
    for record in &table.records {
        writer.write_record(record)?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {}", table.records.len(), path.display());
    Ok(())
}
