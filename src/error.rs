// file: src/error.rs
// description: Domain errors raised by dataset loading, batch reshaping, and model selection.
// author: cipher-rc5

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CandidateError {
    #[error("Unknown dataset {name} (looked for {})", path.display())]
    UnknownDataset {
        name: String,
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("dataset {} has no `{column}` column", path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error(
        "Cannot reshape tensor of size {total} into shape ({batch_size}, -1, {seq_len})."
    )]
    Reshape {
        total: usize,
        batch_size: usize,
        seq_len: usize,
    },

    #[error("unsupported model architecture `{0}`: only t5-family checkpoints can be loaded")]
    UnsupportedArchitecture(String),

    #[error("invalid device `{0}`: expected cpu, cuda[:N] or metal[:N]")]
    InvalidDevice(String),

    #[error("batch size must be at least 1")]
    InvalidBatchSize,
}
