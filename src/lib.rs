pub mod batching;
pub mod benchmark;
pub mod config;
pub mod dataset;
pub mod decoding;
pub mod error;
pub mod inference;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod sampler;
pub mod summarizer;
pub mod tokenizer;

pub use config::ModelConfig;
pub use dataset::{Dataset, resolve_dataset_path};
pub use decoding::{DecodingPreset, GenerationConfig};
pub use error::CandidateError;
pub use inference::{InferenceEngine, Seq2SeqGenerator};
pub use loader::{ModelFiles, parse_device};
pub use output::{CandidateTable, sanitize_model_name};
pub use pipeline::CandidateRun;
pub use summarizer::{BatchSettings, CandidateQueue};
pub use tokenizer::{SummaryTokenizer, TextCodec, load_tokenizer};
