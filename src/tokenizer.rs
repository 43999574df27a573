// file: src/tokenizer.rs
// description: Loads tokenizer.json and wraps fixed-length batch encoding and special-token-free decoding.
// author: cipher-rc5

use anyhow::Result;
use std::path::Path;
use tokenizers::{PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

pub const UNK_TOKEN: &str = "<unk>";

/// Text <-> token id conversion used by the batch loop.
pub trait TextCodec {
    /// Encodes every text to exactly `max_length` ids (truncated, then padded).
    fn encode_batch(&self, texts: &[String], max_length: usize) -> Result<Vec<Vec<u32>>>;

    /// Decodes ids with special tokens stripped.
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

pub struct SummaryTokenizer {
    inner: Tokenizer,
    pad_id: u32,
    pad_token: String,
}

impl SummaryTokenizer {
    /// Wraps a tokenizer, padding with its unknown token when the vocabulary
    /// has one and with `fallback_pad_id` otherwise.
    pub fn new(inner: Tokenizer, fallback_pad_id: u32) -> Self {
        let (pad_token, pad_id) = match inner.token_to_id(UNK_TOKEN) {
            Some(id) => (UNK_TOKEN.to_string(), id),
            None => (
                inner
                    .id_to_token(fallback_pad_id)
                    .unwrap_or_else(|| "<pad>".to_string()),
                fallback_pad_id,
            ),
        };
        Self {
            inner,
            pad_id,
            pad_token,
        }
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }
}

pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("failed to load tokenizer {}: {e}", path.display()))
}

impl TextCodec for SummaryTokenizer {
    fn encode_batch(&self, texts: &[String], max_length: usize) -> Result<Vec<Vec<u32>>> {
        let mut tok = self.inner.clone();
        tok.with_truncation(Some(TruncationParams {
            max_length,
            ..TruncationParams::default()
        }))
        .map_err(|e| anyhow::anyhow!("invalid truncation settings: {e}"))?;
        tok.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            direction: PaddingDirection::Right,
            pad_id: self.pad_id,
            pad_token: self.pad_token.clone(),
            ..PaddingParams::default()
        }));

        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let encodings = tok
            .encode_batch(inputs, true)
            .map_err(|e| anyhow::anyhow!("tokenizer encode failed: {e}"))?;
        Ok(encodings
            .into_iter()
            .map(|enc| enc.get_ids().to_vec())
            .collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| anyhow::anyhow!("tokenizer decode failed: {e}"))
    }
}

/// Prepends the model's task prefix, if any, to each text.
pub fn apply_task_prefix(prefix: Option<&str>, texts: &[String]) -> Vec<String> {
    match prefix {
        Some(prefix) if !prefix.is_empty() => {
            texts.iter().map(|t| format!("{prefix}{t}")).collect()
        }
        _ => texts.to_vec(),
    }
}
