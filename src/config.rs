// file: src/config.rs
// description: Reads config.json for a seq2seq checkpoint and validates the architecture.
// author: cipher-rc5

use anyhow::{Context, Result};
use candle_transformers::models::t5;
use serde::Deserialize;
use std::path::Path;

use crate::error::CandidateError;

const SUPPORTED_MODEL_TYPES: [&str; 2] = ["t5", "mt5"];

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigMetadata {
    #[serde(default)]
    model_type: Option<String>,
    #[serde(default)]
    architectures: Vec<String>,
    #[serde(default)]
    task_specific_params: Option<TaskSpecificParams>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TaskSpecificParams {
    #[serde(default)]
    summarization: Option<SummarizationParams>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SummarizationParams {
    #[serde(default)]
    prefix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_type: String,
    pub architectures: Vec<String>,
    /// Text prepended to every input, e.g. `"summarize: "` for T5.
    pub summarization_prefix: Option<String>,
    pub t5: t5::Config,
}

impl ModelConfig {
    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to open config.json at {:?}", config_path))?;
        Self::from_json(&raw)
            .with_context(|| format!("Failed to parse config.json at {:?}", config_path))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let meta: ConfigMetadata = serde_json::from_str(raw)?;
        let model_type = meta.model_type.unwrap_or_default();
        if !SUPPORTED_MODEL_TYPES.contains(&model_type.as_str()) {
            let shown = if model_type.is_empty() {
                meta.architectures.join(",")
            } else {
                model_type
            };
            return Err(CandidateError::UnsupportedArchitecture(shown).into());
        }

        let t5: t5::Config = serde_json::from_str(raw)?;
        let summarization_prefix = meta
            .task_specific_params
            .and_then(|p| p.summarization)
            .and_then(|s| s.prefix);

        Ok(Self {
            model_type,
            architectures: meta.architectures,
            summarization_prefix,
            t5,
        })
    }

    pub fn pad_token_id(&self) -> u32 {
        self.t5.pad_token_id as u32
    }

    pub fn eos_token_id(&self) -> u32 {
        self.t5.eos_token_id as u32
    }

    pub fn decoder_start_token_id(&self) -> u32 {
        self.t5
            .decoder_start_token_id
            .unwrap_or(self.t5.pad_token_id) as u32
    }
}
