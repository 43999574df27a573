// file: src/decoding.rs
// description: Named decoding presets merged with shared generation defaults.
// author: cipher-rc5

use serde::Serialize;

/// Generation parameters handed to a [`crate::Seq2SeqGenerator`].
///
/// This is the result of merging one [`DecodingPreset`] over the shared
/// defaults, so every field is always populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub min_length: usize,
    pub do_sample: bool,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub top_k: Option<usize>,
    pub num_beams: usize,
    pub num_return_sequences: usize,
    pub length_penalty: f32,
    pub early_stopping: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 200,
            min_length: 0,
            do_sample: false,
            temperature: 1.0,
            top_p: None,
            top_k: None,
            num_beams: 1,
            num_return_sequences: 1,
            length_penalty: 1.0,
            early_stopping: true,
        }
    }
}

/// Keys a preset may set. Anything left `None` falls through to the shared
/// defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresetParams {
    pub max_new_tokens: Option<usize>,
    pub min_length: Option<usize>,
    pub do_sample: Option<bool>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<usize>,
    pub num_beams: Option<usize>,
    pub num_return_sequences: Option<usize>,
    pub length_penalty: Option<f32>,
    pub early_stopping: Option<bool>,
}

impl PresetParams {
    pub fn merge_over(&self, base: &GenerationConfig) -> GenerationConfig {
        GenerationConfig {
            max_new_tokens: self.max_new_tokens.unwrap_or(base.max_new_tokens),
            min_length: self.min_length.unwrap_or(base.min_length),
            do_sample: self.do_sample.unwrap_or(base.do_sample),
            temperature: self.temperature.unwrap_or(base.temperature),
            top_p: self.top_p.or(base.top_p),
            top_k: self.top_k.or(base.top_k),
            num_beams: self.num_beams.unwrap_or(base.num_beams),
            num_return_sequences: self
                .num_return_sequences
                .unwrap_or(base.num_return_sequences),
            length_penalty: self.length_penalty.unwrap_or(base.length_penalty),
            early_stopping: self.early_stopping.unwrap_or(base.early_stopping),
        }
    }
}

/// Shared defaults applied under every preset.
pub fn shared_defaults() -> GenerationConfig {
    GenerationConfig {
        min_length: 0,
        early_stopping: true,
        ..GenerationConfig::default()
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingPreset {
    #[value(name = "top_p_sampling")]
    TopPSampling,
    #[value(name = "sampling_topp_05")]
    SamplingTopP05,
    #[value(name = "sampling_topp_08")]
    SamplingTopP08,
    #[value(name = "sampling_topp_095")]
    SamplingTopP095,
    #[value(name = "sampling_topp_099")]
    SamplingTopP099,
    #[value(name = "beam_search")]
    BeamSearch,
    #[value(name = "greedy")]
    Greedy,
}

impl DecodingPreset {
    pub const ALL: [DecodingPreset; 7] = [
        Self::TopPSampling,
        Self::SamplingTopP05,
        Self::SamplingTopP08,
        Self::SamplingTopP095,
        Self::SamplingTopP099,
        Self::BeamSearch,
        Self::Greedy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopPSampling => "top_p_sampling",
            Self::SamplingTopP05 => "sampling_topp_05",
            Self::SamplingTopP08 => "sampling_topp_08",
            Self::SamplingTopP095 => "sampling_topp_095",
            Self::SamplingTopP099 => "sampling_topp_099",
            Self::BeamSearch => "beam_search",
            Self::Greedy => "greedy",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }

    pub fn params(self) -> PresetParams {
        match self {
            Self::TopPSampling => PresetParams {
                max_new_tokens: Some(200),
                do_sample: Some(true),
                top_p: Some(0.95),
                temperature: Some(1.0),
                num_return_sequences: Some(8),
                num_beams: Some(1),
                ..PresetParams::default()
            },
            // The suffix names the preset only; every variant samples at 0.95.
            Self::SamplingTopP05
            | Self::SamplingTopP08
            | Self::SamplingTopP095
            | Self::SamplingTopP099 => nucleus(),
            Self::BeamSearch => PresetParams {
                max_new_tokens: Some(200),
                do_sample: Some(false),
                num_beams: Some(8),
                num_return_sequences: Some(8),
                ..PresetParams::default()
            },
            Self::Greedy => PresetParams {
                max_new_tokens: Some(200),
                do_sample: Some(false),
                num_beams: Some(1),
                num_return_sequences: Some(1),
                ..PresetParams::default()
            },
        }
    }

    /// Preset keys layered over [`shared_defaults`].
    pub fn merged(self) -> GenerationConfig {
        self.params().merge_over(&shared_defaults())
    }
}

impl std::fmt::Display for DecodingPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn nucleus() -> PresetParams {
    PresetParams {
        max_new_tokens: Some(200),
        do_sample: Some(true),
        num_return_sequences: Some(8),
        top_p: Some(0.95),
        ..PresetParams::default()
    }
}
