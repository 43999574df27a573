// file: src/summarizer.rs
// description: Batch loop: tokenize, generate, pad/reshape, decode into an ordered candidate queue.
// author: cipher-rc5

use std::collections::VecDeque;

use anyhow::{Context, Result};
use candle_core::Tensor;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::batching::split_candidates;
use crate::benchmark::{Benchmark, RunMetrics};
use crate::decoding::GenerationConfig;
use crate::error::CandidateError;
use crate::inference::Seq2SeqGenerator;
use crate::tokenizer::TextCodec;

pub const DEFAULT_MAX_INPUT_LENGTH: usize = 1024;

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub use_padding: bool,
    pub max_input_length: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 16,
            use_padding: true,
            max_input_length: DEFAULT_MAX_INPUT_LENGTH,
        }
    }
}

/// Candidate lists in production order, one per leading index of each
/// reshaped batch.
pub type CandidateQueue = VecDeque<Vec<String>>;

/// Consecutive `batch_size` chunks of `texts`. Without padding a trailing
/// short chunk is dropped.
pub fn plan_batches(len: usize, settings: &BatchSettings) -> Vec<std::ops::Range<usize>> {
    let b = settings.batch_size.max(1);
    (0..len)
        .step_by(b)
        .map(|start| start..(start + b).min(len))
        .filter(|r| settings.use_padding || r.len() == b)
        .collect()
}

pub fn generate_candidates<G, C>(
    generator: &mut G,
    codec: &C,
    texts: &[String],
    decoding: &GenerationConfig,
    settings: &BatchSettings,
) -> Result<CandidateQueue>
where
    G: Seq2SeqGenerator + ?Sized,
    C: TextCodec + ?Sized,
{
    if settings.batch_size == 0 {
        return Err(CandidateError::InvalidBatchSize.into());
    }
    let batches = plan_batches(texts.len(), settings);
    let dropped = texts.len() - batches.iter().map(|r| r.len()).sum::<usize>();
    if dropped > 0 {
        warn!(
            "Dropping final incomplete batch of {} rows (padding disabled)",
            dropped
        );
    }

    info!("Generating summaries...");
    let progress = ProgressBar::new(batches.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} batches [{elapsed_precise}<{eta_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut summaries = CandidateQueue::new();
    let mut metrics = RunMetrics::default();
    for (batch_idx, range) in batches.into_iter().enumerate() {
        let batch_texts = &texts[range.clone()];
        let input_ids = encode_inputs(generator, codec, batch_texts, settings.max_input_length)?;

        let bench = Benchmark::new(format!("batch {batch_idx}"));
        let outputs = generator
            .generate(&input_ids, decoding)
            .with_context(|| format!("generation failed for rows {range:?}"))?;
        let sequences = outputs.dims().first().copied().unwrap_or(0);
        let result = bench.finish_with_sequences(sequences);
        metrics.record(&result, sequences);

        if batch_texts.len() < settings.batch_size {
            warn!(
                "Batch {} has {} of {} rows; padded slots decode to filler candidates",
                batch_idx,
                batch_texts.len(),
                settings.batch_size
            );
        }

        let grid = split_candidates(&outputs, settings.batch_size, settings.use_padding)?;
        for candidates in grid {
            let decoded = candidates
                .iter()
                .map(|ids| codec.decode(ids))
                .collect::<Result<Vec<_>>>()?;
            summaries.push_back(decoded);
        }
        debug!("queue holds {} candidate lists", summaries.len());
        progress.inc(1);
    }
    progress.finish_and_clear();
    metrics.print();

    Ok(summaries)
}

fn encode_inputs<G, C>(
    generator: &G,
    codec: &C,
    texts: &[String],
    max_length: usize,
) -> Result<Tensor>
where
    G: Seq2SeqGenerator + ?Sized,
    C: TextCodec + ?Sized,
{
    let ids = codec.encode_batch(texts, max_length)?;
    let rows = ids.len();
    let width = ids.first().map(Vec::len).unwrap_or(0);
    anyhow::ensure!(
        ids.iter().all(|r| r.len() == width),
        "tokenizer returned ragged batch; expected every row padded to {max_length}"
    );
    let flat: Vec<u32> = ids.into_iter().flatten().collect();
    Ok(Tensor::from_vec(flat, (rows, width), generator.device())?)
}
