// file: src/inference.rs
// description: Seq2seq generation seam and the T5 engine (sampling, greedy and beam search).
// author: cipher-rc5

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::t5::T5ForConditionalGeneration;
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::decoding::GenerationConfig;
use crate::sampler::{Sampler, log_softmax_inplace};

/// Black-box `generate`: token ids `(batch, input_len)` in, token ids
/// `(batch * num_return_sequences, seq_len)` out, grouped by input row.
pub trait Seq2SeqGenerator {
    fn generate(&mut self, input_ids: &Tensor, cfg: &GenerationConfig) -> Result<Tensor>;

    fn device(&self) -> &Device;
}

pub struct InferenceEngine {
    model: T5ForConditionalGeneration,
    config: ModelConfig,
    device: Device,
    seed: u64,
    calls: u64,
    input_pad_id: u32,
}

impl InferenceEngine {
    pub fn new(
        weights: &[std::path::PathBuf],
        config: &ModelConfig,
        device: Device,
        seed: u64,
    ) -> Result<Self> {
        info!("Loading {} weights from {} shard(s)", config.model_type, weights.len());
        let mut t5_config = config.t5.clone();
        t5_config.use_cache = true;
        // SAFETY: shards are memory-mapped read-only for the lifetime of the model.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(weights, DType::F32, &device)? };
        let model = T5ForConditionalGeneration::load(vb, &t5_config)?;
        info!("Model loaded successfully");
        Ok(Self {
            model,
            config: config.clone(),
            device,
            seed,
            calls: 0,
            input_pad_id: config.pad_token_id(),
        })
    }

    /// Id the tokenizer pads inputs with; trailing runs of it are cut before
    /// encoding.
    pub fn with_input_pad_id(mut self, pad_id: u32) -> Self {
        self.input_pad_id = pad_id;
        self
    }

    /// The T5 encoder takes no attention mask, so each row is encoded alone at
    /// its unpadded length.
    fn encode_row(&mut self, row: &[u32]) -> Result<Tensor> {
        self.model.clear_kv_cache();
        let input = Tensor::new(row, &self.device)?.unsqueeze(0)?;
        Ok(self.model.encode(&input)?)
    }

    fn sample(&mut self, input_ids: &Tensor, cfg: &GenerationConfig) -> Result<Vec<Vec<u32>>> {
        let rows = unpadded_rows(input_ids, self.input_pad_id)?;
        // Each draw gets a distinct stream so batches do not replay one another.
        let mut sampler = Sampler::new(self.seed.wrapping_add(self.calls), cfg);
        let mut out = Vec::with_capacity(rows.len() * cfg.num_return_sequences);
        for row in &rows {
            let encoder_output = self.encode_row(row)?;
            out.extend(self.sample_row(&encoder_output, cfg, &mut sampler)?);
        }
        Ok(out)
    }

    fn sample_row(
        &mut self,
        encoder_output: &Tensor,
        cfg: &GenerationConfig,
        sampler: &mut Sampler,
    ) -> Result<Vec<Vec<u32>>> {
        let rows = cfg.num_return_sequences;
        let start = self.config.decoder_start_token_id();
        let eos = self.config.eos_token_id();
        let pad = self.config.pad_token_id();
        let encoder_output = repeat_rows(encoder_output, rows)?;

        let mut sequences = vec![vec![start]; rows];
        let mut finished = vec![false; rows];

        for step in 0..cfg.max_new_tokens {
            let decoder_input = if step == 0 {
                prefix_tensor(&sequences, &self.device)?
            } else {
                let last: Vec<u32> = sequences.iter().map(|s| s[s.len() - 1]).collect();
                Tensor::from_vec(last, (rows, 1), &self.device)?
            };
            let mut logits = self
                .model
                .decode(&decoder_input, &encoder_output)?
                .to_dtype(DType::F32)?
                .to_vec2::<f32>()?;

            for (row, row_logits) in logits.iter_mut().enumerate() {
                let next = if finished[row] {
                    pad
                } else {
                    if sequences[row].len() < cfg.min_length {
                        mask_token(row_logits, eos);
                    }
                    sampler.sample(row_logits)?
                };
                sequences[row].push(next);
                if next == eos {
                    finished[row] = true;
                }
            }
            if finished.iter().all(|f| *f) {
                debug!("all {} sequences finished after {} steps", rows, step + 1);
                break;
            }
        }
        Ok(sequences)
    }

    fn beam_search(
        &mut self,
        input_ids: &Tensor,
        cfg: &GenerationConfig,
    ) -> Result<Vec<Vec<u32>>> {
        let rows = unpadded_rows(input_ids, self.input_pad_id)?;
        let mut out = Vec::with_capacity(rows.len() * cfg.num_return_sequences);
        for row in &rows {
            let encoder_output = self.encode_row(row)?;
            out.extend(self.beam_search_row(&encoder_output, cfg)?);
        }
        Ok(out)
    }

    fn beam_search_row(
        &mut self,
        encoder_output: &Tensor,
        cfg: &GenerationConfig,
    ) -> Result<Vec<Vec<u32>>> {
        let num_beams = cfg.num_beams;
        let start = self.config.decoder_start_token_id();
        let eos = self.config.eos_token_id();
        let encoder_output = repeat_rows(encoder_output, num_beams)?;
        let mut search = BeamSearch::new(start, num_beams, cfg);

        for _ in 0..cfg.max_new_tokens {
            if search.done {
                break;
            }
            // candle's T5 cache cannot be reindexed by beam, so the decoder
            // re-reads every prefix from scratch. Cost grows with the square of
            // the output length.
            self.model.clear_kv_cache();
            let prefixes: Vec<Vec<u32>> = search.beams.iter().map(|b| b.tokens.clone()).collect();
            let decoder_input = prefix_tensor(&prefixes, &self.device)?;
            let logits = self
                .model
                .decode(&decoder_input, &encoder_output)?
                .to_dtype(DType::F32)?
                .to_vec2::<f32>()?;
            search.step(&logits, eos)?;
        }
        Ok(search.finish(cfg.num_return_sequences))
    }
}

impl Seq2SeqGenerator for InferenceEngine {
    fn generate(&mut self, input_ids: &Tensor, cfg: &GenerationConfig) -> Result<Tensor> {
        anyhow::ensure!(
            cfg.num_return_sequences >= 1,
            "num_return_sequences must be at least 1"
        );
        anyhow::ensure!(
            cfg.num_return_sequences <= cfg.num_beams || cfg.num_beams <= 1,
            "num_return_sequences ({}) cannot exceed num_beams ({})",
            cfg.num_return_sequences,
            cfg.num_beams
        );
        let sequences = if cfg.num_beams > 1 {
            self.beam_search(input_ids, cfg)?
        } else {
            self.sample(input_ids, cfg)?
        };
        self.calls += 1;
        pad_sequences(&sequences, self.config.pad_token_id(), &self.device)
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<u32>,
    score: f32,
}

/// Beam state for one input row.
struct BeamSearch {
    num_beams: usize,
    length_penalty: f32,
    early_stopping: bool,
    min_length: usize,
    beams: Vec<Beam>,
    hypotheses: Vec<Beam>,
    done: bool,
}

impl BeamSearch {
    fn new(start: u32, num_beams: usize, cfg: &GenerationConfig) -> Self {
        // Only the first beam is live at step 0, otherwise all beams would
        // expand the same prefix.
        let beams = (0..num_beams)
            .map(|i| Beam {
                tokens: vec![start],
                score: if i == 0 { 0.0 } else { -1e9 },
            })
            .collect();
        Self {
            num_beams,
            length_penalty: cfg.length_penalty,
            early_stopping: cfg.early_stopping,
            min_length: cfg.min_length,
            beams,
            hypotheses: Vec::new(),
            done: false,
        }
    }

    fn normalised(&self, score: f32, len: usize) -> f32 {
        score / (len as f32).powf(self.length_penalty)
    }

    fn add_hypothesis(&mut self, beam: Beam) {
        let len = beam.tokens.len();
        let score = self.normalised(beam.score, len);
        self.hypotheses.push(Beam {
            tokens: beam.tokens,
            score,
        });
        self.hypotheses.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.hypotheses.truncate(self.num_beams);
    }

    fn step(&mut self, logits: &[Vec<f32>], eos: u32) -> Result<()> {
        let width = 2 * self.num_beams;
        let mut candidates: Vec<(f32, usize, u32)> = Vec::new();
        for (beam_idx, (beam, row)) in self.beams.iter().zip(logits).enumerate() {
            let mut logp = row.clone();
            log_softmax_inplace(&mut logp);
            if beam.tokens.len() < self.min_length {
                mask_token(&mut logp, eos);
            }
            for (token, lp) in top_k_indices(&logp, width) {
                candidates.push((beam.score + lp, beam_idx, token));
            }
        }
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut next = Vec::with_capacity(self.num_beams);
        for (rank, (score, beam_idx, token)) in candidates.into_iter().enumerate() {
            let mut tokens = self.beams[beam_idx].tokens.clone();
            tokens.push(token);
            if token == eos {
                if rank < self.num_beams {
                    self.add_hypothesis(Beam { tokens, score });
                }
            } else {
                next.push(Beam { tokens, score });
            }
            if next.len() == self.num_beams {
                break;
            }
        }
        anyhow::ensure!(!next.is_empty(), "beam search produced no live beams");
        while next.len() < self.num_beams {
            let filler = next[next.len() - 1].clone();
            next.push(Beam {
                score: -1e9,
                ..filler
            });
        }
        self.beams = next;

        if self.hypotheses.len() >= self.num_beams {
            let best_live = self.beams[0].score;
            let cur_len = self.beams[0].tokens.len();
            let worst = self.hypotheses[self.hypotheses.len() - 1].score;
            self.done = self.early_stopping || worst >= self.normalised(best_live, cur_len);
        }
        Ok(())
    }

    fn finish(mut self, num_return_sequences: usize) -> Vec<Vec<u32>> {
        if !self.done {
            let live = std::mem::take(&mut self.beams);
            for beam in live {
                self.add_hypothesis(beam);
            }
        }
        self.hypotheses
            .into_iter()
            .take(num_return_sequences)
            .map(|b| b.tokens)
            .collect()
    }
}

/// Drops the trailing run of `pad`, keeping at least one id.
pub fn strip_padding(mut row: Vec<u32>, pad: u32) -> Vec<u32> {
    let keep = row.iter().rposition(|&t| t != pad).map_or(1, |i| i + 1);
    row.truncate(keep);
    row
}

fn unpadded_rows(input_ids: &Tensor, pad: u32) -> Result<Vec<Vec<u32>>> {
    Ok(input_ids
        .to_vec2::<u32>()?
        .into_iter()
        .map(|row| strip_padding(row, pad))
        .collect())
}

fn top_k_indices(values: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    let k = k.min(idx.len());
    if k == 0 {
        return Vec::new();
    }
    idx.select_nth_unstable_by(k - 1, |&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    idx.truncate(k);
    idx.into_iter().map(|i| (i as u32, values[i])).collect()
}

fn mask_token(logits: &mut [f32], token: u32) {
    if let Some(l) = logits.get_mut(token as usize) {
        *l = f32::NEG_INFINITY;
    }
}

/// `(b, s, d)` -> `(b * n, s, d)` with each row repeated `n` times in place.
fn repeat_rows(t: &Tensor, n: usize) -> Result<Tensor> {
    if n == 1 {
        return Ok(t.clone());
    }
    let (b, s, d) = t.dims3()?;
    Ok(t.unsqueeze(1)?
        .repeat((1, n, 1, 1))?
        .reshape((b * n, s, d))?)
}

fn prefix_tensor(prefixes: &[Vec<u32>], device: &Device) -> Result<Tensor> {
    let len = prefixes.first().map(Vec::len).unwrap_or(0);
    let flat: Vec<u32> = prefixes.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(flat, (prefixes.len(), len), device)?)
}

/// Right-pads every sequence with `pad` to the longest length.
pub fn pad_sequences(sequences: &[Vec<u32>], pad: u32, device: &Device) -> Result<Tensor> {
    let len = sequences.iter().map(Vec::len).max().unwrap_or(0);
    let mut flat = Vec::with_capacity(sequences.len() * len);
    for seq in sequences {
        flat.extend_from_slice(seq);
        flat.extend(std::iter::repeat_n(pad, len - seq.len()));
    }
    Ok(Tensor::from_vec(flat, (sequences.len(), len), device)?)
}
