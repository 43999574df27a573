use std::env;
use std::path::PathBuf;

use anyhow::Result;
use candle_core::{Device, Tensor};
use rstest::rstest;
use summary_candidates::summarizer::generate_candidates;
use summary_candidates::{
    BatchSettings, CandidateRun, Dataset, DecodingPreset, GenerationConfig, InferenceEngine,
    ModelConfig, ModelFiles, Seq2SeqGenerator, SummaryTokenizer, TextCodec, load_tokenizer,
};

const ROW_BASE: u32 = 100;
const CANDIDATE_BASE: u32 = 200;
const PAD: u32 = 0;
const EOS: u32 = 1;

/// Emits `[PAD, row, candidate, EOS]` for every requested candidate.
struct ScriptedGenerator {
    device: Device,
    calls: usize,
}

impl ScriptedGenerator {
    fn new() -> Self {
        Self {
            device: Device::Cpu,
            calls: 0,
        }
    }
}

impl Seq2SeqGenerator for ScriptedGenerator {
    fn generate(&mut self, input_ids: &Tensor, cfg: &GenerationConfig) -> Result<Tensor> {
        self.calls += 1;
        let inputs = input_ids.to_vec2::<u32>()?;
        let mut flat = Vec::new();
        for row in &inputs {
            for c in 0..cfg.num_return_sequences as u32 {
                flat.extend_from_slice(&[PAD, row[0], CANDIDATE_BASE + c, EOS]);
            }
        }
        let rows = inputs.len() * cfg.num_return_sequences;
        Ok(Tensor::from_vec(flat, (rows, 4), &self.device)?)
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// Encodes the row number written in each text; decodes to `r{row} c{cand}`.
struct RowCodec;

impl TextCodec for RowCodec {
    fn encode_batch(&self, texts: &[String], max_length: usize) -> Result<Vec<Vec<u32>>> {
        texts
            .iter()
            .map(|t| -> Result<Vec<u32>> {
                let row: u32 = t.trim_start_matches("summarize: ").parse()?;
                let mut ids = vec![ROW_BASE + row];
                ids.resize(max_length, PAD);
                Ok(ids)
            })
            .collect()
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let words: Vec<String> = ids
            .iter()
            .filter(|id| **id != PAD && **id != EOS)
            .map(|id| {
                if *id >= CANDIDATE_BASE {
                    format!("c{}", id - CANDIDATE_BASE)
                } else {
                    format!("r{}", id - ROW_BASE)
                }
            })
            .collect();
        Ok(words.join(" "))
    }
}

fn dataset(rows: usize) -> Dataset {
    let rows = (0..rows)
        .map(|i| vec![format!("meta{i}"), i.to_string()])
        .collect();
    Dataset::from_parts(vec!["source".into(), "text".into()], rows).unwrap()
}

fn run(preset: DecodingPreset, batch_size: usize, use_padding: bool) -> CandidateRun<'static> {
    CandidateRun {
        model_name: "scripted/model",
        dataset_name: "unit",
        preset,
        settings: BatchSettings {
            batch_size,
            use_padding,
            max_input_length: 4,
        },
        task_prefix: None,
    }
}

#[test]
fn explode_yields_sum_of_candidates_with_contiguous_ids() -> Result<()> {
    let table = run(DecodingPreset::TopPSampling, 2, true).summarize(
        &mut ScriptedGenerator::new(),
        &RowCodec,
        dataset(4),
    )?;
    assert_eq!(table.records.len(), 4 * 8);
    for (i, record) in table.records.iter().enumerate() {
        let (row, cand) = (i / 8, i % 8);
        assert_eq!(record[0], row.to_string());
        assert_eq!(record[1], format!("meta{row}"));
        assert_eq!(record[3], format!("r{row} c{cand}"));
        assert_eq!(record[4], cand.to_string());
    }
    Ok(())
}

#[test]
fn padded_final_batch_yields_filler_candidates() -> Result<()> {
    // 3 rows, one candidate each, batch of 4: the fourth slot is all zeros.
    let texts: Vec<String> = (0..3).map(|i| i.to_string()).collect();
    let settings = BatchSettings {
        batch_size: 4,
        use_padding: true,
        max_input_length: 4,
    };
    let queue = generate_candidates(
        &mut ScriptedGenerator::new(),
        &RowCodec,
        &texts,
        &DecodingPreset::Greedy.merged(),
        &settings,
    )?;
    assert_eq!(queue.len(), 4);
    assert_eq!(queue[2], ["r2 c0"]);
    assert_eq!(queue[3], [""]);

    let table = run(DecodingPreset::Greedy, 4, true).summarize(
        &mut ScriptedGenerator::new(),
        &RowCodec,
        dataset(3),
    )?;
    assert_eq!(table.records.len(), 3);
    Ok(())
}

#[test]
fn padded_final_batch_regroups_candidates_by_position() -> Result<()> {
    // One row with 8 candidates in a batch of 2 reshapes to (2, 4, len): the
    // row keeps only the first four candidates.
    let table = run(DecodingPreset::TopPSampling, 2, true).summarize(
        &mut ScriptedGenerator::new(),
        &RowCodec,
        dataset(3),
    )?;
    assert_eq!(table.records.len(), 8 + 8 + 4);
    let last: Vec<&str> = table.records[16..].iter().map(|r| r[3].as_str()).collect();
    assert_eq!(last, ["r2 c0", "r2 c1", "r2 c2", "r2 c3"]);
    Ok(())
}

#[rstest]
#[case(3, 2, 2)]
#[case(5, 2, 4)]
#[case(3, 4, 0)]
#[case(8, 4, 8)]
fn unpadded_runs_drop_incomplete_batches(
    #[case] rows: usize,
    #[case] batch_size: usize,
    #[case] expected_rows: usize,
) -> Result<()> {
    let mut generator = ScriptedGenerator::new();
    let table = run(DecodingPreset::Greedy, batch_size, false).summarize(
        &mut generator,
        &RowCodec,
        dataset(rows),
    )?;
    assert_eq!(table.records.len(), expected_rows);
    assert_eq!(generator.calls, rows / batch_size);
    for (i, record) in table.records.iter().enumerate() {
        assert_eq!(record[3], format!("r{i} c0"));
    }
    Ok(())
}

#[test]
fn zero_batch_size_is_rejected() {
    let err = run(DecodingPreset::Greedy, 0, true)
        .summarize(&mut ScriptedGenerator::new(), &RowCodec, dataset(2))
        .unwrap_err();
    assert_eq!(err.to_string(), "batch size must be at least 1");
}

#[test]
fn task_prefix_reaches_codec() -> Result<()> {
    let mut job = run(DecodingPreset::Greedy, 1, true);
    job.task_prefix = Some("summarize: ");
    let table = job.summarize(&mut ScriptedGenerator::new(), &RowCodec, dataset(2))?;
    assert_eq!(table.records[1][3], "r1 c0");
    // the written text column is the original, unprefixed text
    assert_eq!(table.records[1][2], "1");
    Ok(())
}

#[test]
fn run_writes_named_csv() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out_dir = dir.path().join("candidates");
    let path = run(DecodingPreset::Greedy, 2, true).run_to_dir(
        &mut ScriptedGenerator::new(),
        &RowCodec,
        dataset(2),
        &out_dir,
        "2024-05-06-07-08-09",
    )?;
    assert_eq!(
        path,
        out_dir.join("scripted_model-_-unit-_-greedy-_-2024-05-06-07-08-09.csv")
    );

    let mut reader = csv::Reader::from_path(&path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    assert_eq!(headers, ["index", "source", "text", "summary", "id_candidate"]);
    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[1][3], "r1 c0");
    Ok(())
}

#[test]
fn dataset_year_names_resolve_through_loader() -> Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("all_reviews_2019.csv"), "text\n0\n1\n")?;
    std::fs::write(dir.path().join("custom.csv"), "text\n0\n")?;
    assert_eq!(Dataset::load("2019", dir.path())?.len(), 2);
    assert_eq!(Dataset::load("custom", dir.path())?.len(), 1);
    assert!(Dataset::load("2018", dir.path()).is_err());
    Ok(())
}

fn model_path_from_env() -> Option<PathBuf> {
    env::var("SUMMARY_CANDIDATES_MODEL_PATH")
        .ok()
        .map(PathBuf::from)
}

#[test]
fn greedy_generation_determinism() -> Result<()> {
    let Some(path) = model_path_from_env() else {
        println!("skipping: SUMMARY_CANDIDATES_MODEL_PATH not set");
        return Ok(());
    };

    let files = ModelFiles::from_dir(&path)?;
    let config = ModelConfig::load_from_path(&files.config)?;
    let tok = SummaryTokenizer::new(load_tokenizer(&files.tokenizer)?, config.pad_token_id());
    let mut engine = InferenceEngine::new(&files.weights, &config, Device::Cpu, 7)?
        .with_input_pad_id(tok.pad_id());
    let cfg = GenerationConfig {
        max_new_tokens: 16,
        ..DecodingPreset::Greedy.merged()
    };

    let texts = vec!["summarize: The sky is blue because of Rayleigh scattering.".to_string()];
    let ids: Vec<u32> = tok.encode_batch(&texts, 64)?.concat();
    let input = Tensor::from_vec(ids, (1, 64), &Device::Cpu)?;
    let a = engine.generate(&input, &cfg)?.to_vec2::<u32>()?;
    let b = engine.generate(&input, &cfg)?.to_vec2::<u32>()?;
    assert_eq!(a, b);
    assert_eq!(a.len(), 1);

    // Input padding must not reach the encoder: a long pad tail and a short
    // one decode to the same summary.
    let short: Vec<u32> = tok.encode_batch(&texts, 24)?.concat();
    let short = Tensor::from_vec(short, (1, 24), &Device::Cpu)?;
    let c = engine.generate(&short, &cfg)?.to_vec2::<u32>()?;
    assert_eq!(a, c);
    Ok(())
}
