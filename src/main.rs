// file: src/main.rs
// description: CLI entrypoint: load model and dataset, generate summary candidates, write the exploded CSV.
// author: cipher-rc5

use anyhow::Result;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use summary_candidates::loader::checkpoint_tensor_shapes;
use summary_candidates::output::timestamp_now;
use summary_candidates::summarizer::DEFAULT_MAX_INPUT_LENGTH;
use summary_candidates::{
    BatchSettings, CandidateError, CandidateRun, Dataset, DecodingPreset, InferenceEngine,
    ModelConfig, ModelFiles, SummaryTokenizer, load_tokenizer, parse_device,
};
use tracing::{Level, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate candidate summaries with a seq2seq model")]
struct Args {
    #[arg(long = "model_name", default_value = "google/flan-t5-base")]
    model_name: String,

    #[arg(long = "dataset_name", default_value = "2017")]
    dataset_name: String,

    #[arg(long = "dataset_path", default_value = "data/processed")]
    dataset_path: PathBuf,

    #[arg(long = "decoding_config", value_enum, default_value_t = DecodingPreset::TopPSampling)]
    decoding_config: DecodingPreset,

    #[arg(long = "batch_size", default_value_t = 16)]
    batch_size: usize,

    #[arg(long = "use_padding", action = ArgAction::Set, default_value_t = true)]
    use_padding: bool,

    #[arg(long, default_value = "cuda")]
    device: String,

    #[arg(long, action = ArgAction::Set, default_value_t = false)]
    debug: bool,

    #[arg(long = "output_dir", default_value = "data/candidates")]
    output_dir: PathBuf,

    /// Only generate for the first N rows.
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value_t = 299792458)]
    seed: u64,

    #[arg(long = "max_input_length", default_value_t = DEFAULT_MAX_INPUT_LENGTH)]
    max_input_length: usize,

    #[arg(long, default_value = "main")]
    revision: String,

    #[arg(long = "list_tensors", help = "List checkpoint tensors and exit")]
    list_tensors: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.debug {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_target(false)
        .init();

    if args.batch_size == 0 {
        return Err(CandidateError::InvalidBatchSize.into());
    }

    let files = ModelFiles::resolve(&args.model_name, &args.revision)?;

    if args.list_tensors {
        for (name, shape) in checkpoint_tensor_shapes(&files.weights)? {
            println!("{}\t{:?}", name, shape);
        }
        return Ok(());
    }

    let config = ModelConfig::load_from_path(&files.config)?;

    info!("Loading dataset...");
    let mut dataset = Dataset::load(&args.dataset_name, &args.dataset_path)?;
    if let Some(limit) = args.limit {
        dataset.limit(limit);
    }

    let device = parse_device(&args.device)?;
    let tokenizer = SummaryTokenizer::new(load_tokenizer(&files.tokenizer)?, config.pad_token_id());
    let mut engine = InferenceEngine::new(&files.weights, &config, device, args.seed)?
        .with_input_pad_id(tokenizer.pad_id());

    let run = CandidateRun {
        model_name: &args.model_name,
        dataset_name: &args.dataset_name,
        preset: args.decoding_config,
        settings: BatchSettings {
            batch_size: args.batch_size,
            use_padding: args.use_padding,
            max_input_length: args.max_input_length,
        },
        task_prefix: config.summarization_prefix.as_deref(),
    };

    let path = run.run_to_dir(
        &mut engine,
        &tokenizer,
        dataset,
        &args.output_dir,
        &timestamp_now(),
    )?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_flags_parse() {
        let args = Args::try_parse_from([
            "summary-candidates",
            "--model_name",
            "t5-small",
            "--decoding_config",
            "sampling_topp_08",
            "--use_padding",
            "false",
            "--debug",
            "true",
            "--limit",
            "5",
        ])
        .unwrap();
        assert_eq!(args.model_name, "t5-small");
        assert_eq!(args.decoding_config, DecodingPreset::SamplingTopP08);
        assert!(!args.use_padding);
        assert!(args.debug);
        assert_eq!(args.limit, Some(5));
        assert_eq!(args.batch_size, 16);
    }

    #[test]
    fn unknown_decoding_config_is_rejected() {
        let err = Args::try_parse_from(["summary-candidates", "--decoding_config", "nucleus"]);
        assert!(err.is_err());
    }
}
