// file: src/loader.rs
// description: Resolves a model name to local files (directory or Hugging Face Hub) and selects the device.
// author: cipher-rc5

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::Device;
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use memmap2::Mmap;
use safetensors::SafeTensors;
use serde::Deserialize;
use tracing::info;

use crate::error::CandidateError;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SINGLE_SHARD: &str = "model.safetensors";
const SHARD_INDEX: &str = "model.safetensors.index.json";

#[derive(Deserialize)]
struct SafetensorsIndexFile {
    weight_map: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

impl ModelFiles {
    /// Uses `name` as a local checkpoint directory when it exists, otherwise
    /// fetches it from the Hub at `revision`.
    pub fn resolve(name: &str, revision: &str) -> Result<Self> {
        let local = Path::new(name);
        if local.is_dir() {
            info!("Using local model directory {}", local.display());
            return Self::from_dir(local);
        }
        Self::from_hub(name, revision)
    }

    pub fn from_dir(model_dir: &Path) -> Result<Self> {
        let weights = shard_names(&model_dir.join(SHARD_INDEX))?
            .map(|names| names.into_iter().map(|n| model_dir.join(n)).collect())
            .unwrap_or_else(|| vec![model_dir.join(SINGLE_SHARD)]);
        let files = Self {
            config: model_dir.join(CONFIG_FILE),
            tokenizer: model_dir.join(TOKENIZER_FILE),
            weights,
        };
        for path in files.all() {
            anyhow::ensure!(path.exists(), "missing model file {}", path.display());
        }
        Ok(files)
    }

    fn from_hub(model_id: &str, revision: &str) -> Result<Self> {
        info!("Fetching {model_id}@{revision} from the Hugging Face Hub");
        let api = Api::new().context("failed to initialise Hugging Face Hub client")?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));
        let get = |file: &str| {
            repo.get(file)
                .with_context(|| format!("failed to fetch {file} for {model_id}"))
        };

        let config = get(CONFIG_FILE)?;
        let tokenizer = get(TOKENIZER_FILE)?;
        let weights = match repo.get(SHARD_INDEX) {
            Ok(index) => {
                let names = shard_names(&index)?.unwrap_or_default();
                names
                    .iter()
                    .map(|n| get(n.as_str()))
                    .collect::<Result<Vec<_>>>()?
            }
            Err(_) => vec![get(SINGLE_SHARD)?],
        };
        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    fn all(&self) -> impl Iterator<Item = &PathBuf> {
        [&self.config, &self.tokenizer]
            .into_iter()
            .chain(self.weights.iter())
    }
}

/// Distinct shard files named by an index file, or `None` when the index is
/// absent.
fn shard_names(index_path: &Path) -> Result<Option<Vec<String>>> {
    if !index_path.exists() {
        return Ok(None);
    }
    let file = File::open(index_path)
        .with_context(|| format!("failed to open index file {}", index_path.display()))?;
    let index: SafetensorsIndexFile = serde_json::from_reader(file)
        .with_context(|| format!("failed to parse index file {}", index_path.display()))?;
    let unique: BTreeSet<String> = index.weight_map.into_values().collect();
    Ok(Some(unique.into_iter().collect()))
}

fn open_shard(path: &Path) -> Result<Mmap> {
    let file =
        File::open(path).with_context(|| format!("failed to open shard {}", path.display()))?;
    // SAFETY: checkpoint shards are read-only inputs and the map is dropped
    // before this process could write to them.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("failed to mmap shard {}", path.display()))?;
    Ok(mmap)
}

/// Tensor names and shapes across all shards, sorted by name.
pub fn checkpoint_tensor_shapes(weights: &[PathBuf]) -> Result<BTreeMap<String, Vec<usize>>> {
    let mut out = BTreeMap::new();
    for path in weights {
        let shard = open_shard(path)?;
        let tensors = SafeTensors::deserialize(&shard)
            .with_context(|| format!("failed to parse safetensors shard {}", path.display()))?;
        for (name, view) in tensors.tensors() {
            out.insert(name, view.shape().to_vec());
        }
    }
    Ok(out)
}

/// Parses `cpu`, `cuda`, `cuda:N`, `metal` or `metal:N`.
pub fn parse_device(spec: &str) -> Result<Device> {
    let spec = spec.trim().to_lowercase();
    let (kind, ordinal) = match spec.split_once(':') {
        Some((kind, idx)) => {
            let idx = idx
                .parse::<usize>()
                .map_err(|_| CandidateError::InvalidDevice(spec.clone()))?;
            (kind.to_string(), idx)
        }
        None => (spec.clone(), 0),
    };
    let device = match kind.as_str() {
        "cpu" => Device::Cpu,
        "cuda" => Device::new_cuda(ordinal)
            .with_context(|| format!("failed to open CUDA device {ordinal}"))?,
        "metal" | "mps" => Device::new_metal(ordinal)
            .with_context(|| format!("failed to open Metal device {ordinal}"))?,
        _ => return Err(CandidateError::InvalidDevice(spec).into()),
    };
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn local_dir_with_index_lists_unique_shards() {
        let dir = tempfile::tempdir().unwrap();
        for f in [
            CONFIG_FILE,
            TOKENIZER_FILE,
            "model-00001-of-00002.safetensors",
            "model-00002-of-00002.safetensors",
        ] {
            fs::write(dir.path().join(f), b"{}").unwrap();
        }
        fs::write(
            dir.path().join(SHARD_INDEX),
            r#"{"weight_map": {
                "a": "model-00001-of-00002.safetensors",
                "b": "model-00002-of-00002.safetensors",
                "c": "model-00001-of-00002.safetensors"
            }}"#,
        )
        .unwrap();

        let files = ModelFiles::from_dir(dir.path()).unwrap();
        assert_eq!(files.weights.len(), 2);
        assert!(files.weights[0].ends_with("model-00001-of-00002.safetensors"));
    }

    #[test]
    fn local_dir_missing_weights_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), b"{}").unwrap();
        fs::write(dir.path().join(TOKENIZER_FILE), b"{}").unwrap();
        let err = ModelFiles::from_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains(SINGLE_SHARD));
    }

    #[test]
    fn cpu_device_parses() {
        assert!(parse_device("cpu").unwrap().is_cpu());
        assert!(parse_device(" CPU ").unwrap().is_cpu());
    }

    #[test]
    fn unknown_device_is_rejected() {
        let err = parse_device("tpu").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CandidateError>(),
            Some(CandidateError::InvalidDevice(_))
        ));
        assert!(parse_device("cuda:x").is_err());
    }
}
