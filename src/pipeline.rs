// file: src/pipeline.rs
// description: End-to-end candidate run from a loaded dataset to the written CSV.
// author: cipher-rc5

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::dataset::Dataset;
use crate::decoding::DecodingPreset;
use crate::inference::Seq2SeqGenerator;
use crate::output::{CandidateTable, attach_candidates, explode, output_path, write_csv};
use crate::summarizer::{BatchSettings, generate_candidates};
use crate::tokenizer::{TextCodec, apply_task_prefix};

pub struct CandidateRun<'a> {
    pub model_name: &'a str,
    pub dataset_name: &'a str,
    pub preset: DecodingPreset,
    pub settings: BatchSettings,
    pub task_prefix: Option<&'a str>,
}

impl CandidateRun<'_> {
    /// Generates, attaches and explodes candidates for every row.
    pub fn summarize<G, C>(
        &self,
        generator: &mut G,
        codec: &C,
        dataset: Dataset,
    ) -> Result<CandidateTable>
    where
        G: Seq2SeqGenerator + ?Sized,
        C: TextCodec + ?Sized,
    {
        let decoding = self.preset.merged();
        tracing::debug!("decoding config {}: {:?}", self.preset, decoding);
        let texts = apply_task_prefix(self.task_prefix, &dataset.texts());
        let summaries =
            generate_candidates(generator, codec, &texts, &decoding, &self.settings)?;
        Ok(explode(attach_candidates(dataset, summaries)))
    }

    /// Runs [`Self::summarize`] and writes the table under `output_dir`.
    pub fn run_to_dir<G, C>(
        &self,
        generator: &mut G,
        codec: &C,
        dataset: Dataset,
        output_dir: &Path,
        timestamp: &str,
    ) -> Result<PathBuf>
    where
        G: Seq2SeqGenerator + ?Sized,
        C: TextCodec + ?Sized,
    {
        let table = self.summarize(generator, codec, dataset)?;
        let path = output_path(
            output_dir,
            self.model_name,
            self.dataset_name,
            self.preset.as_str(),
            timestamp,
        );
        write_csv(&path, &table)?;
        Ok(path)
    }
}
