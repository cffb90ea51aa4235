//! Export graded `question,answer,score` rows as fine-tuning JSONL.

use crate::prompts;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Default export target, recreated on every run
pub const DEFAULT_TRAINING_FILE: &str = "training_data.jsonl";

/// One prompt/completion pair in the fine-tuning format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub prompt: String,
    pub completion: String,
}

impl TrainingExample {
    pub fn new(question: &str, answer: &str, score: &str) -> Self {
        let question = prompts::clean_question(question);
        let answer = prompts::collapse_newlines(answer);

        Self {
            prompt: prompts::training_prompt(&question, &answer),
            completion: format!(" {score}"),
        }
    }
}

fn is_header(record: &csv::StringRecord) -> bool {
    let cells: Vec<String> = record.iter().map(|c| c.trim().to_ascii_lowercase()).collect();
    cells == ["question", "answer", "score"]
}

/// Read positional `question,answer,score` triples; a literal header row is skipped
pub fn read_examples<R: Read>(source: R) -> Result<Vec<TrainingExample>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(source);

    let mut examples = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read CSV record {}", index + 1))?;
        if index == 0 && is_header(&record) {
            debug!("skipping header row");
            continue;
        }

        let cell = |idx: usize| record.get(idx).unwrap_or_default();
        examples.push(TrainingExample::new(cell(0), cell(1), cell(2)));
    }

    Ok(examples)
}

/// Write one JSON object per line, replacing any previous file contents
pub fn write_jsonl(examples: &[TrainingExample], path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create JSONL file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for example in examples {
        serde_json::to_writer(&mut writer, example).context("Failed to serialize example")?;
        writer.write_all(b"\n")?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to write JSONL file: {}", path.display()))
}

/// Convert `input` to JSONL at `output` and return the number of examples
pub fn convert(input: &Path, output: &Path) -> Result<usize> {
    let file = File::open(input)
        .with_context(|| format!("Failed to open input file: {}", input.display()))?;
    let examples = read_examples(file)?;
    write_jsonl(&examples, output)?;

    info!(examples = examples.len(), "wrote {}", output.display());
    Ok(examples.len())
}
