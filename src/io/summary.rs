use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// End-of-run record: what was run and where it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub seed: u64,
    pub chain_length: u64,
    pub sample_frequency: u64,
    pub number_of_samples: u64,
    pub final_ln_likelihood: f64,
    pub final_ln_prior: f64,
    pub final_number_of_events: usize,
    pub state_log: String,
    pub operator_log: String,
    pub operators: Vec<OperatorSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSummary {
    pub name: String,
    pub number_accepted: u64,
    pub number_rejected: u64,
    pub tuning_parameter: Option<f64>,
}

pub fn save_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, summary)
        .with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

pub fn load_summary(path: &Path) -> Result<RunSummary> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let summary =
        serde_json::from_reader(reader).with_context(|| format!("failed to parse {:?}", path))?;
    Ok(summary)
}
