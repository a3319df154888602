use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::collection::ComparisonPopulationTreeCollection;
use crate::error::{ModelError, Result};
use crate::mcmc::McmcTarget;
use crate::schedule::OperatorStats;

/// Opens `path` for writing, refusing to clobber an existing file.
pub fn create_new_log(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                ModelError::Io(io::Error::new(
                    e.kind(),
                    format!("{} already exists", path.display()),
                ))
            } else {
                ModelError::Io(e)
            }
        })?;
    Ok(BufWriter::new(file))
}

pub fn state_log_header(collection: &ComparisonPopulationTreeCollection) -> Vec<String> {
    let mut cols: Vec<String> = ["generation", "ln_likelihood", "ln_prior", "number_of_events"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for (name, _) in collection.event_model().parameters() {
        cols.push(name.to_string());
    }
    for tree in collection.trees() {
        let c = tree.label();
        cols.push(format!("root_height_index_{c}"));
        cols.push(format!("ln_likelihood_{c}"));
        cols.push(format!("ln_prior_{c}"));
        cols.push(format!("root_height_{c}"));
        cols.push(format!("mutation_rate_{c}"));
        cols.push(format!("freq_1_{c}"));
        for label in tree.population_labels() {
            cols.push(format!("pop_size_{label}"));
        }
        cols.push(format!("pop_size_root_{c}"));
    }
    cols
}

pub fn state_log_row(
    generation: u64,
    collection: &ComparisonPopulationTreeCollection,
) -> Vec<String> {
    let mut row = vec![
        generation.to_string(),
        collection.log_likelihood().to_string(),
        collection.log_prior_density().to_string(),
        collection.number_of_events().to_string(),
    ];
    for (_, p) in collection.event_model().parameters() {
        row.push(p.value().to_string());
    }
    let standardized = collection.get_standardized_height_indices();
    for (t, tree) in collection.trees().iter().enumerate() {
        row.push(standardized[t].to_string());
        row.push(tree.log_likelihood().to_string());
        row.push(tree.log_prior_density().to_string());
        row.push(tree.root_height().to_string());
        row.push(tree.mutation_rate().value().to_string());
        row.push(tree.freq_1().value().to_string());
        for col in 0..tree.population_labels().len() {
            let size = tree
                .leaf_population_size_index(col)
                .map_or(f64::NAN, |i| tree.population_size(i).value());
            row.push(size.to_string());
        }
        row.push(tree.population_size(tree.root_population_size_index()).value().to_string());
    }
    row
}

/// Delimited sample log, one row per sampled generation.
pub struct StateLog {
    writer: BufWriter<File>,
    path: PathBuf,
    delimiter: String,
}

impl StateLog {
    pub fn create(path: &Path, delimiter: &str) -> Result<Self> {
        Ok(Self {
            writer: create_new_log(path)?,
            path: path.to_path_buf(),
            delimiter: delimiter.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_header(&mut self, collection: &ComparisonPopulationTreeCollection) -> Result<()> {
        writeln!(self.writer, "{}", state_log_header(collection).join(&self.delimiter))?;
        Ok(())
    }

    pub fn write_sample(
        &mut self,
        generation: u64,
        collection: &ComparisonPopulationTreeCollection,
    ) -> Result<()> {
        writeln!(
            self.writer,
            "{}",
            state_log_row(generation, collection).join(&self.delimiter)
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Operator acceptance tables, appended at every sample.
pub struct OperatorLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl OperatorLog {
    pub fn create(path: &Path) -> Result<Self> {
        let mut writer = create_new_log(path)?;
        writeln!(
            writer,
            "generation\toperator\tcategory\tweight\tnumber_accepted\tnumber_rejected\t\
             acceptance_rate\ttuning_parameter"
        )?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_table(&mut self, generation: u64, table: &[OperatorStats]) -> Result<()> {
        for s in table {
            let category = serde_json::to_value(s.category)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let tuning = s
                .tuning_parameter
                .map_or_else(|| "NA".to_string(), |v| v.to_string());
            writeln!(
                self.writer,
                "{generation}\t{}\t{category}\t{}\t{}\t{}\t{}\t{tuning}",
                s.name, s.weight, s.number_accepted, s.number_rejected, s.acceptance_rate
            )?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
