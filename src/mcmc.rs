//! Chain driver and the interface every sampled model implements.

use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use tracing::{debug, info};

use crate::collection::ComparisonPopulationTreeCollection;
use crate::error::{ModelError, Result};
use crate::io::state_log::{OperatorLog, StateLog};
use crate::progress::ChainProgress;
use crate::schedule::OperatorSchedule;

/// A model that operators can perturb and roll back.
///
/// `store_state` snapshots everything a move may change, including cached
/// log likelihood and prior; `restore_state` must bring the target back
/// bit for bit.
pub trait McmcTarget {
    fn store_state(&mut self);
    fn restore_state(&mut self);
    fn compute_log_likelihood_and_prior(&mut self, nthreads: usize) -> Result<()>;
    fn log_likelihood(&self) -> f64;
    fn log_prior_density(&self) -> f64;
}

/// Largest tolerated drift between the cached and a from-scratch log
/// likelihood.
pub const DEBUG_CHECK_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub state_log: PathBuf,
    pub operator_log: PathBuf,
}

impl LogPaths {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            state_log: PathBuf::from(format!("{prefix}state-run-1.log")),
            operator_log: PathBuf::from(format!("{prefix}operator-run-1.log")),
        }
    }

    fn check_free(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(ModelError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainOptions {
    pub nthreads: usize,
    /// Recompute the likelihood from scratch every this many generations;
    /// 0 disables the check.
    pub debug_check_frequency: u64,
    pub show_progress: bool,
    pub delimiter: String,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            nthreads: 1,
            debug_check_frequency: 0,
            show_progress: false,
            delimiter: "\t".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStats {
    pub generations: u64,
    pub number_of_samples: u64,
}

pub struct Chain {
    collection: ComparisonPopulationTreeCollection,
    schedule: OperatorSchedule<ComparisonPopulationTreeCollection>,
    paths: LogPaths,
    options: ChainOptions,
}

impl Chain {
    /// Evaluates the starting state and fails if it has no support.
    pub fn new(
        mut collection: ComparisonPopulationTreeCollection,
        schedule: OperatorSchedule<ComparisonPopulationTreeCollection>,
        paths: LogPaths,
        options: ChainOptions,
    ) -> Result<Self> {
        schedule.validate()?;
        collection.check_invariants()?;
        collection.compute_log_likelihood_and_prior(options.nthreads)?;
        let ll = collection.log_likelihood();
        if ll.is_nan() || ll == f64::NEG_INFINITY {
            return Err(ModelError::numerical(format!("initial log likelihood is {ll}")));
        }
        let lp = collection.log_prior_density();
        if lp.is_nan() || lp == f64::NEG_INFINITY {
            return Err(ModelError::numerical(format!("initial log prior is {lp}")));
        }
        Ok(Self {
            collection,
            schedule,
            paths,
            options,
        })
    }

    pub fn collection(&self) -> &ComparisonPopulationTreeCollection {
        &self.collection
    }

    pub fn schedule(&self) -> &OperatorSchedule<ComparisonPopulationTreeCollection> {
        &self.schedule
    }

    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    /// Recomputes everything from scratch and compares with the cached
    /// values.
    pub fn debug_check(&mut self, generation: u64) -> Result<()> {
        self.collection.check_invariants()?;
        let cached_ll = self.collection.log_likelihood();
        let cached_lp = self.collection.log_prior_density();
        self.collection.make_dirty();
        self.collection
            .compute_log_likelihood_and_prior(self.options.nthreads)?;
        let ll = self.collection.log_likelihood();
        let lp = self.collection.log_prior_density();
        let drift = |a: f64, b: f64| if a == b { 0.0 } else { (a - b).abs() };
        if !(drift(ll, cached_ll) <= DEBUG_CHECK_TOLERANCE) {
            return Err(ModelError::invariant(format!(
                "generation {generation}: cached log likelihood {cached_ll} but recomputed {ll}"
            )));
        }
        if !(drift(lp, cached_lp) <= DEBUG_CHECK_TOLERANCE) {
            return Err(ModelError::invariant(format!(
                "generation {generation}: cached log prior {cached_lp} but recomputed {lp}"
            )));
        }
        Ok(())
    }

    /// Runs `chain_length` generations, logging every `sample_frequency`.
    pub fn run(
        &mut self,
        rng: &mut SmallRng,
        chain_length: u64,
        sample_frequency: u64,
    ) -> Result<RunStats> {
        if sample_frequency == 0 {
            return Err(ModelError::config("sample_frequency must be > 0"));
        }
        LogPaths::check_free(&self.paths.state_log)?;
        LogPaths::check_free(&self.paths.operator_log)?;
        let mut state_log = StateLog::create(&self.paths.state_log, &self.options.delimiter)?;
        let mut operator_log = OperatorLog::create(&self.paths.operator_log)?;

        state_log.write_header(&self.collection)?;
        state_log.write_sample(0, &self.collection)?;
        let mut samples = 1u64;
        info!(
            chain_length,
            sample_frequency,
            state_log = %self.paths.state_log.display(),
            "starting chain"
        );

        let progress = ChainProgress::new(chain_length, self.options.show_progress);
        for generation in 1..=chain_length {
            self.schedule
                .operate(rng, &mut self.collection, self.options.nthreads)?;

            let freq = self.options.debug_check_frequency;
            if freq > 0 && generation % freq == 0 {
                self.debug_check(generation)?;
            }
            if generation % sample_frequency == 0 {
                state_log.write_sample(generation, &self.collection)?;
                operator_log.write_table(generation, &self.schedule.acceptance_table())?;
                samples += 1;
                progress.update(
                    generation,
                    self.collection.log_likelihood(),
                    self.collection.number_of_events(),
                );
                debug!(
                    generation,
                    ln_likelihood = self.collection.log_likelihood(),
                    events = self.collection.number_of_events(),
                    "sample"
                );
            }
        }
        state_log.flush()?;
        operator_log.flush()?;
        progress.finish("sampling done");
        info!(samples, "chain finished");
        Ok(RunStats {
            generations: chain_length,
            number_of_samples: samples,
        })
    }
}
