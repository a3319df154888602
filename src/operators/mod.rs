//! Metropolis-Hastings operators.
//!
//! An operator perturbs part of an [`McmcTarget`] and reports the log
//! Hastings ratio of its proposal; [`metropolis_hastings_step`] does the
//! rest (store, evaluate, accept or restore, tune).

pub mod collection_ops;
pub mod general;
pub mod kernels;
pub mod tree_ops;

use rand::rngs::SmallRng;
use serde::Serialize;

use crate::error::Result;
use crate::mcmc::McmcTarget;
use crate::random::uniform;
pub use kernels::{Kernel, ScaleKernel, TARGET_ACCEPTANCE, WindowKernel};

/// Role of an operator in the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorCategory {
    Parameter,
    /// Changes event times.
    TimeOperator,
    /// Changes the number of events or the topology.
    RjOperator,
    Gibbs,
}

/// Weight, counters and tuning state shared by every operator.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorBase {
    pub weight: f64,
    pub kernel: Kernel,
    pub auto_optimize: bool,
    accepted: u64,
    rejected: u64,
    tuning_count: u64,
}

impl OperatorBase {
    pub fn new(weight: f64, kernel: Kernel) -> Self {
        Self {
            weight,
            kernel,
            auto_optimize: !matches!(kernel, Kernel::None),
            accepted: 0,
            rejected: 0,
            tuning_count: 0,
        }
    }

    pub fn number_accepted(&self) -> u64 {
        self.accepted
    }

    pub fn number_rejected(&self) -> u64 {
        self.rejected
    }

    pub fn number_of_attempts(&self) -> u64 {
        self.accepted + self.rejected
    }

    pub fn acceptance_rate(&self) -> f64 {
        let n = self.number_of_attempts();
        if n == 0 {
            return f64::NAN;
        }
        self.accepted as f64 / n as f64
    }

    pub fn accept(&mut self) {
        self.accepted += 1;
    }

    pub fn reject(&mut self) {
        self.rejected += 1;
    }

    pub fn optimize(&mut self, ln_acceptance: f64) {
        if !self.auto_optimize {
            return;
        }
        self.tuning_count += 1;
        self.kernel.optimize(ln_acceptance, self.tuning_count);
    }

    pub fn scale_kernel(&self) -> ScaleKernel {
        match self.kernel {
            Kernel::Scale(k) => k,
            _ => ScaleKernel::new(0.5),
        }
    }

    pub fn window_kernel(&self) -> WindowKernel {
        match self.kernel {
            Kernel::Window(k) => k,
            _ => WindowKernel::new(0.1),
        }
    }
}

/// One move type acting on targets of type `T`.
pub trait Operator<T: McmcTarget> {
    fn base(&self) -> &OperatorBase;
    fn base_mut(&mut self) -> &mut OperatorBase;
    fn name(&self) -> &'static str;

    fn category(&self) -> OperatorCategory {
        OperatorCategory::Parameter
    }

    /// Perturbs `target` and returns the log Hastings ratio; `-inf` rejects
    /// the move outright.
    fn propose(&mut self, rng: &mut SmallRng, target: &mut T) -> Result<f64>;

    /// Runs one full move. Plain Metropolis-Hastings operators forward to
    /// [`metropolis_hastings_step`].
    fn operate(
        &mut self,
        rng: &mut SmallRng,
        target: &mut T,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool>;

    fn accept(&mut self) {
        self.base_mut().accept();
    }

    fn reject(&mut self) {
        self.base_mut().reject();
    }

    fn optimize(&mut self, ln_acceptance: f64) {
        self.base_mut().optimize(ln_acceptance);
    }
}

/// Store, propose, evaluate, then accept or restore. Returns whether the
/// move was accepted.
pub fn metropolis_hastings_step<T, O>(
    rng: &mut SmallRng,
    target: &mut T,
    op: &mut O,
    nthreads: usize,
    optimize: bool,
) -> Result<bool>
where
    T: McmcTarget,
    O: Operator<T> + ?Sized,
{
    let old_ll = target.log_likelihood();
    let old_lp = target.log_prior_density();
    target.store_state();

    let ln_hastings = op.propose(rng, target)?;
    if ln_hastings == f64::NEG_INFINITY {
        target.restore_state();
        op.reject();
        if optimize {
            op.optimize(f64::NEG_INFINITY);
        }
        return Ok(false);
    }

    target.compute_log_likelihood_and_prior(nthreads)?;
    let new_ll = target.log_likelihood();
    let new_lp = target.log_prior_density();

    let ln_acceptance = if new_ll == f64::NEG_INFINITY || new_lp == f64::NEG_INFINITY {
        f64::NEG_INFINITY
    } else {
        (new_ll - old_ll) + (new_lp - old_lp) + ln_hastings
    };
    let accepted = if ln_acceptance.is_nan() {
        false
    } else {
        ln_acceptance >= 0.0 || uniform(rng) < ln_acceptance.exp()
    };

    if accepted {
        op.accept();
    } else {
        target.restore_state();
        op.reject();
    }
    if optimize {
        op.optimize(ln_acceptance);
    }
    Ok(accepted)
}
