//! Operators on the parameters a single comparison owns.

use rand::rngs::SmallRng;

use super::{Kernel, Operator, OperatorBase, ScaleKernel, WindowKernel, metropolis_hastings_step};
use crate::error::Result;
use crate::random::uniform_int;
use crate::tree::ComparisonPopulationTree;

#[derive(Debug, Clone)]
pub struct MutationRateScaler {
    base: OperatorBase,
}

impl MutationRateScaler {
    pub fn new(weight: f64, scale: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::Scale(ScaleKernel::new(scale))),
        }
    }
}

impl Operator<ComparisonPopulationTree> for MutationRateScaler {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "MutationRateScaler"
    }

    fn propose(&mut self, rng: &mut SmallRng, tree: &mut ComparisonPopulationTree) -> Result<f64> {
        if tree.mutation_rate().is_fixed() {
            return Ok(f64::NEG_INFINITY);
        }
        let m = self.base.scale_kernel().draw_multiplier(rng);
        let v = tree.mutation_rate().value() * m;
        tree.set_mutation_rate(v);
        Ok(m.ln())
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        tree: &mut ComparisonPopulationTree,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        if tree.mutation_rate().is_fixed() {
            return Ok(false);
        }
        metropolis_hastings_step(rng, tree, self, nthreads, optimize)
    }
}

/// Sliding window on the stationary frequency of the red allele.
#[derive(Debug, Clone)]
pub struct FreqMover {
    base: OperatorBase,
}

impl FreqMover {
    pub fn new(weight: f64, window: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::Window(WindowKernel::new(window))),
        }
    }
}

impl Operator<ComparisonPopulationTree> for FreqMover {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "FreqMover"
    }

    fn propose(&mut self, rng: &mut SmallRng, tree: &mut ComparisonPopulationTree) -> Result<f64> {
        let v = tree.freq_1().value() + self.base.window_kernel().draw_addend(rng);
        if !tree.freq_1().in_bounds(v) {
            return Ok(f64::NEG_INFINITY);
        }
        tree.set_freq_1(v);
        Ok(0.0)
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        tree: &mut ComparisonPopulationTree,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        if tree.freq_1().is_fixed() {
            return Ok(false);
        }
        metropolis_hastings_step(rng, tree, self, nthreads, optimize)
    }
}

#[derive(Debug, Clone)]
pub struct RootPopulationSizeScaler {
    base: OperatorBase,
}

impl RootPopulationSizeScaler {
    pub fn new(weight: f64, scale: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::Scale(ScaleKernel::new(scale))),
        }
    }
}

impl Operator<ComparisonPopulationTree> for RootPopulationSizeScaler {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "RootPopulationSizeScaler"
    }

    fn propose(&mut self, rng: &mut SmallRng, tree: &mut ComparisonPopulationTree) -> Result<f64> {
        let i = tree.root_population_size_index();
        if tree.population_size(i).is_fixed() {
            return Ok(f64::NEG_INFINITY);
        }
        let m = self.base.scale_kernel().draw_multiplier(rng);
        let v = tree.population_size(i).value() * m;
        tree.set_population_size(i, v);
        Ok(m.ln())
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        tree: &mut ComparisonPopulationTree,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        if tree.population_size(tree.root_population_size_index()).is_fixed() {
            return Ok(false);
        }
        metropolis_hastings_step(rng, tree, self, nthreads, optimize)
    }
}

/// Scales one descendant population size that is not shared with the root.
#[derive(Debug, Clone)]
pub struct LeafPopulationSizeScaler {
    base: OperatorBase,
}

impl LeafPopulationSizeScaler {
    pub fn new(weight: f64, scale: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::Scale(ScaleKernel::new(scale))),
        }
    }
}

fn free_leaf_sizes(tree: &ComparisonPopulationTree) -> Vec<usize> {
    tree.leaf_population_size_indices()
        .into_iter()
        .filter(|&i| !tree.population_size(i).is_fixed())
        .collect()
}

impl Operator<ComparisonPopulationTree> for LeafPopulationSizeScaler {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "LeafPopulationSizeScaler"
    }

    fn propose(&mut self, rng: &mut SmallRng, tree: &mut ComparisonPopulationTree) -> Result<f64> {
        let candidates = free_leaf_sizes(tree);
        if candidates.is_empty() {
            return Ok(f64::NEG_INFINITY);
        }
        let i = candidates[uniform_int(rng, 0, candidates.len() - 1)];
        let m = self.base.scale_kernel().draw_multiplier(rng);
        let v = tree.population_size(i).value() * m;
        tree.set_population_size(i, v);
        Ok(m.ln())
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        tree: &mut ComparisonPopulationTree,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        if free_leaf_sizes(tree).is_empty() {
            return Ok(false);
        }
        metropolis_hastings_step(rng, tree, self, nthreads, optimize)
    }
}
