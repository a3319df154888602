//! Operators on event times, the event model and the tree-to-event mapping.

use rand::rngs::SmallRng;

use super::{
    Kernel, Operator, OperatorBase, OperatorCategory, ScaleKernel, WindowKernel,
    metropolis_hastings_step,
};
use crate::collection::{ComparisonPopulationTreeCollection, draw_event_time};
use crate::error::{ModelError, Result};
use crate::mcmc::McmcTarget;
use crate::partition::EventModelPrior;
use crate::random::{ln_weighted_index, uniform, uniform_int, uniform_range};
use crate::tree::ComparisonPopulationTree;

type Collection = ComparisonPopulationTreeCollection;

/// Runs a comparison-level operator on every tree of the collection in
/// turn, each tree with its own accept/reject decision.
#[derive(Debug, Clone)]
pub struct PerComparison<O> {
    inner: O,
}

impl<O> PerComparison<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }
}

impl<O: Operator<ComparisonPopulationTree>> Operator<Collection> for PerComparison<O> {
    fn base(&self) -> &OperatorBase {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        self.inner.base_mut()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn category(&self) -> OperatorCategory {
        self.inner.category()
    }

    fn propose(&mut self, _rng: &mut SmallRng, _target: &mut Collection) -> Result<f64> {
        Err(ModelError::invariant(format!(
            "{} proposes on single comparisons",
            self.inner.name()
        )))
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        collection: &mut Collection,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        let mut any = false;
        for tree in collection.trees_mut() {
            any |= self.inner.operate(rng, tree, nthreads, optimize)?;
        }
        Ok(any)
    }
}

/// Scales one event time; every tree mapped to it moves along.
#[derive(Debug, Clone)]
pub struct EventTimeScaler {
    base: OperatorBase,
}

impl EventTimeScaler {
    pub fn new(weight: f64, scale: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::Scale(ScaleKernel::new(scale))),
        }
    }
}

impl Operator<Collection> for EventTimeScaler {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "EventTimeScaler"
    }

    fn category(&self) -> OperatorCategory {
        OperatorCategory::TimeOperator
    }

    fn propose(&mut self, rng: &mut SmallRng, c: &mut Collection) -> Result<f64> {
        let h = uniform_int(rng, 0, c.number_of_events() - 1);
        let m = self.base.scale_kernel().draw_multiplier(rng);
        let v = c.height(h) * m;
        c.set_height(h, v);
        Ok(m.ln())
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        c: &mut Collection,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        metropolis_hastings_step(rng, c, self, nthreads, optimize)
    }
}

/// Scales an event time by `m` and the population sizes of the trees
/// mapped to it by `1/m`, keeping `θ·t` roughly constant.
#[derive(Debug, Clone)]
pub struct EventTimeSizeMixer {
    base: OperatorBase,
}

impl EventTimeSizeMixer {
    pub fn new(weight: f64, scale: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::Scale(ScaleKernel::new(scale))),
        }
    }
}

impl Operator<Collection> for EventTimeSizeMixer {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "EventTimeSizeMixer"
    }

    fn category(&self) -> OperatorCategory {
        OperatorCategory::TimeOperator
    }

    fn propose(&mut self, rng: &mut SmallRng, c: &mut Collection) -> Result<f64> {
        let h = uniform_int(rng, 0, c.number_of_events() - 1);
        let m = self.base.scale_kernel().draw_multiplier(rng);
        let v = c.height(h) * m;
        c.set_height(h, v);
        let scaled = c.scale_population_sizes_at_height(h, 1.0 / m);
        Ok((1.0 - scaled as f64) * m.ln())
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        c: &mut Collection,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        metropolis_hastings_step(rng, c, self, nthreads, optimize)
    }
}

fn free_concentration(model: &mut EventModelPrior) -> Option<&mut crate::parameter::Parameter> {
    match model {
        EventModelPrior::DirichletProcess { concentration }
        | EventModelPrior::PitmanYorProcess { concentration, .. }
            if !concentration.is_fixed() =>
        {
            Some(concentration)
        }
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ConcentrationScaler {
    base: OperatorBase,
}

impl ConcentrationScaler {
    pub fn new(weight: f64, scale: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::Scale(ScaleKernel::new(scale))),
        }
    }
}

impl Operator<Collection> for ConcentrationScaler {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "ConcentrationScaler"
    }

    fn propose(&mut self, rng: &mut SmallRng, c: &mut Collection) -> Result<f64> {
        let m = self.base.scale_kernel().draw_multiplier(rng);
        match free_concentration(c.event_model_mut()) {
            Some(p) => {
                p.update(m);
                Ok(m.ln())
            }
            None => Ok(f64::NEG_INFINITY),
        }
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        c: &mut Collection,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        if free_concentration(c.event_model_mut()).is_none() {
            return Ok(false);
        }
        metropolis_hastings_step(rng, c, self, nthreads, optimize)
    }
}

fn free_discount(model: &mut EventModelPrior) -> Option<&mut crate::parameter::Parameter> {
    match model {
        EventModelPrior::PitmanYorProcess { discount, .. } if !discount.is_fixed() => {
            Some(discount)
        }
        _ => None,
    }
}

/// Sliding window on the Pitman-Yor discount, rejecting moves outside (0, 1).
#[derive(Debug, Clone)]
pub struct DiscountMover {
    base: OperatorBase,
}

impl DiscountMover {
    pub fn new(weight: f64, window: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::Window(WindowKernel::new(window))),
        }
    }
}

impl Operator<Collection> for DiscountMover {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "DiscountMover"
    }

    fn propose(&mut self, rng: &mut SmallRng, c: &mut Collection) -> Result<f64> {
        let addend = self.base.window_kernel().draw_addend(rng);
        match free_discount(c.event_model_mut()) {
            Some(p) => {
                let v = p.value() + addend;
                if !p.in_bounds(v) {
                    return Ok(f64::NEG_INFINITY);
                }
                p.set_value(v);
                Ok(0.0)
            }
            None => Ok(f64::NEG_INFINITY),
        }
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        c: &mut Collection,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        if free_discount(c.event_model_mut()).is_none() {
            return Ok(false);
        }
        metropolis_hastings_step(rng, c, self, nthreads, optimize)
    }
}

fn free_split_weight(model: &mut EventModelPrior) -> Option<&mut crate::parameter::Parameter> {
    match model {
        EventModelPrior::UniformPartition { split_weight } if !split_weight.is_fixed() => {
            Some(split_weight)
        }
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct SplitWeightScaler {
    base: OperatorBase,
}

impl SplitWeightScaler {
    pub fn new(weight: f64, scale: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::Scale(ScaleKernel::new(scale))),
        }
    }
}

impl Operator<Collection> for SplitWeightScaler {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "SplitWeightScaler"
    }

    fn propose(&mut self, rng: &mut SmallRng, c: &mut Collection) -> Result<f64> {
        let m = self.base.scale_kernel().draw_multiplier(rng);
        match free_split_weight(c.event_model_mut()) {
            Some(p) => {
                p.update(m);
                Ok(m.ln())
            }
            None => Ok(f64::NEG_INFINITY),
        }
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        c: &mut Collection,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        if free_split_weight(c.event_model_mut()).is_none() {
            return Ok(false);
        }
        metropolis_hastings_step(rng, c, self, nthreads, optimize)
    }
}

#[derive(Debug, Clone, Copy)]
enum GibbsChoice {
    Existing(usize),
    New(f64),
}

/// Reassigns every tree to an event with Neal's (2000) algorithm 8,
/// using auxiliary event times drawn from the event-time prior.
#[derive(Debug, Clone)]
pub struct DirichletProcessGibbsSampler {
    base: OperatorBase,
    number_of_auxiliary_categories: usize,
}

impl DirichletProcessGibbsSampler {
    pub fn new(weight: f64, number_of_auxiliary_categories: usize) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::None),
            number_of_auxiliary_categories: number_of_auxiliary_categories.max(1),
        }
    }

    fn applies_to(c: &Collection) -> bool {
        matches!(
            c.event_model(),
            EventModelPrior::DirichletProcess { .. } | EventModelPrior::PitmanYorProcess { .. }
        ) && c.number_of_trees() > 1
    }

    fn sweep(&self, rng: &mut SmallRng, c: &mut Collection, nthreads: usize) -> Result<()> {
        let m = self.number_of_auxiliary_categories;
        let ln_m = (m as f64).ln();
        for t in 0..c.number_of_trees() {
            let current = c.heights().index_of(t);
            let singleton = c.get_number_of_trees_mapped_to_height(current) == 1;
            let k = c.number_of_events();
            let k_minus = if singleton { k - 1 } else { k };

            let mut ln_weights = Vec::with_capacity(k + m);
            let mut choices = Vec::with_capacity(k + m);
            for h in 0..k {
                let size = c.get_number_of_trees_mapped_to_height(h) - usize::from(h == current);
                if size == 0 {
                    continue;
                }
                let ll = c.tree_log_likelihood_at_height(t, c.height(h), nthreads)?;
                ln_weights.push(c.event_model().ln_existing_block_weight(size) + ll);
                choices.push(GibbsChoice::Existing(h));
            }
            let ln_new = c.event_model().ln_new_block_weight(k_minus) - ln_m;
            for a in 0..m {
                let value = if a == 0 && singleton {
                    c.height(current)
                } else {
                    draw_event_time(c.event_time_prior(), rng)?
                };
                let ll = c.tree_log_likelihood_at_height(t, value, nthreads)?;
                ln_weights.push(ln_new + ll);
                choices.push(GibbsChoice::New(value));
            }

            match choices[ln_weighted_index(rng, &ln_weights)] {
                GibbsChoice::Existing(h) => {
                    c.remap_tree(t, h)?;
                }
                GibbsChoice::New(value) if singleton => c.set_height(current, value),
                GibbsChoice::New(value) => {
                    c.map_tree_to_new_height(t, value)?;
                }
            }
            // Trees may hold a candidate height that was not chosen.
            let h = c.heights().index_of(t);
            let v = c.height(h);
            c.trees_mut()[t].set_root_height(v);
        }
        Ok(())
    }
}

impl Operator<Collection> for DirichletProcessGibbsSampler {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "DirichletProcessGibbsSampler"
    }

    fn category(&self) -> OperatorCategory {
        OperatorCategory::Gibbs
    }

    fn propose(&mut self, _rng: &mut SmallRng, _c: &mut Collection) -> Result<f64> {
        Err(ModelError::invariant(
            "the Gibbs sampler draws from full conditionals and has no proposal",
        ))
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        c: &mut Collection,
        nthreads: usize,
        _optimize: bool,
    ) -> Result<bool> {
        if !Self::applies_to(c) {
            return Ok(false);
        }
        self.sweep(rng, c, nthreads)?;
        c.compute_log_likelihood_and_prior(nthreads)?;
        self.accept();
        Ok(true)
    }
}

/// Probability of proposing a split with `k` events and `n` trees.
fn split_probability(k: usize, n: usize) -> f64 {
    if n < 2 || k >= n {
        0.0
    } else if k == 1 {
        1.0
    } else {
        0.5
    }
}

fn merge_probability(k: usize, n: usize) -> f64 {
    if n < 2 || k < 2 { 0.0 } else { 1.0 - split_probability(k, n) }
}

/// `ln(2^m - 2)`: ordered splits of `m` trees into two non-empty sets.
fn ln_number_of_splits(m: usize) -> f64 {
    let mf = m as f64;
    mf * std::f64::consts::LN_2 + (1.0 - 2f64.powf(1.0 - mf)).ln()
}

fn splittable_heights(c: &Collection) -> Vec<usize> {
    (0..c.number_of_events())
        .filter(|&h| c.get_number_of_trees_mapped_to_height(h) > 1)
        .collect()
}

/// Split-merge reversible-jump move on the number of events.
///
/// Split: choose a shared event uniformly, choose an ordered non-trivial
/// split of its trees, and move the first part to a new time drawn
/// uniformly between the next-smaller event time (or 0) and the event.
/// Merge: choose any event but the oldest and merge it into the next-larger
/// event. The two moves are exact inverses with unit Jacobian.
#[derive(Debug, Clone)]
pub struct ReversibleJumpSampler {
    base: OperatorBase,
}

impl ReversibleJumpSampler {
    pub fn new(weight: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::None),
        }
    }

    fn propose_split(&self, rng: &mut SmallRng, c: &mut Collection) -> Result<f64> {
        let n = c.number_of_trees();
        let k = c.number_of_events();
        let candidates = splittable_heights(c);
        if candidates.is_empty() {
            return Ok(f64::NEG_INFINITY);
        }
        let h = candidates[uniform_int(rng, 0, candidates.len() - 1)];
        let members = c.get_indices_of_mapped_trees(h);
        let m = members.len();
        let moving = loop {
            let subset: Vec<usize> = members
                .iter()
                .copied()
                .filter(|_| uniform(rng) < 0.5)
                .collect();
            if !subset.is_empty() && subset.len() < m {
                break subset;
            }
        };
        let upper = c.height(h);
        let lower = c.get_nearest_smaller_height(h);
        let value = uniform_range(rng, lower, upper);
        if !(value > 0.0) {
            return Ok(f64::NEG_INFINITY);
        }
        c.map_trees_to_new_height(&moving, value)?;

        Ok(merge_probability(k + 1, n).ln() - (k as f64).ln() - split_probability(k, n).ln()
            + (candidates.len() as f64).ln()
            + ln_number_of_splits(m)
            + (upper - lower).ln())
    }

    fn propose_merge(&self, rng: &mut SmallRng, c: &mut Collection) -> Result<f64> {
        let n = c.number_of_trees();
        let k = c.number_of_events();
        let mut candidates = Vec::with_capacity(k);
        for h in 0..k {
            let larger = c.get_nearest_larger_height_index(h, true)?;
            if larger != h {
                candidates.push((h, larger));
            }
        }
        if candidates.is_empty() {
            return Ok(f64::NEG_INFINITY);
        }
        let (h, target) = candidates[uniform_int(rng, 0, candidates.len() - 1)];
        let m = c.get_number_of_trees_mapped_to_height(h)
            + c.get_number_of_trees_mapped_to_height(target);
        let lower = c.get_nearest_smaller_height(h);
        let upper = c.height(target);
        c.merge_height(h, target)?;
        let splittable_after = splittable_heights(c).len();

        Ok(split_probability(k - 1, n).ln() - (splittable_after as f64).ln()
            - ln_number_of_splits(m)
            - (upper - lower).ln()
            - merge_probability(k, n).ln()
            + (candidates.len() as f64).ln())
    }
}

impl Operator<Collection> for ReversibleJumpSampler {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "ReversibleJumpSampler"
    }

    fn category(&self) -> OperatorCategory {
        OperatorCategory::RjOperator
    }

    fn propose(&mut self, rng: &mut SmallRng, c: &mut Collection) -> Result<f64> {
        let n = c.number_of_trees();
        let k = c.number_of_events();
        if n < 2 {
            return Ok(f64::NEG_INFINITY);
        }
        if uniform(rng) < split_probability(k, n) {
            self.propose_split(rng, c)
        } else {
            self.propose_merge(rng, c)
        }
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        c: &mut Collection,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        if c.event_model().is_fixed() || c.number_of_trees() < 2 {
            return Ok(false);
        }
        metropolis_hastings_step(rng, c, self, nthreads, optimize)
    }
}
