//! Weighted operator schedule.

use rand::rngs::SmallRng;
use serde::Serialize;

use crate::collection::ComparisonPopulationTreeCollection;
use crate::error::{ModelError, Result};
use crate::io::settings::CollectionSettings;
use crate::mcmc::McmcTarget;
use crate::operators::collection_ops::{
    ConcentrationScaler, DirichletProcessGibbsSampler, DiscountMover, EventTimeScaler,
    EventTimeSizeMixer, PerComparison, ReversibleJumpSampler, SplitWeightScaler,
};
use crate::operators::tree_ops::{
    FreqMover, LeafPopulationSizeScaler, MutationRateScaler, RootPopulationSizeScaler,
};
use crate::operators::{Operator, OperatorCategory};
use crate::partition::EventModelPrior;
use crate::random::uniform;

/// Acceptance statistics of one operator, as written to the operator log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorStats {
    pub name: String,
    pub category: OperatorCategory,
    pub weight: f64,
    pub number_accepted: u64,
    pub number_rejected: u64,
    pub acceptance_rate: f64,
    pub tuning_parameter: Option<f64>,
}

pub struct OperatorSchedule<T: McmcTarget> {
    operators: Vec<Box<dyn Operator<T>>>,
    cumulative_probs: Vec<f64>,
    auto_optimize: bool,
    auto_optimize_delay: u64,
    count: u64,
}

impl<T: McmcTarget> OperatorSchedule<T> {
    pub fn new(auto_optimize: bool, auto_optimize_delay: u64) -> Self {
        Self {
            operators: Vec::new(),
            cumulative_probs: Vec::new(),
            auto_optimize,
            auto_optimize_delay,
            count: 0,
        }
    }

    pub fn add_operator(&mut self, op: Box<dyn Operator<T>>) {
        self.operators.push(op);
        self.update_cumulative_probs();
    }

    fn update_cumulative_probs(&mut self) {
        let total = self.get_total_weight();
        self.cumulative_probs.clear();
        let mut acc = 0.0;
        for op in &self.operators {
            acc += if total > 0.0 { op.base().weight / total } else { 0.0 };
            self.cumulative_probs.push(acc);
        }
    }

    pub fn get_total_weight(&self) -> f64 {
        self.operators.iter().map(|op| op.base().weight).sum()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn operator(&self, i: usize) -> &dyn Operator<T> {
        self.operators[i].as_ref()
    }

    pub fn number_of_operations(&self) -> u64 {
        self.count
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.get_total_weight() > 0.0) {
            return Err(ModelError::config("total operator weight is not positive"));
        }
        Ok(())
    }

    /// Index of the first operator whose cumulative probability reaches a
    /// uniform draw; the last operator absorbs rounding overrun.
    pub fn draw_operator_index(&self, rng: &mut SmallRng) -> Result<usize> {
        self.validate()?;
        let u = uniform(rng);
        Ok(self
            .cumulative_probs
            .iter()
            .position(|&p| u <= p)
            .unwrap_or(self.operators.len() - 1))
    }

    /// Draws one operator and runs it. Returns the operator's index.
    pub fn operate(
        &mut self,
        rng: &mut SmallRng,
        target: &mut T,
        nthreads: usize,
    ) -> Result<usize> {
        let i = self.draw_operator_index(rng)?;
        self.count += 1;
        let optimize = self.auto_optimize && self.count > self.auto_optimize_delay;
        self.operators[i].operate(rng, target, nthreads, optimize)?;
        Ok(i)
    }

    fn find_category(&mut self, category: OperatorCategory) -> Option<&mut Box<dyn Operator<T>>> {
        self.operators.iter_mut().find(|op| op.category() == category)
    }

    /// The reversible-jump operator, for callers that run it outside the
    /// weighted draw.
    pub fn get_rj_operator(&mut self) -> Option<&mut Box<dyn Operator<T>>> {
        self.find_category(OperatorCategory::RjOperator)
    }

    pub fn get_time_operator(&mut self) -> Option<&mut Box<dyn Operator<T>>> {
        self.find_category(OperatorCategory::TimeOperator)
    }

    pub fn acceptance_table(&self) -> Vec<OperatorStats> {
        self.operators
            .iter()
            .map(|op| {
                let b = op.base();
                OperatorStats {
                    name: op.name().to_string(),
                    category: op.category(),
                    weight: b.weight,
                    number_accepted: b.number_accepted(),
                    number_rejected: b.number_rejected(),
                    acceptance_rate: b.acceptance_rate(),
                    tuning_parameter: b.kernel.tuning_parameter(),
                }
            })
            .collect()
    }
}

/// Builds the operator schedule for a collection, dropping operators that
/// have nothing to act on or whose configured weight is zero.
pub fn collection_schedule(
    settings: &CollectionSettings,
    collection: &ComparisonPopulationTreeCollection,
) -> Result<OperatorSchedule<ComparisonPopulationTreeCollection>> {
    type C = ComparisonPopulationTreeCollection;
    let mut schedule: OperatorSchedule<C> = OperatorSchedule::new(
        settings.operator_settings.auto_optimize,
        settings.operator_settings.auto_optimize_delay,
    );
    let trees = collection.trees();
    let multi = collection.number_of_trees() > 1;
    let model = collection.event_model();
    let crp = matches!(
        model,
        EventModelPrior::DirichletProcess { .. } | EventModelPrior::PitmanYorProcess { .. }
    );
    let free = |name: &str| -> bool {
        model
            .parameters()
            .iter()
            .any(|(n, p)| *n == name && !p.is_fixed())
    };

    let mut candidates: Vec<(bool, Box<dyn Operator<C>>)> = Vec::new();
    let cfg = |name: &str| settings.operator(name);

    let s = cfg("EventTimeScaler");
    candidates.push((true, Box::new(EventTimeScaler::new(s.weight, s.scale.unwrap_or(0.5)))));
    let s = cfg("EventTimeSizeMixer");
    let any_free_sizes = trees.iter().any(|t| t.number_of_estimated_population_sizes() > 0);
    candidates.push((
        any_free_sizes,
        Box::new(EventTimeSizeMixer::new(s.weight, s.scale.unwrap_or(0.3))),
    ));
    let s = cfg("ReversibleJumpSampler");
    candidates.push((
        multi && !model.is_fixed(),
        Box::new(ReversibleJumpSampler::new(s.weight)),
    ));
    let s = cfg("DirichletProcessGibbsSampler");
    candidates.push((
        multi && crp,
        Box::new(DirichletProcessGibbsSampler::new(
            s.weight,
            s.number_of_auxiliary_categories.unwrap_or(4),
        )),
    ));
    let s = cfg("ConcentrationScaler");
    candidates.push((
        free("concentration"),
        Box::new(ConcentrationScaler::new(s.weight, s.scale.unwrap_or(0.5))),
    ));
    let s = cfg("DiscountMover");
    candidates.push((
        free("discount"),
        Box::new(DiscountMover::new(s.weight, s.window.unwrap_or(0.1))),
    ));
    let s = cfg("SplitWeightScaler");
    candidates.push((
        free("split_weight"),
        Box::new(SplitWeightScaler::new(s.weight, s.scale.unwrap_or(0.5))),
    ));

    let s = cfg("MutationRateScaler");
    candidates.push((
        trees.iter().any(|t| !t.mutation_rate().is_fixed()),
        Box::new(PerComparison::new(MutationRateScaler::new(s.weight, s.scale.unwrap_or(0.3)))),
    ));
    let s = cfg("FreqMover");
    candidates.push((
        trees.iter().any(|t| !t.freq_1().is_fixed()),
        Box::new(PerComparison::new(FreqMover::new(s.weight, s.window.unwrap_or(0.1)))),
    ));
    let s = cfg("RootPopulationSizeScaler");
    candidates.push((
        trees
            .iter()
            .any(|t| !t.population_size(t.root_population_size_index()).is_fixed()),
        Box::new(PerComparison::new(RootPopulationSizeScaler::new(
            s.weight,
            s.scale.unwrap_or(0.3),
        ))),
    ));
    let s = cfg("LeafPopulationSizeScaler");
    candidates.push((
        trees.iter().any(|t| {
            t.leaf_population_size_indices()
                .iter()
                .any(|&i| !t.population_size(i).is_fixed())
        }),
        Box::new(PerComparison::new(LeafPopulationSizeScaler::new(
            s.weight,
            s.scale.unwrap_or(0.3),
        ))),
    ));

    for (applies, op) in candidates {
        if applies && op.base().weight > 0.0 {
            schedule.add_operator(op);
        }
    }
    schedule.validate()?;
    Ok(schedule)
}
