//! Comparisons tied together by a shared pool of event times.

use rand::rngs::SmallRng;
use tracing::info;

use crate::data::BiallelicData;
use crate::distributions::ContinuousDistribution;
use crate::error::{ModelError, Result};
use crate::heights::HeightPool;
use crate::io::settings::{CollectionSettings, EventModelSettings, ParameterSettings};
use crate::mcmc::McmcTarget;
use crate::parameter::Parameter;
use crate::partition::EventModelPrior;
use crate::random::standardize_labels;
use crate::tree::{ComparisonPopulationTree, DataPolicy};

#[derive(Debug, Clone)]
pub struct ComparisonPopulationTreeCollection {
    trees: Vec<ComparisonPopulationTree>,
    heights: HeightPool,
    event_model: EventModelPrior,
    event_time_prior: ContinuousDistribution,
    log_prior: f64,
    stored_log_prior: f64,
}

fn discount_parameter(s: &ParameterSettings) -> Result<Parameter> {
    if !s.estimate && s.value == Some(0.0) {
        return Ok(Parameter::fixed_value(0.0));
    }
    s.to_probability_parameter("discount")
}

pub fn event_model_from_settings(s: &EventModelSettings) -> Result<EventModelPrior> {
    Ok(match s {
        EventModelSettings::DirichletProcess { concentration } => {
            EventModelPrior::DirichletProcess {
                concentration: concentration.to_positive_parameter("concentration")?,
            }
        }
        EventModelSettings::PitmanYorProcess {
            concentration,
            discount,
        } => EventModelPrior::PitmanYorProcess {
            concentration: concentration.to_positive_parameter("concentration")?,
            discount: discount_parameter(discount)?,
        },
        EventModelSettings::UniformPartition { split_weight } => EventModelPrior::UniformPartition {
            split_weight: split_weight.to_positive_parameter("split_weight")?,
        },
        EventModelSettings::Fixed { .. } => EventModelPrior::Fixed,
    })
}

/// Draws from the event-time prior until a positive value comes up.
pub fn draw_event_time(prior: &ContinuousDistribution, rng: &mut SmallRng) -> Result<f64> {
    for _ in 0..1000 {
        let v = prior.draw(rng);
        if v > 0.0 && v.is_finite() {
            return Ok(v);
        }
    }
    Err(ModelError::config(format!(
        "could not draw a positive event time from {prior}"
    )))
}

impl ComparisonPopulationTreeCollection {
    /// Builds the collection from settings and one data set per comparison
    /// (in settings order). The initial partition and event times are drawn
    /// from their priors.
    pub fn new(
        settings: &CollectionSettings,
        data: Vec<BiallelicData>,
        policy: DataPolicy,
        rng: &mut SmallRng,
    ) -> Result<Self> {
        settings.validate()?;
        if data.len() != settings.comparisons.len() {
            return Err(ModelError::config(format!(
                "{} data sets for {} comparisons",
                data.len(),
                settings.comparisons.len()
            )));
        }
        let n = data.len();
        let event_model = event_model_from_settings(&settings.event_model_prior)?;
        let labels = match &settings.event_model_prior {
            EventModelSettings::Fixed {
                event_indices: Some(idx),
            } => standardize_labels(idx),
            _ => event_model.draw_partition(rng, n),
        };
        let n_events = labels.iter().max().map_or(0, |m| m + 1);
        let mut values = Vec::with_capacity(n_events);
        for _ in 0..n_events {
            values.push(draw_event_time(&settings.event_time_prior, rng)?);
        }

        let mut subsets = Vec::with_capacity(n);
        for (c, d) in data.into_iter().enumerate() {
            subsets.push(match &settings.comparisons[c].populations {
                Some(pops) => d.subset(pops)?,
                None => d,
            });
        }
        let mut seen: Vec<&str> = Vec::new();
        for d in &subsets {
            for l in d.population_labels() {
                if seen.contains(&l.as_str()) {
                    return Err(ModelError::config(format!(
                        "population label '{l}' is used by more than one comparison"
                    )));
                }
                seen.push(l.as_str());
            }
        }

        let mut trees = Vec::with_capacity(n);
        for (c, d) in subsets.into_iter().enumerate() {
            let tree = ComparisonPopulationTree::from_settings(
                &settings.comparisons[c],
                settings.comparison_parameters(c),
                d,
                values[labels[c]],
                policy,
            )?;
            trees.push(tree);
        }

        let heights = HeightPool::from_partition(
            &labels,
            &values,
            Some(settings.event_time_prior.clone()),
            false,
        )?;
        let collection =
            Self::from_parts(trees, heights, event_model, settings.event_time_prior.clone())?;
        info!(
            comparisons = collection.number_of_trees(),
            events = collection.number_of_events(),
            model = collection.event_model.name(),
            "built comparison collection"
        );
        Ok(collection)
    }

    /// Assembles a collection from already-built trees and a height pool
    /// with one item per tree.
    pub fn from_parts(
        trees: Vec<ComparisonPopulationTree>,
        heights: HeightPool,
        event_model: EventModelPrior,
        event_time_prior: ContinuousDistribution,
    ) -> Result<Self> {
        if heights.number_of_items() != trees.len() {
            return Err(ModelError::invariant(format!(
                "height pool maps {} items but there are {} trees",
                heights.number_of_items(),
                trees.len()
            )));
        }
        let mut c = Self {
            trees,
            heights,
            event_model,
            event_time_prior,
            log_prior: 0.0,
            stored_log_prior: 0.0,
        };
        c.sync_tree_heights();
        Ok(c)
    }

    pub fn number_of_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[ComparisonPopulationTree] {
        &self.trees
    }

    pub fn trees_mut(&mut self) -> &mut [ComparisonPopulationTree] {
        &mut self.trees
    }

    pub fn tree(&self, t: usize) -> &ComparisonPopulationTree {
        &self.trees[t]
    }

    pub fn heights(&self) -> &HeightPool {
        &self.heights
    }

    pub fn event_model(&self) -> &EventModelPrior {
        &self.event_model
    }

    pub fn event_model_mut(&mut self) -> &mut EventModelPrior {
        &mut self.event_model
    }

    pub fn event_time_prior(&self) -> &ContinuousDistribution {
        &self.event_time_prior
    }

    pub fn number_of_events(&self) -> usize {
        self.heights.number_of_events()
    }

    pub fn height(&self, h: usize) -> f64 {
        self.heights.height(h)
    }

    /// Pushes index and value of every tree's event time into the tree.
    fn sync_tree_heights(&mut self) {
        for (t, tree) in self.trees.iter_mut().enumerate() {
            let h = self.heights.index_of(t);
            tree.set_root_height_index(h);
            tree.set_root_height(self.heights.height(h));
        }
    }

    pub fn set_height(&mut self, h: usize, value: f64) {
        self.heights.set_height(h, value);
        for t in self.heights.indices_of_mapped_items(h) {
            self.trees[t].set_root_height(value);
        }
    }

    /// Scales the estimated population sizes of every tree mapped to `h`.
    pub fn scale_population_sizes_at_height(&mut self, h: usize, multiplier: f64) -> usize {
        let mut n = 0;
        for t in self.heights.indices_of_mapped_items(h) {
            n += self.trees[t].scale_population_sizes(multiplier);
        }
        n
    }

    /// Appends an event time no tree points at yet; map a tree onto it
    /// before the next invariant check.
    pub fn add_height(&mut self, value: f64) -> Result<usize> {
        self.heights.add_height(value)
    }

    /// Drops an unreferenced event time and re-indexes every tree.
    pub fn remove_height(&mut self, h: usize) -> Result<()> {
        self.heights.remove_height(h)?;
        self.sync_tree_heights();
        Ok(())
    }

    pub fn remap_tree(&mut self, t: usize, h: usize) -> Result<usize> {
        let out = self.heights.remap_item(t, h)?;
        self.sync_tree_heights();
        Ok(out)
    }

    pub fn merge_height(&mut self, h: usize, target: usize) -> Result<usize> {
        let out = self.heights.merge_height(h, target)?;
        self.sync_tree_heights();
        Ok(out)
    }

    pub fn map_tree_to_new_height(&mut self, t: usize, value: f64) -> Result<usize> {
        let out = self.heights.map_item_to_new_height(t, value)?;
        self.sync_tree_heights();
        Ok(out)
    }

    /// Moves a set of trees onto a fresh height; returns its index.
    pub fn map_trees_to_new_height(&mut self, trees: &[usize], value: f64) -> Result<usize> {
        let Some((&first, rest)) = trees.split_first() else {
            return Err(ModelError::invariant("no trees to move to a new height"));
        };
        let mut h = self.heights.map_item_to_new_height(first, value)?;
        for &t in rest {
            h = self.heights.remap_item(t, h)?;
        }
        self.sync_tree_heights();
        Ok(h)
    }

    pub fn get_standardized_height_indices(&self) -> Vec<usize> {
        self.heights.standardized_indices()
    }

    pub fn get_nearest_smaller_height_index(
        &self,
        h: usize,
        allow_smallest_index: bool,
    ) -> Result<usize> {
        self.heights.nearest_smaller_height_index(h, allow_smallest_index)
    }

    pub fn get_nearest_larger_height_index(
        &self,
        h: usize,
        allow_largest_index: bool,
    ) -> Result<usize> {
        self.heights.nearest_larger_height_index(h, allow_largest_index)
    }

    pub fn get_nearest_smaller_height(&self, h: usize) -> f64 {
        self.heights.nearest_smaller_height(h)
    }

    pub fn get_nearest_larger_height(&self, h: usize) -> f64 {
        self.heights.nearest_larger_height(h)
    }

    pub fn get_distal_height_index_within_move(&self, h: usize, delta: f64) -> usize {
        self.heights.distal_height_index_within_move(h, delta)
    }

    pub fn get_number_of_trees_mapped_to_height(&self, h: usize) -> usize {
        self.heights.number_of_items_mapped_to_height(h)
    }

    pub fn get_indices_of_mapped_trees(&self, h: usize) -> Vec<usize> {
        self.heights.indices_of_mapped_items(h)
    }

    /// Log likelihood of tree `t` with its root moved to `value`. The tree
    /// is left at that height.
    pub fn tree_log_likelihood_at_height(
        &mut self,
        t: usize,
        value: f64,
        nthreads: usize,
    ) -> Result<f64> {
        let tree = &mut self.trees[t];
        tree.set_root_height(value);
        if tree.is_dirty() {
            tree.compute_log_likelihood(nthreads)
        } else {
            Ok(tree.log_likelihood())
        }
    }

    /// Pool invariants plus agreement between the pool and every tree.
    pub fn check_invariants(&self) -> Result<()> {
        self.heights.check_invariants()?;
        for (t, tree) in self.trees.iter().enumerate() {
            let h = self.heights.index_of(t);
            if tree.root_height_index() != h || tree.root_height() != self.heights.height(h) {
                return Err(ModelError::invariant(format!(
                    "tree {t} is out of sync with event time {h}"
                )));
            }
        }
        Ok(())
    }

    /// Marks every tree dirty so the next evaluation starts from scratch.
    pub fn make_dirty(&mut self) {
        for t in &mut self.trees {
            t.make_dirty();
        }
    }

    fn compute_collection_log_prior(&mut self) -> f64 {
        let labels = self.heights.indices();
        let lp = self.heights.ln_prior()
            + self.event_model.ln_partition_probability(labels)
            + self.event_model.ln_hyper_prior();
        self.log_prior = lp;
        lp
    }
}

impl McmcTarget for ComparisonPopulationTreeCollection {
    fn store_state(&mut self) {
        for t in &mut self.trees {
            t.store_state();
        }
        self.heights.store();
        self.event_model.store();
        self.stored_log_prior = self.log_prior;
    }

    fn restore_state(&mut self) {
        for t in &mut self.trees {
            t.restore_state();
        }
        self.heights.restore();
        self.event_model.restore();
        self.log_prior = self.stored_log_prior;
    }

    fn compute_log_likelihood_and_prior(&mut self, nthreads: usize) -> Result<()> {
        for t in &mut self.trees {
            t.compute_log_likelihood_and_prior(nthreads)?;
        }
        self.compute_collection_log_prior();
        Ok(())
    }

    fn log_likelihood(&self) -> f64 {
        self.trees.iter().map(|t| t.log_likelihood()).sum()
    }

    fn log_prior_density(&self) -> f64 {
        self.log_prior + self.trees.iter().map(|t| t.log_prior_density()).sum::<f64>()
    }
}
