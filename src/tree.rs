//! Population trees that own one comparison's data and parameters.

use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use crate::data::BiallelicData;
use crate::error::{ModelError, Result};
use crate::io::settings::{ComparisonParameterSettings, ComparisonSettings, ConstantSiteCounts};
use crate::likelihood::{
    BranchModel, PruningWorkspace, compute_constant_pattern_likelihoods,
    compute_log_likelihood_correction, compute_pattern_log_likelihood,
};
use crate::mcmc::McmcTarget;
use crate::node::{PopulationNode, add_child};
use crate::parameter::Parameter;

/// How strictly data-quality problems are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataPolicy {
    pub relax_constant_sites: bool,
    pub relax_missing_sites: bool,
    /// Sample from the prior: the likelihood is always zero on log scale.
    pub ignore_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StoredState {
    log_likelihood: f64,
    log_prior: f64,
    dirty: bool,
}

/// A population tree with its character data, population sizes and
/// substitution parameters.
#[derive(Debug, Clone)]
pub struct PopulationTree {
    workspace: PruningWorkspace,
    population_sizes: Vec<Parameter>,
    data: BiallelicData,
    freq_1: Parameter,
    mutation_rate: Parameter,
    ploidy: u32,
    constant_sites_removed: bool,
    constant_site_counts: Option<ConstantSiteCounts>,
    ignore_data: bool,
    likelihood_correction: f64,
    all_green_pattern_likelihood: Vec<f64>,
    all_red_pattern_likelihood: Vec<f64>,
    log_likelihood: f64,
    log_prior: f64,
    stored: StoredState,
    dirty: bool,
}

impl PopulationTree {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        nodes: Vec<PopulationNode>,
        root: usize,
        population_sizes: Vec<Parameter>,
        data: BiallelicData,
        freq_1: Parameter,
        mutation_rate: Parameter,
        ploidy: u32,
        constant_sites_removed: bool,
    ) -> Result<Self> {
        if ploidy == 0 {
            return Err(ModelError::config("ploidy must be positive"));
        }
        for n in &nodes {
            if n.population_size_index >= population_sizes.len() {
                return Err(ModelError::invariant(format!(
                    "node '{}' has population size index {} of {}",
                    n.label,
                    n.population_size_index,
                    population_sizes.len()
                )));
            }
        }
        let likelihood_correction = compute_log_likelihood_correction(&data);
        Ok(Self {
            workspace: PruningWorkspace::new(nodes, root),
            population_sizes,
            data,
            freq_1,
            mutation_rate,
            ploidy,
            constant_sites_removed,
            constant_site_counts: None,
            ignore_data: false,
            likelihood_correction,
            all_green_pattern_likelihood: Vec::new(),
            all_red_pattern_likelihood: Vec::new(),
            log_likelihood: 0.0,
            log_prior: 0.0,
            stored: StoredState {
                log_likelihood: 0.0,
                log_prior: 0.0,
                dirty: true,
            },
            dirty: true,
        })
    }

    pub fn set_constant_site_counts(&mut self, counts: Option<ConstantSiteCounts>) {
        self.constant_site_counts = counts;
        self.make_dirty();
    }

    pub fn set_ignore_data(&mut self, ignore: bool) {
        self.ignore_data = ignore;
        self.make_dirty();
    }

    pub fn ignoring_data(&self) -> bool {
        self.ignore_data
    }

    pub fn data(&self) -> &BiallelicData {
        &self.data
    }

    pub fn nodes(&self) -> &[PopulationNode] {
        &self.workspace.nodes
    }

    pub fn root_index(&self) -> usize {
        self.workspace.root
    }

    pub fn ploidy(&self) -> u32 {
        self.ploidy
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Forces the next evaluation to recompute every pattern.
    pub fn make_dirty(&mut self) {
        self.dirty = true;
        self.workspace.clear_cache();
    }

    pub fn likelihood_correction(&self) -> f64 {
        self.likelihood_correction
    }

    pub fn all_green_pattern_likelihood(&self) -> &[f64] {
        &self.all_green_pattern_likelihood
    }

    pub fn all_red_pattern_likelihood(&self) -> &[f64] {
        &self.all_red_pattern_likelihood
    }

    pub fn freq_1(&self) -> &Parameter {
        &self.freq_1
    }

    pub fn set_freq_1(&mut self, value: f64) {
        self.freq_1.set_value(value);
        self.make_dirty();
    }

    pub fn mutation_rate(&self) -> &Parameter {
        &self.mutation_rate
    }

    pub fn set_mutation_rate(&mut self, value: f64) {
        self.mutation_rate.set_value(value);
        self.make_dirty();
    }

    pub fn population_sizes(&self) -> &[Parameter] {
        &self.population_sizes
    }

    pub fn population_size(&self, i: usize) -> &Parameter {
        &self.population_sizes[i]
    }

    pub fn set_population_size(&mut self, i: usize, value: f64) {
        self.population_sizes[i].set_value(value);
        self.make_dirty();
    }

    /// Multiplies every estimated population size by `multiplier` and
    /// returns how many were scaled.
    pub fn scale_population_sizes(&mut self, multiplier: f64) -> usize {
        let mut n = 0;
        for p in self.population_sizes.iter_mut().filter(|p| !p.is_fixed()) {
            p.update(multiplier);
            n += 1;
        }
        if n > 0 {
            self.make_dirty();
        }
        n
    }

    pub fn root_population_size_index(&self) -> usize {
        self.workspace.nodes[self.workspace.root].population_size_index
    }

    /// Size indices of the non-root populations that are not shared with
    /// the root, without duplicates.
    pub fn leaf_population_size_indices(&self) -> Vec<usize> {
        let root = self.root_population_size_index();
        let mut out: Vec<usize> = Vec::new();
        for (i, n) in self.workspace.nodes.iter().enumerate() {
            if i == self.workspace.root {
                continue;
            }
            let s = n.population_size_index;
            if s != root && !out.contains(&s) {
                out.push(s);
            }
        }
        out
    }

    pub fn number_of_estimated_population_sizes(&self) -> usize {
        self.population_sizes.iter().filter(|p| !p.is_fixed()).count()
    }

    pub fn node_height(&self, idx: usize) -> f64 {
        self.workspace.nodes[idx].height
    }

    pub fn set_node_height(&mut self, idx: usize, height: f64) {
        self.workspace.nodes[idx].height = height;
        self.make_dirty();
    }

    fn branch_model(&self) -> BranchModel {
        BranchModel::from_freq(self.freq_1.value(), self.mutation_rate.value(), self.ploidy)
    }

    fn size_values(&self) -> Vec<f64> {
        self.population_sizes.iter().map(Parameter::value).collect()
    }

    fn compute_constant_site_correction(
        &mut self,
        model: &BranchModel,
        sizes: &[f64],
    ) -> Result<f64> {
        self.all_green_pattern_likelihood.clear();
        self.all_red_pattern_likelihood.clear();
        let dominant = self.data.markers_are_dominant();
        if let Some(counts) = self.constant_site_counts {
            let max_counts = self.data.max_allele_counts();
            let (green, red) = compute_constant_pattern_likelihoods(
                &mut self.workspace,
                &max_counts,
                model,
                sizes,
                dominant,
            )?;
            self.all_green_pattern_likelihood.push(green);
            self.all_red_pattern_likelihood.push(red);
            let mut term = 0.0;
            if counts.green > 0 {
                term += counts.green as f64 * green.ln();
            }
            if counts.red > 0 {
                term += counts.red as f64 * red.ln();
            }
            return Ok(term);
        }
        let mut term = 0.0;
        for (allele_counts, weight) in self.data.unique_allele_counts() {
            let (green, red) = compute_constant_pattern_likelihoods(
                &mut self.workspace,
                &allele_counts,
                model,
                sizes,
                dominant,
            )?;
            self.all_green_pattern_likelihood.push(green);
            self.all_red_pattern_likelihood.push(red);
            let variable = 1.0 - green - red;
            if !(variable > 0.0) {
                return Err(ModelError::numerical(format!(
                    "probability of a variable site is {variable} \
                     for allele counts {allele_counts:?}"
                )));
            }
            term -= weight as f64 * variable.ln();
        }
        Ok(term)
    }

    /// Full log likelihood of the data under the current parameters.
    pub fn compute_log_likelihood(&mut self, nthreads: usize) -> Result<f64> {
        if self.ignore_data {
            self.dirty = false;
            self.log_likelihood = 0.0;
            return Ok(0.0);
        }
        self.workspace.clear_cache();
        let model = self.branch_model();
        let sizes = self.size_values();
        let mut ll = compute_pattern_log_likelihood(
            &mut self.workspace,
            &self.data,
            &model,
            &sizes,
            nthreads,
        )?;
        if ll.is_nan() {
            return Err(ModelError::numerical("log likelihood is NaN"));
        }
        if ll > f64::NEG_INFINITY {
            if self.constant_sites_removed {
                ll += self.compute_constant_site_correction(&model, &sizes)?;
            }
            ll += self.likelihood_correction;
        }
        self.log_likelihood = ll;
        self.dirty = false;
        Ok(ll)
    }

    /// Log prior density of every estimated parameter the tree owns.
    pub fn compute_log_prior_density(&mut self) -> f64 {
        let mut lp =
            self.freq_1.relative_prior_ln_pdf() + self.mutation_rate.relative_prior_ln_pdf();
        for p in &self.population_sizes {
            lp += p.relative_prior_ln_pdf();
        }
        self.log_prior = lp;
        lp
    }

    fn store_parameters(&mut self) {
        self.freq_1.store();
        self.mutation_rate.store();
        for p in &mut self.population_sizes {
            p.store();
        }
        self.stored = StoredState {
            log_likelihood: self.log_likelihood,
            log_prior: self.log_prior,
            dirty: self.dirty,
        };
    }

    fn restore_parameters(&mut self) {
        self.freq_1.restore();
        self.mutation_rate.restore();
        for p in &mut self.population_sizes {
            p.restore();
        }
        self.log_likelihood = self.stored.log_likelihood;
        self.log_prior = self.stored.log_prior;
        self.dirty = self.stored.dirty;
        self.workspace.clear_cache();
    }
}

/// One comparison: a tree of at most two populations whose root height is
/// an index into the collection's event-time pool.
#[derive(Debug, Clone)]
pub struct ComparisonPopulationTree {
    tree: PopulationTree,
    label: String,
    root_height_index: usize,
    stored_root_height: f64,
    stored_root_height_index: usize,
}

impl Deref for ComparisonPopulationTree {
    type Target = PopulationTree;

    fn deref(&self) -> &PopulationTree {
        &self.tree
    }
}

impl DerefMut for ComparisonPopulationTree {
    fn deref_mut(&mut self) -> &mut PopulationTree {
        &mut self.tree
    }
}

impl ComparisonPopulationTree {
    /// Builds a comparison from its settings and already-loaded data,
    /// applying the data-quality policy.
    pub fn from_settings(
        settings: &ComparisonSettings,
        parameters: &ComparisonParameterSettings,
        mut data: BiallelicData,
        root_height: f64,
        policy: DataPolicy,
    ) -> Result<Self> {
        let n_pops = data.number_of_populations();
        if n_pops > 2 {
            return Err(ModelError::config(format!(
                "comparison {} has {n_pops} populations; at most 2 are supported",
                settings.path.display()
            )));
        }
        if !(root_height > 0.0) {
            return Err(ModelError::config(format!(
                "root height must be positive, got {root_height}"
            )));
        }
        if n_pops == 1 {
            let root_fixed = parameters
                .root_population_size
                .as_ref()
                .map_or(!parameters.population_size.estimate, |p| !p.estimate);
            if settings.equal_population_sizes
                || (!parameters.population_size.estimate && root_fixed)
            {
                return Err(ModelError::config(format!(
                    "single-population comparison {} needs free population sizes; \
                     with constrained or fixed sizes its divergence time is not identifiable",
                    settings.path.display()
                )));
            }
        }

        apply_data_policy(&mut data, settings, policy)?;

        let freq_1 = parameters.freq_1.to_probability_parameter("freq_1")?;
        let mutation_rate = parameters.mutation_rate.to_positive_parameter("mutation_rate")?;
        let leaf_size = parameters.population_size.to_positive_parameter("population_size")?;
        let root_size = match &parameters.root_population_size {
            Some(p) => p.to_positive_parameter("root_population_size")?,
            None => leaf_size.clone(),
        };

        let labels: Vec<String> = data.population_labels().to_vec();
        let mut nodes = Vec::with_capacity(n_pops + 1);
        let mut sizes = Vec::new();
        if settings.equal_population_sizes {
            sizes.push(leaf_size);
            for (i, l) in labels.iter().enumerate() {
                nodes.push(PopulationNode::leaf(l.clone(), i, 0));
            }
            nodes.push(PopulationNode::internal("root", root_height, 0));
        } else {
            for (i, l) in labels.iter().enumerate() {
                sizes.push(leaf_size.clone());
                nodes.push(PopulationNode::leaf(l.clone(), i, i));
            }
            sizes.push(root_size);
            nodes.push(PopulationNode::internal("root", root_height, n_pops));
        }
        let root = nodes.len() - 1;
        for i in 0..n_pops {
            add_child(&mut nodes, root, i);
        }

        let label = labels.join("-");
        let mut tree = PopulationTree::new(
            nodes,
            root,
            sizes,
            data,
            freq_1,
            mutation_rate,
            settings.ploidy,
            settings.constant_sites_removed,
        )?;
        if settings.constant_sites_removed {
            tree.set_constant_site_counts(settings.constant_site_counts);
        }
        tree.set_ignore_data(policy.ignore_data);
        debug!(
            comparison = %label,
            patterns = tree.data().number_of_patterns(),
            "built comparison tree"
        );
        Ok(Self {
            tree,
            label,
            root_height_index: 0,
            stored_root_height: root_height,
            stored_root_height_index: 0,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root_height(&self) -> f64 {
        self.tree.node_height(self.tree.root_index())
    }

    /// Mirrors the value of the event time this tree is mapped to.
    pub fn set_root_height(&mut self, height: f64) {
        if self.root_height() != height {
            let root = self.tree.root_index();
            self.tree.set_node_height(root, height);
        }
    }

    pub fn root_height_index(&self) -> usize {
        self.root_height_index
    }

    pub fn set_root_height_index(&mut self, index: usize) {
        self.root_height_index = index;
    }

    /// Labels of the sampled populations, in data order.
    pub fn population_labels(&self) -> &[String] {
        self.tree.data().population_labels()
    }

    /// Size index of the leaf holding data column `col`.
    pub fn leaf_population_size_index(&self, col: usize) -> Option<usize> {
        self.tree
            .nodes()
            .iter()
            .find(|n| n.population_index == Some(col))
            .map(|n| n.population_size_index)
    }
}

impl McmcTarget for ComparisonPopulationTree {
    fn store_state(&mut self) {
        self.tree.store_parameters();
        self.stored_root_height = self.root_height();
        self.stored_root_height_index = self.root_height_index;
    }

    fn restore_state(&mut self) {
        self.tree.restore_parameters();
        self.root_height_index = self.stored_root_height_index;
        let root = self.tree.root_index();
        self.tree.workspace.nodes[root].height = self.stored_root_height;
    }

    fn compute_log_likelihood_and_prior(&mut self, nthreads: usize) -> Result<()> {
        if self.tree.dirty {
            self.tree.compute_log_likelihood(nthreads)?;
        }
        self.tree.compute_log_prior_density();
        Ok(())
    }

    fn log_likelihood(&self) -> f64 {
        self.tree.log_likelihood
    }

    fn log_prior_density(&self) -> f64 {
        self.tree.log_prior
    }
}

fn apply_data_policy(
    data: &mut BiallelicData,
    settings: &ComparisonSettings,
    policy: DataPolicy,
) -> Result<()> {
    let path = settings.path.display();
    if data.has_missing_population_patterns() {
        if !policy.relax_missing_sites {
            return Err(ModelError::data(format!(
                "{path} has sites with no data for at least one population"
            )));
        }
        let removed = data.remove_missing_population_patterns();
        warn!(%path, removed, "removed sites with missing populations");
    }
    if settings.constant_sites_removed && data.has_constant_patterns() {
        if !policy.relax_constant_sites {
            return Err(ModelError::data(format!(
                "{path} has constant sites but constant_sites_removed is set"
            )));
        }
        let removed = data.remove_constant_patterns();
        warn!(%path, removed, "removed constant sites");
    }
    if data.number_of_patterns() == 0 && !policy.ignore_data {
        return Err(ModelError::data(format!("{path} has no usable sites")));
    }
    Ok(())
}
