//! Pruning recursion over biallelic pattern-probability matrices.
//!
//! For every site pattern the tree is traversed once in post-order: leaves
//! get their bottom matrix from the observed counts, every branch is
//! propagated with `exp(Qt)`, sibling top matrices are convolved into their
//! parent's bottom matrix, and the root bottom matrix is integrated against
//! the stationary conditionals of the root population.

use rayon::prelude::*;

use crate::data::{BiallelicData, SitePattern};
use crate::error::{ModelError, Result};
use crate::expm::MatrixExponentiator;
use crate::node::{PopulationNode, branch_length, post_order};
use crate::pattern::BiallelicPatternProbabilityMatrix;
use crate::qmatrix::QMatrix;
use crate::utils::{choose, ln_choose};

/// Per-tree substitution parameters shared by every branch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchModel {
    pub u: f64,
    pub v: f64,
    pub mutation_rate: f64,
    pub ploidy: f64,
}

impl BranchModel {
    /// Rates normalised so the mean substitution rate is one and the
    /// stationary frequency of the red allele is `freq_1`.
    pub fn from_freq(freq_1: f64, mutation_rate: f64, ploidy: u32) -> Self {
        Self {
            u: 1.0 / (2.0 * freq_1),
            v: 1.0 / (2.0 * (1.0 - freq_1)),
            mutation_rate,
            ploidy: ploidy as f64,
        }
    }

    pub fn theta(&self, population_size: f64) -> f64 {
        2.0 * self.ploidy * population_size * self.mutation_rate
    }
}

/// Probability that `k` of `n` diploid individuals show the dominant (red)
/// phenotype given `r` red alleles among their `2n` alleles, for every
/// `k ≤ r ≤ 2k`. Stored in row `2n` of the returned matrix.
pub fn dominant_leaf_probabilities(
    n_individuals: u32,
    k: u32,
) -> BiallelicPatternProbabilityMatrix {
    let n2 = 2 * n_individuals;
    let mut m = BiallelicPatternProbabilityMatrix::new(n2);
    if n_individuals == 0 || k > n_individuals {
        return m;
    }
    // P(k | r = k) = C(n, k) 2^k / C(2n, k); then step r → r+1 with
    // j = r - k homozygous-red individuals.
    let mut p_r_k_n = choose(n_individuals, k) * 2f64.powi(k as i32) / choose(n2, k);
    for r in k..=(2 * k).min(n2) {
        m.set(n2, r, p_r_k_n);
        let j = (r - k) as f64;
        let rf = r as f64;
        if r < n2 {
            p_r_k_n *= (k as f64 - j) / (j + 1.0) * (rf + 1.0) / (2.0 * (n2 as f64 - rf));
        }
    }
    m
}

pub fn compute_leaf_partials(
    node: &mut PopulationNode,
    red_allele_count: u32,
    allele_count: u32,
    markers_are_dominant: bool,
) {
    if markers_are_dominant {
        node.bottom = dominant_leaf_probabilities(allele_count, red_allele_count);
        node.allele_count = 2 * allele_count;
    } else {
        node.bottom =
            BiallelicPatternProbabilityMatrix::from_counts(allele_count, red_allele_count);
        node.allele_count = allele_count;
    }
}

pub fn compute_top_of_branch_partials(
    exponentiator: &mut MatrixExponentiator,
    node: &mut PopulationNode,
    model: &BranchModel,
    population_size: f64,
    length: f64,
) -> Result<()> {
    if node.allele_count == 0 {
        node.top.copy_from(&node.bottom);
        return Ok(());
    }
    node.top = exponentiator.exp_qt_x(
        node.allele_count,
        model.u,
        model.v,
        model.theta(population_size),
        length * model.mutation_rate,
        &node.bottom,
    )?;
    Ok(())
}

fn binomial_rows(max_n: u32) -> Vec<Vec<f64>> {
    // b_{n,0} = 1; b_{n,r} = b_{n,r-1} (n - r + 1) / r
    (0..=max_n)
        .map(|n| {
            let mut row = Vec::with_capacity(n as usize + 1);
            let mut b = 1.0;
            row.push(b);
            for r in 1..=n {
                b = b * (n - r + 1) as f64 / r as f64;
                row.push(b);
            }
            row
        })
        .collect()
}

/// Convolves two sibling top matrices into the parent's bottom matrix.
pub fn merge_top_of_branch_partials(
    a: &BiallelicPatternProbabilityMatrix,
    b: &BiallelicPatternProbabilityMatrix,
) -> BiallelicPatternProbabilityMatrix {
    if a.is_empty() {
        return b.clone();
    }
    if b.is_empty() {
        return a.clone();
    }
    let n1_max = a.allele_count();
    let n2_max = b.allele_count();
    let n_max = n1_max + n2_max;
    let binom = binomial_rows(n_max);

    let mut scaled_a = a.clone();
    for n in 1..=n1_max {
        for r in 0..=n {
            scaled_a.set(n, r, a.get(n, r) * binom[n as usize][r as usize]);
        }
    }
    let mut scaled_b = b.clone();
    for n in 1..=n2_max {
        for r in 0..=n {
            scaled_b.set(n, r, b.get(n, r) * binom[n as usize][r as usize]);
        }
    }

    let mut m = BiallelicPatternProbabilityMatrix::new(n_max);
    for n1 in 1..=n1_max {
        for r1 in 0..=n1 {
            let f1 = scaled_a.get(n1, r1);
            if f1 == 0.0 {
                continue;
            }
            for n2 in 1..=n2_max {
                for r2 in 0..=n2 {
                    let f2 = scaled_b.get(n2, r2);
                    let n = n1 + n2;
                    let r = r1 + r2;
                    m.set(n, r, m.get(n, r) + f1 * f2);
                }
            }
        }
    }
    for n in 1..=n_max {
        for r in 0..=n {
            let v = m.get(n, r) / binom[n as usize][r as usize];
            m.set(n, r, if v < 0.0 { 0.0 } else { v });
        }
    }
    m
}

/// Combines the top matrices of `idx`'s children into its bottom matrix.
pub fn compute_internal_partials(nodes: &mut [PopulationNode], idx: usize) {
    let children = nodes[idx].children.clone();
    let merged = match children.as_slice() {
        [] => return,
        [only] => nodes[*only].top.clone(),
        [first, rest @ ..] => {
            let mut acc = nodes[*first].top.clone();
            for &c in rest {
                acc = merge_top_of_branch_partials(&acc, &nodes[c].top);
            }
            acc
        }
    };
    nodes[idx].allele_count = merged.allele_count();
    nodes[idx].bottom = merged;
}

/// Stationary conditional probabilities of `r` red among `n` lineages at
/// the top of the root population.
pub fn compute_root_probabilities(
    allele_count: u32,
    model: &BranchModel,
    root_population_size: f64,
) -> Result<BiallelicPatternProbabilityMatrix> {
    let q = QMatrix::new(
        allele_count,
        model.u,
        model.v,
        model.theta(root_population_size),
    );
    let x = q.find_orthogonal_vector()?;
    let mut conditionals = BiallelicPatternProbabilityMatrix::from_values(allele_count, x)?;
    for n in 1..=allele_count {
        let mut row_sum = 0.0;
        for r in 0..=n {
            let f = conditionals.get(n, r).max(0.0);
            conditionals.set(n, r, f);
            row_sum += f;
        }
        if row_sum > 0.0 {
            for r in 0..=n {
                conditionals.set(n, r, conditionals.get(n, r) / row_sum);
            }
        }
    }
    Ok(conditionals)
}

pub fn compute_root_likelihood(
    root_bottom: &BiallelicPatternProbabilityMatrix,
    conditionals: &BiallelicPatternProbabilityMatrix,
) -> Result<f64> {
    let big_n = root_bottom.allele_count();
    let mut sum = 0.0;
    for n in 1..=big_n {
        for r in 0..=n {
            sum += root_bottom.get(n, r) * conditionals.get(n, r);
            if sum < 0.0 {
                return Err(ModelError::numerical(format!(
                    "negative running sum ({sum}) in root likelihood at n={n}, r={r}"
                )));
            }
        }
    }
    if sum.is_nan() {
        return Err(ModelError::numerical("root likelihood is NaN"));
    }
    Ok(sum)
}

/// Mutable node arena plus scratch space for one likelihood pass.
///
/// Cloning deep-copies the arena, which is what each shard of a parallel
/// evaluation works on.
#[derive(Debug, Clone)]
pub struct PruningWorkspace {
    pub nodes: Vec<PopulationNode>,
    pub root: usize,
    order: Vec<usize>,
    exponentiator: MatrixExponentiator,
    root_cache: Vec<Option<BiallelicPatternProbabilityMatrix>>,
}

impl PruningWorkspace {
    pub fn new(nodes: Vec<PopulationNode>, root: usize) -> Self {
        let order = post_order(&nodes, root);
        Self {
            nodes,
            root,
            order,
            exponentiator: MatrixExponentiator::new(),
            root_cache: Vec::new(),
        }
    }

    /// Drops cached root conditionals; call whenever rates or the root
    /// population size change.
    pub fn clear_cache(&mut self) {
        self.root_cache.clear();
    }

    /// Fills bottom and top matrices for one pattern, children before
    /// parents. The traversal order is fixed when the workspace is built.
    fn compute_pattern_partials(
        &mut self,
        pattern: &SitePattern,
        model: &BranchModel,
        population_sizes: &[f64],
        markers_are_dominant: bool,
    ) -> Result<()> {
        for &idx in &self.order {
            if self.nodes[idx].is_leaf() {
                let node = &mut self.nodes[idx];
                let (red, n) = match node.population_index {
                    Some(col) => (pattern.red_allele_counts[col], pattern.allele_counts[col]),
                    None => (0, 0),
                };
                compute_leaf_partials(node, red, n, markers_are_dominant);
            } else {
                compute_internal_partials(&mut self.nodes, idx);
            }
            if self.nodes[idx].parent.is_some() {
                let length = branch_length(&self.nodes, idx);
                let size = population_sizes[self.nodes[idx].population_size_index];
                compute_top_of_branch_partials(
                    &mut self.exponentiator,
                    &mut self.nodes[idx],
                    model,
                    size,
                    length,
                )?;
            }
        }
        Ok(())
    }

    fn root_conditionals(
        &mut self,
        allele_count: u32,
        model: &BranchModel,
        root_size: f64,
    ) -> Result<&BiallelicPatternProbabilityMatrix> {
        let i = allele_count as usize;
        if self.root_cache.len() <= i {
            self.root_cache.resize(i + 1, None);
        }
        if self.root_cache[i].is_none() {
            self.root_cache[i] = Some(compute_root_probabilities(allele_count, model, root_size)?);
        }
        self.root_cache[i]
            .as_ref()
            .ok_or_else(|| ModelError::invariant("root conditional cache miss"))
    }

    pub fn pattern_likelihood(
        &mut self,
        pattern: &SitePattern,
        model: &BranchModel,
        population_sizes: &[f64],
        markers_are_dominant: bool,
    ) -> Result<f64> {
        let root = self.root;
        self.compute_pattern_partials(pattern, model, population_sizes, markers_are_dominant)?;
        let n = self.nodes[root].allele_count;
        let root_size = population_sizes[self.nodes[root].population_size_index];
        let bottom = self.nodes[root].bottom.clone();
        let conditionals = self.root_conditionals(n, model, root_size)?;
        compute_root_likelihood(&bottom, conditionals)
    }

    /// `Σ w_i ln L_i` over patterns `start..stop`; `-inf` as soon as one
    /// pattern has zero likelihood.
    pub fn log_likelihood_range(
        &mut self,
        data: &BiallelicData,
        start: usize,
        stop: usize,
        model: &BranchModel,
        population_sizes: &[f64],
    ) -> Result<f64> {
        let dominant = data.markers_are_dominant();
        let mut sum = 0.0;
        for i in start..stop {
            let l = self.pattern_likelihood(data.pattern(i), model, population_sizes, dominant)?;
            if l == 0.0 {
                return Ok(f64::NEG_INFINITY);
            }
            sum += data.weight(i) as f64 * l.ln();
        }
        Ok(sum)
    }
}

/// Splits patterns into contiguous shards and evaluates them in parallel,
/// each shard on its own clone of the workspace.
pub fn compute_pattern_log_likelihood(
    workspace: &mut PruningWorkspace,
    data: &BiallelicData,
    model: &BranchModel,
    population_sizes: &[f64],
    nthreads: usize,
) -> Result<f64> {
    let n_patterns = data.number_of_patterns();
    let nthreads = nthreads.min(n_patterns).max(1);
    if nthreads <= 1 {
        return workspace.log_likelihood_range(data, 0, n_patterns, model, population_sizes);
    }
    let per_shard = n_patterns.div_ceil(nthreads);
    let ranges: Vec<(usize, usize)> = (0..nthreads)
        .map(|t| (t * per_shard, ((t + 1) * per_shard).min(n_patterns)))
        .filter(|(s, e)| s < e)
        .collect();
    let template = workspace.clone();
    let (first, rest) = (ranges[0], &ranges[1..]);
    let (main, others) = rayon::join(
        || workspace.log_likelihood_range(data, first.0, first.1, model, population_sizes),
        || {
            rest.par_iter()
                .map(|&(s, e)| {
                    let mut local = template.clone();
                    local.log_likelihood_range(data, s, e, model, population_sizes)
                })
                .collect::<Result<Vec<f64>>>()
        },
    );
    let mut total = main?;
    for v in others? {
        total += v;
    }
    Ok(total)
}

/// Likelihoods of the all-green and all-red patterns for one allele-count
/// configuration.
pub fn compute_constant_pattern_likelihoods(
    workspace: &mut PruningWorkspace,
    allele_counts: &[u32],
    model: &BranchModel,
    population_sizes: &[f64],
    markers_are_dominant: bool,
) -> Result<(f64, f64)> {
    let green = SitePattern::new(vec![0; allele_counts.len()], allele_counts.to_vec());
    let red = SitePattern::new(allele_counts.to_vec(), allele_counts.to_vec());
    let l_green =
        workspace.pattern_likelihood(&green, model, population_sizes, markers_are_dominant)?;
    let l_red = workspace.pattern_likelihood(&red, model, population_sizes, markers_are_dominant)?;
    Ok((l_green, l_red))
}

/// Model-independent term converting the probability of red-allele counts
/// into the probability of the labelled alleles (or individuals for
/// dominant data): `-Σ_i w_i Σ_pop ln C(n, r)`.
pub fn compute_log_likelihood_correction(data: &BiallelicData) -> f64 {
    let mut correction = 0.0;
    for (p, &w) in data.patterns().iter().zip(data.weights()) {
        for (&r, &n) in p.red_allele_counts.iter().zip(&p.allele_counts) {
            correction -= w as f64 * ln_choose(n, r);
        }
    }
    correction
}
