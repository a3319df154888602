//! Priors over the partition of comparisons into shared divergence events.

use rand::rngs::SmallRng;

use crate::parameter::Parameter;
use crate::random::{draw_crp_partition, draw_set_partition};
use crate::utils::{ln_gamma, ln_stirling2_row, logsumexp};

#[derive(Debug, Clone, PartialEq)]
pub enum EventModelPrior {
    /// Dirichlet process with a concentration parameter.
    DirichletProcess { concentration: Parameter },
    /// Pitman-Yor process with concentration and discount parameters.
    PitmanYorProcess {
        concentration: Parameter,
        discount: Parameter,
    },
    /// Every set partition weighted by `split_weight^(k-1)`.
    UniformPartition { split_weight: Parameter },
    /// The partition is not sampled.
    Fixed,
}

impl EventModelPrior {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirichletProcess { .. } => "dirichlet-process",
            Self::PitmanYorProcess { .. } => "pitman-yor-process",
            Self::UniformPartition { .. } => "uniform",
            Self::Fixed => "fixed",
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed)
    }

    /// Log probability of a partition given by standardized or raw labels.
    pub fn ln_partition_probability(&self, labels: &[usize]) -> f64 {
        let sizes = block_sizes(labels);
        match self {
            Self::DirichletProcess { concentration } => {
                dpp_ln_probability(&sizes, concentration.value())
            }
            Self::PitmanYorProcess {
                concentration,
                discount,
            } => pyp_ln_probability(&sizes, concentration.value(), discount.value()),
            Self::UniformPartition { split_weight } => {
                uniform_ln_probability(labels.len(), sizes.len(), split_weight.value())
            }
            Self::Fixed => 0.0,
        }
    }

    /// Log prior density of the hyperparameters.
    pub fn ln_hyper_prior(&self) -> f64 {
        match self {
            Self::DirichletProcess { concentration } => concentration.relative_prior_ln_pdf(),
            Self::PitmanYorProcess {
                concentration,
                discount,
            } => concentration.relative_prior_ln_pdf() + discount.relative_prior_ln_pdf(),
            Self::UniformPartition { split_weight } => split_weight.relative_prior_ln_pdf(),
            Self::Fixed => 0.0,
        }
    }

    /// Draws a partition of `n` elements from this prior.
    pub fn draw_partition(&self, rng: &mut SmallRng, n: usize) -> Vec<usize> {
        match self {
            Self::DirichletProcess { concentration } => {
                draw_crp_partition(rng, n, concentration.value(), 0.0)
            }
            Self::PitmanYorProcess {
                concentration,
                discount,
            } => draw_crp_partition(rng, n, concentration.value(), discount.value()),
            Self::UniformPartition { split_weight } => {
                draw_set_partition(rng, n, split_weight.value())
            }
            Self::Fixed => (0..n).collect(),
        }
    }

    /// CRP predictive weight for joining an existing block of `size` items.
    pub fn ln_existing_block_weight(&self, size: usize) -> f64 {
        match self {
            Self::PitmanYorProcess { discount, .. } => (size as f64 - discount.value()).ln(),
            _ => (size as f64).ln(),
        }
    }

    /// CRP predictive weight for opening a new block when `n_blocks` exist.
    pub fn ln_new_block_weight(&self, n_blocks: usize) -> f64 {
        match self {
            Self::DirichletProcess { concentration } => concentration.value().ln(),
            Self::PitmanYorProcess {
                concentration,
                discount,
            } => (concentration.value() + n_blocks as f64 * discount.value()).ln(),
            _ => f64::NEG_INFINITY,
        }
    }

    pub fn store(&mut self) {
        for p in self.parameters_mut() {
            p.store();
        }
    }

    pub fn restore(&mut self) {
        for p in self.parameters_mut() {
            p.restore();
        }
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        match self {
            Self::DirichletProcess { concentration } => vec![concentration],
            Self::PitmanYorProcess {
                concentration,
                discount,
            } => vec![concentration, discount],
            Self::UniformPartition { split_weight } => vec![split_weight],
            Self::Fixed => Vec::new(),
        }
    }

    pub fn parameters(&self) -> Vec<(&'static str, &Parameter)> {
        match self {
            Self::DirichletProcess { concentration } => vec![("concentration", concentration)],
            Self::PitmanYorProcess {
                concentration,
                discount,
            } => vec![("concentration", concentration), ("discount", discount)],
            Self::UniformPartition { split_weight } => vec![("split_weight", split_weight)],
            Self::Fixed => Vec::new(),
        }
    }
}

pub fn block_sizes(labels: &[usize]) -> Vec<usize> {
    let n_blocks = labels.iter().max().map(|m| m + 1).unwrap_or(0);
    let mut sizes = vec![0usize; n_blocks];
    for &l in labels {
        sizes[l] += 1;
    }
    sizes.retain(|&s| s > 0);
    sizes
}

pub fn dpp_ln_probability(sizes: &[usize], concentration: f64) -> f64 {
    let n: usize = sizes.iter().sum();
    let mut p = sizes.len() as f64 * concentration.ln();
    for &s in sizes {
        p += ln_gamma(s as f64);
    }
    p + ln_gamma(concentration) - ln_gamma(concentration + n as f64)
}

pub fn pyp_ln_probability(sizes: &[usize], concentration: f64, discount: f64) -> f64 {
    let n: usize = sizes.iter().sum();
    let k = sizes.len();
    let mut p = 0.0;
    for i in 1..k {
        p += (concentration + i as f64 * discount).ln();
    }
    for &s in sizes {
        for m in 1..s {
            p += (m as f64 - discount).ln();
        }
    }
    for m in 1..n {
        p -= (concentration + m as f64).ln();
    }
    p
}

pub fn uniform_ln_probability(n: usize, n_blocks: usize, split_weight: f64) -> f64 {
    let ln_w = split_weight.ln();
    let ln_s = ln_stirling2_row(n);
    let terms: Vec<f64> = (1..=n).map(|j| ln_s[j] + (j as f64 - 1.0) * ln_w).collect();
    (n_blocks as f64 - 1.0) * ln_w - logsumexp(&terms)
}
