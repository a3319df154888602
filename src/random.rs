//! Random draws used by model construction and operators.
//!
//! Every function takes the chain's RNG handle explicitly; nothing here keeps
//! global state.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::utils::{ln_stirling2_row, logsumexp};

pub fn new_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

/// Uniform draw on [0, 1).
pub fn uniform(rng: &mut SmallRng) -> f64 {
    rng.gen_range(0.0..1.0)
}

/// Uniform draw on (lo, hi).
pub fn uniform_range(rng: &mut SmallRng, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * uniform(rng)
}

/// Uniform integer on [lo, hi].
pub fn uniform_int(rng: &mut SmallRng, lo: usize, hi: usize) -> usize {
    rng.gen_range(lo..=hi)
}

/// Draws an index with probability proportional to `weights`.
///
/// Falls back to the last index if rounding leaves the scan short.
pub fn weighted_index(rng: &mut SmallRng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let u = uniform(rng) * total;
    let mut acc = 0.0;
    for (i, w) in weights.iter().enumerate() {
        acc += w;
        if u < acc {
            return i;
        }
    }
    weights.len().saturating_sub(1)
}

/// Same as [`weighted_index`] but for log-scale weights.
pub fn ln_weighted_index(rng: &mut SmallRng, ln_weights: &[f64]) -> usize {
    let norm = logsumexp(ln_weights);
    let probs: Vec<f64> = ln_weights.iter().map(|w| (w - norm).exp()).collect();
    weighted_index(rng, &probs)
}

/// Draws element labels from a Chinese restaurant process.
///
/// With `discount = 0` this is the Dirichlet process; otherwise the
/// Pitman-Yor two-parameter process. Labels are assigned in order of first
/// appearance, so the result is already standardized.
pub fn draw_crp_partition(
    rng: &mut SmallRng,
    n_elements: usize,
    concentration: f64,
    discount: f64,
) -> Vec<usize> {
    let mut labels = Vec::with_capacity(n_elements);
    let mut counts: Vec<usize> = Vec::new();
    for i in 0..n_elements {
        if i == 0 {
            labels.push(0);
            counts.push(1);
            continue;
        }
        let k = counts.len() as f64;
        let mut weights: Vec<f64> = counts.iter().map(|&c| c as f64 - discount).collect();
        weights.push(concentration + k * discount);
        let j = weighted_index(rng, &weights);
        if j == counts.len() {
            counts.push(1);
        } else {
            counts[j] += 1;
        }
        labels.push(j);
    }
    labels
}

/// Draws a set partition where every partition with `k` blocks has weight
/// `split_weight^(k-1)`; `split_weight = 1` is uniform over all partitions.
pub fn draw_set_partition(rng: &mut SmallRng, n_elements: usize, split_weight: f64) -> Vec<usize> {
    if n_elements == 0 {
        return Vec::new();
    }
    let ln_w = split_weight.ln();
    let ln_s = ln_stirling2_row(n_elements);
    let ln_weights: Vec<f64> = (1..=n_elements)
        .map(|k| ln_s[k] + (k as f64 - 1.0) * ln_w)
        .collect();
    let k = ln_weighted_index(rng, &ln_weights) + 1;
    draw_set_partition_with_blocks(rng, n_elements, k)
}

/// Uniform draw among the S(n, k) partitions of `n` elements into `k` blocks.
pub fn draw_set_partition_with_blocks(
    rng: &mut SmallRng,
    n_elements: usize,
    n_blocks: usize,
) -> Vec<usize> {
    // Assign elements from last to first. Element i either opens a block on
    // its own (S(i-1, k-1) ways) or joins one of k blocks (k S(i-1, k) ways).
    let rows: Vec<Vec<f64>> = (0..=n_elements).map(ln_stirling2_row).collect();
    let mut raw = vec![0usize; n_elements];
    let mut k = n_blocks;
    let mut next_new_label = 0usize;
    let mut joins: Vec<Option<usize>> = vec![None; n_elements];
    for i in (1..=n_elements).rev() {
        let prev = &rows[i - 1];
        let ln_alone = if k >= 1 { prev[k - 1] } else { f64::NEG_INFINITY };
        let ln_join = if k <= i - 1 {
            (k as f64).ln() + prev[k]
        } else {
            f64::NEG_INFINITY
        };
        let pick = ln_weighted_index(rng, &[ln_alone, ln_join]);
        if pick == 0 {
            raw[i - 1] = next_new_label;
            next_new_label += 1;
            k -= 1;
        } else {
            joins[i - 1] = Some(uniform_int(rng, 0, k - 1));
        }
    }
    // Blocks opened by singletons are numbered in reverse; joined elements
    // pick one of the blocks that were still open when they were placed,
    // which are the blocks opened by lower-indexed elements.
    let mut openers: Vec<usize> = Vec::new();
    for i in 0..n_elements {
        match joins[i] {
            None => {
                openers.push(i);
            }
            Some(j) => {
                raw[i] = raw[openers[j]];
            }
        }
    }
    standardize_labels(&raw)
}

/// Relabels so that labels appear as 0, 1, 2, ... in order of first use.
pub fn standardize_labels(labels: &[usize]) -> Vec<usize> {
    let mut map: Vec<(usize, usize)> = Vec::new();
    let mut out = Vec::with_capacity(labels.len());
    for &l in labels {
        let std = match map.iter().find(|(from, _)| *from == l) {
            Some((_, to)) => *to,
            None => {
                let to = map.len();
                map.push((l, to));
                to
            }
        };
        out.push(std);
    }
    out
}
