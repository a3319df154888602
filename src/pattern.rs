use crate::error::{ModelError, Result};

/// Triangular array of pattern probabilities keyed by `(n, r)`.
///
/// `n` is a number of lineages (`1..=allele_count`) and `r` the number of
/// those carrying the red allele (`0..=n`). Entries are stored row-major in a
/// flat vector; `n = 0` is never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct BiallelicPatternProbabilityMatrix {
    allele_count: u32,
    values: Vec<f64>,
}

pub fn pattern_index(n: u32, r: u32) -> usize {
    ((n * (n + 1)) / 2 - 1 + r) as usize
}

pub fn pattern_len(allele_count: u32) -> usize {
    ((allele_count * (allele_count + 3)) / 2) as usize
}

impl BiallelicPatternProbabilityMatrix {
    pub fn new(allele_count: u32) -> Self {
        Self {
            allele_count,
            values: vec![0.0; pattern_len(allele_count)],
        }
    }

    /// Matrix with all mass on `(allele_count, red_allele_count)`.
    pub fn from_counts(allele_count: u32, red_allele_count: u32) -> Self {
        let mut m = Self::new(allele_count);
        if allele_count > 0 {
            m.set(allele_count, red_allele_count, 1.0);
        }
        m
    }

    pub fn from_values(allele_count: u32, values: Vec<f64>) -> Result<Self> {
        if values.len() != pattern_len(allele_count) {
            return Err(ModelError::invariant(format!(
                "pattern matrix for {allele_count} alleles needs {} values, got {}",
                pattern_len(allele_count),
                values.len()
            )));
        }
        Ok(Self {
            allele_count,
            values,
        })
    }

    pub fn allele_count(&self) -> u32 {
        self.allele_count
    }

    pub fn get(&self, n: u32, r: u32) -> f64 {
        self.values[pattern_index(n, r)]
    }

    pub fn set(&mut self, n: u32, r: u32, v: f64) {
        self.values[pattern_index(n, r)] = v;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn is_empty(&self) -> bool {
        self.allele_count == 0
    }

    /// Resets to an all-zero matrix of a (possibly different) size.
    pub fn reset(&mut self, allele_count: u32) {
        self.allele_count = allele_count;
        self.values.clear();
        self.values.resize(pattern_len(allele_count), 0.0);
    }

    pub fn copy_from(&mut self, other: &Self) {
        self.allele_count = other.allele_count;
        self.values.clear();
        self.values.extend_from_slice(&other.values);
    }
}
