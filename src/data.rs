use std::collections::HashMap;

use crate::error::{ModelError, Result};

/// Red-allele and total-allele counts of one site across populations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SitePattern {
    pub red_allele_counts: Vec<u32>,
    pub allele_counts: Vec<u32>,
}

impl SitePattern {
    pub fn new(red_allele_counts: Vec<u32>, allele_counts: Vec<u32>) -> Self {
        Self {
            red_allele_counts,
            allele_counts,
        }
    }

    pub fn is_all_green(&self) -> bool {
        self.red_allele_counts.iter().all(|&r| r == 0)
    }

    pub fn is_all_red(&self) -> bool {
        self.red_allele_counts
            .iter()
            .zip(self.allele_counts.iter())
            .all(|(r, n)| r == n)
    }

    pub fn is_constant(&self) -> bool {
        self.is_all_green() || self.is_all_red()
    }

    pub fn has_missing_population(&self) -> bool {
        self.allele_counts.iter().any(|&n| n == 0)
    }
}

/// Distinct biallelic site patterns with their multiplicities.
///
/// For dominant markers the "allele" counts are numbers of diploid
/// individuals and the red counts are individuals showing the dominant
/// phenotype.
#[derive(Debug, Clone)]
pub struct BiallelicData {
    population_labels: Vec<String>,
    patterns: Vec<SitePattern>,
    weights: Vec<u32>,
    lookup: HashMap<SitePattern, usize>,
    markers_are_dominant: bool,
    constant_sites_removed: u32,
    constant_green_sites_removed: u32,
    constant_red_sites_removed: u32,
    missing_sites_removed: u32,
}

impl BiallelicData {
    pub fn new(population_labels: Vec<String>, markers_are_dominant: bool) -> Result<Self> {
        if population_labels.is_empty() {
            return Err(ModelError::data("no populations in data"));
        }
        for (i, a) in population_labels.iter().enumerate() {
            if population_labels[..i].contains(a) {
                return Err(ModelError::data(format!("duplicate population label '{a}'")));
            }
        }
        Ok(Self {
            population_labels,
            patterns: Vec::new(),
            weights: Vec::new(),
            lookup: HashMap::new(),
            markers_are_dominant,
            constant_sites_removed: 0,
            constant_green_sites_removed: 0,
            constant_red_sites_removed: 0,
            missing_sites_removed: 0,
        })
    }

    /// Builds a data set from per-site `(red, total)` counts.
    pub fn from_sites(
        population_labels: Vec<String>,
        sites: &[Vec<(u32, u32)>],
        markers_are_dominant: bool,
    ) -> Result<Self> {
        let mut data = Self::new(population_labels, markers_are_dominant)?;
        for site in sites {
            let red = site.iter().map(|(r, _)| *r).collect();
            let n = site.iter().map(|(_, n)| *n).collect();
            data.add_site(SitePattern::new(red, n), 1)?;
        }
        Ok(data)
    }

    pub fn add_site(&mut self, pattern: SitePattern, weight: u32) -> Result<()> {
        let n_pops = self.population_labels.len();
        if pattern.red_allele_counts.len() != n_pops || pattern.allele_counts.len() != n_pops {
            return Err(ModelError::data(format!(
                "site has {} populations but data has {n_pops}",
                pattern.allele_counts.len()
            )));
        }
        for (r, n) in pattern.red_allele_counts.iter().zip(&pattern.allele_counts) {
            if r > n {
                return Err(ModelError::data(format!(
                    "red allele count {r} exceeds allele count {n}"
                )));
            }
        }
        if weight == 0 {
            return Ok(());
        }
        match self.lookup.get(&pattern) {
            Some(&i) => self.weights[i] += weight,
            None => {
                self.lookup.insert(pattern.clone(), self.patterns.len());
                self.patterns.push(pattern);
                self.weights.push(weight);
            }
        }
        Ok(())
    }

    pub fn population_labels(&self) -> &[String] {
        &self.population_labels
    }

    pub fn number_of_populations(&self) -> usize {
        self.population_labels.len()
    }

    pub fn number_of_patterns(&self) -> usize {
        self.patterns.len()
    }

    pub fn number_of_sites(&self) -> u32 {
        self.weights.iter().sum()
    }

    pub fn patterns(&self) -> &[SitePattern] {
        &self.patterns
    }

    pub fn pattern(&self, i: usize) -> &SitePattern {
        &self.patterns[i]
    }

    pub fn weight(&self, i: usize) -> u32 {
        self.weights[i]
    }

    pub fn weights(&self) -> &[u32] {
        &self.weights
    }

    pub fn markers_are_dominant(&self) -> bool {
        self.markers_are_dominant
    }

    pub fn has_constant_patterns(&self) -> bool {
        self.patterns.iter().any(SitePattern::is_constant)
    }

    pub fn has_missing_population_patterns(&self) -> bool {
        self.patterns.iter().any(SitePattern::has_missing_population)
    }

    pub fn number_of_constant_sites_removed(&self) -> u32 {
        self.constant_sites_removed
    }

    pub fn number_of_constant_green_sites_removed(&self) -> u32 {
        self.constant_green_sites_removed
    }

    pub fn number_of_constant_red_sites_removed(&self) -> u32 {
        self.constant_red_sites_removed
    }

    pub fn number_of_missing_sites_removed(&self) -> u32 {
        self.missing_sites_removed
    }

    /// Drops constant patterns, returning the number of sites removed.
    pub fn remove_constant_patterns(&mut self) -> u32 {
        let mut green = 0;
        let mut red = 0;
        self.retain_patterns(|p, w| {
            if p.is_all_green() {
                green += w;
                false
            } else if p.is_all_red() {
                red += w;
                false
            } else {
                true
            }
        });
        self.constant_green_sites_removed += green;
        self.constant_red_sites_removed += red;
        self.constant_sites_removed += green + red;
        green + red
    }

    /// Drops patterns where at least one population has no sampled alleles.
    pub fn remove_missing_population_patterns(&mut self) -> u32 {
        let mut removed = 0;
        self.retain_patterns(|p, w| {
            if p.has_missing_population() {
                removed += w;
                false
            } else {
                true
            }
        });
        self.missing_sites_removed += removed;
        removed
    }

    fn retain_patterns<F: FnMut(&SitePattern, u32) -> bool>(&mut self, mut keep: F) {
        let patterns = std::mem::take(&mut self.patterns);
        let weights = std::mem::take(&mut self.weights);
        self.lookup.clear();
        for (p, w) in patterns.into_iter().zip(weights) {
            if keep(&p, w) {
                self.lookup.insert(p.clone(), self.patterns.len());
                self.patterns.push(p);
                self.weights.push(w);
            }
        }
    }

    /// Distinct allele-count configurations with their site counts, in order
    /// of first appearance.
    pub fn unique_allele_counts(&self) -> Vec<(Vec<u32>, u32)> {
        let mut out: Vec<(Vec<u32>, u32)> = Vec::new();
        for (p, &w) in self.patterns.iter().zip(&self.weights) {
            match out.iter_mut().find(|(c, _)| *c == p.allele_counts) {
                Some((_, total)) => *total += w,
                None => out.push((p.allele_counts.clone(), w)),
            }
        }
        out
    }

    /// Largest allele count observed for each population.
    pub fn max_allele_counts(&self) -> Vec<u32> {
        let mut out = vec![0u32; self.population_labels.len()];
        for p in &self.patterns {
            for (m, &n) in out.iter_mut().zip(&p.allele_counts) {
                *m = (*m).max(n);
            }
        }
        out
    }

    /// Keeps only the listed populations, in the given order.
    pub fn subset(&self, labels: &[String]) -> Result<Self> {
        let mut cols = Vec::with_capacity(labels.len());
        for l in labels {
            match self.population_labels.iter().position(|p| p == l) {
                Some(i) => cols.push(i),
                None => return Err(ModelError::data(format!("population '{l}' not in data"))),
            }
        }
        let mut out = Self::new(labels.to_vec(), self.markers_are_dominant)?;
        for (p, &w) in self.patterns.iter().zip(&self.weights) {
            let red = cols.iter().map(|&c| p.red_allele_counts[c]).collect();
            let n = cols.iter().map(|&c| p.allele_counts[c]).collect();
            out.add_site(SitePattern::new(red, n), w)?;
        }
        Ok(out)
    }
}
