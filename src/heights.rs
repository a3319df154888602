//! Pool of shared event times.
//!
//! Every item (a comparison) points at exactly one height; a height lives
//! only while at least one item points at it. Sharing a height between
//! comparisons is expressed as equal indices.

use crate::distributions::ContinuousDistribution;
use crate::error::{ModelError, Result};
use crate::parameter::Parameter;

#[derive(Debug, Clone, PartialEq)]
pub struct HeightPool {
    heights: Vec<Parameter>,
    indices: Vec<usize>,
    prior: Option<ContinuousDistribution>,
    stored_heights: Vec<Parameter>,
    stored_indices: Vec<usize>,
}

impl HeightPool {
    /// Builds a pool from heights and a surjective item → height mapping.
    pub fn new(
        heights: Vec<Parameter>,
        indices: Vec<usize>,
        prior: Option<ContinuousDistribution>,
    ) -> Result<Self> {
        let pool = Self {
            stored_heights: heights.clone(),
            stored_indices: indices.clone(),
            heights,
            indices,
            prior,
        };
        pool.check_invariants()?;
        Ok(pool)
    }

    /// Builds a pool from partition labels, one height per block, with
    /// values from `values` (indexed by block).
    pub fn from_partition(
        labels: &[usize],
        values: &[f64],
        prior: Option<ContinuousDistribution>,
        fixed: bool,
    ) -> Result<Self> {
        let mut heights = Vec::with_capacity(values.len());
        for &v in values {
            heights.push(Parameter::positive(v, prior.clone(), fixed)?);
        }
        Self::new(heights, labels.to_vec(), prior)
    }

    pub fn check_invariants(&self) -> Result<()> {
        let mut counts = vec![0usize; self.heights.len()];
        for (item, &h) in self.indices.iter().enumerate() {
            if h >= self.heights.len() {
                return Err(ModelError::invariant(format!(
                    "item {item} maps to height {h} but only {} heights exist",
                    self.heights.len()
                )));
            }
            counts[h] += 1;
        }
        if let Some(h) = counts.iter().position(|&c| c == 0) {
            return Err(ModelError::invariant(format!("height {h} is not referenced")));
        }
        Ok(())
    }

    pub fn number_of_events(&self) -> usize {
        self.heights.len()
    }

    pub fn number_of_items(&self) -> usize {
        self.indices.len()
    }

    pub fn heights(&self) -> &[Parameter] {
        &self.heights
    }

    pub fn height(&self, i: usize) -> f64 {
        self.heights[i].value()
    }

    pub fn height_parameter(&self, i: usize) -> &Parameter {
        &self.heights[i]
    }

    pub fn set_height(&mut self, i: usize, value: f64) {
        self.heights[i].set_value(value);
    }

    pub fn prior(&self) -> Option<&ContinuousDistribution> {
        self.prior.as_ref()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn index_of(&self, item: usize) -> usize {
        self.indices[item]
    }

    pub fn height_of(&self, item: usize) -> f64 {
        self.heights[self.indices[item]].value()
    }

    pub fn number_of_items_mapped_to_height(&self, h: usize) -> usize {
        self.indices.iter().filter(|&&i| i == h).count()
    }

    pub fn indices_of_mapped_items(&self, h: usize) -> Vec<usize> {
        self.indices
            .iter()
            .enumerate()
            .filter(|&(_, &i)| i == h)
            .map(|(item, _)| item)
            .collect()
    }

    /// Appends a new height and returns its index. The caller must map at
    /// least one item to it before the next invariant check.
    pub fn add_height(&mut self, value: f64) -> Result<usize> {
        self.heights
            .push(Parameter::positive(value, self.prior.clone(), false)?);
        Ok(self.heights.len() - 1)
    }

    /// Removes an unreferenced height, shifting larger indices down by one.
    pub fn remove_height(&mut self, h: usize) -> Result<()> {
        if h >= self.heights.len() {
            return Err(ModelError::invariant(format!(
                "cannot remove height {h} of {}",
                self.heights.len()
            )));
        }
        if self.indices.contains(&h) {
            return Err(ModelError::invariant(format!(
                "cannot remove height {h}: it is still referenced"
            )));
        }
        self.heights.remove(h);
        for i in &mut self.indices {
            if *i > h {
                *i -= 1;
            }
        }
        Ok(())
    }

    /// Points `item` at height `h`, removing its old height if orphaned.
    /// Returns the (possibly shifted) index of `h`.
    pub fn remap_item(&mut self, item: usize, h: usize) -> Result<usize> {
        if h >= self.heights.len() {
            return Err(ModelError::invariant(format!(
                "cannot map item {item} to height {h} of {}",
                self.heights.len()
            )));
        }
        let old = self.indices[item];
        self.indices[item] = h;
        if old != h && !self.indices.contains(&old) {
            self.remove_height(old)?;
            if h > old {
                return Ok(h - 1);
            }
        }
        Ok(h)
    }

    /// Moves every item at `h` onto `target` and removes `h`. Returns the
    /// index of `target` after removal.
    pub fn merge_height(&mut self, h: usize, target: usize) -> Result<usize> {
        if h == target {
            return Err(ModelError::invariant(format!("cannot merge height {h} into itself")));
        }
        if h >= self.heights.len() || target >= self.heights.len() {
            return Err(ModelError::invariant(format!(
                "cannot merge height {h} into {target} with {} heights",
                self.heights.len()
            )));
        }
        for i in &mut self.indices {
            if *i == h {
                *i = target;
            }
        }
        self.remove_height(h)?;
        Ok(if target > h { target - 1 } else { target })
    }

    /// Creates a height at `value` and moves `item` onto it. Returns the
    /// index of the new height.
    pub fn map_item_to_new_height(&mut self, item: usize, value: f64) -> Result<usize> {
        let new = self.add_height(value)?;
        self.remap_item(item, new)
    }

    /// Indices relabelled 0, 1, ... in order of first appearance.
    pub fn standardized_indices(&self) -> Vec<usize> {
        crate::random::standardize_labels(&self.indices)
    }

    /// Index of the largest height strictly below height `h`.
    ///
    /// Returns `h` itself when none exists and `allow_smallest_index` is set.
    pub fn nearest_smaller_height_index(
        &self,
        h: usize,
        allow_smallest_index: bool,
    ) -> Result<usize> {
        let reference = self.heights[h].value();
        let mut best: Option<usize> = None;
        for (i, p) in self.heights.iter().enumerate() {
            let v = p.value();
            if i == h || v >= reference {
                continue;
            }
            if best.is_none_or(|b| reference - v < reference - self.heights[b].value()) {
                best = Some(i);
            }
        }
        match best {
            Some(i) => Ok(i),
            None if allow_smallest_index => Ok(h),
            None => Err(ModelError::invariant(format!(
                "height {h} is the smallest and that was not allowed"
            ))),
        }
    }

    /// Index of the smallest height strictly above height `h`.
    ///
    /// Returns `h` itself when none exists and `allow_largest_index` is set.
    pub fn nearest_larger_height_index(
        &self,
        h: usize,
        allow_largest_index: bool,
    ) -> Result<usize> {
        let reference = self.heights[h].value();
        let mut best: Option<usize> = None;
        for (i, p) in self.heights.iter().enumerate() {
            let v = p.value();
            if i == h || v <= reference {
                continue;
            }
            if best.is_none_or(|b| v - reference < self.heights[b].value() - reference) {
                best = Some(i);
            }
        }
        match best {
            Some(i) => Ok(i),
            None if allow_largest_index => Ok(h),
            None => Err(ModelError::invariant(format!(
                "height {h} is the largest and that was not allowed"
            ))),
        }
    }

    /// Value of the nearest smaller height, or 0 when `h` is the smallest.
    pub fn nearest_smaller_height(&self, h: usize) -> f64 {
        match self.nearest_smaller_height_index(h, true) {
            Ok(i) if i != h => self.heights[i].value(),
            _ => 0.0,
        }
    }

    /// Value of the nearest larger height, or `+inf` when `h` is the largest.
    pub fn nearest_larger_height(&self, h: usize) -> f64 {
        match self.nearest_larger_height_index(h, true) {
            Ok(i) if i != h => self.heights[i].value(),
            _ => f64::INFINITY,
        }
    }

    /// The height farthest from `h` that a move of `h` by `delta` passes
    /// over, or `h` when the move crosses no other height.
    pub fn distal_height_index_within_move(&self, h: usize, delta: f64) -> usize {
        let start = self.heights[h].value();
        let end = start + delta;
        let mut distal = h;
        let mut distal_dist = 0.0;
        for (i, p) in self.heights.iter().enumerate() {
            if i == h {
                continue;
            }
            let v = p.value();
            let crossed = if delta > 0.0 {
                v > start && v <= end
            } else {
                v < start && v >= end
            };
            if crossed && (v - start).abs() > distal_dist {
                distal = i;
                distal_dist = (v - start).abs();
            }
        }
        distal
    }

    pub fn ln_prior(&self) -> f64 {
        self.heights.iter().map(Parameter::relative_prior_ln_pdf).sum()
    }

    pub fn store(&mut self) {
        for p in &mut self.heights {
            p.store();
        }
        self.stored_heights.clone_from(&self.heights);
        self.stored_indices.clone_from(&self.indices);
    }

    pub fn restore(&mut self) {
        self.heights.clone_from(&self.stored_heights);
        self.indices.clone_from(&self.stored_indices);
    }
}
