//! Height and topology operators on [`GeneralTree`].

use rand::rngs::SmallRng;

use super::{
    Kernel, Operator, OperatorBase, OperatorCategory, ScaleKernel, metropolis_hastings_step,
};
use crate::error::Result;
use crate::general_tree::GeneralTree;
use crate::random::{uniform, uniform_int, uniform_range};

/// Scales one internal height together with every internal height below
/// it, so descendants are bumped along instead of blocking the move.
#[derive(Debug, Clone)]
pub struct NodeHeightSlideBumpScaler {
    base: OperatorBase,
}

impl NodeHeightSlideBumpScaler {
    pub fn new(weight: f64, scale: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::Scale(ScaleKernel::new(scale))),
        }
    }
}

impl Operator<GeneralTree> for NodeHeightSlideBumpScaler {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "NodeHeightSlideBumpScaler"
    }

    fn category(&self) -> OperatorCategory {
        OperatorCategory::TimeOperator
    }

    fn propose(&mut self, rng: &mut SmallRng, tree: &mut GeneralTree) -> Result<f64> {
        let candidates = tree.free_internal_nodes();
        if candidates.is_empty() {
            return Ok(f64::NEG_INFINITY);
        }
        let node = candidates[uniform_int(rng, 0, candidates.len() - 1)];
        let m = self.base.scale_kernel().draw_multiplier(rng);
        let new_height = tree.height(node) * m;
        if let Some(p) = tree.node(node).parent
            && new_height >= tree.height(p)
        {
            return Ok(f64::NEG_INFINITY);
        }
        let moved = tree.internal_subtree(node);
        for &i in &moved {
            let v = tree.height(i) * m;
            tree.set_height(i, v);
        }
        Ok(moved.len() as f64 * m.ln())
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        tree: &mut GeneralTree,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        if tree.free_internal_nodes().is_empty() {
            return Ok(false);
        }
        metropolis_hastings_step(rng, tree, self, nthreads, optimize)
    }
}

/// Narrow exchange: a child of a non-root node trades places with that
/// node's sibling, provided the sibling is younger than the node.
#[derive(Debug, Clone)]
pub struct NeighborHeightNodeSwap {
    base: OperatorBase,
}

impl NeighborHeightNodeSwap {
    pub fn new(weight: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::None),
        }
    }
}

impl Operator<GeneralTree> for NeighborHeightNodeSwap {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "NeighborHeightNodeSwap"
    }

    fn category(&self) -> OperatorCategory {
        OperatorCategory::RjOperator
    }

    fn propose(&mut self, rng: &mut SmallRng, tree: &mut GeneralTree) -> Result<f64> {
        let candidates = tree.non_root_internal_nodes();
        if candidates.is_empty() {
            return Ok(f64::NEG_INFINITY);
        }
        let node = candidates[uniform_int(rng, 0, candidates.len() - 1)];
        let Some(parent) = tree.node(node).parent else {
            return Ok(f64::NEG_INFINITY);
        };
        let children = tree.node(node).children.clone();
        let child = children[uniform_int(rng, 0, children.len() - 1)];
        let siblings: Vec<usize> = tree
            .node(parent)
            .children
            .iter()
            .copied()
            .filter(|&s| s != node)
            .collect();
        if siblings.is_empty() {
            return Ok(f64::NEG_INFINITY);
        }
        let sibling = siblings[uniform_int(rng, 0, siblings.len() - 1)];
        if tree.height(sibling) >= tree.height(node) {
            return Ok(f64::NEG_INFINITY);
        }
        tree.swap_parents(child, sibling)?;
        Ok(0.0)
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        tree: &mut GeneralTree,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        if tree.non_root_internal_nodes().is_empty() {
            return Ok(false);
        }
        metropolis_hastings_step(rng, tree, self, nthreads, optimize)
    }
}

fn split_probability(tree: &GeneralTree) -> f64 {
    let can_split = !tree.polytomies().is_empty();
    let can_lump = !tree.non_root_internal_nodes().is_empty();
    match (can_split, can_lump) {
        (false, _) => 0.0,
        (true, false) => 1.0,
        (true, true) => 0.5,
    }
}

fn lump_probability(tree: &GeneralTree) -> f64 {
    if tree.non_root_internal_nodes().is_empty() {
        0.0
    } else {
        1.0 - split_probability(tree)
    }
}

/// `ln(2^k - k - 2)`: subsets of `k` children with between 2 and `k - 1`
/// members.
fn ln_number_of_subsets(k: usize) -> f64 {
    let kf = k as f64;
    (2f64.powf(kf) - kf - 2.0).ln()
}

/// Reversible-jump move between a polytomy and the trees that resolve it
/// by one node.
///
/// Split: pick a polytomy, a subset of 2..k-1 of its children, and a height
/// for the new parent of that subset drawn uniformly between the oldest
/// child in the subset and the polytomy. Lump: pick a non-root internal
/// node and collapse it into its parent.
#[derive(Debug, Clone)]
pub struct SplitLumpNodesRevJumpSampler {
    base: OperatorBase,
}

impl SplitLumpNodesRevJumpSampler {
    pub fn new(weight: f64) -> Self {
        Self {
            base: OperatorBase::new(weight, Kernel::None),
        }
    }

    fn propose_split(&self, rng: &mut SmallRng, tree: &mut GeneralTree) -> Result<f64> {
        let ln_p_split = split_probability(tree).ln();
        let polytomies = tree.polytomies();
        let node = polytomies[uniform_int(rng, 0, polytomies.len() - 1)];
        let children = tree.node(node).children.clone();
        let k = children.len();
        let subset = loop {
            let s: Vec<usize> = children.iter().copied().filter(|_| uniform(rng) < 0.5).collect();
            if s.len() >= 2 && s.len() < k {
                break s;
            }
        };
        let lower = subset.iter().map(|&c| tree.height(c)).fold(0.0, f64::max);
        let upper = tree.height(node);
        let height = uniform_range(rng, lower, upper);
        if !(height > lower && height < upper) {
            return Ok(f64::NEG_INFINITY);
        }
        tree.split_children(node, &subset, height)?;

        let lumpable_after = tree.non_root_internal_nodes().len() as f64;
        Ok(lump_probability(tree).ln() - lumpable_after.ln() - ln_p_split
            + (polytomies.len() as f64).ln()
            + ln_number_of_subsets(k)
            + (upper - lower).ln())
    }

    fn propose_lump(&self, rng: &mut SmallRng, tree: &mut GeneralTree) -> Result<f64> {
        let ln_p_lump = lump_probability(tree).ln();
        let candidates = tree.non_root_internal_nodes();
        let node = candidates[uniform_int(rng, 0, candidates.len() - 1)];
        let lower = tree.max_child_height(node);
        let parent = tree.lump_node(node)?;
        let upper = tree.height(parent);
        let k = tree.node(parent).children.len();

        let polytomies_after = tree.polytomies().len() as f64;
        Ok(split_probability(tree).ln() - polytomies_after.ln()
            - ln_number_of_subsets(k)
            - (upper - lower).ln()
            - ln_p_lump
            + (candidates.len() as f64).ln())
    }
}

impl Operator<GeneralTree> for SplitLumpNodesRevJumpSampler {
    fn base(&self) -> &OperatorBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut OperatorBase {
        &mut self.base
    }

    fn name(&self) -> &'static str {
        "SplitLumpNodesRevJumpSampler"
    }

    fn category(&self) -> OperatorCategory {
        OperatorCategory::RjOperator
    }

    fn propose(&mut self, rng: &mut SmallRng, tree: &mut GeneralTree) -> Result<f64> {
        let p_split = split_probability(tree);
        if p_split == 0.0 && lump_probability(tree) == 0.0 {
            return Ok(f64::NEG_INFINITY);
        }
        if uniform(rng) < p_split {
            self.propose_split(rng, tree)
        } else {
            self.propose_lump(rng, tree)
        }
    }

    fn operate(
        &mut self,
        rng: &mut SmallRng,
        tree: &mut GeneralTree,
        nthreads: usize,
        optimize: bool,
    ) -> Result<bool> {
        metropolis_hastings_step(rng, tree, self, nthreads, optimize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_counts() {
        assert!((ln_number_of_subsets(3) - 3f64.ln()).abs() < 1e-12);
        assert!((ln_number_of_subsets(4) - 10f64.ln()).abs() < 1e-12);
    }
}
