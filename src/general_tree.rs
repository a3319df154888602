//! Rooted, possibly multifurcating trees with a height on every internal
//! node. Used to sample node heights and topologies from their prior.

use crate::distributions::ContinuousDistribution;
use crate::error::{ModelError, Result};
use crate::mcmc::McmcTarget;
use crate::parameter::Parameter;
use crate::utils::ln_beta_pdf;

/// Prior on node heights: each non-root height divided by its parent's
/// height is `Beta(alpha, beta)`; the root height is fixed when
/// `root_height_prior` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHeightPrior {
    pub root_height_prior: Option<ContinuousDistribution>,
    pub alpha: f64,
    pub beta: f64,
}

impl Default for NodeHeightPrior {
    fn default() -> Self {
        Self {
            root_height_prior: None,
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneralTreeNode {
    pub label: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub height: Parameter,
}

impl GeneralTreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    nodes: Vec<GeneralTreeNode>,
    root: usize,
    log_prior: f64,
}

/// Leaves occupy the first slots of the arena and never move; internal
/// nodes follow in no particular order.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralTree {
    nodes: Vec<GeneralTreeNode>,
    root: usize,
    number_of_leaves: usize,
    prior: NodeHeightPrior,
    log_prior: f64,
    stored: Snapshot,
}

impl GeneralTree {
    /// A star tree: every leaf attached directly to the root.
    pub fn star(leaf_labels: &[&str], root_height: f64, prior: NodeHeightPrior) -> Result<Self> {
        if leaf_labels.len() < 2 {
            return Err(ModelError::config("a tree needs at least two leaves"));
        }
        if prior.alpha <= 0.0 || prior.beta <= 0.0 {
            return Err(ModelError::config("beta prior on relative heights needs positive shapes"));
        }
        if let Some(p) = &prior.root_height_prior {
            p.validate()?;
        }
        let mut nodes: Vec<GeneralTreeNode> = leaf_labels
            .iter()
            .map(|l| GeneralTreeNode {
                label: (*l).to_string(),
                parent: None,
                children: Vec::new(),
                height: Parameter::fixed_value(0.0),
            })
            .collect();
        let root = nodes.len();
        let root_height = Parameter::positive(
            root_height,
            prior.root_height_prior.clone(),
            prior.root_height_prior.is_none(),
        )?;
        nodes.push(GeneralTreeNode {
            label: "root".to_string(),
            parent: None,
            children: (0..root).collect(),
            height: root_height,
        });
        for n in nodes.iter_mut().take(root) {
            n.parent = Some(root);
        }
        let mut tree = Self {
            stored: Snapshot {
                nodes: nodes.clone(),
                root,
                log_prior: 0.0,
            },
            nodes,
            root,
            number_of_leaves: leaf_labels.len(),
            prior,
            log_prior: 0.0,
        };
        tree.compute_log_prior_density();
        tree.stored.log_prior = tree.log_prior;
        Ok(tree)
    }

    pub fn nodes(&self) -> &[GeneralTreeNode] {
        &self.nodes
    }

    pub fn node(&self, i: usize) -> &GeneralTreeNode {
        &self.nodes[i]
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn number_of_leaves(&self) -> usize {
        self.number_of_leaves
    }

    pub fn number_of_internal_nodes(&self) -> usize {
        self.nodes.len() - self.number_of_leaves
    }

    pub fn height(&self, i: usize) -> f64 {
        self.nodes[i].height.value()
    }

    pub fn set_height(&mut self, i: usize, value: f64) {
        self.nodes[i].height.set_value(value);
    }

    pub fn root_height_is_fixed(&self) -> bool {
        self.nodes[self.root].height.is_fixed()
    }

    pub fn internal_nodes(&self) -> Vec<usize> {
        (self.number_of_leaves..self.nodes.len()).collect()
    }

    /// Internal nodes whose height may move.
    pub fn free_internal_nodes(&self) -> Vec<usize> {
        self.internal_nodes()
            .into_iter()
            .filter(|&i| i != self.root || !self.root_height_is_fixed())
            .collect()
    }

    /// Internal nodes other than the root.
    pub fn non_root_internal_nodes(&self) -> Vec<usize> {
        self.internal_nodes().into_iter().filter(|&i| i != self.root).collect()
    }

    /// Internal nodes with more than two children.
    pub fn polytomies(&self) -> Vec<usize> {
        self.internal_nodes()
            .into_iter()
            .filter(|&i| self.nodes[i].children.len() > 2)
            .collect()
    }

    pub fn is_resolved(&self) -> bool {
        self.polytomies().is_empty()
    }

    pub fn max_child_height(&self, i: usize) -> f64 {
        self.nodes[i]
            .children
            .iter()
            .map(|&c| self.height(c))
            .fold(0.0, f64::max)
    }

    /// `i` followed by every internal node below it.
    pub fn internal_subtree(&self, i: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![i];
        while let Some(n) = stack.pop() {
            if self.nodes[n].is_leaf() {
                continue;
            }
            out.push(n);
            stack.extend(self.nodes[n].children.iter().copied());
        }
        out
    }

    /// Moves `children` of `parent` under a new node at `height` and
    /// returns the new node's index.
    pub fn split_children(
        &mut self,
        parent: usize,
        children: &[usize],
        height: f64,
    ) -> Result<usize> {
        let n_children = self.nodes[parent].children.len();
        if children.len() < 2 || children.len() >= n_children {
            return Err(ModelError::invariant(format!(
                "cannot split {} of {n_children} children off node {parent}",
                children.len()
            )));
        }
        if children.iter().any(|c| !self.nodes[parent].children.contains(c)) {
            return Err(ModelError::invariant(format!(
                "split of node {parent} names a node that is not its child"
            )));
        }
        let new = self.nodes.len();
        self.nodes.push(GeneralTreeNode {
            label: format!("internal{new}"),
            parent: Some(parent),
            children: children.to_vec(),
            height: Parameter::positive(height, None, false)?,
        });
        for &c in children {
            self.nodes[c].parent = Some(new);
        }
        self.nodes[parent].children.retain(|c| !children.contains(c));
        self.nodes[parent].children.push(new);
        Ok(new)
    }

    /// Removes non-root internal node `i`, attaching its children to its
    /// parent. Returns the parent's index after the arena is compacted.
    pub fn lump_node(&mut self, i: usize) -> Result<usize> {
        let Some(parent) = self.nodes[i].parent else {
            return Err(ModelError::invariant("cannot lump the root"));
        };
        if self.nodes[i].is_leaf() {
            return Err(ModelError::invariant(format!("cannot lump leaf {i}")));
        }
        let children = std::mem::take(&mut self.nodes[i].children);
        for &c in &children {
            self.nodes[c].parent = Some(parent);
        }
        self.nodes[parent].children.retain(|&c| c != i);
        self.nodes[parent].children.extend(children);
        self.remove_slot(i);
        let last = self.nodes.len();
        Ok(if parent == last { i } else { parent })
    }

    /// Swap-removes a detached slot, renumbering the node moved into it.
    fn remove_slot(&mut self, i: usize) {
        let last = self.nodes.len() - 1;
        self.nodes.swap_remove(i);
        if i == last {
            return;
        }
        if let Some(p) = self.nodes[i].parent {
            for c in &mut self.nodes[p].children {
                if *c == last {
                    *c = i;
                }
            }
        }
        let children = self.nodes[i].children.clone();
        for c in children {
            self.nodes[c].parent = Some(i);
        }
        if self.root == last {
            self.root = i;
        }
    }

    /// Exchanges the parents of `a` and `b`.
    pub fn swap_parents(&mut self, a: usize, b: usize) -> Result<()> {
        let (Some(pa), Some(pb)) = (self.nodes[a].parent, self.nodes[b].parent) else {
            return Err(ModelError::invariant("cannot swap the root"));
        };
        for c in &mut self.nodes[pa].children {
            if *c == a {
                *c = b;
            }
        }
        for c in &mut self.nodes[pb].children {
            if *c == b {
                *c = a;
            }
        }
        self.nodes[a].parent = Some(pb);
        self.nodes[b].parent = Some(pa);
        Ok(())
    }

    /// Canonical topology string with children sorted by label, e.g.
    /// `((a,b),c)`. Heights are not included.
    pub fn topology(&self) -> String {
        self.clade_string(self.root)
    }

    fn clade_string(&self, i: usize) -> String {
        let n = &self.nodes[i];
        if n.is_leaf() {
            return n.label.clone();
        }
        let mut parts: Vec<String> = n.children.iter().map(|&c| self.clade_string(c)).collect();
        parts.sort();
        format!("({})", parts.join(","))
    }

    /// Relative-height Beta prior for every non-root internal node plus the
    /// root height prior. The topology prior is uniform and omitted.
    pub fn compute_log_prior_density(&mut self) -> f64 {
        let mut lp = self.nodes[self.root].height.relative_prior_ln_pdf();
        for i in self.non_root_internal_nodes() {
            let parent = self.nodes[i].parent.unwrap_or(self.root);
            let hp = self.height(parent);
            lp += ln_beta_pdf(self.height(i) / hp, self.prior.alpha, self.prior.beta) - hp.ln();
        }
        for i in self.internal_nodes() {
            if self.height(i) <= self.max_child_height(i) {
                lp = f64::NEG_INFINITY;
            }
        }
        self.log_prior = lp;
        lp
    }
}

impl McmcTarget for GeneralTree {
    fn store_state(&mut self) {
        self.stored.nodes.clone_from(&self.nodes);
        self.stored.root = self.root;
        self.stored.log_prior = self.log_prior;
    }

    fn restore_state(&mut self) {
        self.nodes.clone_from(&self.stored.nodes);
        self.root = self.stored.root;
        self.log_prior = self.stored.log_prior;
    }

    fn compute_log_likelihood_and_prior(&mut self, _nthreads: usize) -> Result<()> {
        self.compute_log_prior_density();
        Ok(())
    }

    fn log_likelihood(&self) -> f64 {
        0.0
    }

    fn log_prior_density(&self) -> f64 {
        self.log_prior
    }
}
