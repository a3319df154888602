use crate::pattern::BiallelicPatternProbabilityMatrix;

/// A population in a [`PopulationTree`](crate::tree::PopulationTree) arena.
///
/// Parent and children are indices into the arena; the population size is
/// an index into the tree's population-size parameters so that several nodes
/// can share one size.
#[derive(Debug, Clone)]
pub struct PopulationNode {
    pub label: String,
    pub height: f64,
    pub population_size_index: usize,
    /// Column of the data matrix for leaves.
    pub population_index: Option<usize>,
    pub allele_count: u32,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub bottom: BiallelicPatternProbabilityMatrix,
    pub top: BiallelicPatternProbabilityMatrix,
}

impl PopulationNode {
    pub fn leaf(
        label: impl Into<String>,
        population_index: usize,
        population_size_index: usize,
    ) -> Self {
        Self {
            label: label.into(),
            height: 0.0,
            population_size_index,
            population_index: Some(population_index),
            allele_count: 0,
            parent: None,
            children: Vec::new(),
            bottom: BiallelicPatternProbabilityMatrix::new(0),
            top: BiallelicPatternProbabilityMatrix::new(0),
        }
    }

    pub fn internal(label: impl Into<String>, height: f64, population_size_index: usize) -> Self {
        Self {
            label: label.into(),
            height,
            population_size_index,
            population_index: None,
            allele_count: 0,
            parent: None,
            children: Vec::new(),
            bottom: BiallelicPatternProbabilityMatrix::new(0),
            top: BiallelicPatternProbabilityMatrix::new(0),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Attaches `child` under `parent`.
pub fn add_child(nodes: &mut [PopulationNode], parent: usize, child: usize) {
    nodes[child].parent = Some(parent);
    nodes[parent].children.push(child);
}

/// Branch length above `idx` (zero for the root).
pub fn branch_length(nodes: &[PopulationNode], idx: usize) -> f64 {
    match nodes[idx].parent {
        Some(p) => nodes[p].height - nodes[idx].height,
        None => 0.0,
    }
}

/// Node indices in post-order starting from `root`.
pub fn post_order(nodes: &[PopulationNode], root: usize) -> Vec<usize> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut stack = vec![(root, false)];
    while let Some((idx, expanded)) = stack.pop() {
        if expanded {
            out.push(idx);
            continue;
        }
        stack.push((idx, true));
        for &c in nodes[idx].children.iter().rev() {
            stack.push((c, false));
        }
    }
    out
}
