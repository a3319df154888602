use ecodiv_rs::data::SitePattern;
use ecodiv_rs::error::ModelError;
use ecodiv_rs::expm::MatrixExponentiator;
use ecodiv_rs::likelihood::{
    BranchModel, PruningWorkspace, dominant_leaf_probabilities, merge_top_of_branch_partials,
};
use ecodiv_rs::node::{PopulationNode, add_child, post_order};
use ecodiv_rs::pattern::{BiallelicPatternProbabilityMatrix, pattern_len};
use ecodiv_rs::qmatrix::QMatrix;
use ecodiv_rs::random::{new_rng, uniform};
use ecodiv_rs::utils::choose;

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

fn random_matrix(allele_count: u32, seed: u64) -> BiallelicPatternProbabilityMatrix {
    let mut rng = new_rng(seed);
    let values = (0..pattern_len(allele_count)).map(|_| uniform(&mut rng)).collect();
    BiallelicPatternProbabilityMatrix::from_values(allele_count, values).expect("sized values")
}

#[test]
fn dominant_leaf_probabilities_sum_to_one_over_phenotypes() {
    for n in 1..=5u32 {
        let per_k: Vec<_> = (0..=n).map(|k| dominant_leaf_probabilities(n, k)).collect();
        for r in 0..=2 * n {
            let total: f64 = per_k.iter().map(|m| m.get(2 * n, r)).sum();
            approx_eq(total, 1.0, 1e-12);
        }
    }
}

#[test]
fn dominant_leaf_probabilities_match_hand_table() {
    // One individual: no red allele -> recessive, any red allele -> dominant.
    let recessive = dominant_leaf_probabilities(1, 0);
    let dominant = dominant_leaf_probabilities(1, 1);
    approx_eq(recessive.get(2, 0), 1.0, 1e-12);
    approx_eq(dominant.get(2, 1), 1.0, 1e-12);
    approx_eq(dominant.get(2, 2), 1.0, 1e-12);
    // Two individuals, one dominant, two red alleles: both reds in one
    // individual (2 of the C(4, 2) = 6 placements).
    let m = dominant_leaf_probabilities(2, 1);
    approx_eq(m.get(4, 2), 2.0 / 6.0, 1e-12);
}

/// Direct sum over every split of `(n, r)` across three tips.
fn brute_force_three(
    a: &BiallelicPatternProbabilityMatrix,
    b: &BiallelicPatternProbabilityMatrix,
    c: &BiallelicPatternProbabilityMatrix,
) -> BiallelicPatternProbabilityMatrix {
    let n_max = a.allele_count() + b.allele_count() + c.allele_count();
    let mut out = BiallelicPatternProbabilityMatrix::new(n_max);
    for n1 in 1..=a.allele_count() {
        for r1 in 0..=n1 {
            for n2 in 1..=b.allele_count() {
                for r2 in 0..=n2 {
                    for n3 in 1..=c.allele_count() {
                        for r3 in 0..=n3 {
                            let n = n1 + n2 + n3;
                            let r = r1 + r2 + r3;
                            let w = choose(n1, r1) * choose(n2, r2) * choose(n3, r3) / choose(n, r);
                            let p = a.get(n1, r1) * b.get(n2, r2) * c.get(n3, r3);
                            let v = out.get(n, r) + w * p;
                            out.set(n, r, v);
                        }
                    }
                }
            }
        }
    }
    out
}

#[test]
fn pairwise_convolution_matches_three_tip_enumeration() {
    let a = random_matrix(2, 1);
    let b = random_matrix(3, 2);
    let c = random_matrix(2, 3);

    let ab_c = merge_top_of_branch_partials(&merge_top_of_branch_partials(&a, &b), &c);
    let a_bc = merge_top_of_branch_partials(&a, &merge_top_of_branch_partials(&b, &c));
    let direct = brute_force_three(&a, &b, &c);

    assert_eq!(ab_c.allele_count(), 7);
    for (i, expected) in direct.values().iter().enumerate() {
        approx_eq(ab_c.values()[i], *expected, 1e-12);
        approx_eq(a_bc.values()[i], *expected, 1e-12);
    }
}

#[test]
fn convolution_of_point_masses_is_hypergeometric_weighting() {
    // One red of one lineage joined with zero red of one lineage.
    let a = BiallelicPatternProbabilityMatrix::from_counts(1, 1);
    let b = BiallelicPatternProbabilityMatrix::from_counts(1, 0);
    let m = merge_top_of_branch_partials(&a, &b);
    approx_eq(m.get(2, 1), 0.5, 1e-15);
    approx_eq(m.get(2, 0), 0.0, 1e-15);
    approx_eq(m.get(2, 2), 0.0, 1e-15);
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn orthogonal_vector_is_a_left_null_vector() {
    let model = BranchModel::from_freq(0.3, 1.0, 2);
    let q = QMatrix::new(5, model.u, model.v, model.theta(0.05));
    let pi = q.find_orthogonal_vector().expect("null vector");
    let dim = q.dim();
    let mut unit = vec![0.0; dim];
    let mut col = vec![0.0; dim];
    for j in 0..dim {
        unit.iter_mut().for_each(|v| *v = 0.0);
        unit[j] = 1.0;
        q.multiply(&unit, &mut col);
        approx_eq(dot(&pi, &col), 0.0, 1e-9);
    }
    // n = 1 entries are the stationary allele frequencies.
    approx_eq(pi[0] + pi[1], 1.0, 1e-12);
    approx_eq(pi[1], 0.3, 1e-12);
}

#[test]
fn exponentiation_preserves_the_stationary_projection() {
    let model = BranchModel::from_freq(0.5, 1.0, 2);
    let theta = model.theta(0.02);
    let q = QMatrix::new(4, model.u, model.v, theta);
    let pi = q.find_orthogonal_vector().expect("null vector");
    let x = random_matrix(4, 11);
    let mut expm = MatrixExponentiator::new();
    for &t in &[0.001, 0.05, 0.7] {
        let y = expm.exp_qt_x(4, model.u, model.v, theta, t, &x).expect("expm");
        let before = dot(&pi, x.values());
        let after = dot(&pi, y.values());
        approx_eq(after, before, 1e-9 * before.abs().max(1.0));
    }
}

#[test]
fn exponentiation_at_zero_length_is_identity_and_small_steps_are_linear() {
    let x = random_matrix(3, 5);
    let mut expm = MatrixExponentiator::new();
    let y = expm.exp_qt_x(3, 1.0, 1.0, 0.01, 0.0, &x).expect("expm");
    assert_eq!(y, x);

    let t = 1e-8;
    let q = QMatrix::new(3, 1.0, 1.0, 0.01);
    let mut qx = vec![0.0; q.dim()];
    q.multiply(x.values(), &mut qx);
    let y = expm.exp_qt_x(3, 1.0, 1.0, 0.01, t, &x).expect("expm");
    for i in 0..q.dim() {
        let linear = (x.values()[i] + t * qx[i]).max(0.0);
        approx_eq(y.values()[i], linear, 1e-9);
    }
}

#[test]
fn pattern_matrix_rejects_wrong_number_of_values() {
    let err = BiallelicPatternProbabilityMatrix::from_values(3, vec![0.0; 4])
        .expect_err("three alleles need nine entries");
    assert!(matches!(err, ModelError::Invariant(_)));
    assert!(BiallelicPatternProbabilityMatrix::from_values(3, vec![0.0; 9]).is_ok());
}

fn one_population_workspace(root_height: f64) -> PruningWorkspace {
    let mut nodes = vec![
        PopulationNode::leaf("a", 0, 0),
        PopulationNode::internal("root", root_height, 1),
    ];
    add_child(&mut nodes, 1, 0);
    PruningWorkspace::new(nodes, 1)
}

fn two_population_workspace(root_height: f64) -> PruningWorkspace {
    let mut nodes = vec![
        PopulationNode::leaf("a", 0, 0),
        PopulationNode::leaf("b", 1, 1),
        PopulationNode::internal("root", root_height, 2),
    ];
    add_child(&mut nodes, 2, 0);
    add_child(&mut nodes, 2, 1);
    PruningWorkspace::new(nodes, 2)
}

#[test]
fn post_order_visits_children_before_parents() {
    let mut nodes = vec![
        PopulationNode::leaf("a", 0, 0),
        PopulationNode::leaf("b", 1, 0),
        PopulationNode::leaf("c", 2, 0),
        PopulationNode::internal("ab", 0.1, 0),
        PopulationNode::internal("root", 0.2, 0),
    ];
    add_child(&mut nodes, 3, 0);
    add_child(&mut nodes, 3, 1);
    add_child(&mut nodes, 4, 3);
    add_child(&mut nodes, 4, 2);
    assert_eq!(post_order(&nodes, 4), vec![0, 1, 3, 2, 4]);
}

// (freq_1, population size, root height)
const BRANCH_SETTINGS: [(f64, f64, f64); 3] =
    [(0.5, 0.01, 0.05), (0.3, 0.05, 0.2), (0.8, 0.002, 0.5)];

#[test]
fn red_count_probabilities_sum_to_one_for_one_population() {
    for &(freq, size, height) in &BRANCH_SETTINGS {
        let model = BranchModel::from_freq(freq, 1.0, 2);
        let sizes = [size, 1.5 * size];
        let mut ws = one_population_workspace(height);
        for n in 1..=4u32 {
            let total: f64 = (0..=n)
                .map(|r| {
                    let pattern = SitePattern::new(vec![r], vec![n]);
                    ws.pattern_likelihood(&pattern, &model, &sizes, false)
                        .expect("pattern likelihood")
                })
                .sum();
            approx_eq(total, 1.0, 1e-10);
        }
    }
}

#[test]
fn red_count_probabilities_sum_to_one_for_two_populations() {
    for &(freq, size, height) in &BRANCH_SETTINGS {
        let model = BranchModel::from_freq(freq, 1.0, 2);
        let sizes = [size, 0.5 * size, 2.0 * size];
        let mut ws = two_population_workspace(height);
        for &(n1, n2) in &[(1u32, 1u32), (2, 2), (3, 2), (4, 4)] {
            let mut total = 0.0;
            for r1 in 0..=n1 {
                for r2 in 0..=n2 {
                    let pattern = SitePattern::new(vec![r1, r2], vec![n1, n2]);
                    let l = ws
                        .pattern_likelihood(&pattern, &model, &sizes, false)
                        .expect("pattern likelihood");
                    assert!(l >= 0.0 && l <= 1.0, "likelihood {l} out of range");
                    total += l;
                }
            }
            approx_eq(total, 1.0, 1e-10);
        }
    }
}
