use ecodiv_rs::distributions::ContinuousDistribution;
use ecodiv_rs::heights::HeightPool;
use ecodiv_rs::parameter::Parameter;
use ecodiv_rs::partition::EventModelPrior;
use ecodiv_rs::random::{draw_crp_partition, draw_set_partition, new_rng, uniform, uniform_int};

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

fn pool(values: &[f64], indices: &[usize]) -> HeightPool {
    let heights = values
        .iter()
        .map(|&v| Parameter::positive(v, None, false).expect("positive height"))
        .collect();
    HeightPool::new(heights, indices.to_vec(), Some(ContinuousDistribution::exponential(10.0)))
        .expect("valid pool")
}

/// Restricted growth strings: every set partition of `n` items once.
fn all_partitions(n: usize) -> Vec<Vec<usize>> {
    let mut out = vec![vec![0]];
    for _ in 1..n {
        let mut next = Vec::new();
        for p in &out {
            let k = p.iter().max().map_or(0, |m| m + 1);
            for label in 0..=k {
                let mut q = p.clone();
                q.push(label);
                next.push(q);
            }
        }
        out = next;
    }
    out
}

#[test]
fn nearest_heights_of_the_middle_event() {
    let p = pool(&[0.3, 0.7, 0.1], &[0, 1, 2]);
    assert_eq!(p.nearest_smaller_height(0), 0.1);
    assert_eq!(p.nearest_larger_height(0), 0.7);
    assert_eq!(p.nearest_smaller_height_index(0, false).expect("smaller"), 2);
    assert_eq!(p.nearest_larger_height_index(0, false).expect("larger"), 1);
}

#[test]
fn nearest_heights_at_the_ends() {
    let p = pool(&[0.1, 0.3, 0.7], &[0, 1, 2]);
    assert_eq!(p.nearest_smaller_height(0), 0.0);
    assert_eq!(p.nearest_larger_height(2), f64::INFINITY);
    assert_eq!(p.nearest_smaller_height_index(0, true).expect("self"), 0);
    assert!(p.nearest_smaller_height_index(0, false).is_err());
    assert!(p.nearest_larger_height_index(2, false).is_err());
}

#[test]
fn distal_height_within_move() {
    let p = pool(&[0.1, 0.3, 0.7], &[0, 1, 2]);
    assert_eq!(p.distal_height_index_within_move(0, 0.1), 0);
    assert_eq!(p.distal_height_index_within_move(0, 0.25), 1);
    assert_eq!(p.distal_height_index_within_move(0, 1.0), 2);
    assert_eq!(p.distal_height_index_within_move(2, -0.65), 0);
}

#[test]
fn removing_a_referenced_height_is_rejected() {
    let mut p = pool(&[0.1, 0.3], &[0, 1, 1]);
    assert!(p.remove_height(1).is_err());
    assert!(HeightPool::new(
        vec![Parameter::fixed_value(0.1), Parameter::fixed_value(0.2)],
        vec![0, 0],
        None
    )
    .is_err());
}

#[test]
fn pool_invariants_hold_under_random_remapping() {
    let mut rng = new_rng(2024);
    let mut p = pool(&[0.2], &[0, 0, 0, 0, 0, 0]);
    for _ in 0..5_000 {
        let item = uniform_int(&mut rng, 0, p.number_of_items() - 1);
        let choice = uniform(&mut rng);
        if choice < 0.35 {
            let v = 0.01 + uniform(&mut rng);
            let h = p.map_item_to_new_height(item, v).expect("new height");
            assert_eq!(p.index_of(item), h);
            assert_eq!(p.height(h), v);
        } else if choice < 0.7 {
            let h = uniform_int(&mut rng, 0, p.number_of_events() - 1);
            let value = p.height(h);
            let h = p.remap_item(item, h).expect("remap");
            assert_eq!(p.index_of(item), h);
            assert_eq!(p.height(h), value);
        } else if p.number_of_events() > 1 {
            let h = uniform_int(&mut rng, 0, p.number_of_events() - 1);
            let target = p.nearest_larger_height_index(h, true).expect("larger");
            if target != h {
                let before = p.number_of_items_mapped_to_height(h)
                    + p.number_of_items_mapped_to_height(target);
                let value = p.height(target);
                let t = p.merge_height(h, target).expect("merge");
                assert_eq!(p.number_of_items_mapped_to_height(t), before);
                assert_eq!(p.height(t), value);
            }
        }
        p.check_invariants().expect("pool invariants");
        assert!(p.indices().iter().all(|&i| i < p.number_of_events()));
        for h in 0..p.number_of_events() {
            assert!(p.number_of_items_mapped_to_height(h) > 0);
        }
    }
}

#[test]
fn pool_store_and_restore_round_trip() {
    let mut p = pool(&[0.1, 0.3], &[0, 1, 1]);
    p.store();
    let before = p.clone();
    p.map_item_to_new_height(1, 0.9).expect("new height");
    p.set_height(0, 0.15);
    p.merge_height(0, 1).expect("merge");
    p.restore();
    assert_eq!(p.indices(), before.indices());
    for h in 0..p.number_of_events() {
        assert_eq!(p.height(h).to_bits(), before.height(h).to_bits());
    }
}

fn total_probability(model: &EventModelPrior, n: usize) -> f64 {
    all_partitions(n)
        .iter()
        .map(|p| model.ln_partition_probability(p).exp())
        .sum()
}

#[test]
fn partition_priors_sum_to_one() {
    let dpp = EventModelPrior::DirichletProcess {
        concentration: Parameter::fixed_value(1.7),
    };
    let pyp = EventModelPrior::PitmanYorProcess {
        concentration: Parameter::fixed_value(0.8),
        discount: Parameter::fixed_value(0.3),
    };
    let uniform = EventModelPrior::UniformPartition {
        split_weight: Parameter::fixed_value(1.0),
    };
    let weighted = EventModelPrior::UniformPartition {
        split_weight: Parameter::fixed_value(3.5),
    };
    for n in 1..=6 {
        approx_eq(total_probability(&dpp, n), 1.0, 1e-8);
        approx_eq(total_probability(&pyp, n), 1.0, 1e-8);
        approx_eq(total_probability(&uniform, n), 1.0, 1e-8);
        approx_eq(total_probability(&weighted, n), 1.0, 1e-8);
    }
    // Bell number B(4) = 15.
    approx_eq(uniform.ln_partition_probability(&[0, 1, 0, 2]).exp(), 1.0 / 15.0, 1e-12);
}

#[test]
fn crp_weights_follow_the_prior() {
    let dpp = EventModelPrior::DirichletProcess {
        concentration: Parameter::fixed_value(2.0),
    };
    approx_eq(dpp.ln_existing_block_weight(3), 3f64.ln(), 1e-15);
    approx_eq(dpp.ln_new_block_weight(5), 2f64.ln(), 1e-15);
    let pyp = EventModelPrior::PitmanYorProcess {
        concentration: Parameter::fixed_value(2.0),
        discount: Parameter::fixed_value(0.5),
    };
    approx_eq(pyp.ln_existing_block_weight(3), 2.5f64.ln(), 1e-15);
    approx_eq(pyp.ln_new_block_weight(2), 3f64.ln(), 1e-15);
    assert_eq!(EventModelPrior::Fixed.ln_new_block_weight(1), f64::NEG_INFINITY);
}

#[test]
fn drawn_partitions_match_prior_frequencies() {
    let mut rng = new_rng(99);
    let n = 3;
    let draws = 60_000;
    let dpp = EventModelPrior::DirichletProcess {
        concentration: Parameter::fixed_value(1.5),
    };
    let parts = all_partitions(n);
    let mut crp_counts = vec![0usize; parts.len()];
    let mut set_counts = vec![0usize; parts.len()];
    for _ in 0..draws {
        let crp = draw_crp_partition(&mut rng, n, 1.5, 0.0);
        let set = draw_set_partition(&mut rng, n, 1.0);
        crp_counts[parts.iter().position(|p| *p == crp).expect("standardized")] += 1;
        set_counts[parts.iter().position(|p| *p == set).expect("standardized")] += 1;
    }
    for (i, p) in parts.iter().enumerate() {
        let expected = dpp.ln_partition_probability(p).exp();
        approx_eq(crp_counts[i] as f64 / draws as f64, expected, 0.01);
        approx_eq(set_counts[i] as f64 / draws as f64, 1.0 / 5.0, 0.01);
    }
}
