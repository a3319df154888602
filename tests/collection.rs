use std::collections::BTreeMap;

use rand::rngs::SmallRng;

use ecodiv_rs::collection::ComparisonPopulationTreeCollection;
use ecodiv_rs::data::BiallelicData;
use ecodiv_rs::error::ModelError;
use ecodiv_rs::io::settings::{CollectionSettings, parse_settings};
use ecodiv_rs::mcmc::McmcTarget;
use ecodiv_rs::operators::Operator;
use ecodiv_rs::operators::collection_ops::{
    ConcentrationScaler, EventTimeScaler, EventTimeSizeMixer, ReversibleJumpSampler,
};
use ecodiv_rs::operators::tree_ops::{
    FreqMover, LeafPopulationSizeScaler, MutationRateScaler, RootPopulationSizeScaler,
};
use ecodiv_rs::random::{new_rng, uniform_int};
use ecodiv_rs::schedule::{OperatorSchedule, collection_schedule};
use ecodiv_rs::tree::{ComparisonPopulationTree, DataPolicy};

fn approx_eq(a: f64, b: f64, eps: f64) {
    assert!(
        (a - b).abs() <= eps,
        "expected {a} ~= {b} within eps={eps}, got diff={}",
        (a - b).abs()
    );
}

const DPP_MODEL: &str = "
event_model_prior:
  dirichlet_process:
    concentration:
      value: 1.5
      estimate: true
      prior:
        gamma_distribution: {shape: 2.0, scale: 1.0}
";

const GLOBAL_PARAMETERS: &str = "
global_comparison_settings:
  population_size:
    value: 0.005
    estimate: true
    prior:
      gamma_distribution: {shape: 4.0, scale: 0.001}
  freq_1:
    value: 0.5
    estimate: true
    prior:
      beta_distribution: {alpha: 2.0, beta: 2.0}
  mutation_rate:
    value: 1.0
    estimate: true
    prior:
      gamma_distribution: {shape: 10.0, scale: 0.1}
";

/// Settings text with `model`, the shared parameter block and one
/// comparison entry per item of `comparisons`.
fn settings_yaml(model: &str, comparisons: &[&str]) -> String {
    let mut text = String::new();
    text.push_str(model);
    text.push_str(
        "
event_time_prior:
  exponential_distribution: {rate: 10.0}
mcmc_settings:
  chain_length: 1000
  sample_frequency: 10
",
    );
    text.push_str(GLOBAL_PARAMETERS);
    text.push_str("comparisons:\n");
    for c in comparisons {
        text.push_str(c);
        text.push('\n');
    }
    text
}

fn settings(model: &str, comparisons: &[&str]) -> CollectionSettings {
    parse_settings(&settings_yaml(model, comparisons)).expect("valid settings")
}

/// Random polymorphic data for the given populations; totals are 2 to 6
/// alleles per population.
fn random_data(labels: &[&str], n_sites: usize, seed: u64) -> BiallelicData {
    let mut rng = new_rng(seed);
    let sites: Vec<Vec<(u32, u32)>> = (0..n_sites)
        .map(|_| {
            labels
                .iter()
                .map(|_| {
                    let n = uniform_int(&mut rng, 2, 6) as u32;
                    let r = uniform_int(&mut rng, 0, n as usize) as u32;
                    (r, n)
                })
                .collect()
        })
        .collect();
    BiallelicData::from_sites(labels.iter().map(|s| s.to_string()).collect(), &sites, false)
        .expect("valid data")
}

fn three_pairs() -> Vec<BiallelicData> {
    vec![
        random_data(&["a1", "a2"], 12, 1),
        random_data(&["b1", "b2"], 12, 2),
        random_data(&["c1", "c2"], 12, 3),
    ]
}

const THREE_COMPARISONS: [&str; 3] = ["  - path: a.txt", "  - path: b.txt", "  - path: c.txt"];

fn dpp_collection(rng: &mut SmallRng) -> (CollectionSettings, ComparisonPopulationTreeCollection) {
    let s = settings(DPP_MODEL, &THREE_COMPARISONS);
    let mut c =
        ComparisonPopulationTreeCollection::new(&s, three_pairs(), DataPolicy::default(), rng)
            .expect("collection");
    c.compute_log_likelihood_and_prior(1).expect("compute");
    (s, c)
}

/// Everything a move may touch, as exact bit patterns.
fn state_vector(c: &ComparisonPopulationTreeCollection) -> Vec<u64> {
    let mut v = vec![
        c.number_of_events() as u64,
        c.log_likelihood().to_bits(),
        c.log_prior_density().to_bits(),
    ];
    v.extend(c.heights().indices().iter().map(|&i| i as u64));
    v.extend((0..c.number_of_events()).map(|h| c.height(h).to_bits()));
    v.extend(c.event_model().parameters().iter().map(|(_, p)| p.value().to_bits()));
    for t in c.trees() {
        v.extend(tree_state(t));
    }
    v
}

fn tree_state(t: &ComparisonPopulationTree) -> Vec<u64> {
    let mut v = vec![
        t.root_height().to_bits(),
        t.root_height_index() as u64,
        t.mutation_rate().value().to_bits(),
        t.freq_1().value().to_bits(),
        t.log_likelihood().to_bits(),
        t.log_prior_density().to_bits(),
    ];
    v.extend(t.population_sizes().iter().map(|p| p.value().to_bits()));
    v
}

#[test]
fn builds_collection_from_settings_and_data() {
    let mut rng = new_rng(10);
    let (_, c) = dpp_collection(&mut rng);
    assert_eq!(c.number_of_trees(), 3);
    assert_eq!(c.tree(0).label(), "a1-a2");
    assert_eq!(c.tree(2).label(), "c1-c2");
    assert!(c.number_of_events() >= 1 && c.number_of_events() <= 3);
    c.check_invariants().expect("invariants");
    assert!(c.log_likelihood().is_finite() && c.log_likelihood() < 0.0);
    assert!(c.log_prior_density().is_finite());
    for t in c.trees() {
        assert_eq!(t.population_sizes().len(), 3);
        assert!(!t.mutation_rate().is_fixed());
    }
}

#[test]
fn collection_store_restore_is_exact() {
    let mut rng = new_rng(11);
    let (_, mut c) = dpp_collection(&mut rng);
    let mut ops: Vec<Box<dyn Operator<ComparisonPopulationTreeCollection>>> = vec![
        Box::new(EventTimeScaler::new(1.0, 0.5)),
        Box::new(EventTimeSizeMixer::new(1.0, 0.3)),
        Box::new(ConcentrationScaler::new(1.0, 0.5)),
        Box::new(ReversibleJumpSampler::new(1.0)),
    ];
    for i in 0..400 {
        let op = &mut ops[i % 4];
        c.store_state();
        let before = state_vector(&c);
        let ln_hastings = op.propose(&mut rng, &mut c).expect("propose");
        if ln_hastings > f64::NEG_INFINITY {
            c.compute_log_likelihood_and_prior(1).expect("compute");
        }
        c.restore_state();
        assert_eq!(state_vector(&c), before, "{} left a trace", op.name());
        c.check_invariants().expect("invariants");

        op.operate(&mut rng, &mut c, 1, true).expect("operate");
    }
}

#[test]
fn adding_and_removing_event_times_keeps_trees_in_sync() {
    let mut rng = new_rng(31);
    let (_, mut c) = dpp_collection(&mut rng);
    let before = state_vector(&c);
    let k = c.number_of_events();

    // A fresh height is appended and left unreferenced.
    let h = c.add_height(0.75).expect("add height");
    assert_eq!(h, k);
    assert_eq!(c.number_of_events(), k + 1);
    assert!(matches!(c.check_invariants(), Err(ModelError::Invariant(_))));
    for t in 0..c.number_of_trees() {
        assert_eq!(c.tree(t).root_height_index(), c.heights().index_of(t));
    }

    // Only unreferenced heights can go.
    let used = c.heights().index_of(0);
    assert!(matches!(c.remove_height(used), Err(ModelError::Invariant(_))));
    assert!(c.remove_height(k + 1).is_err());
    c.remove_height(h).expect("remove unreferenced height");
    c.check_invariants().expect("invariants after remove");
    assert_eq!(state_vector(&c), before);

    // Map a tree onto a new height, then roll back through the stored state.
    c.store_state();
    let h = c.add_height(0.75).expect("add height");
    let h = c.remap_tree(1, h).expect("remap tree");
    c.check_invariants().expect("invariants after remap");
    assert_eq!(c.tree(1).root_height_index(), h);
    assert_eq!(c.tree(1).root_height(), 0.75);
    assert_eq!(c.height(h), 0.75);
    c.restore_state();
    c.check_invariants().expect("invariants after restore");
    assert_eq!(state_vector(&c), before);
}

#[test]
fn comparison_store_restore_is_exact() {
    let mut rng = new_rng(12);
    let (_, mut c) = dpp_collection(&mut rng);
    let mut ops: Vec<Box<dyn Operator<ComparisonPopulationTree>>> = vec![
        Box::new(MutationRateScaler::new(1.0, 0.3)),
        Box::new(FreqMover::new(1.0, 0.1)),
        Box::new(RootPopulationSizeScaler::new(1.0, 0.3)),
        Box::new(LeafPopulationSizeScaler::new(1.0, 0.3)),
    ];
    for i in 0..200 {
        let op = &mut ops[i % 4];
        let tree = &mut c.trees_mut()[i % 3];
        tree.store_state();
        let before = tree_state(tree);
        let ln_hastings = op.propose(&mut rng, tree).expect("propose");
        if ln_hastings > f64::NEG_INFINITY {
            tree.compute_log_likelihood_and_prior(1).expect("compute");
        }
        tree.restore_state();
        assert_eq!(tree_state(tree), before, "{} left a trace", op.name());

        op.operate(&mut rng, tree, 1, true).expect("operate");
    }
    c.check_invariants().expect("invariants");
}

#[test]
fn cached_likelihood_matches_full_recomputation() {
    let mut rng = new_rng(13);
    let (s, mut c) = dpp_collection(&mut rng);
    let mut schedule = collection_schedule(&s, &c).expect("schedule");
    for generation in 1..=600 {
        schedule.operate(&mut rng, &mut c, 1).expect("operate");
        if generation % 25 == 0 {
            c.check_invariants().expect("invariants");
            let cached_ll = c.log_likelihood();
            let cached_lp = c.log_prior_density();
            c.make_dirty();
            c.compute_log_likelihood_and_prior(1).expect("compute");
            approx_eq(c.log_likelihood(), cached_ll, 1e-6);
            approx_eq(c.log_prior_density(), cached_lp, 1e-6);
        }
    }
    assert!(schedule.number_of_operations() >= 600);
}

#[test]
fn threaded_likelihood_matches_single_threaded() {
    let mut rng = new_rng(14);
    let (_, mut c) = dpp_collection(&mut rng);
    let single = c.log_likelihood();
    c.make_dirty();
    c.compute_log_likelihood_and_prior(4).expect("compute");
    approx_eq(c.log_likelihood(), single, 1e-9);
}

#[test]
fn schedule_contains_only_applicable_operators() {
    let mut rng = new_rng(15);
    let (s, c) = dpp_collection(&mut rng);
    let schedule = collection_schedule(&s, &c).expect("schedule");
    let names: Vec<&str> = (0..schedule.len()).map(|i| schedule.operator(i).name()).collect();
    for expected in [
        "EventTimeScaler",
        "ReversibleJumpSampler",
        "DirichletProcessGibbsSampler",
        "ConcentrationScaler",
        "MutationRateScaler",
        "FreqMover",
    ] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
    assert!(!names.contains(&"DiscountMover"));
    assert!(!names.contains(&"SplitWeightScaler"));

    let single = settings("event_model_prior: {fixed: {}}\n", &["  - path: a.txt"]);
    let c = ComparisonPopulationTreeCollection::new(
        &single,
        vec![random_data(&["a1", "a2"], 8, 4)],
        DataPolicy::default(),
        &mut rng,
    )
    .expect("collection");
    let schedule = collection_schedule(&single, &c).expect("schedule");
    let names: Vec<&str> = (0..schedule.len()).map(|i| schedule.operator(i).name()).collect();
    assert!(!names.contains(&"ReversibleJumpSampler"));
    assert!(!names.contains(&"DirichletProcessGibbsSampler"));

    let empty: OperatorSchedule<ComparisonPopulationTreeCollection> =
        OperatorSchedule::new(true, 10);
    assert!(matches!(empty.validate(), Err(ModelError::Config(_))));
}

fn single_comparison(
    entry: &str,
    data: BiallelicData,
    policy: DataPolicy,
) -> Result<ComparisonPopulationTreeCollection, ModelError> {
    let s = settings("event_model_prior: {fixed: {}}\n", &[entry]);
    let mut rng = new_rng(16);
    ComparisonPopulationTreeCollection::new(&s, vec![data], policy, &mut rng)
}

fn data_with_constant_and_missing_sites() -> BiallelicData {
    BiallelicData::from_sites(
        vec!["p1".to_string(), "p2".to_string()],
        &[
            vec![(1, 4), (2, 4)],
            vec![(0, 4), (0, 4)],
            vec![(4, 4), (2, 2)],
            vec![(1, 4), (0, 0)],
            vec![(3, 4), (1, 4)],
        ],
        false,
    )
    .expect("valid data")
}

#[test]
fn data_policy_controls_constant_and_missing_sites() {
    let entry = "  - path: p.txt\n    constant_sites_removed: true";

    let err = single_comparison(
        entry,
        data_with_constant_and_missing_sites(),
        DataPolicy::default(),
    )
    .expect_err("missing sites are rejected");
    assert!(matches!(err, ModelError::DataQuality(_)));
    assert!(err.is_recoverable());

    let relax_missing = DataPolicy {
        relax_missing_sites: true,
        ..DataPolicy::default()
    };
    let err = single_comparison(entry, data_with_constant_and_missing_sites(), relax_missing)
        .expect_err("constant sites are rejected");
    assert!(matches!(err, ModelError::DataQuality(_)));

    let relaxed = DataPolicy {
        relax_missing_sites: true,
        relax_constant_sites: true,
        ignore_data: false,
    };
    let mut c = single_comparison(entry, data_with_constant_and_missing_sites(), relaxed)
        .expect("relaxed data");
    let data = c.tree(0).data();
    assert_eq!(data.number_of_patterns(), 2);
    assert_eq!(data.number_of_constant_sites_removed(), 2);
    assert_eq!(data.number_of_missing_sites_removed(), 1);
    c.compute_log_likelihood_and_prior(1).expect("compute");
    assert!(c.log_likelihood().is_finite());

    // Without the removed-constant flag the constant sites are kept.
    let mut c = single_comparison(
        "  - path: p.txt",
        data_with_constant_and_missing_sites(),
        relax_missing,
    )
    .expect("constant sites kept");
    assert_eq!(c.tree(0).data().number_of_patterns(), 4);
    c.compute_log_likelihood_and_prior(1).expect("compute");
    assert!(c.log_likelihood().is_finite());
}

#[test]
fn ignoring_data_gives_zero_likelihood() {
    let policy = DataPolicy {
        relax_missing_sites: true,
        ignore_data: true,
        ..DataPolicy::default()
    };
    let mut c = single_comparison("  - path: p.txt", data_with_constant_and_missing_sites(), policy)
        .expect("collection");
    c.compute_log_likelihood_and_prior(1).expect("compute");
    assert_eq!(c.log_likelihood(), 0.0);
    assert!(c.tree(0).ignoring_data());
}

#[test]
fn comparison_configuration_errors() {
    let one_pop = random_data(&["solo"], 10, 20);
    let err = single_comparison(
        "  - path: solo.txt\n    equal_population_sizes: true",
        one_pop.clone(),
        DataPolicy::default(),
    )
    .expect_err("equal sizes with one population");
    assert!(matches!(err, ModelError::Config(_)));
    // Free sizes make a single population usable.
    let c = single_comparison("  - path: solo.txt", one_pop, DataPolicy::default())
        .expect("single population");
    assert_eq!(c.tree(0).population_sizes().len(), 2);

    let three_pops = random_data(&["x", "y", "z"], 10, 21);
    let err = single_comparison("  - path: xyz.txt", three_pops.clone(), DataPolicy::default())
        .expect_err("three populations");
    assert!(matches!(err, ModelError::Config(_)));
    let c = single_comparison(
        "  - path: xyz.txt\n    populations: [x, z]",
        three_pops,
        DataPolicy::default(),
    )
    .expect("subset of populations");
    assert_eq!(c.tree(0).label(), "x-z");

    let s = settings(DPP_MODEL, &["  - path: a.txt", "  - path: b.txt"]);
    let mut rng = new_rng(22);
    let clash = vec![random_data(&["a1", "a2"], 8, 23), random_data(&["a2", "b2"], 8, 24)];
    let err = ComparisonPopulationTreeCollection::new(&s, clash, DataPolicy::default(), &mut rng)
        .expect_err("shared label");
    assert!(matches!(err, ModelError::Config(_)));
    let err = ComparisonPopulationTreeCollection::new(
        &s,
        vec![random_data(&["a1", "a2"], 8, 25)],
        DataPolicy::default(),
        &mut rng,
    )
    .expect_err("too few data sets");
    assert!(matches!(err, ModelError::Config(_)));
}

#[test]
fn fixed_event_indices_are_respected() {
    let model = "event_model_prior:\n  fixed:\n    event_indices: [1, 1, 0]\n";
    let s = settings(model, &THREE_COMPARISONS);
    let mut rng = new_rng(26);
    let c =
        ComparisonPopulationTreeCollection::new(&s, three_pairs(), DataPolicy::default(), &mut rng)
            .expect("collection");
    assert_eq!(c.number_of_events(), 2);
    assert_eq!(c.get_standardized_height_indices(), vec![0, 0, 1]);
    assert_eq!(c.tree(0).root_height(), c.tree(1).root_height());
}

/// Standardized partition frequencies when sampling from the prior.
fn prior_partition_frequencies(
    model: &str,
    generations: u64,
    seed: u64,
) -> BTreeMap<Vec<usize>, f64> {
    let s = settings(model, &THREE_COMPARISONS);
    let policy = DataPolicy {
        ignore_data: true,
        ..DataPolicy::default()
    };
    let mut rng = new_rng(seed);
    let mut c = ComparisonPopulationTreeCollection::new(&s, three_pairs(), policy, &mut rng)
        .expect("collection");
    c.compute_log_likelihood_and_prior(1).expect("compute");
    let mut schedule = collection_schedule(&s, &c).expect("schedule");
    let mut counts: BTreeMap<Vec<usize>, u64> = BTreeMap::new();
    let mut n = 0u64;
    for generation in 1..=generations {
        schedule.operate(&mut rng, &mut c, 1).expect("operate");
        if generation % 10 == 0 {
            *counts.entry(c.get_standardized_height_indices()).or_default() += 1;
            n += 1;
        }
    }
    c.check_invariants().expect("invariants");
    counts
        .into_iter()
        .map(|(k, v)| (k, v as f64 / n as f64))
        .collect()
}

#[test]
fn uniform_partition_prior_is_recovered() {
    let model = "
event_model_prior:
  uniform_partition:
    split_weight: {value: 1.0, estimate: false}
";
    let freqs = prior_partition_frequencies(model, 100_000, 30);
    assert_eq!(freqs.len(), 5, "partitions seen: {freqs:?}");
    for (partition, f) in &freqs {
        assert!((f - 0.2).abs() <= 0.04, "{partition:?} has frequency {f}");
    }
}

#[test]
fn dirichlet_process_prior_is_recovered() {
    let model = "
event_model_prior:
  dirichlet_process:
    concentration: {value: 1.5, estimate: false}
";
    let freqs = prior_partition_frequencies(model, 100_000, 31);
    // Rising factorial 1.5 * 2.5 * 3.5 = 13.125; one event has weight
    // 1.5 * 2!, each two-event partition 1.5^2 and three events 1.5^3.
    let mut by_events = [0.0; 3];
    for (partition, f) in &freqs {
        let k = partition.iter().max().map_or(0, |m| m + 1);
        by_events[k - 1] += f;
    }
    approx_eq(by_events[0], 3.0 / 13.125, 0.04);
    approx_eq(by_events[1], 6.75 / 13.125, 0.04);
    approx_eq(by_events[2], 3.375 / 13.125, 0.04);
    // The three two-event partitions are exchangeable.
    for (partition, f) in &freqs {
        if partition.iter().max() == Some(&1) {
            approx_eq(*f, 2.25 / 13.125, 0.04);
        }
    }
}
