use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ecodiv_rs::io::counts::read_allele_counts;
use ecodiv_rs::io::settings::load_settings;
use ecodiv_rs::io::summary::{OperatorSummary, RunSummary, save_summary};
use ecodiv_rs::mcmc::{ChainOptions, LogPaths};
use ecodiv_rs::progress::ChainProgress;
use ecodiv_rs::random::new_rng;
use ecodiv_rs::schedule::collection_schedule;
use ecodiv_rs::{Chain, ComparisonPopulationTreeCollection, DataPolicy, McmcTarget};

#[derive(Parser, Debug)]
#[command(name = "ecodiv")]
#[command(about = "Estimate shared divergence times across population pairs", long_about = None)]
struct Cli {
    /// YAML settings file.
    config: PathBuf,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    threads: Option<usize>,
    #[arg(long, default_value = "", help = "Prefix prepended to every output path")]
    prefix: String,
    #[arg(long, help = "Drop constant patterns instead of failing")]
    relax_constant_sites: bool,
    #[arg(long, help = "Drop patterns with an unsampled population instead of failing")]
    relax_missing_sites: bool,
    #[arg(long, help = "Sample from the prior")]
    ignore_data: bool,
    #[arg(long)]
    no_progress: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ecodiv_rs=info,ecodiv=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let nthreads = match cli.threads {
        Some(0) => bail!("--threads must be >= 1"),
        Some(n) => {
            rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build_global()
                .map_err(|e| anyhow!("failed to configure Rayon global thread pool: {e}"))?;
            n
        }
        None => rayon::current_num_threads(),
    };
    let seed = match cli.seed {
        Some(s) => s,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the Unix epoch")?
            .as_nanos() as u64,
    };
    let mut rng = new_rng(seed);

    let settings = load_settings(&cli.config)
        .with_context(|| format!("failed to load settings from {:?}", cli.config))?;

    let loading = ChainProgress::loading("Reading allele counts", !cli.no_progress);
    let mut data = Vec::with_capacity(settings.comparisons.len());
    for comparison in &settings.comparisons {
        let table = read_allele_counts(&comparison.path)?;
        let d = table
            .to_biallelic_data(comparison.markers_are_dominant)
            .with_context(|| format!("invalid data in {:?}", comparison.path))?;
        info!(
            path = %comparison.path.display(),
            sites = table.number_of_sites(),
            patterns = d.number_of_patterns(),
            "read allele counts"
        );
        loading.set_message(format!("Read {}", comparison.path.display()));
        data.push(d);
    }
    loading.finish("Reading allele counts done");

    let policy = DataPolicy {
        relax_constant_sites: cli.relax_constant_sites,
        relax_missing_sites: cli.relax_missing_sites,
        ignore_data: cli.ignore_data,
    };
    let collection = ComparisonPopulationTreeCollection::new(&settings, data, policy, &mut rng)
        .context("failed to build the comparison collection")?;
    let schedule = collection_schedule(&settings, &collection)?;

    let paths = LogPaths::with_prefix(&cli.prefix);
    let options = ChainOptions {
        nthreads,
        debug_check_frequency: settings.mcmc_settings.debug_check_frequency,
        show_progress: !cli.no_progress,
        ..ChainOptions::default()
    };
    let mut chain = Chain::new(collection, schedule, paths, options)?;
    info!(seed, nthreads, operators = chain.schedule().len(), "chain initialised");

    let chain_length = settings.mcmc_settings.chain_length;
    let sample_frequency = settings.mcmc_settings.sample_frequency;
    let stats = chain.run(&mut rng, chain_length, sample_frequency)?;

    let collection = chain.collection();
    let summary = RunSummary {
        seed,
        chain_length,
        sample_frequency,
        number_of_samples: stats.number_of_samples,
        final_ln_likelihood: collection.log_likelihood(),
        final_ln_prior: collection.log_prior_density(),
        final_number_of_events: collection.number_of_events(),
        state_log: chain.paths().state_log.display().to_string(),
        operator_log: chain.paths().operator_log.display().to_string(),
        operators: chain
            .schedule()
            .acceptance_table()
            .into_iter()
            .map(|s| OperatorSummary {
                name: s.name,
                number_accepted: s.number_accepted,
                number_rejected: s.number_rejected,
                tuning_parameter: s.tuning_parameter,
            })
            .collect(),
    };
    let summary_path = PathBuf::from(format!("{}summary-run-1.json", cli.prefix));
    save_summary(&summary_path, &summary)?;
    println!("State log: {}", summary.state_log);
    println!("Run summary: {}", summary_path.display());
    Ok(())
}
