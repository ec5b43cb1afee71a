use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

use siteval_lib::acquisition::loader::DataLoader;
use siteval_lib::acquisition::registry_client::{RegistryClient, StudyQuery};
use siteval_lib::clustering::{ClusteringOutcome, SiteClusterer};
use siteval_lib::config::{EngineConfig, DEFAULT_TOP_N_RECOMMENDATIONS};
use siteval_lib::export::export_all;
use siteval_lib::metrics::MetricsCalculator;
use siteval_lib::models::core::TargetProfile;
use siteval_lib::recommend::SiteRecommender;
use siteval_lib::resolver::SiteResolver;
use siteval_lib::store::{SiteStore, TrialStore};

#[derive(Parser)]
#[command(name = "siteval", about = "Clinical trial site evaluation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch studies from the trial registry into the local snapshot
    Extract {
        #[arg(long, default_value = "cancer")]
        condition: String,
        #[arg(long)]
        phase: Option<String>,
        #[arg(long, default_value_t = 5)]
        max_pages: usize,
    },
    /// Resolve raw facility records into canonical sites
    Aggregate,
    /// Compute completion, quality, and experience scores for every site
    Metrics,
    /// Group scored sites by their feature profile
    Cluster {
        #[arg(long)]
        n_clusters: Option<usize>,
    },
    /// Rank sites against a target study profile
    Recommend {
        /// Target therapeutic areas, comma-separated
        #[arg(long, value_delimiter = ',', required = true)]
        conditions: Vec<String>,
        #[arg(long, default_value = "Phase 2")]
        phase: String,
        #[arg(long)]
        country: Option<String>,
        #[arg(long, default_value_t = DEFAULT_TOP_N_RECOMMENDATIONS)]
        top_n: usize,
    },
    /// Run extract, aggregate, metrics, and cluster in sequence
    Pipeline {
        #[arg(long, default_value = "cancer")]
        condition: String,
        #[arg(long)]
        phase: Option<String>,
        #[arg(long, default_value_t = 5)]
        max_pages: usize,
        #[arg(long)]
        n_clusters: Option<usize>,
    },
    /// Write JSON exports for the reporting surface
    Export,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    match cli.command {
        Command::Extract {
            condition,
            phase,
            max_pages,
        } => {
            extract(&config, condition, phase, max_pages).await?;
        }
        Command::Aggregate => {
            aggregate(&config)?;
        }
        Command::Metrics => {
            metrics(&config)?;
        }
        Command::Cluster { n_clusters } => {
            cluster(&config, n_clusters)?;
        }
        Command::Recommend {
            conditions,
            phase,
            country,
            top_n,
        } => {
            recommend(&config, conditions, phase, country, top_n)?;
        }
        Command::Pipeline {
            condition,
            phase,
            max_pages,
            n_clusters,
        } => {
            pipeline(&config, condition, phase, max_pages, n_clusters).await?;
        }
        Command::Export => {
            export(&config)?;
        }
    }

    Ok(())
}

fn trials_path(config: &EngineConfig) -> PathBuf {
    config.data_dir.join("trials.json")
}

fn sites_path(config: &EngineConfig) -> PathBuf {
    config.data_dir.join("sites.json")
}

fn load_trials(config: &EngineConfig) -> Result<TrialStore> {
    TrialStore::load(&trials_path(config))
        .context("No trial snapshot found - run `siteval extract` first")
}

fn load_sites(config: &EngineConfig) -> Result<SiteStore> {
    SiteStore::load(&sites_path(config))
        .context("No site snapshot found - run `siteval aggregate` first")
}

async fn extract(
    config: &EngineConfig,
    condition: String,
    phase: Option<String>,
    max_pages: usize,
) -> Result<()> {
    info!("Fetching studies for condition: {}", condition);

    let mut store = if trials_path(config).exists() {
        load_trials(config)?
    } else {
        TrialStore::new()
    };

    let loader = DataLoader::new(RegistryClient::new(config));
    let query = StudyQuery {
        condition: Some(condition),
        phase,
        max_pages: Some(max_pages),
        ..Default::default()
    };
    let stats = loader.load_studies(&mut store, &query).await?;

    store.save(&trials_path(config))?;
    println!(
        "Loaded {} new studies, updated {} ({} fetched, {} skipped)",
        stats.loaded, stats.updated, stats.fetched, stats.skipped
    );
    Ok(())
}

fn aggregate(config: &EngineConfig) -> Result<()> {
    let trials = load_trials(config)?;
    let mut sites = if sites_path(config).exists() {
        load_sites(config)?
    } else {
        SiteStore::new()
    };

    let resolver = SiteResolver::new(config);
    let stats = resolver.resolve(&trials, &mut sites);

    sites.save(&sites_path(config))?;
    println!(
        "Resolved {} locations into {} site groups ({} inserted, {} updated, {} dropped, {} skipped)",
        stats.locations_seen,
        stats.groups_formed,
        stats.sites_inserted,
        stats.sites_updated,
        stats.locations_dropped,
        stats.groups_skipped
    );
    Ok(())
}

fn metrics(config: &EngineConfig) -> Result<()> {
    let mut sites = load_sites(config)?;

    let calculator = MetricsCalculator::new(config, Utc::now().date_naive());
    let stats = calculator.calculate_all(&mut sites);

    sites.save(&sites_path(config))?;
    println!(
        "Calculated metrics for {} sites ({} failures)",
        stats.sites_processed, stats.failures
    );
    Ok(())
}

fn cluster(config: &EngineConfig, n_clusters: Option<usize>) -> Result<()> {
    let sites = load_sites(config)?;

    let mut clusterer = SiteClusterer::new(config);
    if let Some(k) = n_clusters {
        clusterer = clusterer.with_k(k);
    }

    match clusterer.cluster_sites(sites.sites()) {
        ClusteringOutcome::Performed(model) => {
            for (cluster_id, members) in model.clusters() {
                println!("\n--- Cluster {} ---", cluster_id);
                println!("Sites: {}", members.len());
                for (feature, value) in model.characteristics(cluster_id) {
                    println!("  {}: {}", feature, value);
                }
            }
        }
        ClusteringOutcome::InsufficientData {
            available,
            required,
        } => {
            println!(
                "Clustering not performed: {} sites available, at least {} required",
                available, required
            );
        }
    }
    Ok(())
}

fn recommend(
    config: &EngineConfig,
    conditions: Vec<String>,
    phase: String,
    country: Option<String>,
    top_n: usize,
) -> Result<()> {
    let sites = load_sites(config)?;

    let calculator = MetricsCalculator::new(config, Utc::now().date_naive());
    let recommender = SiteRecommender::new(calculator);
    let profile = TargetProfile {
        conditions,
        phase,
        country,
    };

    let ranked = recommender.recommend(sites.sites(), &profile, top_n);
    if ranked.is_empty() {
        println!("No matching sites found");
        return Ok(());
    }
    for (rank, recommendation) in ranked.iter().enumerate() {
        println!(
            "{:2}. {} - {:.2}",
            rank + 1,
            recommendation.label,
            recommendation.score
        );
    }
    Ok(())
}

fn export(config: &EngineConfig) -> Result<()> {
    let trials = load_trials(config)?;
    let sites = load_sites(config)?;
    export_all(&trials, &sites, &config.data_dir, Utc::now().date_naive())?;
    println!("Exports written to {}", config.data_dir.display());
    Ok(())
}

async fn pipeline(
    config: &EngineConfig,
    condition: String,
    phase: Option<String>,
    max_pages: usize,
    n_clusters: Option<usize>,
) -> Result<()> {
    let run_id = Uuid::new_v4();
    let started = Instant::now();
    info!("Starting site evaluation pipeline run {}", run_id);

    let main_pb = ProgressBar::new(4);
    main_pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );

    main_pb.set_message("Phase 1: Data extraction");
    extract(config, condition, phase, max_pages)
        .await
        .context("Data extraction failed")?;
    main_pb.inc(1);

    main_pb.set_message("Phase 2: Site aggregation");
    aggregate(config).context("Site aggregation failed")?;
    main_pb.inc(1);

    main_pb.set_message("Phase 3: Metrics calculation");
    metrics(config).context("Metrics calculation failed")?;
    main_pb.inc(1);

    main_pb.set_message("Phase 4: Site clustering");
    cluster(config, n_clusters).context("Site clustering failed")?;
    main_pb.inc(1);

    main_pb.finish_with_message("Pipeline complete");
    info!(
        "Pipeline run {} finished in {:.1?}",
        run_id,
        started.elapsed()
    );
    Ok(())
}
