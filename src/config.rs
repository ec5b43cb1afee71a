// src/config.rs - Engine configuration with documented defaults

use log::{debug, warn};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_FUZZY_MATCH_THRESHOLD: f64 = 85.0;
pub const DEFAULT_N_CLUSTERS: usize = 5;
pub const DEFAULT_KMEANS_SEED: u64 = 42;
pub const DEFAULT_KMEANS_N_INIT: usize = 10;
pub const DEFAULT_KMEANS_MAX_ITER: usize = 300;
pub const DEFAULT_TOP_N_RECOMMENDATIONS: usize = 10;

pub const DEFAULT_REGISTRY_BASE_URL: &str = "https://clinicaltrials.gov/api/v2";
pub const DEFAULT_API_MAX_RETRIES: usize = 3;
pub const DEFAULT_API_RETRY_DELAY_SECS: u64 = 2;
pub const DEFAULT_API_PAGE_SIZE: usize = 100;

pub const DEFAULT_DATA_DIR: &str = "data";

/// Weights for the four match-score components. Documented defaults sum to
/// 1.0; the weighted sum then needs no clamping.
#[derive(Debug, Clone)]
pub struct MatchWeights {
    pub therapeutic: f64,
    pub phase: f64,
    pub intervention: f64,
    pub region: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            therapeutic: 0.4,
            phase: 0.2,
            intervention: 0.2,
            region: 0.2,
        }
    }
}

impl MatchWeights {
    pub fn sum(&self) -> f64 {
        self.therapeutic + self.phase + self.intervention + self.region
    }
}

/// All tunables for one pipeline run, loaded once and passed into each engine
/// at construction. No module-level mutable state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum 0-100 similarity ratio for two site keys to merge.
    pub fuzzy_threshold: f64,
    pub match_weights: MatchWeights,
    pub n_clusters: usize,
    pub kmeans_seed: u64,
    pub kmeans_n_init: usize,
    pub kmeans_max_iter: usize,
    pub registry_base_url: String,
    pub api_max_retries: usize,
    pub api_retry_delay_secs: u64,
    pub api_page_size: usize,
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: DEFAULT_FUZZY_MATCH_THRESHOLD,
            match_weights: MatchWeights::default(),
            n_clusters: DEFAULT_N_CLUSTERS,
            kmeans_seed: DEFAULT_KMEANS_SEED,
            kmeans_n_init: DEFAULT_KMEANS_N_INIT,
            kmeans_max_iter: DEFAULT_KMEANS_MAX_ITER,
            registry_base_url: DEFAULT_REGISTRY_BASE_URL.to_string(),
            api_max_retries: DEFAULT_API_MAX_RETRIES,
            api_retry_delay_secs: DEFAULT_API_RETRY_DELAY_SECS,
            api_page_size: DEFAULT_API_PAGE_SIZE,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables, falling back to the
    /// documented defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            fuzzy_threshold: parse_env("FUZZY_MATCH_THRESHOLD", defaults.fuzzy_threshold),
            match_weights: MatchWeights {
                therapeutic: parse_env(
                    "MATCH_WEIGHT_THERAPEUTIC",
                    defaults.match_weights.therapeutic,
                ),
                phase: parse_env("MATCH_WEIGHT_PHASE", defaults.match_weights.phase),
                intervention: parse_env(
                    "MATCH_WEIGHT_INTERVENTION",
                    defaults.match_weights.intervention,
                ),
                region: parse_env("MATCH_WEIGHT_REGION", defaults.match_weights.region),
            },
            n_clusters: parse_env("N_CLUSTERS", defaults.n_clusters),
            kmeans_seed: parse_env("KMEANS_SEED", defaults.kmeans_seed),
            kmeans_n_init: parse_env("KMEANS_N_INIT", defaults.kmeans_n_init),
            kmeans_max_iter: parse_env("KMEANS_MAX_ITER", defaults.kmeans_max_iter),
            registry_base_url: env::var("REGISTRY_API_BASE_URL")
                .unwrap_or(defaults.registry_base_url),
            api_max_retries: parse_env("API_MAX_RETRIES", defaults.api_max_retries),
            api_retry_delay_secs: parse_env("API_RETRY_DELAY", defaults.api_retry_delay_secs),
            api_page_size: parse_env("API_PAGE_SIZE", defaults.api_page_size),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        };

        debug!(
            "Engine config: fuzzy_threshold={}, n_clusters={}, weights={:?}",
            config.fuzzy_threshold, config.n_clusters, config.match_weights
        );

        let weight_sum = config.match_weights.sum();
        if (weight_sum - 1.0).abs() > 1e-9 {
            warn!(
                "Match-score weights sum to {:.3}, not 1.0; scores will not stay in [0, 1]",
                weight_sum
            );
        }

        config
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
