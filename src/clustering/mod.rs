// src/clustering/mod.rs - Feature-space grouping of scored sites

pub mod kmeans;

use log::{info, warn};
use ndarray::{Array1, Array2, Axis};
use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::metrics::round2;
use crate::models::core::CanonicalSite;
use self::kmeans::{KMeansModel, KMeansParams};

pub const FEATURE_DIM: usize = 9;

/// Feature order is significant: vectors, centroids, and characteristic
/// summaries all index against this list.
pub const FEATURE_NAMES: [&str; FEATURE_DIM] = [
    "Total Studies",
    "Completed Studies",
    "Ongoing Studies",
    "Terminated Studies",
    "Avg Phase",
    "Avg Enrollment",
    "Completion Ratio",
    "Data Quality Score",
    "Experience Index",
];

/// Missing values default to 0 so unscored sites still embed.
pub fn feature_vector(site: &CanonicalSite) -> [f64; FEATURE_DIM] {
    [
        f64::from(site.total_studies),
        f64::from(site.completed_studies),
        f64::from(site.ongoing_studies),
        f64::from(site.terminated_studies),
        site.avg_phase.unwrap_or(0.0),
        site.avg_enrollment.unwrap_or(0.0),
        site.completion_ratio.unwrap_or(0.0),
        site.data_quality_score.unwrap_or(0.0),
        site.experience_index.map(f64::from).unwrap_or(0.0),
    ]
}

fn feature_matrix(sites: &[CanonicalSite]) -> Array2<f64> {
    let mut matrix = Array2::<f64>::zeros((sites.len(), FEATURE_DIM));
    for (i, site) in sites.iter().enumerate() {
        let features = feature_vector(site);
        for (j, value) in features.iter().enumerate() {
            matrix[[i, j]] = *value;
        }
    }
    matrix
}

/// Per-feature z-score normalization fitted over one population. Constant
/// features get a unit deviation so they transform to zero instead of NaN.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    means: Array1<f64>,
    stds: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Self {
        let n = data.nrows().max(1) as f64;
        let means = data.sum_axis(Axis(0)) / n;

        let mut variances = Array1::<f64>::zeros(data.ncols());
        for row in data.rows() {
            for (j, value) in row.iter().enumerate() {
                let dev = value - means[j];
                variances[j] += dev * dev;
            }
        }
        let stds = variances.mapv(|v| {
            let std = (v / n).sqrt();
            if std > 0.0 {
                std
            } else {
                1.0
            }
        });

        Self { means, stds }
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut out = data.clone();
        for mut row in out.rows_mut() {
            for (j, value) in row.iter_mut().enumerate() {
                *value = (*value - self.means[j]) / self.stds[j];
            }
        }
        out
    }

    pub fn transform_vector(&self, features: &[f64; FEATURE_DIM]) -> Array1<f64> {
        let mut out = Array1::<f64>::zeros(FEATURE_DIM);
        for (j, value) in features.iter().enumerate() {
            out[j] = (value - self.means[j]) / self.stds[j];
        }
        out
    }
}

/// The fit artifact. Holding the fitted scaler, centroids, raw features, and
/// training assignment together makes fit-before-use a type-level fact:
/// characterization and prediction only exist on a performed clustering.
#[derive(Debug, Clone)]
pub struct ClusterModel {
    scaler: StandardScaler,
    kmeans: KMeansModel,
    raw_features: Array2<f64>,
    site_names: Vec<String>,
    k: usize,
}

impl ClusterModel {
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn inertia(&self) -> f64 {
        self.kmeans.inertia
    }

    pub fn assignments(&self) -> &[usize] {
        &self.kmeans.labels
    }

    /// Cluster id to member site names, covering every input site exactly
    /// once.
    pub fn clusters(&self) -> BTreeMap<usize, Vec<String>> {
        let mut clusters: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (name, &label) in self.site_names.iter().zip(self.kmeans.labels.iter()) {
            clusters.entry(label).or_default().push(name.clone());
        }
        clusters
    }

    /// Mean of each raw (unstandardized) feature across the cluster's
    /// members, for interpretability. Empty for an unknown or empty cluster.
    pub fn characteristics(&self, cluster_id: usize) -> Vec<(String, f64)> {
        let members: Vec<usize> = self
            .kmeans
            .labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == cluster_id)
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            return Vec::new();
        }

        let mut means = vec![0.0f64; FEATURE_DIM];
        for &i in &members {
            for j in 0..FEATURE_DIM {
                means[j] += self.raw_features[[i, j]];
            }
        }
        FEATURE_NAMES
            .iter()
            .zip(means.into_iter())
            .map(|(name, sum)| (name.to_string(), round2(sum / members.len() as f64)))
            .collect()
    }

    /// Assign a new site using the already-fitted scaler and centroids,
    /// never a refit.
    pub fn predict(&self, site: &CanonicalSite) -> usize {
        let standardized = self.scaler.transform_vector(&feature_vector(site));
        self.kmeans.predict(standardized.view())
    }
}

/// Why a clustering pass produced no model.
#[derive(Debug)]
pub enum ClusteringOutcome {
    Performed(ClusterModel),
    InsufficientData { available: usize, required: usize },
}

pub struct SiteClusterer {
    k: usize,
    n_init: usize,
    max_iter: usize,
    seed: u64,
}

impl SiteClusterer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            k: config.n_clusters,
            n_init: config.kmeans_n_init,
            max_iter: config.kmeans_max_iter,
            seed: config.kmeans_seed,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Standardize the population's feature matrix and partition it into `k`
    /// groups. A population smaller than `k` is a reported precondition
    /// failure, not an error.
    pub fn cluster_sites(&self, sites: &[CanonicalSite]) -> ClusteringOutcome {
        if sites.len() < self.k {
            warn!(
                "Not enough sites for clustering: {} available, {} required",
                sites.len(),
                self.k
            );
            return ClusteringOutcome::InsufficientData {
                available: sites.len(),
                required: self.k,
            };
        }

        info!("Clustering {} sites into {} groups", sites.len(), self.k);

        let raw_features = feature_matrix(sites);
        let scaler = StandardScaler::fit(&raw_features);
        let standardized = scaler.transform(&raw_features);

        let kmeans = kmeans::fit(
            &standardized,
            &KMeansParams {
                k: self.k,
                n_init: self.n_init,
                max_iter: self.max_iter,
                seed: self.seed,
            },
        );

        let model = ClusterModel {
            scaler,
            kmeans,
            raw_features,
            site_names: sites.iter().map(|site| site.name.clone()).collect(),
            k: self.k,
        };

        for (cluster_id, members) in model.clusters() {
            info!("Cluster {}: {} sites", cluster_id, members.len());
        }

        ClusteringOutcome::Performed(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scored_site(name: &str, total: u32, completed: u32, enrollment: f64) -> CanonicalSite {
        CanonicalSite {
            name: name.to_string(),
            city: "City".to_string(),
            country: "USA".to_string(),
            location_ids: vec![1],
            total_studies: total,
            completed_studies: completed,
            ongoing_studies: total.saturating_sub(completed),
            terminated_studies: 0,
            withdrawn_studies: 0,
            therapeutic_areas: vec!["Oncology".to_string()],
            investigators: Vec::new(),
            avg_phase: Some(2.0),
            avg_enrollment: Some(enrollment),
            last_active_date: None,
            completion_ratio: Some(if total > 0 {
                f64::from(completed) / f64::from(total)
            } else {
                0.0
            }),
            data_quality_score: Some(0.8),
            experience_index: Some(total),
            updated_at: Utc::now(),
        }
    }

    fn population() -> Vec<CanonicalSite> {
        let mut sites = Vec::new();
        for tier in 0..5u32 {
            for copy in 0..2u32 {
                sites.push(scored_site(
                    &format!("Site {}-{}", tier, copy),
                    20 * tier + 1,
                    15 * tier,
                    f64::from(200 * tier + 10 + copy),
                ));
            }
        }
        sites
    }

    #[test]
    fn test_insufficient_population_is_reported() {
        let sites = vec![scored_site("Only", 5, 3, 40.0)];
        let clusterer = SiteClusterer::new(&EngineConfig::default());
        match clusterer.cluster_sites(&sites) {
            ClusteringOutcome::InsufficientData {
                available,
                required,
            } => {
                assert_eq!(available, 1);
                assert_eq!(required, 5);
            }
            ClusteringOutcome::Performed(_) => panic!("expected insufficient data"),
        }
    }

    #[test]
    fn test_partitions_cover_population_exactly_once() {
        let sites = population();
        let clusterer = SiteClusterer::new(&EngineConfig::default());
        let model = match clusterer.cluster_sites(&sites) {
            ClusteringOutcome::Performed(model) => model,
            ClusteringOutcome::InsufficientData { .. } => panic!("expected clustering"),
        };

        let clusters = model.clusters();
        assert_eq!(clusters.len(), 5);
        let total_members: usize = clusters.values().map(Vec::len).sum();
        assert_eq!(total_members, sites.len());
        assert!(model.assignments().iter().all(|&label| label < 5));
    }

    #[test]
    fn test_clustering_is_reproducible() {
        let sites = population();
        let clusterer = SiteClusterer::new(&EngineConfig::default());
        let first = match clusterer.cluster_sites(&sites) {
            ClusteringOutcome::Performed(model) => model,
            _ => panic!("expected clustering"),
        };
        let second = match clusterer.cluster_sites(&sites) {
            ClusteringOutcome::Performed(model) => model,
            _ => panic!("expected clustering"),
        };
        assert_eq!(first.assignments(), second.assignments());
        assert_eq!(first.inertia(), second.inertia());
    }

    #[test]
    fn test_scaler_standardizes_and_handles_constant_features() {
        let sites = population();
        let data = feature_matrix(&sites);
        let scaler = StandardScaler::fit(&data);
        let standardized = scaler.transform(&data);

        let n = standardized.nrows() as f64;
        for j in 0..FEATURE_DIM {
            let mean: f64 = standardized.column(j).iter().sum::<f64>() / n;
            assert!(mean.abs() < 1e-9, "feature {} mean {}", j, mean);
            assert!(standardized.column(j).iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_predict_uses_fitted_scaler() {
        let sites = population();
        let clusterer = SiteClusterer::new(&EngineConfig::default());
        let model = match clusterer.cluster_sites(&sites) {
            ClusteringOutcome::Performed(model) => model,
            _ => panic!("expected clustering"),
        };
        for (i, site) in sites.iter().enumerate() {
            assert_eq!(model.predict(site), model.assignments()[i]);
        }
    }

    #[test]
    fn test_characteristics_average_raw_features() {
        let sites = population();
        let clusterer = SiteClusterer::new(&EngineConfig::default()).with_k(5);
        let model = match clusterer.cluster_sites(&sites) {
            ClusteringOutcome::Performed(model) => model,
            _ => panic!("expected clustering"),
        };

        let clusters = model.clusters();
        let (&cluster_id, members) = clusters.iter().next().unwrap();
        let characteristics = model.characteristics(cluster_id);
        assert_eq!(characteristics.len(), FEATURE_DIM);
        assert_eq!(characteristics[0].0, "Total Studies");

        // Raw-feature scale, not z-scores: member totals are >= 1.
        assert!(characteristics[0].1 >= 1.0);
        assert_eq!(members.len(), model.clusters()[&cluster_id].len());

        assert!(model.characteristics(99).is_empty());
    }
}
