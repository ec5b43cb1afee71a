// src/recommend.rs - Rank sites against a target study profile

use log::info;
use serde::Serialize;
use std::cmp::Ordering;

use crate::metrics::{round2, MetricsCalculator};
use crate::models::core::{CanonicalSite, TargetProfile};

/// Performance bonus on top of the match score.
pub const COMPLETION_BONUS_WEIGHT: f64 = 0.2;
pub const QUALITY_BONUS_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub label: String,
    pub score: f64,
}

pub struct SiteRecommender {
    calculator: MetricsCalculator,
}

impl SiteRecommender {
    pub fn new(calculator: MetricsCalculator) -> Self {
        Self { calculator }
    }

    /// Score every candidate site against the profile and return the top N.
    /// A country filter excludes non-matching sites before scoring; it is
    /// not a down-rank. Ties keep their input order (stable sort).
    pub fn recommend(
        &self,
        sites: &[CanonicalSite],
        profile: &TargetProfile,
        top_n: usize,
    ) -> Vec<Recommendation> {
        let candidates: Vec<&CanonicalSite> = match profile.country.as_deref() {
            Some(country) => sites.iter().filter(|site| site.country == country).collect(),
            None => sites.iter().collect(),
        };

        info!(
            "Ranking {} candidate sites for {} target condition(s)",
            candidates.len(),
            profile.conditions.len()
        );

        let mut ranked: Vec<Recommendation> = candidates
            .iter()
            .map(|site| {
                // Without a target country the region component compares the
                // site against its own country and contributes full credit.
                let region = profile.country.as_deref().unwrap_or(&site.country);
                let match_score = self.calculator.match_score(
                    site,
                    &profile.conditions,
                    &profile.phase,
                    region,
                );
                let performance_bonus = COMPLETION_BONUS_WEIGHT
                    * site.completion_ratio.unwrap_or(0.0)
                    + QUALITY_BONUS_WEIGHT * site.data_quality_score.unwrap_or(0.0);
                Recommendation {
                    label: site.display_label(),
                    score: round2(match_score + performance_bonus),
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        ranked.truncate(top_n);
        ranked
    }
}
