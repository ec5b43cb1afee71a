// src/metrics/mod.rs - Per-site quality and performance signals

pub mod narrative;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use log::{info, warn};
use std::collections::HashSet;

use crate::config::{EngineConfig, MatchWeights};
use crate::models::core::CanonicalSite;
use crate::phase::phase_number;
use crate::store::SiteStore;

/// Neutral intervention-match signal. Target interventions are not modeled
/// at this granularity yet; the constant keeps the weighted sum well-defined.
const INTERVENTION_MATCH_DEFAULT: f64 = 0.5;

/// Partial credit when the site sits outside the target region.
const CROSS_REGION_MATCH: f64 = 0.3;

/// Number of fields on the completeness checklist.
const COMPLETENESS_FIELDS: f64 = 10.0;

#[derive(Debug, Default)]
pub struct MetricsStats {
    pub sites_processed: usize,
    pub failures: usize,
}

/// Derives completion ratio, data-quality score, experience index, and
/// query-time match scores. `as_of` anchors every recency computation so the
/// outputs are pure functions of their inputs.
pub struct MetricsCalculator {
    weights: MatchWeights,
    as_of: NaiveDate,
}

impl MetricsCalculator {
    pub fn new(config: &EngineConfig, as_of: NaiveDate) -> Self {
        Self {
            weights: config.match_weights.clone(),
            as_of,
        }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// Recompute the stored scores for every site. A failure on one site is
    /// logged and leaves that site's prior values in place; the rest of the
    /// batch still runs.
    pub fn calculate_all(&self, sites: &mut SiteStore) -> MetricsStats {
        let mut stats = MetricsStats::default();

        for site in sites.sites_mut() {
            match self.compute_for_site(site) {
                Ok(()) => stats.sites_processed += 1,
                Err(err) => {
                    warn!("Error calculating metrics for {}: {}", site.name, err);
                    stats.failures += 1;
                }
            }
        }

        info!(
            "Metrics calculation complete: {} sites, {} failures",
            stats.sites_processed, stats.failures
        );
        stats
    }

    fn compute_for_site(&self, site: &mut CanonicalSite) -> Result<()> {
        let concluded =
            site.completed_studies + site.terminated_studies + site.withdrawn_studies;
        if concluded > site.total_studies {
            bail!(
                "inconsistent study counts: {} concluded out of {} total",
                concluded,
                site.total_studies
            );
        }
        if let Some(enrollment) = site.avg_enrollment {
            if !enrollment.is_finite() || enrollment < 0.0 {
                bail!("malformed average enrollment: {}", enrollment);
            }
        }

        let completion = self.completion_ratio(site);
        let quality = self.data_quality(site);

        site.completion_ratio = Some(completion);
        site.data_quality_score = Some(quality);
        site.experience_index = Some(site.total_studies);
        Ok(())
    }

    /// Completed / (completed + terminated + withdrawn). A site with no
    /// concluded studies scores 0.0, meaning "no evidence yet" rather than
    /// "performs poorly".
    pub fn completion_ratio(&self, site: &CanonicalSite) -> f64 {
        let concluded =
            site.completed_studies + site.terminated_studies + site.withdrawn_studies;
        if concluded == 0 {
            return 0.0;
        }
        let ratio = f64::from(site.completed_studies) / f64::from(concluded);
        round2(ratio.min(1.0))
    }

    /// Completeness over the fixed field checklist, discounted by a step
    /// function of months since last activity. A missing date is not
    /// penalized; only known staleness is.
    pub fn data_quality(&self, site: &CanonicalSite) -> f64 {
        let mut filled = 0u32;
        if !site.name.is_empty() {
            filled += 1;
        }
        if !site.city.is_empty() {
            filled += 1;
        }
        if !site.country.is_empty() {
            filled += 1;
        }
        if !site.therapeutic_areas.is_empty() {
            filled += 1;
        }
        if !site.investigators.is_empty() {
            filled += 1;
        }
        if site.avg_phase.is_some() {
            filled += 1;
        }
        if site.avg_enrollment.is_some() {
            filled += 1;
        }
        if site.last_active_date.is_some() {
            filled += 1;
        }
        if site.total_studies > 0 {
            filled += 1;
        }
        if site.completed_studies > 0 {
            filled += 1;
        }

        let completeness = f64::from(filled) / COMPLETENESS_FIELDS;

        let recency_weight = match site.last_active_date {
            None => 1.0,
            Some(date) => {
                let months = months_between(date, self.as_of);
                if months <= 12.0 {
                    1.0
                } else if months <= 24.0 {
                    0.8
                } else if months <= 36.0 {
                    0.6
                } else {
                    0.4
                }
            }
        };

        round2(completeness * recency_weight)
    }

    /// Weighted similarity between a site's profile and a target study's
    /// requirements. With the default weights the result lives in [0, 1].
    pub fn match_score(
        &self,
        site: &CanonicalSite,
        target_conditions: &[String],
        target_phase: &str,
        target_region: &str,
    ) -> f64 {
        let site_conditions: HashSet<&str> =
            site.therapeutic_areas.iter().map(String::as_str).collect();
        let target_set: HashSet<&str> =
            target_conditions.iter().map(String::as_str).collect();

        let therapeutic_match = if site_conditions.is_empty() || target_set.is_empty() {
            0.0
        } else {
            site_conditions.intersection(&target_set).count() as f64 / target_set.len() as f64
        };

        let phase_match = match (site.avg_phase, phase_number(target_phase)) {
            (Some(site_phase), Some(target)) => {
                let diff = (site_phase - target).abs();
                (1.0 - diff / 4.0).max(0.0)
            }
            _ => 0.0,
        };

        let region_match = if target_region.to_lowercase() == site.country.to_lowercase() {
            1.0
        } else {
            CROSS_REGION_MATCH
        };

        let score = self.weights.therapeutic * therapeutic_match
            + self.weights.phase * phase_match
            + self.weights.intervention * INTERVENTION_MATCH_DEFAULT
            + self.weights.region * region_match;

        round2(score)
    }
}

/// Whole months elapsed, on the 30-day month the recency tiers are
/// calibrated against.
pub(crate) fn months_between(from: NaiveDate, as_of: NaiveDate) -> f64 {
    (as_of - from).num_days() as f64 / 30.0
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
