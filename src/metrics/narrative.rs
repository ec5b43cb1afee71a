// src/metrics/narrative.rs - Rule-based strengths/weaknesses findings
//
// A fixed sequence of independent rules, each contributing at most one
// finding to one of the two lists. The sequence is the ordering contract:
// findings appear in rule order, never re-sorted.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::months_between;
use crate::models::core::CanonicalSite;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAssessment {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

struct RuleContext {
    months_since_active: Option<f64>,
}

type Rule = fn(&CanonicalSite, &RuleContext, &mut SiteAssessment);

const RULES: [Rule; 10] = [
    completion_rate_rule,
    experience_rule,
    active_studies_rule,
    therapeutic_diversity_rule,
    data_quality_rule,
    recency_rule,
    termination_rule,
    track_record_rule,
    phase_expertise_rule,
    enrollment_capacity_rule,
];

/// Evaluate every rule against the site, in order. Pure: the site is not
/// mutated and identical input always yields the identical assessment.
pub fn generate_strengths_weaknesses(site: &CanonicalSite, as_of: NaiveDate) -> SiteAssessment {
    let ctx = RuleContext {
        months_since_active: site
            .last_active_date
            .map(|date| months_between(date, as_of)),
    };

    let mut assessment = SiteAssessment::default();
    for rule in RULES.iter() {
        rule(site, &ctx, &mut assessment);
    }

    if assessment.strengths.is_empty() && site.total_studies > 0 {
        assessment
            .strengths
            .push("Active clinical research site".to_string());
    }

    assessment
}

fn completion_rate_rule(site: &CanonicalSite, _ctx: &RuleContext, out: &mut SiteAssessment) {
    let ratio = match site.completion_ratio {
        Some(ratio) if ratio > 0.0 => ratio,
        _ => return,
    };
    let pct = ratio * 100.0;
    if ratio >= 0.9 {
        out.strengths.push(format!(
            "Exceptional completion rate ({:.0}%) - outstanding operational discipline",
            pct
        ));
    } else if ratio >= 0.8 {
        out.strengths.push(format!(
            "High completion rate ({:.0}%) - strong operational discipline",
            pct
        ));
    } else if ratio >= 0.6 {
        out.strengths
            .push(format!("Good completion rate ({:.0}%)", pct));
    } else if ratio < 0.5 {
        out.weaknesses.push(format!(
            "Low completion rate ({:.0}%) - possible operational issues",
            pct
        ));
    }
}

fn experience_rule(site: &CanonicalSite, _ctx: &RuleContext, out: &mut SiteAssessment) {
    let total = site.total_studies;
    if total >= 50 {
        out.strengths.push(format!(
            "Extensive trial experience ({} studies) - highly experienced site",
            total
        ));
    } else if total >= 20 {
        out.strengths
            .push(format!("Solid experience ({} studies)", total));
    } else if total >= 10 {
        out.strengths
            .push(format!("Moderate experience ({} studies)", total));
    } else if total < 3 {
        out.weaknesses
            .push(format!("Limited trial experience ({} study/studies)", total));
    }
}

fn active_studies_rule(site: &CanonicalSite, _ctx: &RuleContext, out: &mut SiteAssessment) {
    if site.ongoing_studies >= 5 {
        out.strengths.push(format!(
            "Currently active with {} ongoing studies",
            site.ongoing_studies
        ));
    } else if site.total_studies > 0
        && site.ongoing_studies == 0
        && site.completed_studies > 0
    {
        out.weaknesses
            .push("No currently active studies".to_string());
    }
}

fn therapeutic_diversity_rule(site: &CanonicalSite, _ctx: &RuleContext, out: &mut SiteAssessment) {
    let count = site.therapeutic_areas.len();
    if count == 0 {
        return;
    }
    if count >= 15 {
        out.strengths.push(format!(
            "Highly diverse therapeutic portfolio ({} areas)",
            count
        ));
    } else if count >= 10 {
        out.strengths
            .push(format!("Diverse therapeutic portfolio ({} areas)", count));
    } else if count >= 5 {
        out.strengths
            .push(format!("Moderate therapeutic diversity ({} areas)", count));
    } else if count <= 2 && site.total_studies >= 5 {
        out.strengths.push(format!(
            "Specialized expertise in {} therapeutic area(s)",
            count
        ));
    }
}

fn data_quality_rule(site: &CanonicalSite, _ctx: &RuleContext, out: &mut SiteAssessment) {
    let score = match site.data_quality_score {
        Some(score) if score > 0.0 => score,
        _ => return,
    };
    if score >= 0.9 {
        out.strengths.push(format!(
            "Excellent data quality ({:.2}) - comprehensive reporting",
            score
        ));
    } else if score >= 0.8 {
        out.strengths.push(format!("High data quality ({:.2})", score));
    } else if score >= 0.6 {
        out.strengths.push(format!("Good data quality ({:.2})", score));
    } else if score < 0.5 {
        out.weaknesses.push(format!(
            "Low data quality ({:.2}) - incomplete reporting",
            score
        ));
    }
}

fn recency_rule(_site: &CanonicalSite, ctx: &RuleContext, out: &mut SiteAssessment) {
    let months = match ctx.months_since_active {
        Some(months) => months,
        None => return,
    };
    if months <= 6.0 {
        out.strengths
            .push("Very recently active (within 6 months)".to_string());
    } else if months <= 12.0 {
        out.strengths
            .push("Recently active (within 12 months)".to_string());
    } else if months <= 36.0 {
        // Neutral band: not fresh enough to praise, not stale enough to flag.
    } else {
        out.weaknesses
            .push("No recent trial activity (3+ years)".to_string());
    }
}

fn termination_rule(site: &CanonicalSite, _ctx: &RuleContext, out: &mut SiteAssessment) {
    if site.total_studies == 0 {
        return;
    }
    let rate = f64::from(site.terminated_studies + site.withdrawn_studies)
        / f64::from(site.total_studies);
    if rate > 0.4 {
        out.weaknesses.push(format!(
            "High termination rate ({:.0}%) - significant operational concerns",
            rate * 100.0
        ));
    } else if rate > 0.25 {
        out.weaknesses
            .push(format!("Elevated termination rate ({:.0}%)", rate * 100.0));
    } else if rate == 0.0 && site.completed_studies > 5 {
        out.strengths
            .push("Zero termination rate - excellent track record".to_string());
    }
}

fn track_record_rule(site: &CanonicalSite, _ctx: &RuleContext, out: &mut SiteAssessment) {
    if site.completed_studies >= 20 {
        out.strengths.push(format!(
            "Strong track record with {} completed studies",
            site.completed_studies
        ));
    } else if site.completed_studies >= 10 {
        out.strengths.push(format!(
            "Good track record with {} completed studies",
            site.completed_studies
        ));
    }
}

fn phase_expertise_rule(site: &CanonicalSite, _ctx: &RuleContext, out: &mut SiteAssessment) {
    let avg_phase = match site.avg_phase {
        Some(avg_phase) => avg_phase,
        None => return,
    };
    if avg_phase >= 2.5 {
        out.strengths.push(format!(
            "Experience with advanced phase trials (avg Phase {:.1})",
            avg_phase
        ));
    } else if avg_phase >= 2.0 {
        out.strengths
            .push(format!("Phase 2-3 expertise (avg Phase {:.1})", avg_phase));
    }
}

fn enrollment_capacity_rule(site: &CanonicalSite, _ctx: &RuleContext, out: &mut SiteAssessment) {
    let avg = match site.avg_enrollment {
        Some(avg) => avg,
        None => return,
    };
    if avg >= 100.0 {
        out.strengths
            .push(format!("Large enrollment capacity (avg {:.0} patients)", avg));
    } else if avg >= 50.0 {
        out.strengths
            .push(format!("Good enrollment capacity (avg {:.0} patients)", avg));
    }
}
