use crate::clamp_unit;
use crate::config::{DomainMismatchConfig, ScoringConfig};
use crate::domain_utils::DomainUtils;
use crate::email::RawEmail;
use crate::footprint::FootprintData;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MitigationAction {
    None,
    Flag,
    MarkAsPhishing,
}

impl MitigationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MitigationAction::None => "NONE",
            MitigationAction::Flag => "FLAG",
            MitigationAction::MarkAsPhishing => "MARK_AS_PHISHING",
        }
    }
}

impl std::fmt::Display for MitigationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weighted components; their sum, clamped, is the threat score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub footprint_component: f64,
    pub domain_mismatch_component: f64,
    pub content_component: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.footprint_component + self.domain_mismatch_component + self.content_component
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAnalysis {
    pub email_id: String,
    pub threat_score: f64,
    pub breakdown: ScoreBreakdown,
    pub mitigation_action: MitigationAction,
}

/// Combines footprint, domain-mismatch and content risk into one score and
/// picks the mitigation for it. Pure: no I/O, no state beyond configuration.
pub struct ThreatScorer {
    scoring: ScoringConfig,
    personal_domains: Vec<String>,
    professional_patterns: Vec<Regex>,
}

impl Default for ThreatScorer {
    fn default() -> Self {
        Self::build(ScoringConfig::default(), DomainMismatchConfig::default())
    }
}

impl ThreatScorer {
    /// Rejects weights that do not sum to 1.0 and out-of-range thresholds.
    pub fn new(
        scoring: ScoringConfig,
        domain_mismatch: DomainMismatchConfig,
    ) -> anyhow::Result<Self> {
        scoring.validate()?;
        Ok(Self::build(scoring, domain_mismatch))
    }

    fn build(scoring: ScoringConfig, domain_mismatch: DomainMismatchConfig) -> Self {
        let professional_patterns = domain_mismatch
            .professional_keywords
            .iter()
            .filter_map(|pattern| {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        log::warn!("Ignoring invalid professional keyword '{pattern}': {e}");
                        None
                    }
                }
            })
            .collect();

        Self {
            scoring,
            personal_domains: domain_mismatch.personal_domains,
            professional_patterns,
        }
    }

    /// 1.0 when the subject or body makes a professional claim and the sender
    /// writes from a personal webmail domain, else 0.0.
    pub fn domain_mismatch_raw(&self, email: &RawEmail) -> f64 {
        let Some(domain) = email.sender_domain() else {
            return 0.0;
        };
        if !DomainUtils::matches_domain_list(&domain, &self.personal_domains) {
            return 0.0;
        }

        let text = format!("{}\n{}", email.subject(), email.body());
        match self.professional_patterns.iter().find(|p| p.is_match(&text)) {
            Some(pattern) => {
                log::debug!(
                    "Professional claim '{}' from personal domain {domain}",
                    pattern.as_str()
                );
                1.0
            }
            None => 0.0,
        }
    }

    pub fn calculate_threat_score(
        &self,
        email: &RawEmail,
        footprint: &FootprintData,
        content_risk_score: f64,
    ) -> ThreatAnalysis {
        let weights = &self.scoring.weights;
        let breakdown = ScoreBreakdown {
            footprint_component: clamp_unit(footprint.footprint_risk) * weights.footprint,
            domain_mismatch_component: self.domain_mismatch_raw(email) * weights.domain_mismatch,
            content_component: clamp_unit(content_risk_score) * weights.content,
        };

        let threat_score = clamp_unit(breakdown.total());
        let mitigation_action = self.decide(threat_score);

        log::info!(
            "Threat score for {}: {:.3} (footprint {:.3}, domain mismatch {:.3}, content {:.3}) -> {}",
            email.id,
            threat_score,
            breakdown.footprint_component,
            breakdown.domain_mismatch_component,
            breakdown.content_component,
            mitigation_action
        );

        ThreatAnalysis {
            email_id: email.id.clone(),
            threat_score,
            breakdown,
            mitigation_action,
        }
    }

    /// Lower bounds are inclusive.
    pub fn decide(&self, threat_score: f64) -> MitigationAction {
        if threat_score >= self.scoring.mark_as_phishing_threshold {
            MitigationAction::MarkAsPhishing
        } else if threat_score >= self.scoring.flag_threshold {
            MitigationAction::Flag
        } else {
            MitigationAction::None
        }
    }
}
