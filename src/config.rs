use crate::footprint::FootprintLookup;
use anyhow::{bail, ensure};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Everything the analysis core reads at runtime. Loaded once per process and
/// shared read-only between concurrent analyses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub images: ImageBounds,
    #[serde(default)]
    pub footprint: FootprintConfig,
    #[serde(default)]
    pub domain_mismatch: DomainMismatchConfig,
    #[serde(default)]
    pub content_risk: ContentRiskConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub features: FeatureToggles,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub footprint: f64,
    pub domain_mismatch: f64,
    pub content: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            footprint: 0.4,
            domain_mismatch: 0.3,
            content: 0.3,
        }
    }
}

impl ScoringWeights {
    /// Exactly 1.0 for the defaults: 0.3 + 0.3 is exact in binary.
    pub fn sum(&self) -> f64 {
        self.footprint + (self.domain_mismatch + self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Inclusive lower bound for FLAG.
    pub flag_threshold: f64,
    /// Inclusive lower bound for MARK_AS_PHISHING.
    pub mark_as_phishing_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            flag_threshold: 0.5,
            mark_as_phishing_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// `is_phishing` cut-off. Independent of the mitigation thresholds.
    pub phishing_threshold: f64,
    /// Lower bound of the "flag for review" recommendation tier.
    pub review_threshold: f64,
    /// Number of distinct match domains tolerated before each extra one adds risk.
    pub domain_count_free: usize,
    pub domain_count_step: f64,
    pub domain_count_cap: f64,
    pub identity_mismatch_weight: f64,
    pub social_mismatch_weight: f64,
    pub suspicious_category_weight: f64,
    pub social_domains: Vec<String>,
    /// Category name -> keywords looked for (as substrings) in match domains.
    pub suspicious_domain_keywords: BTreeMap<String, Vec<String>>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        let mut suspicious_domain_keywords = BTreeMap::new();
        suspicious_domain_keywords.insert(
            "legal".to_string(),
            vec![
                "lawfirm".to_string(),
                "law-firm".to_string(),
                "attorney".to_string(),
                "lawyer".to_string(),
            ],
        );
        suspicious_domain_keywords.insert(
            "real_estate".to_string(),
            vec![
                "realestate".to_string(),
                "real-estate".to_string(),
                "realty".to_string(),
                "realtor".to_string(),
            ],
        );

        Self {
            phishing_threshold: 0.7,
            review_threshold: 0.4,
            domain_count_free: 3,
            domain_count_step: 0.2,
            domain_count_cap: 0.4,
            identity_mismatch_weight: 0.4,
            social_mismatch_weight: 0.3,
            suspicious_category_weight: 0.2,
            social_domains: [
                "facebook.com",
                "linkedin.com",
                "instagram.com",
                "twitter.com",
                "x.com",
                "tiktok.com",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
            suspicious_domain_keywords,
        }
    }
}

/// Size and shape window a profile photo has to fall into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageBounds {
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub min_aspect: f64,
    pub max_aspect: f64,
}

impl Default for ImageBounds {
    fn default() -> Self {
        Self {
            min_bytes: 10 * 1024,
            max_bytes: 500 * 1024,
            min_aspect: 0.7,
            max_aspect: 1.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FootprintSourceConfig {
    /// Domain-class estimate only (personal webmail vs organisational).
    Heuristic,
    /// WHOIS over TCP/43 for age, with a DNS fallback.
    Whois,
    /// Fixed table, mostly for tests and offline runs.
    Static {
        #[serde(default)]
        domains: BTreeMap<String, FootprintLookup>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FootprintConfig {
    pub new_max_age_days: u32,
    pub low_max_age_days: u32,
    pub low_max_sources: u32,
    pub new_risk: f64,
    pub low_risk: f64,
    pub source: FootprintSourceConfig,
    pub cache_ttl_secs: u64,
}

impl Default for FootprintConfig {
    fn default() -> Self {
        Self {
            new_max_age_days: 90,
            low_max_age_days: 180,
            low_max_sources: 3,
            new_risk: 0.4,
            low_risk: 0.2,
            source: FootprintSourceConfig::Heuristic,
            cache_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainMismatchConfig {
    pub personal_domains: Vec<String>,
    /// Regex patterns (matched case-insensitively) that signal a professional claim.
    pub professional_keywords: Vec<String>,
}

impl Default for DomainMismatchConfig {
    fn default() -> Self {
        Self {
            personal_domains: [
                "gmail.com",
                "yahoo.com",
                "hotmail.com",
                "outlook.com",
                "icloud.com",
                "protonmail.com",
                "aol.com",
                "mail.com",
                "yandex.com",
                "zoho.com",
                "gmx.com",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
            professional_keywords: [
                r"\brecruiter\b",
                r"\bhiring manager\b",
                r"\bhr department\b",
                r"\bhuman resources\b",
                r"\bcompany\b",
                r"\bcorporation\b",
                r"\binc\.",
                r"\bllc\b",
                r"\bltd\b",
                r"\bfinancial advisor\b",
                r"\bbank\b",
                r"\binvestment\b",
                r"\blegal counsel\b",
                r"\battorney\b",
                r"\blaw firm\b",
                r"\baccountant\b",
                r"\bcpa\b",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentRiskConfig {
    /// OpenAI-compatible gateway. When unset the local keyword classifier is used.
    pub gateway_url: Option<String>,
    pub model: String,
    /// Risk added per pattern family that matches.
    pub family_weight: f64,
    pub families: BTreeMap<String, Vec<String>>,
}

impl Default for ContentRiskConfig {
    fn default() -> Self {
        let mut families = BTreeMap::new();
        families.insert(
            "urgency".to_string(),
            vec![
                r"(?i)\b(urgent|immediately|act now|within 24 hours|final notice)\b".to_string(),
                r"(?i)\b(limited time|expires? (today|soon))\b".to_string(),
            ],
        );
        families.insert(
            "financial".to_string(),
            vec![
                r"(?i)\b(wire transfer|bank account|routing number|bitcoin|crypto(currency)?)\b"
                    .to_string(),
                r"(?i)\b(upfront fee|processing fee|equipment check)\b".to_string(),
            ],
        );
        families.insert(
            "credentials".to_string(),
            vec![
                r"(?i)\b(verify your (account|identity)|confirm your password|login details)\b"
                    .to_string(),
                r"(?i)\b(social security number|ssn|date of birth)\b".to_string(),
            ],
        );
        families.insert(
            "gift_cards".to_string(),
            vec![r"(?i)\b(gift ?cards?|itunes card|google play card|steam card)\b".to_string()],
        );

        Self {
            gateway_url: None,
            model: "erika-email-classifier".to_string(),
            family_weight: 0.25,
            families,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub search_secs: u64,
    pub footprint_secs: u64,
    pub content_secs: u64,
    pub mitigation_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            search_secs: 30,
            footprint_secs: 30,
            content_secs: 30,
            mitigation_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }

    pub fn footprint(&self) -> Duration {
        Duration::from_secs(self.footprint_secs)
    }

    pub fn content(&self) -> Duration {
        Duration::from_secs(self.content_secs)
    }

    pub fn mitigation(&self) -> Duration {
        Duration::from_secs(self.mitigation_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    pub phishing_detection: bool,
    pub threat_scoring: bool,
    pub auto_mitigate: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            phishing_detection: true,
            threat_scoring: true,
            auto_mitigate: false,
        }
    }
}

fn ensure_unit(name: &str, value: f64) -> anyhow::Result<()> {
    ensure!(
        (0.0..=1.0).contains(&value),
        "{name} must be within [0, 1], got {value}"
    );
    Ok(())
}

fn ensure_patterns(name: &str, patterns: &[String]) -> anyhow::Result<()> {
    for pattern in patterns {
        if let Err(e) = Regex::new(pattern) {
            bail!("invalid {name} pattern '{pattern}': {e}");
        }
    }
    Ok(())
}

impl ScoringConfig {
    /// Weights in [0, 1] summing to 1.0, thresholds in [0, 1] and ordered.
    pub fn validate(&self) -> anyhow::Result<()> {
        let weights = &self.weights;
        ensure_unit("footprint weight", weights.footprint)?;
        ensure_unit("domain mismatch weight", weights.domain_mismatch)?;
        ensure_unit("content weight", weights.content)?;
        ensure!(
            (weights.sum() - 1.0).abs() < 1e-9,
            "scoring weights must sum to 1.0, got {}",
            weights.sum()
        );

        ensure_unit("flag threshold", self.flag_threshold)?;
        ensure_unit(
            "mark-as-phishing threshold",
            self.mark_as_phishing_threshold,
        )?;
        ensure!(
            self.flag_threshold <= self.mark_as_phishing_threshold,
            "flag threshold ({}) must not exceed mark-as-phishing threshold ({})",
            self.flag_threshold,
            self.mark_as_phishing_threshold
        );
        Ok(())
    }
}

impl DetectionConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DetectionConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.scoring.validate()?;

        let identity = &self.identity;
        ensure_unit("phishing threshold", identity.phishing_threshold)?;
        ensure_unit("review threshold", identity.review_threshold)?;
        ensure!(
            identity.review_threshold <= identity.phishing_threshold,
            "review threshold must not exceed phishing threshold"
        );
        for (name, value) in [
            ("domain count step", identity.domain_count_step),
            ("domain count cap", identity.domain_count_cap),
            ("identity mismatch weight", identity.identity_mismatch_weight),
            ("social mismatch weight", identity.social_mismatch_weight),
            ("suspicious category weight", identity.suspicious_category_weight),
        ] {
            ensure_unit(name, value)?;
        }

        let images = &self.images;
        ensure!(
            images.min_bytes <= images.max_bytes,
            "image min_bytes ({}) exceeds max_bytes ({})",
            images.min_bytes,
            images.max_bytes
        );
        ensure!(
            images.min_aspect > 0.0 && images.min_aspect <= images.max_aspect,
            "image aspect bounds [{}, {}] are invalid",
            images.min_aspect,
            images.max_aspect
        );

        ensure_unit("footprint new risk", self.footprint.new_risk)?;
        ensure_unit("footprint low risk", self.footprint.low_risk)?;
        ensure_unit("content family weight", self.content_risk.family_weight)?;

        ensure_patterns("professional keyword", &self.domain_mismatch.professional_keywords)?;
        for (family, patterns) in &self.content_risk.families {
            ensure_patterns(family, patterns)?;
        }

        if let Some(gateway) = &self.content_risk.gateway_url {
            url::Url::parse(gateway)
                .map_err(|e| anyhow::anyhow!("invalid gateway_url '{gateway}': {e}"))?;
        }

        Ok(())
    }
}
