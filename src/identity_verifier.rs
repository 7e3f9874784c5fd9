//! Profile-photo identity verification.
//!
//! Compares who the sender claims to be with the identities attached to
//! their profile photo elsewhere on the web, as reported by a reverse image
//! search. The result is advisory: an empty match list yields a neutral
//! analysis and nothing here ever fails.

use crate::clamp_unit;
use crate::config::IdentityConfig;
use crate::domain_utils::DomainUtils;
use crate::email::RawEmail;
use crate::search::SearchMatch;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Recruiter,
    RealEstate,
    Legal,
    Director,
    Other,
}

impl Role {
    /// Checked in this order; the first hit wins.
    const ALL: [Role; 5] = [
        Role::Recruiter,
        Role::RealEstate,
        Role::Legal,
        Role::Director,
        Role::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Recruiter => "recruiter",
            Role::RealEstate => "real_estate",
            Role::Legal => "legal",
            Role::Director => "director",
            Role::Other => "other",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            Role::Recruiter => r"(?i)\b(recruiter|recruiting|headhunter|talent acquisition)\b",
            Role::RealEstate => r"(?i)\b(real[\s-]?estate|realtor|realty)\b",
            Role::Legal => r"(?i)\b(attorney|lawyer|law firm|legal counsel|solicitor|paralegal)\b",
            Role::Director => r"(?i)\b(director|manager|executive|ceo|cfo|president)\b",
            Role::Other => r"(?i)\b(agent|consultant|advisor|specialist)\b",
        }
    }
}

/// Who the email says the sender is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimedIdentity {
    pub sender_name: String,
    pub claimed_role: Option<Role>,
    pub subject: String,
    pub body: String,
}

/// An identity recovered from one search match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub company: Option<String>,
    pub source_domain: String,
    /// Position of the originating match in the search results.
    pub match_index: usize,
}

/// Risk added by each rule, before clamping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskContributions {
    pub domain_count: f64,
    pub identity_mismatch: f64,
    pub social_mismatch: f64,
    pub suspicious_domains: f64,
}

impl RiskContributions {
    pub fn total(&self) -> f64 {
        self.domain_count + self.identity_mismatch + self.social_mismatch + self.suspicious_domains
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhishingAnalysis {
    pub is_phishing: bool,
    pub risk_score: f64,
    pub confidence: f64,
    pub indicators: Vec<String>,
    pub recommendations: Vec<String>,
    pub matched_domains: BTreeSet<String>,
    pub identities: Vec<IdentityRecord>,
    pub contributions: RiskContributions,
}

impl PhishingAnalysis {
    /// Result used when there is nothing to verify against.
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        if self.is_phishing {
            lines.push("🚨 PHISHING DETECTED".to_string());
            lines.push(format!("Confidence: {:.0}%", self.confidence * 100.0));
            lines.push(format!("Risk Score: {:.0}%", self.risk_score * 100.0));
        } else {
            lines.push("✅ Email appears legitimate".to_string());
            if self.risk_score > 0.3 {
                lines.push(format!("⚠️  Risk Score: {:.0}%", self.risk_score * 100.0));
            }
        }

        if !self.indicators.is_empty() {
            lines.push(String::new());
            lines.push("Indicators:".to_string());
            lines.extend(self.indicators.iter().map(|i| format!("  - {i}")));
        }

        if !self.recommendations.is_empty() {
            lines.push(String::new());
            lines.push("Recommendations:".to_string());
            lines.extend(self.recommendations.iter().map(|r| format!("  • {r}")));
        }

        if !self.matched_domains.is_empty() {
            lines.push(String::new());
            lines.push(format!(
                "Image found on {} domain(s):",
                self.matched_domains.len()
            ));
            for domain in self.matched_domains.iter().take(5) {
                lines.push(format!("  - {domain}"));
            }
            if self.matched_domains.len() > 5 {
                lines.push(format!("  ... and {} more", self.matched_domains.len() - 5));
            }
        }

        lines.join("\n")
    }
}

const HONORIFICS: &[&str] = &["mr", "mrs", "ms", "miss", "dr"];

/// Capitalised words that show up in page titles but are never part of a name.
const NAME_STOPWORDS: &[&str] = &[
    "about", "agent", "associate", "attorney", "ceo", "contact", "counsel", "director",
    "estate", "executive", "facebook", "firm", "for", "group", "headhunter", "hiring", "home",
    "homes", "inc", "instagram", "law", "lawyer", "legal", "linkedin", "listings", "llc",
    "manager", "meet", "official", "our", "page", "partners", "photos", "profile", "real",
    "realtor", "realty", "recruiter", "sale", "senior", "talent", "team", "the", "tiktok",
    "twitter", "welcome",
];

fn normalized_name_tokens(name: &str) -> Vec<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !HONORIFICS.contains(&t.as_str()))
        .collect()
}

fn is_name_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            word.len() >= 2
                && chars.all(|c| c.is_ascii_lowercase())
                && !NAME_STOPWORDS.contains(&word.to_lowercase().as_str())
        }
        _ => false,
    }
}

pub struct IdentityVerifier {
    config: IdentityConfig,
    role_patterns: Vec<(Role, Regex)>,
    company_pattern: Regex,
}

impl Default for IdentityVerifier {
    fn default() -> Self {
        Self::new(IdentityConfig::default())
    }
}

impl IdentityVerifier {
    pub fn new(config: IdentityConfig) -> Self {
        let role_patterns = Role::ALL
            .iter()
            .map(|role| (*role, Regex::new(role.pattern()).unwrap()))
            .collect();

        Self {
            config,
            role_patterns,
            company_pattern: Regex::new(
                r"\b(?:at|from|of|with)\s+([A-Z][A-Za-z&]*(?:\s+&?\s*[A-Z][A-Za-z&]*)*)",
            )
            .unwrap(),
        }
    }

    pub fn detect_role(&self, text: &str) -> Option<Role> {
        self.role_patterns
            .iter()
            .find(|(_, pattern)| pattern.is_match(text))
            .map(|(role, _)| *role)
    }

    /// Claimed identity of an email's sender. The role comes from the display
    /// name first, then the subject, then the body.
    pub fn claimed_identity(&self, email: &RawEmail) -> ClaimedIdentity {
        let sender = email.parsed_sender();
        let claimed_role = [sender.name.as_str(), email.subject(), email.body()]
            .iter()
            .find_map(|text| self.detect_role(text));

        ClaimedIdentity {
            sender_name: sender.name,
            claimed_role,
            subject: email.subject().to_string(),
            body: email.body().to_string(),
        }
    }

    pub fn extract_identity(
        &self,
        index: usize,
        search_match: &SearchMatch,
    ) -> Option<IdentityRecord> {
        let text = format!("{} {}", search_match.title, search_match.snippet);
        let name = self.extract_name(&search_match.title);
        let role = self.detect_role(&text);
        let company = [&search_match.title, &search_match.snippet]
            .iter()
            .find_map(|t| self.company_pattern.captures(t))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());

        if name.is_none() && role.is_none() && company.is_none() {
            return None;
        }

        Some(IdentityRecord {
            name,
            role,
            company,
            source_domain: DomainUtils::canonicalize_domain(&search_match.domain),
            match_index: index,
        })
    }

    /// First run of one or two capitalised name words in a title segment,
    /// keeping a leading honorific ("Mr Robert", "Jane Hartwell").
    fn extract_name(&self, title: &str) -> Option<String> {
        let separators = ['-', '|', ',', ':', '–', '—', '•', '·', '(', ')'];

        for segment in title.split(&separators[..]) {
            let mut honorific: Option<&str> = None;
            let mut words: Vec<&str> = Vec::new();

            for raw in segment.split_whitespace() {
                let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
                if words.is_empty() && HONORIFICS.contains(&word.to_lowercase().as_str()) {
                    honorific = Some(word);
                    continue;
                }
                if is_name_word(word) {
                    words.push(word);
                    if words.len() == 2 {
                        break;
                    }
                } else if !words.is_empty() {
                    break;
                } else {
                    honorific = None;
                }
            }

            if !words.is_empty() {
                let mut parts: Vec<&str> = honorific.into_iter().collect();
                parts.extend(words);
                return Some(parts.join(" "));
            }
        }

        None
    }

    /// Most frequent role; ties go to the role seen first.
    fn majority_role(identities: &[IdentityRecord]) -> Option<Role> {
        let mut counts: HashMap<Role, (usize, usize)> = HashMap::new();
        for (position, role) in identities.iter().filter_map(|r| r.role).enumerate() {
            let entry = counts.entry(role).or_insert((0, position));
            entry.0 += 1;
        }

        counts
            .into_iter()
            .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
                count_a.cmp(count_b).then(first_b.cmp(first_a))
            })
            .map(|(role, _)| role)
    }

    fn identities_agree(a: &IdentityRecord, b: &IdentityRecord) -> bool {
        if let (Some(name_a), Some(name_b)) = (&a.name, &b.name) {
            let tokens_a = normalized_name_tokens(name_a);
            if !tokens_a.is_empty() && tokens_a == normalized_name_tokens(name_b) {
                return true;
            }
        }
        matches!((a.role, b.role), (Some(ra), Some(rb)) if ra == rb)
    }

    fn name_differs(extracted: &str, sender_tokens: &[String]) -> bool {
        normalized_name_tokens(extracted)
            .iter()
            .any(|token| !sender_tokens.contains(token))
    }

    pub fn analyze(&self, claimed: &ClaimedIdentity, matches: &[SearchMatch]) -> PhishingAnalysis {
        if matches.is_empty() {
            return PhishingAnalysis::neutral();
        }

        let identities: Vec<IdentityRecord> = matches
            .iter()
            .enumerate()
            .filter_map(|(i, m)| self.extract_identity(i, m))
            .collect();

        let matched_domains: BTreeSet<String> = matches
            .iter()
            .map(|m| DomainUtils::canonicalize_domain(&m.domain))
            .filter(|d| !d.is_empty())
            .collect();

        let mut contributions = RiskContributions::default();
        let mut indicators = Vec::new();

        // Photo spread over many unrelated sites
        let extra_domains = matched_domains
            .len()
            .saturating_sub(self.config.domain_count_free);
        if extra_domains > 0 {
            contributions.domain_count = (self.config.domain_count_step * extra_domains as f64)
                .min(self.config.domain_count_cap);
            indicators.push(format!(
                "Profile photo appears on {} different domains",
                matched_domains.len()
            ));
        }

        if let (Some(majority), Some(claimed_role)) =
            (Self::majority_role(&identities), claimed.claimed_role)
        {
            if majority != claimed_role {
                contributions.identity_mismatch = self.config.identity_mismatch_weight;
                indicators.push(format!(
                    "Profile photo is associated with {} profiles but the sender claims to be {}",
                    majority.as_str(),
                    claimed_role.as_str()
                ));
            }
        }

        // A bare address has no name tokens, so any named profile differs.
        let sender_tokens = normalized_name_tokens(&claimed.sender_name);
        let social_mismatch = identities.iter().find(|record| {
            DomainUtils::matches_domain_list(&record.source_domain, &self.config.social_domains)
                && record
                    .name
                    .as_deref()
                    .is_some_and(|name| Self::name_differs(name, &sender_tokens))
        });
        if let Some(record) = social_mismatch {
            contributions.social_mismatch = self.config.social_mismatch_weight;
            indicators.push(format!(
                "Profile photo found on {} under a different name ({})",
                record.source_domain,
                record.name.as_deref().unwrap_or_default()
            ));
        }

        let mut hit_categories = Vec::new();
        let mut hit_domains = BTreeSet::new();
        for (category, keywords) in &self.config.suspicious_domain_keywords {
            let hits: Vec<&String> = matched_domains
                .iter()
                .filter(|domain| {
                    keywords
                        .iter()
                        .any(|keyword| domain.contains(&keyword.to_lowercase()))
                })
                .collect();
            if !hits.is_empty() {
                hit_categories.push(category.as_str());
                hit_domains.extend(hits);
            }
        }
        if !hit_categories.is_empty() {
            contributions.suspicious_domains =
                self.config.suspicious_category_weight * hit_categories.len() as f64;
            indicators.push(format!(
                "Profile photo found on {} domains ({}), common in impersonation scams",
                hit_categories.join("/"),
                hit_domains
                    .iter()
                    .map(|d| d.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        let risk_score = clamp_unit(contributions.total());

        let corroborating = identities
            .iter()
            .enumerate()
            .filter(|(i, a)| {
                identities
                    .iter()
                    .enumerate()
                    .any(|(j, b)| *i != j && Self::identities_agree(a, b))
            })
            .count();
        let confidence = (0.5 + 0.1 * corroborating as f64).min(1.0);

        let is_phishing = risk_score >= self.config.phishing_threshold;
        let recommendations = self.recommendations(risk_score);

        log::debug!(
            "Identity verification: {} matches, {} identities, risk {:.2}, confidence {:.2}",
            matches.len(),
            identities.len(),
            risk_score,
            confidence
        );

        PhishingAnalysis {
            is_phishing,
            risk_score,
            confidence,
            indicators,
            recommendations,
            matched_domains,
            identities,
            contributions,
        }
    }

    fn recommendations(&self, risk_score: f64) -> Vec<String> {
        if risk_score >= self.config.phishing_threshold {
            vec![
                "Do not respond to this email".to_string(),
                "Report the message as phishing".to_string(),
                "Block the sender".to_string(),
            ]
        } else if risk_score >= self.config.review_threshold {
            vec![
                "Flag for review: verify the sender's identity through another channel"
                    .to_string(),
                "Be cautious with any requests made in this email".to_string(),
            ]
        } else {
            Vec::new()
        }
    }
}
