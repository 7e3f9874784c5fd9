//! Content-risk scoring collaborators.
//!
//! The threat scorer only needs a number in [0, 1]. It can come from the
//! local keyword classifier, from an OpenAI-compatible classification
//! gateway, or be fixed up front.

use crate::clamp_unit;
use crate::config::ContentRiskConfig;
use crate::email::RawEmail;
use crate::error::ProviderError;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_SUBJECT_CHARS: usize = 500;
const MAX_BODY_PREVIEW_CHARS: usize = 1000;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContentRiskProvider: Send + Sync {
    async fn score(&self, email: &RawEmail) -> Result<f64, ProviderError>;
}

/// Regex families over subject and body; each family that matches adds a
/// fixed weight.
pub struct KeywordContentRiskProvider {
    family_weight: f64,
    families: Vec<(String, Vec<Regex>)>,
}

impl KeywordContentRiskProvider {
    pub fn new(config: &ContentRiskConfig) -> anyhow::Result<Self> {
        let mut families = Vec::with_capacity(config.families.len());
        for (family, patterns) in &config.families {
            let compiled = patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()?;
            families.push((family.clone(), compiled));
        }

        Ok(Self {
            family_weight: config.family_weight,
            families,
        })
    }

    pub fn matched_families(&self, email: &RawEmail) -> Vec<&str> {
        let text = format!("{}\n{}", email.subject(), email.body());
        self.families
            .iter()
            .filter(|(_, patterns)| patterns.iter().any(|p| p.is_match(&text)))
            .map(|(family, _)| family.as_str())
            .collect()
    }
}

#[async_trait]
impl ContentRiskProvider for KeywordContentRiskProvider {
    async fn score(&self, email: &RawEmail) -> Result<f64, ProviderError> {
        let matched = self.matched_families(email);
        if !matched.is_empty() {
            log::debug!("Content risk families for {}: {:?}", email.id, matched);
        }
        Ok(clamp_unit(self.family_weight * matched.len() as f64))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedContentRisk(pub f64);

#[async_trait]
impl ContentRiskProvider for FixedContentRisk {
    async fn score(&self, _email: &RawEmail) -> Result<f64, ProviderError> {
        Ok(self.0)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Classifier behind an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct GatewayContentRiskProvider {
    client: Client,
    endpoint: String,
    model: String,
    number: Regex,
}

impl GatewayContentRiskProvider {
    pub fn new(gateway_url: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = url::Url::parse(gateway_url)?;
        let endpoint = base.join("v1/chat/completions")?.to_string();

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("erika-ares/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            number: Regex::new(r"\d+(?:\.\d+)?").unwrap(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn build_prompt(email: &RawEmail) -> String {
        let subject = sanitize(email.subject(), MAX_SUBJECT_CHARS);
        let body = sanitize(email.body(), MAX_BODY_PREVIEW_CHARS);
        let sender = sanitize(email.sender(), MAX_SUBJECT_CHARS);

        format!(
            "Rate how likely this email is a phishing or scam attempt.\n\
             Reply with a single number between 0 and 1.\n\n\
             From: {sender}\nSubject: {subject}\n\n{body}"
        )
    }

    /// First number in the reply that lies in [0, 1].
    pub fn parse_score(&self, reply: &str) -> Option<f64> {
        self.number
            .find_iter(reply)
            .filter_map(|m| m.as_str().parse::<f64>().ok())
            .find(|v| (0.0..=1.0).contains(v))
    }
}

#[async_trait]
impl ContentRiskProvider for GatewayContentRiskProvider {
    async fn score(&self, email: &RawEmail) -> Result<f64, ProviderError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Self::build_prompt(email),
            }],
            temperature: 0.3,
            max_tokens: 500,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("content gateway: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!(
                "content gateway returned {status}"
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let reply = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("empty completion".to_string()))?;

        self.parse_score(&reply).ok_or_else(|| {
            ProviderError::InvalidResponse(format!("no score in reply: {reply}"))
        })
    }
}

/// Strip control characters (keeping newlines and tabs) and cut to `max_chars`.
pub fn sanitize(text: &str, max_chars: usize) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(max_chars)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(subject: &str, body: &str) -> RawEmail {
        RawEmail {
            id: "m1".to_string(),
            subject: Some(subject.to_string()),
            body: Some(body.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_keyword_provider_counts_families() {
        let provider = KeywordContentRiskProvider::new(&ContentRiskConfig::default()).unwrap();

        let clean = email("Lunch on Friday?", "Let me know if noon works.");
        assert_eq!(provider.score(&clean).await.unwrap(), 0.0);

        let scam = email(
            "URGENT: job offer",
            "Please reply immediately. We will send a check for equipment check purchases; \
             buy gift cards and confirm your password.",
        );
        let mut families = provider.matched_families(&scam);
        families.sort_unstable();
        assert_eq!(families, vec!["credentials", "financial", "gift_cards", "urgency"]);
        assert_eq!(provider.score(&scam).await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_keyword_provider_caps_at_one() {
        let mut config = ContentRiskConfig::default();
        config.family_weight = 0.6;
        let provider = KeywordContentRiskProvider::new(&config).unwrap();

        let scam = email("Act now", "Send a wire transfer today");
        assert_eq!(provider.score(&scam).await.unwrap(), 1.0);
    }

    #[test]
    fn test_keyword_provider_rejects_bad_pattern() {
        let mut config = ContentRiskConfig::default();
        config
            .families
            .insert("broken".to_string(), vec!["(unclosed".to_string()]);
        assert!(KeywordContentRiskProvider::new(&config).is_err());
    }

    #[test]
    fn test_sanitize_strips_control_and_truncates() {
        assert_eq!(sanitize("a\u{0}b\u{7}c\nd\te", 100), "abc\nd\te");
        assert_eq!(sanitize("abcdef", 3), "abc");
        assert_eq!(sanitize("ééé", 2), "éé");
    }

    #[test]
    fn test_gateway_prompt_and_score_parsing() {
        let provider = GatewayContentRiskProvider::new(
            "http://localhost:8080/",
            "erika-email-classifier",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:8080/v1/chat/completions");

        let long_body = "x".repeat(5000);
        let prompt = GatewayContentRiskProvider::build_prompt(&email("Hi\u{1b}", &long_body));
        assert!(prompt.contains("Subject: Hi\n"));
        assert!(!prompt.contains(&"x".repeat(1001)));

        assert_eq!(provider.parse_score("0.85"), Some(0.85));
        assert_eq!(provider.parse_score("Risk: 7 out of 10, so 0.7"), Some(0.7));
        assert_eq!(provider.parse_score("Score = 1"), Some(1.0));
        assert_eq!(provider.parse_score("no idea"), None);
    }

    #[tokio::test]
    async fn test_gateway_unreachable_is_unavailable() {
        let provider = GatewayContentRiskProvider::new(
            "http://127.0.0.1:9/",
            "erika-email-classifier",
            Duration::from_secs(2),
        )
        .unwrap();

        let result = provider.score(&email("Hello", "World")).await;
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
    }
}
