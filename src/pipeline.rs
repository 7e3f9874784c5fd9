//! Per-email analysis pipeline.
//!
//! Identity verification, footprint lookup and content scoring run
//! concurrently; each collaborator call is bounded by its configured
//! timeout and degrades to a neutral value on failure. Mitigation, when
//! enabled, only runs once the threat analysis is complete.

use crate::clamp_unit;
use crate::config::DetectionConfig;
use crate::content_risk::{
    ContentRiskProvider, GatewayContentRiskProvider, KeywordContentRiskProvider,
};
use crate::email::RawEmail;
use crate::error::ProviderError;
use crate::footprint::{FootprintAnalyzer, FootprintData, FootprintSource};
use crate::identity_verifier::{IdentityVerifier, PhishingAnalysis};
use crate::image_extractor::ImageExtractor;
use crate::mitigation::{MailCapability, MitigationExecutor, MitigationResult};
use crate::search::{ReverseImageSearchProvider, SearchMatch};
use crate::threat_scorer::{ThreatAnalysis, ThreatScorer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailVerdict {
    pub email_id: String,
    pub phishing: Option<PhishingAnalysis>,
    pub footprint: Option<FootprintData>,
    pub content_risk_score: f64,
    pub threat: Option<ThreatAnalysis>,
    pub mitigation: Option<MitigationResult>,
}

impl EmailVerdict {
    fn unanalyzed(email_id: &str) -> Self {
        Self {
            email_id: email_id.to_string(),
            phishing: None,
            footprint: None,
            content_risk_score: 0.0,
            threat: None,
            mitigation: None,
        }
    }
}

pub struct ThreatPipeline {
    config: Arc<DetectionConfig>,
    extractor: ImageExtractor,
    verifier: IdentityVerifier,
    footprint: FootprintAnalyzer,
    scorer: ThreatScorer,
    executor: MitigationExecutor,
    search: Arc<dyn ReverseImageSearchProvider>,
    content: Arc<dyn ContentRiskProvider>,
}

impl ThreatPipeline {
    /// Fails when the configuration does not validate.
    pub fn new(
        config: Arc<DetectionConfig>,
        search: Arc<dyn ReverseImageSearchProvider>,
        footprint_source: Arc<dyn FootprintSource>,
        content: Arc<dyn ContentRiskProvider>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        Ok(Self {
            extractor: ImageExtractor::new(config.images),
            verifier: IdentityVerifier::new(config.identity.clone()),
            footprint: FootprintAnalyzer::new(
                config.footprint.clone(),
                footprint_source,
                config.timeouts.footprint(),
            ),
            scorer: ThreatScorer::new(config.scoring.clone(), config.domain_mismatch.clone())?,
            executor: MitigationExecutor::new(config.timeouts.mitigation()),
            search,
            content,
            config,
        })
    }

    /// Pipeline with the footprint source and content classifier named in
    /// the configuration.
    pub fn from_config(
        config: Arc<DetectionConfig>,
        search: Arc<dyn ReverseImageSearchProvider>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let content: Arc<dyn ContentRiskProvider> = match &config.content_risk.gateway_url {
            Some(url) => Arc::new(GatewayContentRiskProvider::new(
                url,
                &config.content_risk.model,
                config.timeouts.content(),
            )?),
            None => Arc::new(KeywordContentRiskProvider::new(&config.content_risk)?),
        };

        Ok(Self {
            extractor: ImageExtractor::new(config.images),
            verifier: IdentityVerifier::new(config.identity.clone()),
            footprint: FootprintAnalyzer::from_config(&config),
            scorer: ThreatScorer::new(config.scoring.clone(), config.domain_mismatch.clone())?,
            executor: MitigationExecutor::new(config.timeouts.mitigation()),
            search,
            content,
            config,
        })
    }

    pub fn with_content_provider(mut self, content: Arc<dyn ContentRiskProvider>) -> Self {
        self.content = content;
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Side-effect-free analysis of one email.
    pub async fn analyze(&self, email: &RawEmail) -> EmailVerdict {
        let features = self.config.features;
        let sender_domain = email.sender_domain().unwrap_or_default();

        let identity = async {
            if features.phishing_detection {
                Some(self.verify_identity(email).await)
            } else {
                None
            }
        };
        let footprint = async {
            if features.threat_scoring {
                Some(self.footprint.get_footprint_data(&sender_domain).await)
            } else {
                None
            }
        };
        let content = async {
            if features.threat_scoring {
                self.content_risk(email).await
            } else {
                0.0
            }
        };

        let (phishing, footprint, content_risk_score) = tokio::join!(identity, footprint, content);

        let threat = footprint
            .as_ref()
            .map(|data| self.scorer.calculate_threat_score(email, data, content_risk_score));

        EmailVerdict {
            email_id: email.id.clone(),
            phishing,
            footprint,
            content_risk_score,
            threat,
            mitigation: None,
        }
    }

    /// Analyze, then apply the decided action when auto-mitigation is on.
    pub async fn process(&self, email: &RawEmail, mail: &dyn MailCapability) -> EmailVerdict {
        let mut verdict = self.analyze(email).await;

        if self.config.features.auto_mitigate {
            if let Some(threat) = &verdict.threat {
                verdict.mitigation = Some(
                    self.executor
                        .request_client_mitigation(&email.id, threat.mitigation_action, mail)
                        .await,
                );
            }
        }

        verdict
    }

    /// Analyze emails concurrently. Verdicts come back in input order.
    pub async fn analyze_batch(self: Arc<Self>, emails: Vec<RawEmail>) -> Vec<EmailVerdict> {
        let ids: Vec<String> = emails.iter().map(|e| e.id.clone()).collect();
        let mut verdicts: Vec<Option<EmailVerdict>> = vec![None; emails.len()];

        let mut tasks = JoinSet::new();
        for (index, email) in emails.into_iter().enumerate() {
            let pipeline = Arc::clone(&self);
            tasks.spawn(async move { (index, pipeline.analyze(&email).await) });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, verdict)) => verdicts[index] = Some(verdict),
                Err(e) => log::error!("Email analysis task failed: {e}"),
            }
        }

        verdicts
            .into_iter()
            .zip(ids)
            .map(|(verdict, id)| verdict.unwrap_or_else(|| EmailVerdict::unanalyzed(&id)))
            .collect()
    }

    async fn verify_identity(&self, email: &RawEmail) -> PhishingAnalysis {
        let candidates = self.extractor.extract_images(email);
        let Some(profile) = self.extractor.find_profile_image(&candidates) else {
            log::debug!("No profile image in {}, skipping identity verification", email.id);
            return PhishingAnalysis::neutral();
        };

        let timeout = self.config.timeouts.search();
        let matches: Vec<SearchMatch> =
            match tokio::time::timeout(timeout, self.search.search(profile)).await {
                Ok(Ok(matches)) => matches,
                Ok(Err(e)) => {
                    log::warn!("Reverse image search failed for {}: {e}", email.id);
                    Vec::new()
                }
                Err(_) => {
                    log::warn!(
                        "Reverse image search failed for {}: {}",
                        email.id,
                        ProviderError::Timeout(timeout)
                    );
                    Vec::new()
                }
            };

        let claimed = self.verifier.claimed_identity(email);
        self.verifier.analyze(&claimed, &matches)
    }

    async fn content_risk(&self, email: &RawEmail) -> f64 {
        let timeout = self.config.timeouts.content();
        match tokio::time::timeout(timeout, self.content.score(email)).await {
            Ok(Ok(score)) => clamp_unit(score),
            Ok(Err(e)) => {
                log::warn!("Content risk scoring failed for {}: {e}", email.id);
                0.0
            }
            Err(_) => {
                log::warn!(
                    "Content risk scoring failed for {}: {}",
                    email.id,
                    ProviderError::Timeout(timeout)
                );
                0.0
            }
        }
    }
}
