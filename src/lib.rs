pub mod config;
pub mod content_risk;
pub mod domain_age;
pub mod domain_utils;
pub mod email;
pub mod error;
pub mod footprint;
pub mod identity_verifier;
pub mod image_extractor;
pub mod mitigation;
pub mod pipeline;
pub mod search;
pub mod threat_scorer;

pub use config::DetectionConfig;
pub use email::RawEmail;
pub use error::{MailCapabilityError, ProviderError};
pub use footprint::{FootprintAnalyzer, FootprintData, Reputation};
pub use identity_verifier::{IdentityVerifier, PhishingAnalysis, Role};
pub use image_extractor::{ImageCandidate, ImageExtractor};
pub use mitigation::{InMemoryMailbox, MailCapability, MitigationExecutor, MitigationResult};
pub use pipeline::{EmailVerdict, ThreatPipeline};
pub use search::{ReverseImageSearchProvider, SearchMatch};
pub use threat_scorer::{MitigationAction, ThreatAnalysis, ThreatScorer};

/// Clamp into [0, 1]; NaN counts as no risk.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
