//! Reverse-image-search collaborator seam.
//!
//! The core never drives a browser or owns a search session; it only sees
//! the match list a provider hands back.

use crate::error::ProviderError;
use crate::image_extractor::ImageCandidate;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// One page where the profile photo was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchMatch {
    pub domain: String,
    pub title: String,
    pub snippet: String,
}

impl SearchMatch {
    pub fn new(domain: &str, title: &str, snippet: &str) -> Self {
        Self {
            domain: domain.to_string(),
            title: title.to_string(),
            snippet: snippet.to_string(),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReverseImageSearchProvider: Send + Sync {
    async fn search(&self, image: &ImageCandidate) -> Result<Vec<SearchMatch>, ProviderError>;
}

/// Returns the same matches for every image. Used for offline runs where the
/// matches were captured beforehand.
#[derive(Debug, Clone, Default)]
pub struct FixtureSearchProvider {
    matches: Vec<SearchMatch>,
}

impl FixtureSearchProvider {
    pub fn new(matches: Vec<SearchMatch>) -> Self {
        Self { matches }
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(Self::new(serde_json::from_str(content)?))
    }
}

#[async_trait]
impl ReverseImageSearchProvider for FixtureSearchProvider {
    async fn search(&self, _image: &ImageCandidate) -> Result<Vec<SearchMatch>, ProviderError> {
        Ok(self.matches.clone())
    }
}

/// Stand-in for a deployment without any search backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSearchProvider;

#[async_trait]
impl ReverseImageSearchProvider for DisabledSearchProvider {
    async fn search(&self, _image: &ImageCandidate) -> Result<Vec<SearchMatch>, ProviderError> {
        Err(ProviderError::Unavailable(
            "reverse image search is not configured".to_string(),
        ))
    }
}
