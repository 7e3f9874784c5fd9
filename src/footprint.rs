//! Sender-domain footprint: how old and how widely seen a domain is, mapped to
//! a reputation class and a raw footprint risk.

use crate::config::{DetectionConfig, FootprintConfig, FootprintSourceConfig};
use crate::domain_age::WhoisFootprintSource;
use crate::domain_utils::DomainUtils;
use crate::error::ProviderError;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// What a footprint source knows about a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FootprintLookup {
    pub age_days: u32,
    pub source_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reputation {
    New,
    Low,
    Established,
    /// The lookup failed; carries no risk.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootprintData {
    pub domain: String,
    pub source_count: u32,
    pub age_days: u32,
    pub reputation: Reputation,
    pub footprint_risk: f64,
}

impl FootprintData {
    pub fn unknown(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            source_count: 0,
            age_days: 0,
            reputation: Reputation::Unknown,
            footprint_risk: 0.0,
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait FootprintSource: Send + Sync {
    async fn lookup(&self, domain: &str) -> Result<FootprintLookup, ProviderError>;
}

/// Domain-class estimate: personal webmail domains are treated as thinly
/// documented, everything else as an established organisation.
#[derive(Debug, Clone)]
pub struct HeuristicFootprintSource {
    personal_domains: Vec<String>,
}

impl HeuristicFootprintSource {
    pub const PERSONAL: FootprintLookup = FootprintLookup {
        age_days: 365,
        source_count: 1,
    };
    pub const ORGANISATIONAL: FootprintLookup = FootprintLookup {
        age_days: 730,
        source_count: 10,
    };

    pub fn new(personal_domains: Vec<String>) -> Self {
        Self { personal_domains }
    }

    pub fn estimate(&self, domain: &str) -> FootprintLookup {
        if DomainUtils::matches_domain_list(domain, &self.personal_domains) {
            Self::PERSONAL
        } else {
            Self::ORGANISATIONAL
        }
    }
}

#[async_trait]
impl FootprintSource for HeuristicFootprintSource {
    async fn lookup(&self, domain: &str) -> Result<FootprintLookup, ProviderError> {
        Ok(self.estimate(domain))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticFootprintSource {
    domains: BTreeMap<String, FootprintLookup>,
}

impl StaticFootprintSource {
    pub fn new(domains: BTreeMap<String, FootprintLookup>) -> Self {
        let domains = domains
            .into_iter()
            .map(|(domain, lookup)| (DomainUtils::canonicalize_domain(&domain), lookup))
            .collect();
        Self { domains }
    }
}

#[async_trait]
impl FootprintSource for StaticFootprintSource {
    async fn lookup(&self, domain: &str) -> Result<FootprintLookup, ProviderError> {
        self.domains
            .get(&DomainUtils::canonicalize_domain(domain))
            .copied()
            .ok_or_else(|| ProviderError::LookupFailed(format!("no footprint data for {domain}")))
    }
}

/// Caches successful lookups for a fixed TTL. Failures are not cached, and
/// expired entries are dropped whenever a new one is stored.
pub struct CachedFootprintSource {
    inner: Arc<dyn FootprintSource>,
    cache: Arc<RwLock<HashMap<String, (FootprintLookup, Instant)>>>,
    cache_ttl: Duration,
}

impl CachedFootprintSource {
    pub fn new(inner: Arc<dyn FootprintSource>, cache_ttl: Duration) -> Self {
        Self {
            inner,
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_ttl,
        }
    }
}

#[async_trait]
impl FootprintSource for CachedFootprintSource {
    async fn lookup(&self, domain: &str) -> Result<FootprintLookup, ProviderError> {
        let domain = domain.to_lowercase();

        {
            let cache = self.cache.read().await;
            if let Some((lookup, cached_at)) = cache.get(&domain) {
                if cached_at.elapsed() < self.cache_ttl {
                    log::debug!("Using cached footprint for: {domain}");
                    return Ok(*lookup);
                }
            }
        }

        let lookup = self.inner.lookup(&domain).await?;

        {
            let mut cache = self.cache.write().await;
            cache.retain(|_, (_, cached_at)| cached_at.elapsed() < self.cache_ttl);
            cache.insert(domain, (lookup, Instant::now()));
        }

        Ok(lookup)
    }
}

pub struct FootprintAnalyzer {
    config: FootprintConfig,
    source: Arc<dyn FootprintSource>,
    timeout: Duration,
}

impl FootprintAnalyzer {
    pub fn new(
        config: FootprintConfig,
        source: Arc<dyn FootprintSource>,
        timeout: Duration,
    ) -> Self {
        Self {
            config,
            source,
            timeout,
        }
    }

    /// Build the configured source, wrapped in the TTL cache.
    pub fn from_config(config: &DetectionConfig) -> Self {
        let personal = config.domain_mismatch.personal_domains.clone();
        let source: Arc<dyn FootprintSource> = match &config.footprint.source {
            FootprintSourceConfig::Heuristic => Arc::new(HeuristicFootprintSource::new(personal)),
            FootprintSourceConfig::Whois => Arc::new(WhoisFootprintSource::new(
                config.timeouts.footprint(),
                HeuristicFootprintSource::new(personal),
            )),
            FootprintSourceConfig::Static { domains } => {
                Arc::new(StaticFootprintSource::new(domains.clone()))
            }
        };
        let cached = CachedFootprintSource::new(
            source,
            Duration::from_secs(config.footprint.cache_ttl_secs),
        );

        Self::new(
            config.footprint.clone(),
            Arc::new(cached),
            config.timeouts.footprint(),
        )
    }

    /// Footprint of a sender domain. Lookups run against the registrable root
    /// domain; any failure or timeout yields the neutral `unknown` result.
    pub async fn get_footprint_data(&self, domain: &str) -> FootprintData {
        let domain = DomainUtils::canonicalize_domain(domain);
        if domain.is_empty() || !domain.contains('.') {
            log::warn!("Invalid domain format for footprint lookup: '{domain}'");
            return FootprintData::unknown(&domain);
        }

        let root_domain = DomainUtils::root_domain(&domain);
        log::debug!("Checking footprint for {domain} (root: {root_domain})");

        let lookup = tokio::time::timeout(self.timeout, self.source.lookup(&root_domain));
        let result = match lookup.await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        };

        match result {
            Ok(lookup) => self.classify(&domain, lookup),
            Err(e) => {
                log::warn!("Footprint lookup failed for {root_domain}: {e}");
                FootprintData::unknown(&domain)
            }
        }
    }

    pub fn classify(&self, domain: &str, lookup: FootprintLookup) -> FootprintData {
        let FootprintLookup {
            age_days,
            source_count,
        } = lookup;

        let (reputation, footprint_risk) =
            if source_count == 0 && age_days < self.config.new_max_age_days {
                (Reputation::New, self.config.new_risk)
            } else if source_count < self.config.low_max_sources
                && age_days < self.config.low_max_age_days
            {
                (Reputation::Low, self.config.low_risk)
            } else {
                (Reputation::Established, 0.0)
            };

        FootprintData {
            domain: domain.to_string(),
            source_count,
            age_days,
            reputation,
            footprint_risk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn analyzer(source: Arc<dyn FootprintSource>) -> FootprintAnalyzer {
        FootprintAnalyzer::new(FootprintConfig::default(), source, Duration::from_secs(5))
    }

    fn lookup(age_days: u32, source_count: u32) -> FootprintLookup {
        FootprintLookup {
            age_days,
            source_count,
        }
    }

    #[test]
    fn test_classify_boundaries() {
        let analyzer = analyzer(Arc::new(StaticFootprintSource::default()));

        let new = analyzer.classify("a.com", lookup(89, 0));
        assert_eq!(new.reputation, Reputation::New);
        assert_eq!(new.footprint_risk, 0.4);

        // 90 days is no longer new, but still low
        let low = analyzer.classify("a.com", lookup(90, 0));
        assert_eq!(low.reputation, Reputation::Low);
        assert_eq!(low.footprint_risk, 0.2);

        assert_eq!(analyzer.classify("a.com", lookup(179, 2)).reputation, Reputation::Low);
        assert_eq!(
            analyzer.classify("a.com", lookup(180, 2)).reputation,
            Reputation::Established
        );
        assert_eq!(
            analyzer.classify("a.com", lookup(10, 3)).reputation,
            Reputation::Established
        );
        assert_eq!(analyzer.classify("a.com", lookup(10, 3)).footprint_risk, 0.0);
    }

    #[tokio::test]
    async fn test_lookup_uses_root_domain() {
        let mut source = MockFootprintSource::new();
        source
            .expect_lookup()
            .with(eq("example.co.uk"))
            .times(1)
            .returning(|_| Ok(lookup(30, 0)));

        let data = analyzer(Arc::new(source))
            .get_footprint_data("WWW.Mail.Example.co.uk")
            .await;
        assert_eq!(data.domain, "mail.example.co.uk");
        assert_eq!(data.reputation, Reputation::New);
        assert_eq!(data.age_days, 30);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_unknown() {
        let mut source = MockFootprintSource::new();
        source
            .expect_lookup()
            .returning(|_| Err(ProviderError::LookupFailed("whois down".to_string())));

        let data = analyzer(Arc::new(source)).get_footprint_data("example.com").await;
        assert_eq!(data.reputation, Reputation::Unknown);
        assert_eq!(data.footprint_risk, 0.0);
    }

    struct SlowSource;

    #[async_trait]
    impl FootprintSource for SlowSource {
        async fn lookup(&self, _domain: &str) -> Result<FootprintLookup, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(lookup(1, 0))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_lookup_times_out_to_unknown() {
        let analyzer = FootprintAnalyzer::new(
            FootprintConfig::default(),
            Arc::new(SlowSource),
            Duration::from_secs(1),
        );
        let data = analyzer.get_footprint_data("example.com").await;
        assert_eq!(data.reputation, Reputation::Unknown);
    }

    #[tokio::test]
    async fn test_invalid_domain_skips_lookup() {
        let mut source = MockFootprintSource::new();
        source.expect_lookup().never();

        let analyzer = analyzer(Arc::new(source));
        assert_eq!(
            analyzer.get_footprint_data("").await.reputation,
            Reputation::Unknown
        );
        assert_eq!(
            analyzer.get_footprint_data("localhost").await.reputation,
            Reputation::Unknown
        );
    }

    #[tokio::test]
    async fn test_heuristic_source() {
        let source = HeuristicFootprintSource::new(vec!["gmail.com".to_string()]);
        assert_eq!(
            source.lookup("gmail.com").await.unwrap(),
            HeuristicFootprintSource::PERSONAL
        );
        assert_eq!(
            source.lookup("acme-corp.com").await.unwrap(),
            HeuristicFootprintSource::ORGANISATIONAL
        );

        // neither estimate is young enough to carry risk on its own
        let analyzer = analyzer(Arc::new(source));
        assert_eq!(
            analyzer.get_footprint_data("gmail.com").await.reputation,
            Reputation::Established
        );
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FootprintSource for CountingSource {
        async fn lookup(&self, domain: &str) -> Result<FootprintLookup, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if domain == "broken.com" {
                return Err(ProviderError::LookupFailed(domain.to_string()));
            }
            Ok(lookup(400, 5))
        }
    }

    #[tokio::test]
    async fn test_cache_hits_and_skips_failures() {
        let inner = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedFootprintSource::new(inner.clone(), Duration::from_secs(3600));

        cached.lookup("example.com").await.unwrap();
        cached.lookup("Example.com").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        assert!(cached.lookup("broken.com").await.is_err());
        assert!(cached.lookup("broken.com").await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_drops_expired_entries() {
        let inner = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedFootprintSource::new(inner.clone(), Duration::from_secs(60));

        cached.lookup("first.com").await.unwrap();
        cached.lookup("second.com").await.unwrap();
        assert_eq!(cached.cache.read().await.len(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        cached.lookup("third.com").await.unwrap();

        let cache = cached.cache.read().await;
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("third.com"));
    }

    #[tokio::test]
    async fn test_from_config_static_table() {
        let mut config = DetectionConfig::default();
        config.footprint.source = FootprintSourceConfig::Static {
            domains: BTreeMap::from([("fresh-startup.io".to_string(), lookup(12, 0))]),
        };

        let analyzer = FootprintAnalyzer::from_config(&config);
        let data = analyzer.get_footprint_data("hr.fresh-startup.io").await;
        assert_eq!(data.reputation, Reputation::New);

        let missing = analyzer.get_footprint_data("other.io").await;
        assert_eq!(missing.reputation, Reputation::Unknown);
    }
}
