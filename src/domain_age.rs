use crate::error::ProviderError;
use crate::footprint::{FootprintLookup, FootprintSource, HeuristicFootprintSource};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

const FALLBACK_WHOIS_SERVERS: [&str; 2] = ["whois.iana.org", "whois.internic.net"];

/// Footprint source backed by WHOIS.
///
/// The age comes from the registry's creation date. When no WHOIS server
/// yields a date, a domain that still resolves in DNS gets the domain-class
/// estimate instead; one that does not resolve fails the lookup. WHOIS says
/// nothing about how widely a domain is seen, so the source count is always
/// the domain-class estimate.
///
/// `timeout` is the budget for the whole lookup. Every WHOIS server and the
/// DNS fallback get an equal slice of it, with one slice left spare, so a
/// stalled primary server cannot starve the fallbacks.
pub struct WhoisFootprintSource {
    timeout: Duration,
    heuristic: HeuristicFootprintSource,
    creation_patterns: Vec<Regex>,
    iso_date: Regex,
    registry_date: Regex,
}

impl WhoisFootprintSource {
    pub fn new(timeout: Duration, heuristic: HeuristicFootprintSource) -> Self {
        let creation_patterns = [
            r"(?i)creation\s*date[:\s]+([^\r\n]+)",
            r"(?i)domain\s*created[:\s]+([^\r\n]+)",
            r"(?i)registration\s*date[:\s]+([^\r\n]+)",
            r"(?i)created\s*on[:\s]+([^\r\n]+)",
            r"(?i)registered\s*on[:\s]+([^\r\n]+)",
            r"(?i)created[:\s]+([^\r\n]+)",
            r"(?i)registered[:\s]+([^\r\n]+)",
            r"(?i)(?:domain_date_created|create_date|created_date|registration_time)[:\s]+([^\r\n]+)",
            r"(?i)fecha\s*de\s*creaci[oó]n[:\s]+([^\r\n]+)",
            r"(?i)date\s*de\s*cr[eé]ation[:\s]+([^\r\n]+)",
            r"(?i)erstellt\s*am[:\s]+([^\r\n]+)",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect();

        Self {
            timeout,
            heuristic,
            creation_patterns,
            iso_date: Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap(),
            registry_date: Regex::new(r"(?i)(\d{1,2})[-. ]([a-z]{3})[a-z]*[-. ](\d{4})").unwrap(),
        }
    }

    /// Time allowed for one WHOIS query or the DNS fallback.
    pub fn step_timeout(&self) -> Duration {
        let steps = FALLBACK_WHOIS_SERVERS.len() as u32 + 3;
        self.timeout / steps
    }

    /// WHOIS server responsible for a domain's TLD.
    pub fn whois_server(domain: &str) -> &'static str {
        let tld = domain.rsplit('.').next().unwrap_or(domain);

        let servers = HashMap::from([
            ("com", "whois.verisign-grs.com"),
            ("net", "whois.verisign-grs.com"),
            ("org", "whois.pir.org"),
            ("info", "whois.afilias.net"),
            ("biz", "whois.neulevel.biz"),
            ("io", "whois.nic.io"),
            ("us", "whois.nic.us"),
            ("uk", "whois.nic.uk"),
            ("de", "whois.denic.de"),
            ("fr", "whois.afnic.fr"),
            ("it", "whois.nic.it"),
            ("nl", "whois.domain-registry.nl"),
            ("au", "whois.auda.org.au"),
            ("ca", "whois.cira.ca"),
            ("jp", "whois.jprs.jp"),
            ("br", "whois.registro.br"),
            ("tk", "whois.dot.tk"),
        ]);

        servers.get(tld).copied().unwrap_or("whois.iana.org")
    }

    /// Domain age in days from a WHOIS response, relative to `today` (days
    /// since the Unix epoch).
    pub fn parse_creation_age(&self, text: &str, today: u64) -> Option<u32> {
        for pattern in &self.creation_patterns {
            let Some(date_str) = pattern.captures(text).and_then(|c| c.get(1)) else {
                continue;
            };
            let date_str = date_str.as_str().trim();
            match self.parse_date(date_str) {
                Some(created) if created <= today => {
                    return Some(u32::try_from(today - created).unwrap_or(u32::MAX));
                }
                Some(_) => log::debug!("Ignoring creation date in the future: '{date_str}'"),
                None => log::debug!("Could not parse date format: '{date_str}'"),
            }
        }
        None
    }

    /// Days since the Unix epoch for `YYYY-MM-DD...` or `DD-Mon-YYYY` dates.
    fn parse_date(&self, date_str: &str) -> Option<u64> {
        if let Some(c) = self.iso_date.captures(date_str) {
            return days_since_epoch(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
        }

        let c = self.registry_date.captures(date_str)?;
        let month = match c[2].to_lowercase().as_str() {
            "jan" => 1,
            "feb" => 2,
            "mar" => 3,
            "apr" => 4,
            "may" => 5,
            "jun" => 6,
            "jul" => 7,
            "aug" => 8,
            "sep" => 9,
            "oct" => 10,
            "nov" => 11,
            "dec" => 12,
            _ => return None,
        };
        days_since_epoch(c[3].parse().ok()?, month, c[1].parse().ok()?)
    }

    /// Query a WHOIS server (`host:port`) over TCP. Connect, request and
    /// read together are bounded by one step timeout.
    async fn query_whois_server(&self, addr: &str, domain: &str) -> Result<String> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;

        log::debug!("Connecting to WHOIS server: {addr}");

        let query = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.write_all(format!("{domain}\r\n").as_bytes()).await?;

            let mut response = String::new();
            stream.read_to_string(&mut response).await?;
            Ok::<_, anyhow::Error>(response)
        };
        let response = tokio::time::timeout(self.step_timeout(), query).await??;

        if response.is_empty() {
            return Err(anyhow!("Empty WHOIS response"));
        }
        Ok(response)
    }

    async fn fetch_age(&self, domain: &str) -> Option<u32> {
        let primary = Self::whois_server(domain);
        let today = today_days();

        for server in std::iter::once(primary).chain(FALLBACK_WHOIS_SERVERS) {
            match self.query_whois_server(&format!("{server}:43"), domain).await {
                Ok(text) => {
                    log::debug!("Got WHOIS response from {server} ({} chars)", text.len());
                    if let Some(age) = self.parse_creation_age(&text, today) {
                        log::info!("WHOIS creation date for {domain}: {age} days old");
                        return Some(age);
                    }
                }
                Err(e) => log::debug!("WHOIS server {server} failed: {e}"),
            }
        }
        None
    }

    async fn resolves(&self, domain: &str) -> Result<bool> {
        use hickory_resolver::TokioAsyncResolver;

        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        let lookup = tokio::time::timeout(self.step_timeout(), resolver.lookup_ip(domain)).await?;
        Ok(lookup.is_ok())
    }
}

#[async_trait]
impl FootprintSource for WhoisFootprintSource {
    async fn lookup(&self, domain: &str) -> Result<FootprintLookup, ProviderError> {
        let estimate = self.heuristic.estimate(domain);

        if let Some(age_days) = self.fetch_age(domain).await {
            return Ok(FootprintLookup {
                age_days,
                source_count: estimate.source_count,
            });
        }

        log::debug!("All WHOIS servers failed for {domain}, using DNS fallback");
        match self.resolves(domain).await {
            Ok(true) => {
                log::debug!("Domain {domain} resolves, but age unknown");
                Ok(estimate)
            }
            Ok(false) => Err(ProviderError::LookupFailed(format!(
                "{domain} has no WHOIS creation date and does not resolve"
            ))),
            Err(e) => Err(ProviderError::Unavailable(format!("DNS resolver: {e}"))),
        }
    }
}

fn today_days() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
        / SECONDS_PER_DAY
}

/// Proleptic Gregorian date to days since 1970-01-01.
fn days_since_epoch(year: i64, month: u32, day: u32) -> Option<u64> {
    if year < 1970 || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;

    u64::try_from(days).ok()
}
