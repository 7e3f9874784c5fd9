#![allow(clippy::uninlined_format_args)]

use erika_ares::config::{DetectionConfig, FootprintSourceConfig};
use erika_ares::domain_utils::DomainUtils;
use erika_ares::footprint::FootprintAnalyzer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("Testing REAL WHOIS footprint lookups (not static data)...");

    let mut config = DetectionConfig::default();
    config.footprint.source = FootprintSourceConfig::Whois;
    config.timeouts.footprint_secs = 10;
    let analyzer = FootprintAnalyzer::from_config(&config);

    let test_domains = vec![
        "google.com",
        "example.com",
        "github.com",
        "mail.bbc.co.uk",
        "gmail.com",
    ];

    for domain in test_domains {
        println!("\n=== Testing domain: {} ===", domain);

        let data = analyzer.get_footprint_data(domain).await;
        println!("  Root domain: {}", DomainUtils::root_domain(&data.domain));
        println!("  Age (days): {}", data.age_days);
        println!("  Sources: {}", data.source_count);
        println!("  Reputation: {:?}", data.reputation);
        println!("  Footprint risk: {}", data.footprint_risk);

        if data.footprint_risk > 0.0 {
            println!("  🚨 This domain would add footprint risk!");
        } else {
            println!("  ✅ No footprint risk.");
        }
    }

    println!("\n=== Testing Domain Extraction ===");
    let test_emails = vec![
        "user@google.com",
        "Raymond Franklin <rf@gmail.com>",
        "bounce@sendgrid.net>,body=8bitmime",
        "invalid-email",
    ];

    for email in test_emails {
        if let Some(domain) = DomainUtils::extract_domain(email) {
            println!("✅ {} → {}", email, domain);
        } else {
            println!("❌ {} → (invalid email)", email);
        }
    }

    Ok(())
}
