//! End-to-end scenarios through the public pipeline API.

use async_trait::async_trait;
use erika_ares::content_risk::FixedContentRisk;
use erika_ares::email::{ImagePart, PartContent};
use erika_ares::footprint::{FootprintLookup, FootprintSource, StaticFootprintSource};
use erika_ares::mitigation::MitigationErrorCode;
use erika_ares::search::{DisabledSearchProvider, FixtureSearchProvider};
use erika_ares::{
    DetectionConfig, InMemoryMailbox, MailCapabilityError, MitigationAction, MitigationExecutor,
    ProviderError, RawEmail, Reputation, SearchMatch, ThreatPipeline,
};
use erika_ares::config::ScoringWeights;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

fn profile_png() -> Vec<u8> {
    let mut state: u32 = 0x9e37_79b9;
    let img = image::RgbImage::from_fn(120, 120, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        image::Rgb([r, g, b])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn recruiter_email() -> RawEmail {
    RawEmail {
        id: "18c2f0a9d".to_string(),
        sender: Some("\"Raymond Franklin, Recruiter\" <raymond.franklin.hr@gmail.com>".to_string()),
        subject: Some("Remote position - immediate start".to_string()),
        body: Some(
            "Hello, I am a recruiter with a large company. Reply immediately to secure \
             the role; we will send a check for equipment."
                .to_string(),
        ),
        embedded_images: vec![ImagePart {
            filename: Some("signature.png".to_string()),
            mime_type: "image/png".to_string(),
            content: PartContent::Bytes(profile_png()),
        }],
        ..Default::default()
    }
}

fn recruiter_matches() -> Vec<SearchMatch> {
    vec![
        SearchMatch::new(
            "facebook.com",
            "Mr Robert - Real Estate Agent | Facebook",
            "Mr Robert helps families find their dream homes",
        ),
        SearchMatch::new(
            "hartwell-partners.com",
            "Jane Hartwell - Attorney at Hartwell Partners",
            "",
        ),
        SearchMatch::new("counsel-directory.org", "Meet our attorney Jane Hartwell", ""),
        SearchMatch::new(
            "sunrise-realty.com",
            "Robert Miles, Realtor | Sunrise Realty",
            "",
        ),
        SearchMatch::new("www.talentbridge.io", "team page", ""),
    ]
}

fn new_gmail_footprint() -> Arc<dyn FootprintSource> {
    Arc::new(StaticFootprintSource::new(BTreeMap::from([(
        "gmail.com".to_string(),
        FootprintLookup {
            age_days: 20,
            source_count: 0,
        },
    )])))
}

#[tokio::test]
async fn test_recruiter_impersonation_end_to_end() {
    let pipeline = ThreatPipeline::new(
        Arc::new(DetectionConfig::default()),
        Arc::new(FixtureSearchProvider::new(recruiter_matches())),
        new_gmail_footprint(),
        Arc::new(FixedContentRisk(0.9)),
    )
    .unwrap();

    let verdict = pipeline.analyze(&recruiter_email()).await;

    let phishing = verdict.phishing.expect("identity verification ran");
    assert_eq!(phishing.risk_score, 1.0);
    assert!(phishing.is_phishing);
    assert!(phishing.indicators.len() >= 3);
    assert!(phishing
        .recommendations
        .iter()
        .any(|r| r.contains("Report") || r.contains("Block")));
    assert!(phishing.summary().contains("PHISHING DETECTED"));

    let footprint = verdict.footprint.expect("footprint ran");
    assert_eq!(footprint.reputation, Reputation::New);

    // 0.4 * 0.4 + 1.0 * 0.3 + 0.9 * 0.3
    let threat = verdict.threat.as_ref().expect("threat scoring ran");
    assert!((threat.threat_score - 0.73).abs() < 1e-9);
    assert_eq!(threat.mitigation_action, MitigationAction::Flag);
    assert!(verdict.mitigation.is_none());

    let json = serde_json::to_value(&verdict.threat).unwrap();
    assert_eq!(json["mitigation_action"], "FLAG");
}

#[tokio::test]
async fn test_unavailable_search_is_neutral() {
    let pipeline = ThreatPipeline::new(
        Arc::new(DetectionConfig::default()),
        Arc::new(DisabledSearchProvider),
        new_gmail_footprint(),
        Arc::new(FixedContentRisk(0.0)),
    )
    .unwrap();

    let phishing = pipeline
        .analyze(&recruiter_email())
        .await
        .phishing
        .unwrap();
    assert_eq!(phishing.risk_score, 0.0);
    assert_eq!(phishing.confidence, 0.0);
    assert!(!phishing.is_phishing);
    assert!(phishing.indicators.is_empty());
}

struct StalledFootprint;

#[async_trait]
impl FootprintSource for StalledFootprint {
    async fn lookup(&self, _domain: &str) -> Result<FootprintLookup, ProviderError> {
        std::future::pending::<()>().await;
        Err(ProviderError::Unavailable("unreachable".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_footprint_times_out_to_unknown() {
    let mut config = DetectionConfig::default();
    config.timeouts.footprint_secs = 3;

    let pipeline = ThreatPipeline::new(
        Arc::new(config),
        Arc::new(FixtureSearchProvider::default()),
        Arc::new(StalledFootprint),
        Arc::new(FixedContentRisk(0.0)),
    )
    .unwrap();

    let verdict = pipeline.analyze(&recruiter_email()).await;
    let footprint = verdict.footprint.unwrap();
    assert_eq!(footprint.reputation, Reputation::Unknown);
    assert_eq!(footprint.footprint_risk, 0.0);

    // only the recruiter-on-gmail mismatch remains
    let threat = verdict.threat.unwrap();
    assert!((threat.threat_score - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn test_mark_as_phishing_twice_keeps_single_labels() {
    let mailbox = InMemoryMailbox::new();
    mailbox
        .insert_message("18c2f0a9d", &["SPAM", "PHISHING_DETECTED_BY_ERIKA"])
        .await;
    let executor = MitigationExecutor::new(Duration::from_secs(5));

    for _ in 0..2 {
        let result = executor
            .request_client_mitigation("18c2f0a9d", MitigationAction::MarkAsPhishing, &mailbox)
            .await;
        assert!(result.success);
        assert_eq!(result.error, None);
    }

    let labels: Vec<String> = mailbox
        .labels("18c2f0a9d")
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(labels, vec!["PHISHING_DETECTED_BY_ERIKA", "SPAM"]);
}

#[tokio::test]
async fn test_mailbox_failure_is_reported_not_raised() {
    let mailbox = InMemoryMailbox::new();
    mailbox.insert_message("18c2f0a9d", &["INBOX"]).await;
    mailbox
        .fail_with(
            "18c2f0a9d",
            MailCapabilityError::InsufficientScope("gmail.modify not granted".to_string()),
        )
        .await;

    let mut config = DetectionConfig::default();
    config.features.auto_mitigate = true;
    config.scoring.mark_as_phishing_threshold = 0.7;

    let pipeline = ThreatPipeline::new(
        Arc::new(config),
        Arc::new(FixtureSearchProvider::new(recruiter_matches())),
        new_gmail_footprint(),
        Arc::new(FixedContentRisk(1.0)),
    )
    .unwrap();

    let verdict = pipeline.process(&recruiter_email(), &mailbox).await;
    let mitigation = verdict.mitigation.unwrap();
    assert_eq!(mitigation.action, MitigationAction::MarkAsPhishing);
    assert!(!mitigation.success);
    assert_eq!(
        mitigation.error_code,
        Some(MitigationErrorCode::InsufficientScope)
    );
    assert!(mailbox.labels("18c2f0a9d").await.unwrap().contains("INBOX"));
}

#[tokio::test]
async fn test_rfc822_email_runs_through_pipeline() {
    let raw = concat!(
        "From: Sam Lee <sam@acme-corp.com>\r\n",
        "Subject: Team lunch\r\n",
        "Message-ID: <lunch-42@acme-corp.com>\r\n",
        "\r\n",
        "Pizza at noon on Friday?\r\n",
    );
    let email = RawEmail::from_rfc822(raw.as_bytes()).unwrap();

    let pipeline = Arc::new(
        ThreatPipeline::from_config(
            Arc::new(DetectionConfig::default()),
            Arc::new(DisabledSearchProvider),
        )
        .unwrap(),
    );
    let verdicts = pipeline.analyze_batch(vec![email]).await;

    assert_eq!(verdicts.len(), 1);
    assert_eq!(verdicts[0].email_id, "lunch-42@acme-corp.com");
    let threat = verdicts[0].threat.as_ref().unwrap();
    assert_eq!(threat.threat_score, 0.0);
    assert_eq!(threat.mitigation_action, MitigationAction::None);
    assert_eq!(
        verdicts[0].footprint.as_ref().unwrap().reputation,
        Reputation::Established
    );
}

#[tokio::test]
async fn test_unbalanced_weights_cannot_build_a_pipeline() {
    let mut config = DetectionConfig::default();
    config.scoring.weights = ScoringWeights {
        footprint: 0.9,
        domain_mismatch: 0.9,
        content: 0.9,
    };
    let config = Arc::new(config);

    let built = ThreatPipeline::new(
        Arc::clone(&config),
        Arc::new(DisabledSearchProvider),
        new_gmail_footprint(),
        Arc::new(FixedContentRisk(0.6)),
    );
    assert!(built.is_err());
    assert!(ThreatPipeline::from_config(config, Arc::new(DisabledSearchProvider)).is_err());
}
