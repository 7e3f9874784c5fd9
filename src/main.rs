use clap::{Arg, Command};
use erika_ares::content_risk::FixedContentRisk;
use erika_ares::search::{DisabledSearchProvider, FixtureSearchProvider, ReverseImageSearchProvider};
use erika_ares::{DetectionConfig, InMemoryMailbox, RawEmail, ThreatPipeline};
use log::LevelFilter;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("erika-ares")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Profile-photo identity verification and threat scoring for inbound email")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (defaults apply when absent)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("email")
                .short('e')
                .long("email")
                .value_name("FILE")
                .help("Email to analyze (.eml or .json RawEmail)")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("matches")
                .short('m')
                .long("matches")
                .value_name("FILE")
                .help("JSON list of reverse image search matches for the profile photo")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("content-risk")
                .long("content-risk")
                .value_name("SCORE")
                .help("Use a fixed content risk score instead of the configured classifier")
                .value_parser(clap::value_parser!(f64))
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("apply")
                .long("apply")
                .help("Apply the mitigation to an in-memory mailbox and print the labels")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config = match load_config(matches.get_one::<String>("config")) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("🔍 Testing configuration...");
        match config.validate() {
            Ok(()) => {
                println!("✅ Configuration is valid");
                println!(
                    "   Weights: footprint {}, domain mismatch {}, content {}",
                    config.scoring.weights.footprint,
                    config.scoring.weights.domain_mismatch,
                    config.scoring.weights.content
                );
                println!(
                    "   Thresholds: flag {}, mark as phishing {}, identity phishing {}",
                    config.scoring.flag_threshold,
                    config.scoring.mark_as_phishing_threshold,
                    config.identity.phishing_threshold
                );
            }
            Err(e) => {
                println!("❌ Configuration validation failed:");
                println!("Error: {e}");
                process::exit(1);
            }
        }
        return;
    }

    let Some(email_file) = matches.get_one::<String>("email") else {
        eprintln!("Nothing to do: pass --email FILE (see --help)");
        process::exit(2);
    };

    let email = match load_email(email_file) {
        Ok(email) => email,
        Err(e) => {
            eprintln!("❌ Error reading email file {email_file}: {e}");
            process::exit(1);
        }
    };

    let search: Arc<dyn ReverseImageSearchProvider> = match matches.get_one::<String>("matches")
    {
        Some(path) => match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| FixtureSearchProvider::from_json(&content))
        {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                eprintln!("❌ Error reading search matches {path}: {e}");
                process::exit(1);
            }
        },
        None => Arc::new(DisabledSearchProvider),
    };

    let apply = matches.get_flag("apply");
    let mut config = config;
    if apply {
        config.features.auto_mitigate = true;
    }

    let mut pipeline = match ThreatPipeline::from_config(Arc::new(config), search) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("❌ Error building analysis pipeline: {e}");
            process::exit(1);
        }
    };
    if let Some(score) = matches.get_one::<f64>("content-risk") {
        pipeline = pipeline.with_content_provider(Arc::new(FixedContentRisk(*score)));
    }

    let mailbox = InMemoryMailbox::new();
    mailbox.insert_message(&email.id, &["INBOX"]).await;

    let verdict = if apply {
        pipeline.process(&email, &mailbox).await
    } else {
        pipeline.analyze(&email).await
    };

    match serde_json::to_string_pretty(&verdict) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("❌ Error serializing verdict: {e}");
            process::exit(1);
        }
    }

    if let Some(phishing) = &verdict.phishing {
        println!();
        println!("{}", phishing.summary());
    }

    if apply {
        let labels = mailbox.labels(&email.id).await.unwrap_or_default();
        println!();
        println!("📬 Mailbox labels for {}: {:?}", email.id, labels);
    }
}

fn load_config(path: Option<&String>) -> anyhow::Result<DetectionConfig> {
    match path {
        Some(path) => DetectionConfig::from_file(path),
        None => Ok(DetectionConfig::default()),
    }
}

fn load_email(path: &str) -> anyhow::Result<RawEmail> {
    let content = std::fs::read(path)?;
    let mut email = if path.ends_with(".json") {
        RawEmail::from_json(std::str::from_utf8(&content)?)?
    } else {
        RawEmail::from_rfc822(&content)?
    };

    if email.id.is_empty() {
        email.id = path.to_string();
    }
    Ok(email)
}

fn generate_default_config(path: &str) {
    let config = DetectionConfig::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}
