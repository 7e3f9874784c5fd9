//! Inbound email records as handed over by the mail-fetching layer.

use crate::domain_utils::DomainUtils;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// An email as supplied by the fetch layer. Absent fields read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEmail {
    pub id: String,
    /// `Name <addr>` or a bare address.
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// HTML alternative, scanned for `data:` image URIs.
    pub html_body: Option<String>,
    pub attachments: Vec<ImagePart>,
    pub embedded_images: Vec<ImagePart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePart {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    pub content: PartContent,
}

/// Part payload, either already decoded or still base64 (standard or URL-safe
/// alphabet, as Gmail hands it out).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartContent {
    Bytes(Vec<u8>),
    Base64(String),
}

impl PartContent {
    pub fn decode(&self) -> Option<Cow<'_, [u8]>> {
        match self {
            PartContent::Bytes(bytes) => Some(Cow::Borrowed(bytes.as_slice())),
            PartContent::Base64(data) => decode_base64(data).map(Cow::Owned),
        }
    }
}

/// Decode base64 in any of the alphabets mail systems use, ignoring line breaks.
pub fn decode_base64(data: &str) -> Option<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    [&STANDARD, &URL_SAFE, &STANDARD_NO_PAD, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(&compact).ok())
}

/// Parsed `From` value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub name: String,
    pub address: String,
}

impl Sender {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(start) = raw.rfind('<') {
            if let Some(end) = raw[start..].find('>') {
                let name = raw[..start].trim().trim_matches('"').trim().to_string();
                let address = raw[start + 1..start + end].trim().to_string();
                return Self { name, address };
            }
        }

        if raw.contains('@') && !raw.contains(char::is_whitespace) {
            Self {
                name: String::new(),
                address: raw.to_string(),
            }
        } else {
            Self {
                name: raw.trim_matches('"').trim().to_string(),
                address: String::new(),
            }
        }
    }

    pub fn domain(&self) -> Option<String> {
        DomainUtils::extract_domain(&self.address)
    }
}

impl RawEmail {
    pub fn sender(&self) -> &str {
        self.sender.as_deref().unwrap_or("")
    }

    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or("")
    }

    pub fn body(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    pub fn parsed_sender(&self) -> Sender {
        Sender::parse(self.sender())
    }

    pub fn sender_domain(&self) -> Option<String> {
        self.parsed_sender().domain()
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Build a record from an RFC 822 message. Plain text parts form the body
    /// (HTML only when there is no plain part); image parts become attachments
    /// or embedded images depending on their disposition.
    pub fn from_rfc822(raw: &[u8]) -> anyhow::Result<Self> {
        let parsed = mailparse::parse_mail(raw)?;

        let id = parsed
            .headers
            .get_first_value("Message-ID")
            .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string())
            .unwrap_or_default();

        let mut email = RawEmail {
            id,
            sender: parsed.headers.get_first_value("From"),
            subject: parsed.headers.get_first_value("Subject"),
            ..Default::default()
        };

        let mut plain = Vec::new();
        let mut html = Vec::new();
        collect_parts(&parsed, &mut email, &mut plain, &mut html)?;

        if !html.is_empty() {
            email.html_body = Some(html.join("\n"));
        }
        email.body = if !plain.is_empty() {
            Some(plain.join("\n"))
        } else {
            email.html_body.clone()
        };

        Ok(email)
    }
}

fn collect_parts(
    part: &ParsedMail<'_>,
    email: &mut RawEmail,
    plain: &mut Vec<String>,
    html: &mut Vec<String>,
) -> anyhow::Result<()> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, email, plain, html)?;
        }
        return Ok(());
    }

    let mime_type = part.ctype.mimetype.to_lowercase();
    match mime_type.as_str() {
        "text/plain" => plain.push(part.get_body()?),
        "text/html" => html.push(part.get_body()?),
        m if m.starts_with("image/") => {
            let bytes = match part.get_body_raw() {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::debug!("Skipping undecodable image part: {e}");
                    return Ok(());
                }
            };
            let disposition = part.get_content_disposition();
            let filename = disposition
                .params
                .get("filename")
                .or_else(|| part.ctype.params.get("name"))
                .cloned();

            let image = ImagePart {
                filename,
                mime_type,
                content: PartContent::Bytes(bytes),
            };
            if disposition.disposition == DispositionType::Attachment {
                email.attachments.push(image);
            } else {
                email.embedded_images.push(image);
            }
        }
        _ => {}
    }

    Ok(())
}
