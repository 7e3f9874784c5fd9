use crate::config::ImageBounds;
use crate::email::{decode_base64, ImagePart, RawEmail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    Attachment,
    Embedded,
}

/// A decodable image found in an email, in the order it was encountered.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCandidate {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub origin: ImageOrigin,
    pub mime_type: String,
    pub filename: Option<String>,
}

impl ImageCandidate {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.height == 0 {
            None
        } else {
            Some(f64::from(self.width) / f64::from(self.height))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageExtractor {
    bounds: ImageBounds,
    data_uri: Regex,
}

impl Default for ImageExtractor {
    fn default() -> Self {
        Self::new(ImageBounds::default())
    }
}

impl ImageExtractor {
    pub fn new(bounds: ImageBounds) -> Self {
        Self {
            bounds,
            data_uri: Regex::new(r"data:image/([A-Za-z0-9.+-]+);base64,([A-Za-z0-9+/=_-]+)")
                .expect("data URI pattern is valid"),
        }
    }

    /// Collect every decodable image: attachments first, then inline parts,
    /// then `data:` URIs in the body. Undecodable data is skipped.
    pub fn extract_images(&self, email: &RawEmail) -> Vec<ImageCandidate> {
        let mut images = Vec::new();

        for part in &email.attachments {
            if let Some(candidate) = self.candidate_from_part(part, ImageOrigin::Attachment) {
                images.push(candidate);
            }
        }
        for part in &email.embedded_images {
            if let Some(candidate) = self.candidate_from_part(part, ImageOrigin::Embedded) {
                images.push(candidate);
            }
        }

        if let Some(html) = email.html_body.as_deref() {
            images.extend(self.extract_data_uris(html));
        }
        // body may just be the HTML copy when there was no plain part
        if let Some(body) = email.body.as_deref() {
            if email.html_body.as_deref() != Some(body) {
                images.extend(self.extract_data_uris(body));
            }
        }

        log::debug!("Extracted {} image candidate(s) from {}", images.len(), email.id);
        images
    }

    /// Pick the image most likely to be the sender's profile photo.
    ///
    /// Only images inside the configured size and aspect window qualify.
    /// Embedded images beat attachments and earlier images beat later ones,
    /// so the choice depends only on the order of `candidates`.
    pub fn find_profile_image<'a>(
        &self,
        candidates: &'a [ImageCandidate],
    ) -> Option<&'a ImageCandidate> {
        candidates
            .iter()
            .enumerate()
            .filter(|(_, candidate)| self.qualifies(candidate))
            .min_by_key(|(index, candidate)| (candidate.origin != ImageOrigin::Embedded, *index))
            .map(|(_, candidate)| candidate)
    }

    fn qualifies(&self, candidate: &ImageCandidate) -> bool {
        let size = candidate.size();
        if size < self.bounds.min_bytes || size > self.bounds.max_bytes {
            return false;
        }
        match candidate.aspect_ratio() {
            Some(aspect) => aspect >= self.bounds.min_aspect && aspect <= self.bounds.max_aspect,
            None => false,
        }
    }

    fn candidate_from_part(&self, part: &ImagePart, origin: ImageOrigin) -> Option<ImageCandidate> {
        let Some(data) = part.content.decode() else {
            log::debug!("Skipping image part with undecodable base64 ({:?})", part.filename);
            return None;
        };
        let data = data.into_owned();

        let (width, height) = probe_dimensions(&data)?;
        Some(ImageCandidate {
            data,
            width,
            height,
            origin,
            mime_type: part.mime_type.clone(),
            filename: part.filename.clone(),
        })
    }

    fn extract_data_uris(&self, body: &str) -> Vec<ImageCandidate> {
        self.data_uri
            .captures_iter(body)
            .filter_map(|captures| {
                let subtype = captures.get(1)?.as_str().to_lowercase();
                let Some(data) = decode_base64(captures.get(2)?.as_str()) else {
                    log::debug!("Skipping embedded image/{subtype} with invalid base64");
                    return None;
                };
                let (width, height) = probe_dimensions(&data)?;
                Some(ImageCandidate {
                    data,
                    width,
                    height,
                    origin: ImageOrigin::Embedded,
                    mime_type: format!("image/{subtype}"),
                    filename: None,
                })
            })
            .collect()
    }
}

/// Read width and height from the image header. `None` for anything the
/// decoder does not recognise.
fn probe_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let reader = match image::ImageReader::new(Cursor::new(data)).with_guessed_format() {
        Ok(reader) => reader,
        Err(e) => {
            log::debug!("Skipping malformed image: {e}");
            return None;
        }
    };

    match reader.into_dimensions() {
        Ok((width, height)) if width > 0 && height > 0 => Some((width, height)),
        Ok(_) => None,
        Err(e) => {
            log::debug!("Skipping malformed image: {e}");
            None
        }
    }
}
