//! Content-addressed key generation
//!
//! Fingerprints are SHA-256 digests. A collision would make two distinct
//! resources share one cache entry, so a fast non-cryptographic hash is
//! never used here.
//!
//! - `url` keys hash the normalized URL string, so the cache can answer
//!   "was this crawled" before any content exists.
//! - `asset` / `screenshot` / `ocr` keys hash raw bytes when they are known;
//!   identical content reached from different pages collapses to one entry.
//! - `training_sample` keys hash the canonical JSON of the feature vector.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{CacheError, CacheKey, Category, Fingerprint, Result};

/// Input to the fingerprinter
#[derive(Debug, Clone, Copy)]
pub enum FingerprintInput<'a> {
    /// A URL, normalized before hashing
    Url(&'a str),
    /// Raw payload bytes
    Bytes(&'a [u8]),
    /// Extracted feature vector
    Features(&'a Value),
}

/// Stateless fingerprinter
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentFingerprinter;

impl ContentFingerprinter {
    pub fn new() -> Self {
        Self
    }

    /// Compute the cache key for `input` in `category`
    ///
    /// `Url` only takes URLs and `TrainingSample` only takes features.
    /// The remaining categories accept raw bytes (content-keyed) or a URL
    /// (locator-keyed, for requests made before the content is known).
    pub fn fingerprint(&self, category: Category, input: FingerprintInput<'_>) -> Result<CacheKey> {
        let fingerprint = match (category, input) {
            (Category::TrainingSample, FingerprintInput::Features(value)) => {
                features_fingerprint(value)
            }
            (Category::TrainingSample, _) => {
                return Err(CacheError::InvalidInput(
                    "training samples are keyed by their feature vector".into(),
                ));
            }
            (_, FingerprintInput::Url(url)) => url_fingerprint(url)?,
            (Category::Url, _) => {
                return Err(CacheError::InvalidInput(
                    "url entries are keyed by the normalized url".into(),
                ));
            }
            (_, FingerprintInput::Bytes(bytes)) => content_fingerprint(bytes),
            (_, FingerprintInput::Features(_)) => {
                return Err(CacheError::InvalidInput(format!(
                    "{category} entries cannot be keyed by features"
                )));
            }
        };
        Ok(CacheKey::new(category, fingerprint))
    }
}

/// Normalize a URL so equivalent spellings map to one key
///
/// Scheme and host are lowercased, default ports and the fragment are
/// dropped, a trailing slash is removed from non-root paths and query
/// parameters are sorted.
pub fn normalize_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CacheError::InvalidUrl("empty url".into()));
    }

    let mut url = url::Url::parse(trimmed).map_err(|e| CacheError::InvalidUrl(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(CacheError::InvalidUrl(format!("unsupported scheme: {scheme}")));
        }
    }

    if let Some(host) = url.host_str() {
        let lowered = host.to_ascii_lowercase();
        url.set_host(Some(&lowered))
            .map_err(|e| CacheError::InvalidUrl(e.to_string()))?;
    }

    // The parser already drops ports equal to the scheme default.
    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    Ok(url.into())
}

/// Fingerprint of a normalized URL
pub fn url_fingerprint(url: &str) -> Result<Fingerprint> {
    let normalized = normalize_url(url)?;
    Ok(digest(normalized.as_bytes()))
}

/// Fingerprint of raw content bytes
pub fn content_fingerprint(bytes: &[u8]) -> Fingerprint {
    digest(bytes)
}

/// Fingerprint of a feature vector's canonical JSON
pub fn features_fingerprint(features: &Value) -> Fingerprint {
    digest(canonical_json(features).as_bytes())
}

/// Serialize JSON with object keys sorted at every level and no whitespace
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn digest(bytes: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Fingerprint::from_bytes(hasher.finalize().into())
}
