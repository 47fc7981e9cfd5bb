//! Webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=...][,v0=...]`. The MAC is
//! HMAC-SHA256 over `"{t}.{raw body}"` keyed with the endpoint signing secret.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted distance between the signed timestamp and now.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            // Undecodable entries are skipped; a later v1 may still match.
            "v1" => signatures.extend(hex::decode(value).ok()),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

/// Verify `header` for `payload` against a single secret.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;
    if (now.timestamp() - parsed.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(parsed.timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    // verify_slice compares in constant time.
    if parsed
        .signatures
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok())
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[derive(Clone)]
struct SecretPair {
    platform: String,
    connect: String,
}

/// Signing secrets for the platform and connected-account webhook endpoints.
pub struct WebhookSecrets {
    inner: RwLock<SecretPair>,
}

impl WebhookSecrets {
    pub fn new(platform: impl Into<String>, connect: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(SecretPair {
                platform: platform.into(),
                connect: connect.into(),
            }),
        }
    }

    pub fn platform(&self) -> String {
        self.read().platform
    }

    pub fn connect(&self) -> String {
        self.read().connect
    }

    /// Swap in rotated secrets.
    pub fn replace(&self, platform: impl Into<String>, connect: impl Into<String>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = SecretPair {
            platform: platform.into(),
            connect: connect.into(),
        };
    }

    /// Accept the payload if either endpoint secret verifies it.
    pub fn verify(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let secrets = self.read();
        match verify_signature(payload, header, &secrets.platform, now) {
            Ok(()) => Ok(()),
            Err(SignatureError::Mismatch) => {
                verify_signature(payload, header, &secrets.connect, now)
            }
            Err(e) => Err(e),
        }
    }

    fn read(&self) -> SecretPair {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
