//! Signs webhook payloads the way the payment processor does, so tests can
//! drive the real verification path instead of bypassing it.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const STRIPE_SIGNATURE: &str = "stripe-signature";

pub struct WebhookSigner {
    pub secret: String,
}

impl WebhookSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// `t=<timestamp>,v1=<hex hmac>` over `"{timestamp}.{payload}"`.
    pub fn signature(&self, payload: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let digest = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={digest}")
    }

    /// Signature header stamped with the current time.
    pub fn sign_now(&self, payload: &[u8]) -> String {
        self.signature(payload, chrono::Utc::now().timestamp())
    }

    pub fn headers(&self, payload: &[u8]) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            HeaderName::from_static(STRIPE_SIGNATURE),
            HeaderValue::from_str(&self.sign_now(payload)).unwrap(),
        );
        map
    }
}
