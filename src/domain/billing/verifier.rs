//! Stripe webhook signature verification.
//!
//! HMAC-SHA256 over `"{t}.{body}"` using the exact received bytes, compared
//! in constant time. The timestamp window rejects replays of captured
//! deliveries.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::errors::{AuthenticityError, WebhookError};
use super::event::VerifiedEvent;
use crate::domain::foundation::Timestamp;

type HmacSha256 = Hmac<Sha256>;

/// Default maximum signature age (5 minutes).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Allowed clock skew for signatures stamped in the future.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Parsed `Stripe-Signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    /// All `v1` signatures. More than one is sent while a secret is rolled.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses `t=<unix>,v1=<hex>[,v1=<hex>...]`. Unknown schemes such as
    /// `v0` are ignored.
    pub fn parse(header: &str) -> Result<Self, AuthenticityError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=').ok_or_else(|| {
                AuthenticityError::MalformedHeader(format!("expected key=value, got '{part}'"))
            })?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        AuthenticityError::MalformedHeader("invalid timestamp".to_string())
                    })?);
                }
                "v1" => {
                    // A signature that is not hex can never match; skip it
                    // rather than fail so a sibling v1 still gets its chance.
                    if let Ok(sig) = hex::decode(value) {
                        v1_signatures.push(sig);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| AuthenticityError::MalformedHeader("missing timestamp".to_string()))?;
        if v1_signatures.is_empty() {
            return Err(AuthenticityError::MalformedHeader(
                "missing v1 signature".to_string(),
            ));
        }

        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

/// Verifier for inbound webhook deliveries.
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Overrides the maximum accepted signature age.
    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Verifies the delivery and decodes it into a typed event.
    ///
    /// The body is not parsed at all unless the signature matches.
    pub fn verify(&self, body: &[u8], signature_header: &str) -> Result<VerifiedEvent, WebhookError> {
        self.verify_at(body, signature_header, Timestamp::now())
    }

    /// [`verify`](Self::verify) against an explicit clock.
    pub fn verify_at(
        &self,
        body: &[u8],
        signature_header: &str,
        now: Timestamp,
    ) -> Result<VerifiedEvent, WebhookError> {
        self.authenticate_at(body, signature_header, now)?;
        VerifiedEvent::decode(body)
    }

    /// Checks the signature and timestamp window only.
    pub fn authenticate_at(
        &self,
        body: &[u8],
        signature_header: &str,
        now: Timestamp,
    ) -> Result<(), AuthenticityError> {
        if signature_header.trim().is_empty() {
            return Err(AuthenticityError::MissingHeader);
        }
        let header = SignatureHeader::parse(signature_header)?;

        let expected = compute_signature(self.secret.expose_secret().as_bytes(), header.timestamp, body);
        let matched = header
            .v1_signatures
            .iter()
            .fold(false, |found, candidate| found | constant_time_eq(&expected, candidate));
        if !matched {
            return Err(AuthenticityError::SignatureMismatch);
        }

        let age = now.as_unix_secs() - header.timestamp;
        if age > self.tolerance_secs {
            return Err(AuthenticityError::TimestampTooOld);
        }
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(AuthenticityError::TimestampInFuture);
        }

        Ok(())
    }
}

fn compute_signature(secret: &[u8], timestamp: i64, body: &[u8]) -> Vec<u8> {
    // HMAC takes keys of any length. The empty fallback never matches:
    // `constant_time_eq` rejects empty input.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() || a.is_empty() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Builds a `Stripe-Signature` header value for `body`.
///
/// Used by local tooling and tests to produce deliveries the verifier
/// accepts.
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let signature = compute_signature(secret.as_bytes(), timestamp, body);
    format!("t={},v1={}", timestamp, hex::encode(signature))
}
