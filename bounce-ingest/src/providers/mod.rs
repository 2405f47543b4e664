//! Provider adapters.
//!
//! Each adapter turns one provider's raw webhook into canonical bounces.
//!
//! ## Processing Flow
//!
//! ```text
//! raw body + headers → verify() → parse() → Ingest::Bounces | Ingest::Handshake
//! ```
//!
//! Adapters always receive the untouched request bytes so that signatures can
//! be checked over exactly what the provider signed.

pub mod forwardemail;
pub mod native;
pub mod postmark;
pub mod sendgrid;
pub mod ses;
pub mod signature;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::{Map, Value};

use crate::error::BounceError;
use crate::model::{Bounce, BounceSource, CampaignRef};

pub use forwardemail::ForwardemailAdapter;
pub use native::NativeAdapter;
pub use postmark::PostmarkAdapter;
pub use sendgrid::SendgridAdapter;
pub use ses::{HttpSnsClient, SesAdapter, SnsClient};

/// Result of parsing a verified webhook.
#[derive(Debug)]
pub enum Ingest {
    /// Zero or more canonical bounces to record
    Bounces(Vec<Bounce>),
    /// A transport control message that produces no records
    Handshake(Handshake),
}

/// Subscription control message from a notification transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub kind: HandshakeKind,
    pub topic: String,
    /// URL to visit to complete a subscription, when the transport requires it
    pub confirm_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeKind {
    Subscribe,
    Unsubscribe,
}

/// One webhook source.
///
/// The dispatcher always calls [`verify`](ProviderAdapter::verify) before
/// [`parse`](ProviderAdapter::parse), and calls
/// [`acknowledge`](ProviderAdapter::acknowledge) only for handshakes.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn source(&self) -> BounceSource;

    /// Check that the request really came from the provider.
    async fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Result<(), BounceError>;

    /// Translate a verified request.
    async fn parse(&self, raw: &[u8], headers: &HeaderMap) -> Result<Ingest, BounceError>;

    /// Complete a handshake returned by `parse`.
    async fn acknowledge(&self, _handshake: &Handshake) -> Result<(), BounceError> {
        Err(BounceError::InvalidData(format!(
            "{} does not support handshakes",
            self.source()
        )))
    }
}

/// Read a header as trimmed UTF-8, treating empty values as absent.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Find a campaign reference in a provider's free-form key/value map.
///
/// Keys are tried in order and matched case-insensitively. String and numeric
/// values are both accepted.
pub(crate) fn campaign_from_fields(fields: &Map<String, Value>, keys: &[&str]) -> CampaignRef {
    for key in keys {
        let raw = match fields.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, Value::String(s))) => s.clone(),
            Some((_, Value::Number(n))) => n.to_string(),
            _ => continue,
        };

        let campaign = CampaignRef::parse(Some(&raw));
        if campaign != CampaignRef::None {
            return campaign;
        }
    }
    CampaignRef::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    use crate::validate::FieldValidator;

    #[test]
    fn test_header_str() {
        let mut headers = HeaderMap::new();
        headers.insert("x-sig", HeaderValue::from_static(" abc "));
        headers.insert("x-empty", HeaderValue::from_static(""));

        assert_eq!(header_str(&headers, "X-Sig"), Some("abc"));
        assert_eq!(header_str(&headers, "x-empty"), None);
        assert_eq!(header_str(&headers, "x-missing"), None);
    }

    #[test]
    fn test_campaign_from_fields() {
        let fields = json!({
            "X-Campaign-UUID": "not-a-campaign",
            "campaign_id": 42,
            "Campaign_UUID": "6F1C0E55-8A4E-4C2B-9B43-0D4A7C6E2F10"
        });
        let fields = fields.as_object().unwrap();

        assert_eq!(
            campaign_from_fields(fields, &["x-campaign-uuid", "campaign_id"]),
            CampaignRef::Id(42)
        );
        assert_eq!(
            campaign_from_fields(fields, &["campaign_uuid"]),
            CampaignRef::Uuid("6f1c0e55-8a4e-4c2b-9b43-0d4a7c6e2f10".to_string())
        );
        assert_eq!(campaign_from_fields(fields, &["missing"]), CampaignRef::None);
    }

    #[tokio::test]
    async fn test_default_acknowledge_rejects_handshakes() {
        let adapter = NativeAdapter::new(FieldValidator::default());
        let handshake = Handshake {
            kind: HandshakeKind::Subscribe,
            topic: "arn:aws:sns:us-east-1:123456789012:bounces".to_string(),
            confirm_url: None,
        };

        let err = adapter.acknowledge(&handshake).await.unwrap_err();

        match err {
            BounceError::InvalidData(message) => {
                assert!(message.contains("does not support handshakes"), "{message}")
            }
            other => panic!("Unexpected error {other:?}"),
        }
    }
}
