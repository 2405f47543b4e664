//! Native bounce submissions.
//!
//! Internal callers post bounces they observed directly in canonical form.
//! Unlike provider payloads these are arbitrary JSON, so every submission runs
//! through the [`FieldValidator`].

use async_trait::async_trait;
use axum::http::HeaderMap;
use tracing::info;

use crate::error::BounceError;
use crate::model::{BounceSource, BounceSubmission};
use crate::providers::{Ingest, ProviderAdapter};
use crate::validate::FieldValidator;

pub struct NativeAdapter {
    validator: FieldValidator,
}

impl NativeAdapter {
    pub fn new(validator: FieldValidator) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl ProviderAdapter for NativeAdapter {
    fn source(&self) -> BounceSource {
        BounceSource::Native
    }

    /// Native submissions carry no provider signature.
    async fn verify(&self, _raw: &[u8], _headers: &HeaderMap) -> Result<(), BounceError> {
        Ok(())
    }

    async fn parse(&self, raw: &[u8], _headers: &HeaderMap) -> Result<Ingest, BounceError> {
        let submission: BounceSubmission =
            serde_json::from_slice(raw).map_err(BounceError::invalid_data)?;

        let bounce = self.validator.validate(submission)?;

        info!(
            has_email = !bounce.email.is_empty(),
            has_subscriber_uuid = !bounce.subscriber_uuid.is_empty(),
            bounce_type = %bounce.bounce_type,
            "native_bounce_parsed"
        );

        Ok(Ingest::Bounces(vec![bounce]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BounceType;
    use crate::validate::ValidationError;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    async fn parse(body: &str) -> Result<Ingest, BounceError> {
        NativeAdapter::new(FieldValidator::default())
            .parse(body.as_bytes(), &HeaderMap::new())
            .await
    }

    #[tokio::test]
    async fn test_parse_valid_submission() {
        let body = json!({
            "email": "User@Example.com",
            "campaign_id": 12,
            "type": "hard",
            "source": "ses",
            "meta": {"reason": "mailbox full"},
            "created_at": "2024-02-03T04:05:06Z"
        })
        .to_string();

        let Ingest::Bounces(bounces) = parse(&body).await.unwrap() else {
            panic!("Expected bounces");
        };

        assert_eq!(bounces.len(), 1);
        let b = &bounces[0];
        assert_eq!(b.email, "user@example.com");
        assert_eq!(b.campaign_id, Some(12));
        assert_eq!(b.bounce_type, BounceType::Hard);
        assert_eq!(b.source, BounceSource::Native);
        assert_eq!(b.meta, json!({"reason": "mailbox full"}));
        assert_eq!(b.created_at, Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap());
    }

    #[tokio::test]
    async fn test_parse_failure_carries_diagnostic() {
        let err = parse("{\"email\": ").await.unwrap_err();

        match err {
            BounceError::InvalidData(msg) => assert!(msg.contains("EOF"), "{msg}"),
            other => panic!("Expected InvalidData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_validation_failure() {
        let err = parse(r#"{"email": "a@example.com", "type": "bogus"}"#)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BounceError::Validation(ValidationError::InvalidType(_))
        ));
    }
}
