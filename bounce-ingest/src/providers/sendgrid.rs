//! SendGrid Event Webhook.
//!
//! SendGrid signs every delivery with ECDSA P-256 over `timestamp || body` and
//! batches events into a JSON array. Only bounce-like events are kept.
//! Reference: https://docs.sendgrid.com/for-developers/tracking-events/getting-started-event-webhook-security-features

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::DateTime;
use p256::ecdsa::VerifyingKey;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::BounceError;
use crate::model::{Bounce, BounceSource, BounceType};
use crate::providers::signature::{
    check_timestamp, parse_ecdsa_public_key, unix_now, verify_ecdsa_p256, SignatureError,
};
use crate::providers::{campaign_from_fields, header_str, Ingest, ProviderAdapter};
use crate::validate::EmailSanitizer;

pub const SIGNATURE_HEADER: &str = "x-twilio-email-event-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-twilio-email-event-webhook-timestamp";

pub struct SendgridAdapter {
    key: VerifyingKey,
    max_age: u64,
    campaign_header: String,
    sanitizer: Arc<dyn EmailSanitizer>,
}

impl SendgridAdapter {
    /// `verification_key` is the base64 DER public key shown in the SendGrid
    /// webhook settings.
    pub fn new(
        verification_key: &str,
        max_age: u64,
        campaign_header: impl Into<String>,
        sanitizer: Arc<dyn EmailSanitizer>,
    ) -> Result<Self, SignatureError> {
        Ok(Self {
            key: parse_ecdsa_public_key(verification_key)?,
            max_age,
            campaign_header: campaign_header.into(),
            sanitizer,
        })
    }

    /// Map one event object to a bounce, or `None` when it should be skipped.
    fn translate(&self, index: usize, event: &Value) -> Option<Bounce> {
        let Some(fields) = event.as_object() else {
            warn!(index, "sendgrid_event_not_object");
            return None;
        };

        let kind = fields.get("event").and_then(Value::as_str).unwrap_or_default();
        let bounce_type = match kind {
            "bounce" => match fields.get("type").and_then(Value::as_str) {
                Some("blocked") => BounceType::Soft,
                _ => BounceType::Hard,
            },
            "dropped" => BounceType::Hard,
            "spamreport" => BounceType::Complaint,
            _ => return None,
        };

        let raw_email = fields.get("email").and_then(Value::as_str).unwrap_or_default();
        let email = match self.sanitizer.normalize(raw_email) {
            Ok(email) => email,
            Err(reason) => {
                warn!(index, event = kind, reason = %reason, "sendgrid_event_invalid_email");
                return None;
            }
        };

        let created_at = fields
            .get("timestamp")
            .and_then(Value::as_i64)
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        let campaign = campaign_from_fields(
            fields,
            &["campaign_id", "campaign_uuid", self.campaign_header.as_str()],
        );

        Some(
            Bounce::for_email(&email, bounce_type, BounceSource::Sendgrid)
                .with_campaign(campaign)
                .with_meta(event.clone())
                .with_created_at(created_at),
        )
    }
}

#[async_trait]
impl ProviderAdapter for SendgridAdapter {
    fn source(&self) -> BounceSource {
        BounceSource::Sendgrid
    }

    async fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Result<(), BounceError> {
        let timestamp = header_str(headers, TIMESTAMP_HEADER);
        check_timestamp(timestamp, unix_now(), self.max_age)?;

        verify_ecdsa_p256(
            &self.key,
            timestamp.unwrap_or_default(),
            raw,
            header_str(headers, SIGNATURE_HEADER),
        )?;

        Ok(())
    }

    async fn parse(&self, raw: &[u8], _headers: &HeaderMap) -> Result<Ingest, BounceError> {
        let events: Vec<Value> = serde_json::from_slice(raw).map_err(BounceError::invalid_data)?;

        let bounces: Vec<Bounce> = events
            .iter()
            .enumerate()
            .filter_map(|(index, event)| self.translate(index, event))
            .collect();

        info!(
            event_count = events.len(),
            bounce_count = bounces.len(),
            "sendgrid_events_parsed"
        );

        Ok(Ingest::Bounces(bounces))
    }
}
