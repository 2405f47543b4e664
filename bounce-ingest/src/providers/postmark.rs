//! Postmark bounce and spam complaint webhooks.
//!
//! Postmark authenticates webhooks with HTTP Basic credentials embedded in the
//! webhook URL. A delivery normally holds one event; arrays are accepted too.
//! Any element that fails to decode rejects the whole request.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::BounceError;
use crate::model::{Bounce, BounceSource, BounceType};
use crate::providers::signature::verify_basic_auth;
use crate::providers::{campaign_from_fields, header_str, Ingest, ProviderAdapter};
use crate::validate::EmailSanitizer;

/// Bounce `Type` values that mean the address will never accept mail.
const HARD_TYPES: &[&str] = &["HardBounce", "BadEmailAddress", "ManuallyDeactivated", "DMARCPolicy"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkEvent {
    #[serde(default)]
    record_type: String,
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(default)]
    type_code: Option<i64>,
    #[serde(rename = "MessageID", default)]
    message_id: Option<String>,
    /// Checked only for records that become bounces
    #[serde(default)]
    email: String,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    message_stream: Option<String>,
    #[serde(default)]
    bounced_at: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Decode one event or an array of events, chosen by the first JSON token.
fn decode_events(raw: &[u8]) -> Result<Vec<PostmarkEvent>, serde_json::Error> {
    match raw.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') => serde_json::from_slice(raw),
        _ => serde_json::from_slice(raw).map(|event| vec![event]),
    }
}

pub struct PostmarkAdapter {
    username: String,
    password: String,
    campaign_header: String,
    sanitizer: Arc<dyn EmailSanitizer>,
}

impl PostmarkAdapter {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        campaign_header: impl Into<String>,
        sanitizer: Arc<dyn EmailSanitizer>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            campaign_header: campaign_header.into(),
            sanitizer,
        }
    }

    fn classify(event: &PostmarkEvent) -> Option<BounceType> {
        if event.record_type == "SpamComplaint" || event.kind == "SpamComplaint" {
            return Some(BounceType::Complaint);
        }
        // Older payloads omit RecordType on bounces.
        if event.record_type == "Bounce" || event.record_type.is_empty() {
            return Some(if HARD_TYPES.contains(&event.kind.as_str()) {
                BounceType::Hard
            } else {
                BounceType::Soft
            });
        }
        None
    }

    fn translate(&self, event: PostmarkEvent) -> Result<Option<Bounce>, BounceError> {
        let Some(bounce_type) = Self::classify(&event) else {
            info!(record_type = %event.record_type, "postmark_event_ignored");
            return Ok(None);
        };

        let email = self
            .sanitizer
            .normalize(&event.email)
            .map_err(BounceError::InvalidData)?;

        let created_at = event
            .bounced_at
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));

        let campaign = campaign_from_fields(
            &event.metadata,
            &[self.campaign_header.as_str(), "campaign_uuid", "campaign_id"],
        );

        let meta = json!({
            "record_type": event.record_type,
            "type": event.kind,
            "type_code": event.type_code,
            "message_id": event.message_id,
            "details": event.details,
            "description": event.description,
            "tag": event.tag,
            "message_stream": event.message_stream,
        });

        Ok(Some(
            Bounce::for_email(&email, bounce_type, BounceSource::Postmark)
                .with_campaign(campaign)
                .with_meta(meta)
                .with_created_at(created_at),
        ))
    }
}

#[async_trait]
impl ProviderAdapter for PostmarkAdapter {
    fn source(&self) -> BounceSource {
        BounceSource::Postmark
    }

    async fn verify(&self, _raw: &[u8], headers: &HeaderMap) -> Result<(), BounceError> {
        verify_basic_auth(
            header_str(headers, header::AUTHORIZATION.as_str()),
            &self.username,
            &self.password,
        )
        .map_err(|_| BounceError::Unauthorized)
    }

    async fn parse(&self, raw: &[u8], _headers: &HeaderMap) -> Result<Ingest, BounceError> {
        let events = decode_events(raw).map_err(BounceError::invalid_data)?;
        let event_count = events.len();

        let mut bounces = Vec::with_capacity(event_count);
        for event in events {
            if let Some(bounce) = self.translate(event)? {
                bounces.push(bounce);
            }
        }

        info!(event_count, bounce_count = bounces.len(), "postmark_events_parsed");

        Ok(Ingest::Bounces(bounces))
    }
}
