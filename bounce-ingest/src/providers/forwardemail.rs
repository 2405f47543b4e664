//! ForwardEmail bounce webhooks.
//!
//! Each delivery reports one failed forward. The body is signed with a hex
//! HMAC-SHA256 in `X-Webhook-Signature`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::BounceError;
use crate::model::{Bounce, BounceSource, BounceType};
use crate::providers::signature::verify_hmac_sha256_hex;
use crate::providers::{campaign_from_fields, header_str, Ingest, ProviderAdapter};
use crate::validate::EmailSanitizer;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Bounce categories that will not succeed on retry.
const HARD_CATEGORIES: &[&str] = &["recipient", "block", "envelope", "virus"];

#[derive(Debug, Deserialize)]
struct ForwardemailReport {
    recipient: String,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    bounce: ForwardemailBounce,
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(default)]
    bounced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct ForwardemailBounce {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    line: Option<Value>,
}

impl ForwardemailBounce {
    fn bounce_type(&self) -> BounceType {
        if self.action.as_deref() == Some("defer") {
            return BounceType::Soft;
        }
        match self.category.as_deref() {
            Some(category) if HARD_CATEGORIES.contains(&category) => BounceType::Hard,
            _ => BounceType::Soft,
        }
    }
}

pub struct ForwardemailAdapter {
    key: String,
    campaign_header: String,
    sanitizer: Arc<dyn EmailSanitizer>,
}

impl ForwardemailAdapter {
    pub fn new(
        key: impl Into<String>,
        campaign_header: impl Into<String>,
        sanitizer: Arc<dyn EmailSanitizer>,
    ) -> Self {
        Self {
            key: key.into(),
            campaign_header: campaign_header.into(),
            sanitizer,
        }
    }
}

#[async_trait]
impl ProviderAdapter for ForwardemailAdapter {
    fn source(&self) -> BounceSource {
        BounceSource::Forwardemail
    }

    async fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Result<(), BounceError> {
        verify_hmac_sha256_hex(
            self.key.as_bytes(),
            raw,
            header_str(headers, SIGNATURE_HEADER),
        )?;
        Ok(())
    }

    async fn parse(&self, raw: &[u8], _headers: &HeaderMap) -> Result<Ingest, BounceError> {
        let report: ForwardemailReport =
            serde_json::from_slice(raw).map_err(BounceError::invalid_data)?;

        let email = self
            .sanitizer
            .normalize(&report.recipient)
            .map_err(BounceError::InvalidData)?;

        let bounce_type = report.bounce.bounce_type();
        let campaign = campaign_from_fields(&report.headers, &[self.campaign_header.as_str()]);

        let meta = json!({
            "action": report.bounce.action,
            "category": report.bounce.category,
            "message": report.bounce.message,
            "code": report.bounce.code,
            "status": report.bounce.status,
            "line": report.bounce.line,
            "message_id": report.message_id,
        });

        info!(bounce_type = %bounce_type, "forwardemail_report_parsed");

        Ok(Ingest::Bounces(vec![Bounce::for_email(
            &email,
            bounce_type,
            BounceSource::Forwardemail,
        )
        .with_campaign(campaign)
        .with_meta(meta)
        .with_created_at(report.bounced_at)]))
    }
}
