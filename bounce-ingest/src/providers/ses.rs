//! Amazon SES bounce and complaint notifications delivered through SNS.
//!
//! SNS posts a signed JSON envelope. The `x-amz-sns-message-type` header
//! selects one of two states:
//!
//! - `SubscriptionConfirmation` / `UnsubscribeConfirmation`: control messages.
//!   A subscription must be confirmed by visiting its `SubscribeURL` before SNS
//!   delivers any notifications. These never produce bounce records.
//! - `Notification`: the envelope's `Message` is an SES report listing one or
//!   more affected recipients, each of which becomes a bounce.
//!
//! Envelopes are verified against the RSA certificate SNS names in
//! `SigningCertURL` before the report inside them is read.
//! Reference: https://docs.aws.amazon.com/sns/latest/dg/sns-verify-signature-of-message.html

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;
use x509_cert::der::{DecodePem, Encode};
use x509_cert::Certificate;

use crate::error::BounceError;
use crate::model::{Bounce, BounceSource, BounceType, CampaignRef};
use crate::providers::signature::{unix_now, verify_rsa_pkcs1, RsaDigest, SignatureError};
use crate::providers::{header_str, Handshake, HandshakeKind, Ingest, ProviderAdapter};
use crate::validate::EmailSanitizer;

/// Header carrying the SNS message type.
pub const MESSAGE_TYPE_HEADER: &str = "x-amz-sns-message-type";

const SUBSCRIPTION_CONFIRMATION: &str = "SubscriptionConfirmation";
const UNSUBSCRIBE_CONFIRMATION: &str = "UnsubscribeConfirmation";
const NOTIFICATION: &str = "Notification";

// =============================================================================
// SNS Envelope
// =============================================================================

/// Signed SNS message envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SnsEnvelope {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "MessageId")]
    pub message_id: String,
    #[serde(rename = "Token", default)]
    pub token: Option<String>,
    #[serde(rename = "TopicArn")]
    pub topic_arn: String,
    #[serde(rename = "Subject", default)]
    pub subject: Option<String>,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "SignatureVersion")]
    pub signature_version: String,
    #[serde(rename = "Signature")]
    pub signature: String,
    #[serde(rename = "SigningCertURL")]
    pub signing_cert_url: String,
    #[serde(rename = "SubscribeURL", default)]
    pub subscribe_url: Option<String>,
}

impl SnsEnvelope {
    pub fn from_slice(raw: &[u8]) -> Result<Self, BounceError> {
        serde_json::from_slice(raw).map_err(BounceError::invalid_data)
    }

    /// Canonical string SNS signs: `Key\nValue\n` pairs in a fixed order that
    /// depends on the message type.
    pub fn string_to_sign(&self) -> Result<String, BounceError> {
        let mut fields: Vec<(&str, &str)> = vec![("Message", &self.message), ("MessageId", &self.message_id)];

        match self.kind.as_str() {
            NOTIFICATION => {
                if let Some(subject) = &self.subject {
                    fields.push(("Subject", subject));
                }
                fields.push(("Timestamp", &self.timestamp));
                fields.push(("TopicArn", &self.topic_arn));
            }
            SUBSCRIPTION_CONFIRMATION | UNSUBSCRIBE_CONFIRMATION => {
                let subscribe_url = self
                    .subscribe_url
                    .as_deref()
                    .ok_or_else(|| BounceError::invalid_data("missing SubscribeURL"))?;
                let token = self
                    .token
                    .as_deref()
                    .ok_or_else(|| BounceError::invalid_data("missing Token"))?;
                fields.push(("SubscribeURL", subscribe_url));
                fields.push(("Timestamp", &self.timestamp));
                fields.push(("Token", token));
                fields.push(("TopicArn", &self.topic_arn));
            }
            other => {
                return Err(BounceError::InvalidData(format!(
                    "unsupported SNS message type: {other}"
                )))
            }
        }
        fields.push(("Type", &self.kind));

        Ok(fields
            .into_iter()
            .map(|(k, v)| format!("{k}\n{v}\n"))
            .collect())
    }

    fn digest(&self) -> Result<RsaDigest, SignatureError> {
        match self.signature_version.as_str() {
            "1" => Ok(RsaDigest::Sha1),
            "2" => Ok(RsaDigest::Sha256),
            _ => Err(SignatureError::MalformedSignature),
        }
    }
}

/// Whether `host` is an SNS regional endpoint such as `sns.us-east-1.amazonaws.com`.
fn is_sns_host(host: &str) -> bool {
    let Some(rest) = host.strip_prefix("sns.") else {
        return false;
    };
    let region = rest
        .strip_suffix(".amazonaws.com")
        .or_else(|| rest.strip_suffix(".amazonaws.com.cn"));

    match region {
        Some(region) => {
            !region.is_empty()
                && region
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        }
        None => false,
    }
}

/// Parse a URL from an envelope and require it to point at SNS over HTTPS.
pub fn trusted_sns_url(raw: &str, require_pem: bool) -> Result<Url, SignatureError> {
    let untrusted = || SignatureError::UntrustedCertificate(raw.to_string());

    let url = Url::parse(raw).map_err(|_| untrusted())?;
    if url.scheme() != "https" || !url.host_str().map(is_sns_host).unwrap_or(false) {
        return Err(untrusted());
    }
    if require_pem && !url.path().ends_with(".pem") {
        return Err(untrusted());
    }

    Ok(url)
}

// =============================================================================
// SNS Client
// =============================================================================

/// Outbound calls the SES adapter needs from SNS.
#[async_trait]
pub trait SnsClient: Send + Sync {
    /// RSA key from the signing certificate at `cert_url`.
    async fn signing_key(&self, cert_url: &Url) -> Result<RsaPublicKey, BounceError>;

    /// Visit a subscription's `SubscribeURL`.
    async fn confirm_subscription(&self, subscribe_url: &Url) -> Result<(), BounceError>;
}

/// reqwest-backed SNS client with a per-URL certificate cache.
pub struct HttpSnsClient {
    http: reqwest::Client,
    certs: RwLock<HashMap<String, RsaPublicKey>>,
}

impl HttpSnsClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build SNS HTTP client")?;

        Ok(Self {
            http,
            certs: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl SnsClient for HttpSnsClient {
    async fn signing_key(&self, cert_url: &Url) -> Result<RsaPublicKey, BounceError> {
        if let Some(key) = self.certs.read().await.get(cert_url.as_str()) {
            return Ok(key.clone());
        }

        let fetch_failed =
            |e: reqwest::Error| SignatureError::UntrustedCertificate(format!("fetch failed: {e}"));

        let pem = self
            .http
            .get(cert_url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_failed)?
            .text()
            .await
            .map_err(fetch_failed)?;

        let key = public_key_from_pem(&pem)?;
        info!(cert_url = %cert_url, "sns_certificate_cached");

        self.certs
            .write()
            .await
            .insert(cert_url.to_string(), key.clone());

        Ok(key)
    }

    async fn confirm_subscription(&self, subscribe_url: &Url) -> Result<(), BounceError> {
        self.http
            .get(subscribe_url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BounceError::Handshake(e.to_string()))?;
        Ok(())
    }
}

/// Extract the RSA public key from a PEM certificate, rejecting expired ones.
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, SignatureError> {
    let cert = Certificate::from_pem(pem.as_bytes())
        .map_err(|e| SignatureError::UntrustedCertificate(format!("bad certificate: {e}")))?;

    let not_after = cert.tbs_certificate.validity.not_after.to_unix_duration();
    if not_after.as_secs() < unix_now() {
        return Err(SignatureError::UntrustedCertificate(
            "certificate expired".to_string(),
        ));
    }

    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|_| SignatureError::InvalidKey)?;

    RsaPublicKey::from_public_key_der(&spki).map_err(|_| SignatureError::InvalidKey)
}

// =============================================================================
// SES Report
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesMessage {
    #[serde(alias = "eventType")]
    notification_type: String,
    #[serde(default)]
    bounce: Option<SesBounce>,
    #[serde(default)]
    complaint: Option<SesComplaint>,
    mail: SesMail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesBounce {
    bounce_type: String,
    #[serde(default)]
    bounce_sub_type: String,
    #[serde(default)]
    bounced_recipients: Vec<SesRecipient>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesComplaint {
    #[serde(default)]
    complained_recipients: Vec<SesRecipient>,
    #[serde(default)]
    complaint_feedback_type: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesRecipient {
    email_address: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    diagnostic_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesMail {
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    destination: Vec<String>,
    #[serde(default)]
    headers: Vec<SesHeader>,
}

#[derive(Debug, Deserialize)]
struct SesHeader {
    name: String,
    value: String,
}

// =============================================================================
// Adapter
// =============================================================================

pub struct SesAdapter {
    sns: Arc<dyn SnsClient>,
    campaign_header: String,
    sanitizer: Arc<dyn EmailSanitizer>,
}

impl SesAdapter {
    pub fn new(
        sns: Arc<dyn SnsClient>,
        campaign_header: impl Into<String>,
        sanitizer: Arc<dyn EmailSanitizer>,
    ) -> Self {
        Self {
            sns,
            campaign_header: campaign_header.into(),
            sanitizer,
        }
    }

    /// Header message type, restricted to the three types SNS sends.
    fn message_type<'a>(headers: &'a HeaderMap) -> Result<&'a str, BounceError> {
        match header_str(headers, MESSAGE_TYPE_HEADER) {
            Some(t @ (SUBSCRIPTION_CONFIRMATION | UNSUBSCRIBE_CONFIRMATION | NOTIFICATION)) => Ok(t),
            other => Err(BounceError::InvalidData(format!(
                "unsupported SNS message type: {}",
                other.unwrap_or("<missing>")
            ))),
        }
    }

    fn parse_notification(&self, envelope: &SnsEnvelope) -> Result<Vec<Bounce>, BounceError> {
        let msg: SesMessage =
            serde_json::from_str(&envelope.message).map_err(BounceError::invalid_data)?;

        let (bounce_type, recipients, created_at, sub_type, feedback_type) =
            match msg.notification_type.as_str() {
                "Bounce" => {
                    let bounce = msg
                        .bounce
                        .ok_or_else(|| BounceError::invalid_data("bounce notification without bounce"))?;
                    let kind = if bounce.bounce_type == "Permanent" {
                        BounceType::Hard
                    } else {
                        BounceType::Soft
                    };
                    let sub_type = json!({
                        "bounce_type": bounce.bounce_type,
                        "bounce_sub_type": bounce.bounce_sub_type,
                    });
                    (kind, bounce.bounced_recipients, bounce.timestamp, sub_type, None)
                }
                "Complaint" => {
                    let complaint = msg.complaint.unwrap_or(SesComplaint {
                        complained_recipients: Vec::new(),
                        complaint_feedback_type: None,
                        timestamp: None,
                    });
                    (
                        BounceType::Complaint,
                        complaint.complained_recipients,
                        complaint.timestamp,
                        json!({}),
                        complaint.complaint_feedback_type,
                    )
                }
                other => {
                    info!(
                        notification_type = other,
                        message_id = %envelope.message_id,
                        "ses_notification_ignored"
                    );
                    return Ok(Vec::new());
                }
            };

        // Reports without an explicit recipient list apply to every destination.
        let recipients = if recipients.is_empty() {
            msg.mail
                .destination
                .iter()
                .map(|email| SesRecipient {
                    email_address: email.clone(),
                    ..Default::default()
                })
                .collect()
        } else {
            recipients
        };

        let campaign = msg
            .mail
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(&self.campaign_header))
            .map(|h| h.value.as_str());

        let bounces: Vec<Bounce> = recipients
            .into_iter()
            .filter_map(|r| match self.sanitizer.normalize(&r.email_address) {
                Ok(email) => Some((email, r)),
                Err(reason) => {
                    warn!(email = %r.email_address, reason = %reason, "ses_recipient_skipped");
                    None
                }
            })
            .map(|(email, r)| {
                let mut meta = json!({
                    "notification_type": msg.notification_type,
                    "message_id": msg.mail.message_id,
                    "topic_arn": envelope.topic_arn,
                    "action": r.action,
                    "status": r.status,
                    "diagnostic_code": r.diagnostic_code,
                    "feedback_type": feedback_type,
                });
                if let (Some(meta), Some(extra)) = (meta.as_object_mut(), sub_type.as_object()) {
                    meta.extend(extra.clone());
                }

                Bounce::for_email(&email, bounce_type, BounceSource::Ses)
                    .with_campaign(CampaignRef::parse(campaign))
                    .with_meta(meta)
                    .with_created_at(created_at)
            })
            .collect();

        if bounces.is_empty() {
            return Err(BounceError::invalid_data("notification has no recipients"));
        }

        Ok(bounces)
    }
}

#[async_trait]
impl ProviderAdapter for SesAdapter {
    fn source(&self) -> BounceSource {
        BounceSource::Ses
    }

    async fn verify(&self, raw: &[u8], headers: &HeaderMap) -> Result<(), BounceError> {
        let message_type = Self::message_type(headers)?;
        let envelope = SnsEnvelope::from_slice(raw)?;

        if envelope.kind != message_type {
            return Err(BounceError::InvalidData(format!(
                "SNS header type {message_type} does not match envelope type {}",
                envelope.kind
            )));
        }

        let digest = envelope.digest()?;
        let cert_url = trusted_sns_url(&envelope.signing_cert_url, true)?;
        let string_to_sign = envelope.string_to_sign()?;

        let key = self.sns.signing_key(&cert_url).await?;
        verify_rsa_pkcs1(&key, digest, string_to_sign.as_bytes(), &envelope.signature)?;

        Ok(())
    }

    async fn parse(&self, raw: &[u8], headers: &HeaderMap) -> Result<Ingest, BounceError> {
        let message_type = Self::message_type(headers)?;
        let envelope = SnsEnvelope::from_slice(raw)?;

        match message_type {
            SUBSCRIPTION_CONFIRMATION => {
                let raw_url = envelope
                    .subscribe_url
                    .as_deref()
                    .ok_or_else(|| BounceError::invalid_data("missing SubscribeURL"))?;
                let url = trusted_sns_url(raw_url, false)?;

                Ok(Ingest::Handshake(Handshake {
                    kind: HandshakeKind::Subscribe,
                    topic: envelope.topic_arn,
                    confirm_url: Some(url.to_string()),
                }))
            }
            UNSUBSCRIBE_CONFIRMATION => Ok(Ingest::Handshake(Handshake {
                kind: HandshakeKind::Unsubscribe,
                topic: envelope.topic_arn,
                confirm_url: None,
            })),
            _ => {
                let bounces = self.parse_notification(&envelope)?;
                info!(
                    message_id = %envelope.message_id,
                    bounce_count = bounces.len(),
                    "ses_notification_parsed"
                );
                Ok(Ingest::Bounces(bounces))
            }
        }
    }

    async fn acknowledge(&self, handshake: &Handshake) -> Result<(), BounceError> {
        match handshake.kind {
            HandshakeKind::Subscribe => {
                let raw_url = handshake
                    .confirm_url
                    .as_deref()
                    .ok_or_else(|| BounceError::Handshake("missing confirmation URL".to_string()))?;
                let url = trusted_sns_url(raw_url, false)?;

                self.sns.confirm_subscription(&url).await?;
                info!(topic = %handshake.topic, "ses_subscription_confirmed");
            }
            HandshakeKind::Unsubscribe => {
                info!(topic = %handshake.topic, "ses_unsubscribe_acknowledged");
            }
        }
        Ok(())
    }
}
