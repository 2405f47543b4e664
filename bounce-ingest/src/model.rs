//! Canonical bounce record types.
//!
//! Every provider adapter translates its native payload into [`Bounce`], the
//! single normalized shape handed to storage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Bounce Type
// =============================================================================

/// Severity class of a bounce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BounceType {
    /// Permanent delivery failure
    Hard,
    /// Temporary delivery failure
    Soft,
    /// Recipient flagged the message as spam
    Complaint,
}

impl BounceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BounceType::Hard => "hard",
            BounceType::Soft => "soft",
            BounceType::Complaint => "complaint",
        }
    }
}

impl fmt::Display for BounceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BounceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hard" => Ok(BounceType::Hard),
            "soft" => Ok(BounceType::Soft),
            "complaint" => Ok(BounceType::Complaint),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Bounce Source
// =============================================================================

/// Provider that produced a bounce. Used for audit and filtering only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BounceSource {
    /// Posted directly in canonical form
    Native,
    Ses,
    Sendgrid,
    Postmark,
    Forwardemail,
}

impl BounceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BounceSource::Native => "native",
            BounceSource::Ses => "ses",
            BounceSource::Sendgrid => "sendgrid",
            BounceSource::Postmark => "postmark",
            BounceSource::Forwardemail => "forwardemail",
        }
    }

    /// The webhook path segment that selects this provider.
    pub fn service(&self) -> &'static str {
        match self {
            BounceSource::Native => "",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for BounceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BounceSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(BounceSource::Native),
            "ses" => Ok(BounceSource::Ses),
            "sendgrid" => Ok(BounceSource::Sendgrid),
            "postmark" => Ok(BounceSource::Postmark),
            "forwardemail" => Ok(BounceSource::Forwardemail),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Canonical Bounce
// =============================================================================

/// A normalized bounce record.
///
/// Once recorded a bounce is never modified. Corrections are new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounce {
    /// Storage-assigned identifier, absent until recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Recipient address, lower-cased and trimmed (may be empty if a UUID is set)
    #[serde(default)]
    pub email: String,
    /// Subscriber identifier (may be empty if an email is set)
    #[serde(default)]
    pub subscriber_uuid: String,
    /// Campaign that generated the send
    #[serde(default)]
    pub campaign_id: Option<i64>,
    /// Campaign reference when the sender tagged mail with a UUID
    #[serde(default)]
    pub campaign_uuid: Option<String>,
    #[serde(rename = "type")]
    pub bounce_type: BounceType,
    pub source: BounceSource,
    /// Provider payload or extracted diagnostics. Always structured, never null.
    pub meta: Value,
    pub created_at: DateTime<Utc>,
}

impl Bounce {
    /// Create a provider bounce for an email recipient with empty meta and the
    /// current time as `created_at`.
    pub fn for_email(email: &str, bounce_type: BounceType, source: BounceSource) -> Self {
        Self {
            id: None,
            email: canonical_email(email),
            subscriber_uuid: String::new(),
            campaign_id: None,
            campaign_uuid: None,
            bounce_type,
            source,
            meta: empty_meta(),
            created_at: Utc::now(),
        }
    }

    pub fn with_campaign(mut self, campaign: CampaignRef) -> Self {
        match campaign {
            CampaignRef::Id(id) => self.campaign_id = Some(id),
            CampaignRef::Uuid(uuid) => self.campaign_uuid = Some(uuid),
            CampaignRef::None => {}
        }
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = default_meta(Some(meta));
        self
    }

    pub fn with_created_at(mut self, created_at: Option<DateTime<Utc>>) -> Self {
        self.created_at = default_created_at(created_at);
        self
    }
}

// =============================================================================
// Native Submission
// =============================================================================

/// A bounce as posted to the native endpoint, before validation.
///
/// Field types are deliberately loose so that a bad `type` surfaces as a
/// validation failure rather than a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BounceSubmission {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subscriber_uuid: String,
    #[serde(default)]
    pub campaign_id: Option<i64>,
    #[serde(default)]
    pub campaign_uuid: Option<String>,
    #[serde(default, rename = "type")]
    pub bounce_type: String,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Campaign References
// =============================================================================

/// Campaign reference extracted from a provider header or custom argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignRef {
    Id(i64),
    Uuid(String),
    None,
}

impl CampaignRef {
    /// Interpret a raw header value as a campaign reference.
    ///
    /// Positive integers become ids, hyphenated UUIDs become UUIDs, anything
    /// else is ignored.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return CampaignRef::None;
        };

        if let Ok(id) = raw.parse::<i64>() {
            return if id > 0 { CampaignRef::Id(id) } else { CampaignRef::None };
        }

        if is_valid_uuid(raw) {
            return CampaignRef::Uuid(raw.to_lowercase());
        }

        CampaignRef::None
    }
}

// =============================================================================
// Field Helpers
// =============================================================================

/// Canonical email form: trimmed and lower-cased.
pub fn canonical_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Whether `value` is a UUID in the standard 36-character hyphenated form.
pub fn is_valid_uuid(value: &str) -> bool {
    value.len() == 36 && Uuid::parse_str(value).is_ok()
}

pub fn empty_meta() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Replace absent or null meta with an empty object.
pub fn default_meta(meta: Option<Value>) -> Value {
    match meta {
        None | Some(Value::Null) => empty_meta(),
        Some(v) => v,
    }
}

/// Keep a supplied timestamp, or use the ingestion time when it is absent or
/// zero-valued.
pub fn default_created_at(created_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match created_at {
        Some(ts) if ts.year() > 1 => ts,
        _ => Utc::now(),
    }
}
