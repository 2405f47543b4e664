//! Field validation for natively posted bounces.
//!
//! Provider adapters build records from provider-guaranteed fields. The native
//! endpoint accepts arbitrary JSON, so its submissions pass through
//! [`FieldValidator`] before they are recorded.

use std::sync::Arc;

use thiserror::Error;

use crate::model::{
    canonical_email, default_created_at, default_meta, is_valid_uuid, Bounce, BounceSource,
    BounceSubmission, BounceType,
};

/// Longest email address accepted by [`BasicEmailSanitizer`].
pub const MAX_EMAIL_LEN: usize = 1000;

/// Reasons a native submission is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing identity: email or subscriber_uuid is required")]
    MissingIdentity,

    #[error("invalid subscriber identifier")]
    InvalidSubscriberUuid,

    #[error("{0}")]
    InvalidEmail(String),

    #[error("invalid type: {0:?}")]
    InvalidType(String),
}

// =============================================================================
// Email Sanitizer
// =============================================================================

/// Normalizes and syntax-checks email addresses.
pub trait EmailSanitizer: Send + Sync {
    /// Return the normalized address, or a human-readable rejection.
    fn normalize(&self, email: &str) -> Result<String, String>;
}

/// Default sanitizer: trim, lower-case and a structural syntax check.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEmailSanitizer;

impl EmailSanitizer for BasicEmailSanitizer {
    fn normalize(&self, email: &str) -> Result<String, String> {
        let email = canonical_email(email);

        if email.is_empty() {
            return Err("invalid email: empty address".to_string());
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err("invalid email: address too long".to_string());
        }
        if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(format!("invalid email: {email}"));
        }

        let mut parts = email.split('@');
        let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) => (local, domain),
            _ => return Err(format!("invalid email: {email}")),
        };

        let domain_ok = domain.contains('.') && domain.split('.').all(|label| !label.is_empty());
        if local.is_empty() || !domain_ok {
            return Err(format!("invalid email: {email}"));
        }

        Ok(email)
    }
}

// =============================================================================
// Field Validator
// =============================================================================

/// Validates native submissions and turns them into canonical bounces.
#[derive(Clone)]
pub struct FieldValidator {
    sanitizer: Arc<dyn EmailSanitizer>,
}

impl FieldValidator {
    pub fn new(sanitizer: Arc<dyn EmailSanitizer>) -> Self {
        Self { sanitizer }
    }

    /// Check a submission and build the canonical record.
    ///
    /// Checks run in order and stop at the first failure: identity presence,
    /// UUID format, email sanitization, type membership. On success `meta` and
    /// `created_at` are defaulted.
    pub fn validate(&self, sub: BounceSubmission) -> Result<Bounce, ValidationError> {
        let uuid = sub.subscriber_uuid.trim();
        if sub.email.trim().is_empty() && uuid.is_empty() {
            return Err(ValidationError::MissingIdentity);
        }

        if !uuid.is_empty() && !is_valid_uuid(uuid) {
            return Err(ValidationError::InvalidSubscriberUuid);
        }

        let email = if sub.email.trim().is_empty() {
            String::new()
        } else {
            self.sanitizer
                .normalize(&sub.email)
                .map_err(ValidationError::InvalidEmail)?
        };

        let bounce_type: BounceType = sub
            .bounce_type
            .parse()
            .map_err(|_| ValidationError::InvalidType(sub.bounce_type.clone()))?;

        Ok(Bounce {
            id: None,
            email,
            subscriber_uuid: uuid.to_lowercase(),
            campaign_id: sub.campaign_id.filter(|id| *id > 0),
            campaign_uuid: sub
                .campaign_uuid
                .filter(|u| is_valid_uuid(u))
                .map(|u| u.to_lowercase()),
            bounce_type,
            source: BounceSource::Native,
            meta: default_meta(sub.meta),
            created_at: default_created_at(sub.created_at),
        })
    }
}

impl Default for FieldValidator {
    fn default() -> Self {
        Self::new(Arc::new(BasicEmailSanitizer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const UUID: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

    fn submission(email: &str, uuid: &str, kind: &str) -> BounceSubmission {
        BounceSubmission {
            email: email.to_string(),
            subscriber_uuid: uuid.to_string(),
            bounce_type: kind.to_string(),
            ..Default::default()
        }
    }

    struct RejectingSanitizer;

    impl EmailSanitizer for RejectingSanitizer {
        fn normalize(&self, _email: &str) -> Result<String, String> {
            Err("blocklisted domain".to_string())
        }
    }

    #[test]
    fn test_missing_identity() {
        let v = FieldValidator::default();
        assert_eq!(
            v.validate(submission("", "", "hard")),
            Err(ValidationError::MissingIdentity)
        );
        assert_eq!(
            v.validate(submission("   ", "", "hard")),
            Err(ValidationError::MissingIdentity)
        );
    }

    #[test]
    fn test_invalid_uuid_checked_before_email_and_type() {
        let v = FieldValidator::default();
        assert_eq!(
            v.validate(submission("not an email", "1234", "bogus")),
            Err(ValidationError::InvalidSubscriberUuid)
        );
    }

    #[test]
    fn test_email_rejection_carries_sanitizer_message() {
        let v = FieldValidator::new(Arc::new(RejectingSanitizer));
        assert_eq!(
            v.validate(submission("user@example.com", "", "hard")),
            Err(ValidationError::InvalidEmail("blocklisted domain".to_string()))
        );
    }

    #[test]
    fn test_invalid_type() {
        let v = FieldValidator::default();
        let err = v.validate(submission("user@example.com", "", "bounce")).unwrap_err();
        assert_eq!(err, ValidationError::InvalidType("bounce".to_string()));
    }

    #[test]
    fn test_accepts_uuid_only_identity() {
        let v = FieldValidator::default();
        let b = v.validate(submission("", UUID, "complaint")).unwrap();

        assert_eq!(b.subscriber_uuid, UUID);
        assert!(b.email.is_empty());
        assert_eq!(b.bounce_type, BounceType::Complaint);
        assert_eq!(b.source, BounceSource::Native);
    }

    #[test]
    fn test_normalizes_email_and_defaults_fields() {
        let v = FieldValidator::default();
        let b = v
            .validate(submission("  User@Example.COM ", "", "soft"))
            .unwrap();

        assert_eq!(b.email, "user@example.com");
        assert_eq!(b.meta, json!({}));
        assert!(b.campaign_id.is_none());
    }

    #[test]
    fn test_zero_campaign_id_means_untied() {
        let v = FieldValidator::default();
        let mut sub = submission("user@example.com", "", "hard");
        sub.campaign_id = Some(0);

        assert!(v.validate(sub).unwrap().campaign_id.is_none());
    }

    #[test]
    fn test_accepts_iff_rules_hold() {
        let v = FieldValidator::default();
        let emails = ["", "user@example.com"];
        let uuids = ["", UUID, "xyz"];
        let types = ["hard", "soft", "complaint", "", "Hard", "bounce"];

        for email in emails {
            for uuid in uuids {
                for kind in types {
                    let expected = (!email.is_empty() || !uuid.is_empty())
                        && (uuid.is_empty() || uuid == UUID)
                        && ["hard", "soft", "complaint"].contains(&kind);

                    let accepted = v.validate(submission(email, uuid, kind)).is_ok();
                    assert_eq!(accepted, expected, "email={email:?} uuid={uuid:?} type={kind:?}");
                }
            }
        }
    }

    #[test]
    fn test_sanitizer_rejects_malformed_addresses() {
        let s = BasicEmailSanitizer;
        for bad in ["plain", "a@b", "@example.com", "a@@example.com", "a b@example.com", "a@example..com"] {
            assert!(s.normalize(bad).is_err(), "{bad} should be rejected");
        }
        let long = format!("{}@example.com", "a".repeat(MAX_EMAIL_LEN));
        assert!(s.normalize(&long).is_err());
    }

    #[test]
    fn test_sanitizer_is_idempotent() {
        let s = BasicEmailSanitizer;
        let once = s.normalize(" Mixed.Case+tag@Example.ORG ").unwrap();
        let twice = s.normalize(&once).unwrap();

        assert_eq!(once, "mixed.case+tag@example.org");
        assert_eq!(once, twice);
    }
}
