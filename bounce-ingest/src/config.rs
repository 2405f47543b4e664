//! Configuration module for environment variable parsing.
//!
//! Configuration is read once at startup and passed explicitly to the
//! dispatcher and every adapter constructor.

use std::env;
use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Largest accepted webhook body in bytes
    pub max_body_bytes: usize,

    /// Mail header (or custom argument) carrying the campaign reference
    pub campaign_header: String,

    /// Maximum age in seconds for signed webhook timestamps
    pub signature_max_age: u64,

    /// Token required in `X-Admin-Auth` for the `/api` routes. Unset disables them.
    pub admin_token: Option<String>,

    // =========================================================================
    // Amazon SES (via SNS)
    // =========================================================================
    pub ses_enabled: bool,

    /// Timeout for certificate fetches and subscription confirmations
    pub sns_http_timeout_ms: u64,

    // =========================================================================
    // SendGrid
    // =========================================================================
    pub sendgrid_enabled: bool,

    /// Base64 DER ECDSA public key from the SendGrid event webhook settings
    pub sendgrid_verification_key: Option<String>,

    // =========================================================================
    // Postmark
    // =========================================================================
    pub postmark_enabled: bool,

    /// Basic auth credentials configured on the Postmark webhook URL
    pub postmark_username: Option<String>,
    pub postmark_password: Option<String>,

    // =========================================================================
    // ForwardEmail
    // =========================================================================
    pub forwardemail_enabled: bool,

    /// Webhook signature key for HMAC verification
    pub forwardemail_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            max_body_bytes: 1024 * 1024,
            campaign_header: "X-Campaign-UUID".to_string(),
            signature_max_age: 300, // 5 minutes
            admin_token: None,
            ses_enabled: false,
            sns_http_timeout_ms: 5000,
            sendgrid_enabled: false,
            sendgrid_verification_key: None,
            postmark_enabled: false,
            postmark_username: None,
            postmark_password: None,
            forwardemail_enabled: false,
            forwardemail_key: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),

            max_body_bytes: env::var("WEBHOOK_MAX_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_body_bytes),

            campaign_header: env::var("BOUNCE_CAMPAIGN_HEADER")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.campaign_header),

            signature_max_age: env::var("BOUNCE_SIGNATURE_MAX_AGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.signature_max_age),

            admin_token: env::var("BOUNCE_ADMIN_TOKEN").ok(),

            ses_enabled: parse_bool("BOUNCE_SES_ENABLED", defaults.ses_enabled),

            sns_http_timeout_ms: env::var("SNS_HTTP_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sns_http_timeout_ms),

            sendgrid_enabled: parse_bool("BOUNCE_SENDGRID_ENABLED", defaults.sendgrid_enabled),

            sendgrid_verification_key: env::var("SENDGRID_VERIFICATION_KEY").ok(),

            postmark_enabled: parse_bool("BOUNCE_POSTMARK_ENABLED", defaults.postmark_enabled),

            postmark_username: env::var("POSTMARK_USERNAME").ok(),

            postmark_password: env::var("POSTMARK_PASSWORD").ok(),

            forwardemail_enabled: parse_bool(
                "BOUNCE_FORWARDEMAIL_ENABLED",
                defaults.forwardemail_enabled,
            ),

            forwardemail_key: env::var("FORWARDEMAIL_KEY").ok(),
        }
    }
}

/// Parse a boolean flag such as "true", "1" or "off".
fn parse_bool(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" | "" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}
