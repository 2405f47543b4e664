//! Dispatch router.
//!
//! Selects the provider adapter for a webhook path segment, runs it over the
//! untouched request body and hands the resulting bounces to the sink.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::BounceError;
use crate::providers::signature::is_secret_configured;
use crate::providers::{
    ForwardemailAdapter, Handshake, Ingest, NativeAdapter, PostmarkAdapter, ProviderAdapter,
    SendgridAdapter, SesAdapter, SnsClient,
};
use crate::sink::{RecordSummary, RecordingSink, SinkStats};
use crate::store::BounceStore;
use crate::validate::{EmailSanitizer, FieldValidator};

/// Path segment of the native endpoint.
pub const NATIVE_SERVICE: &str = "";

/// What a successful dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Acknowledged(Handshake),
    Recorded(RecordSummary),
}

pub struct BounceDispatcher {
    adapters: HashMap<&'static str, Arc<dyn ProviderAdapter>>,
    sink: RecordingSink,
}

impl BounceDispatcher {
    pub fn new(sink: RecordingSink) -> Self {
        Self {
            adapters: HashMap::new(),
            sink,
        }
    }

    /// Register an adapter under a path segment.
    pub fn with_adapter(mut self, service: &'static str, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(service, adapter);
        self
    }

    /// Build the adapter table from configuration.
    ///
    /// Providers that are enabled but lack their secret are left out, so they
    /// are indistinguishable from disabled ones.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn BounceStore>,
        sanitizer: Arc<dyn EmailSanitizer>,
        sns: Arc<dyn SnsClient>,
    ) -> Self {
        let validator = FieldValidator::new(sanitizer.clone());
        let mut dispatcher = Self::new(RecordingSink::new(store))
            .with_adapter(NATIVE_SERVICE, Arc::new(NativeAdapter::new(validator)));

        if config.ses_enabled {
            dispatcher = dispatcher.with_adapter(
                "ses",
                Arc::new(SesAdapter::new(
                    sns,
                    config.campaign_header.clone(),
                    sanitizer.clone(),
                )),
            );
        }

        if config.sendgrid_enabled {
            match &config.sendgrid_verification_key {
                Some(key) if is_secret_configured(&config.sendgrid_verification_key) => {
                    let adapter = SendgridAdapter::new(
                        key,
                        config.signature_max_age,
                        config.campaign_header.clone(),
                        sanitizer.clone(),
                    );
                    match adapter {
                        Ok(adapter) => {
                            dispatcher = dispatcher.with_adapter("sendgrid", Arc::new(adapter));
                        }
                        Err(e) => {
                            warn!(provider = "sendgrid", error = %e, "provider_disabled_invalid_key");
                        }
                    }
                }
                _ => warn!(provider = "sendgrid", "provider_disabled_missing_secret"),
            }
        }

        if config.postmark_enabled {
            match (&config.postmark_username, &config.postmark_password) {
                (Some(user), Some(pass))
                    if is_secret_configured(&config.postmark_username)
                        && is_secret_configured(&config.postmark_password) =>
                {
                    dispatcher = dispatcher.with_adapter(
                        "postmark",
                        Arc::new(PostmarkAdapter::new(
                            user.clone(),
                            pass.clone(),
                            config.campaign_header.clone(),
                            sanitizer.clone(),
                        )),
                    );
                }
                _ => warn!(provider = "postmark", "provider_disabled_missing_secret"),
            }
        }

        if config.forwardemail_enabled {
            match &config.forwardemail_key {
                Some(key) if is_secret_configured(&config.forwardemail_key) => {
                    dispatcher = dispatcher.with_adapter(
                        "forwardemail",
                        Arc::new(ForwardemailAdapter::new(
                            key.clone(),
                            config.campaign_header.clone(),
                            sanitizer.clone(),
                        )),
                    );
                }
                _ => warn!(provider = "forwardemail", "provider_disabled_missing_secret"),
            }
        }

        let mut enabled: Vec<&str> = dispatcher
            .adapters
            .keys()
            .copied()
            .filter(|s| !s.is_empty())
            .collect();
        enabled.sort_unstable();
        info!(providers = ?enabled, "bounce_providers_configured");

        dispatcher
    }

    pub fn is_enabled(&self, service: &str) -> bool {
        self.adapters.contains_key(service)
    }

    pub fn stats(&self) -> &SinkStats {
        self.sink.stats()
    }

    /// Verify, parse and record one webhook delivery.
    ///
    /// Errors are returned only for rejections before recording; store
    /// failures are absorbed by the sink.
    pub async fn handle(
        &self,
        service: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<DispatchOutcome, BounceError> {
        let adapter = self
            .adapters
            .get(service)
            .ok_or(BounceError::UnknownService)?;

        adapter.verify(body, headers).await?;

        match adapter.parse(body, headers).await? {
            Ingest::Handshake(handshake) => {
                adapter.acknowledge(&handshake).await?;
                Ok(DispatchOutcome::Acknowledged(handshake))
            }
            Ingest::Bounces(bounces) => {
                let summary = self.sink.record_all(bounces).await;
                Ok(DispatchOutcome::Recorded(summary))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::HeaderValue;
    use std::sync::Mutex;

    use crate::model::{Bounce, BounceSource, BounceType};
    use crate::providers::ses::tests::{bounce_message, signed_envelope, sns_headers, FakeSns};
    use crate::providers::signature::{hmac_sha256_hex, SignatureError};
    use crate::sink::tests::FlakyStore;
    use crate::store::InMemoryBounceStore;
    use crate::validate::BasicEmailSanitizer;

    /// Adapter that records the order of calls made on it.
    struct RecordingAdapter {
        verify_ok: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingAdapter {
        fn new(verify_ok: bool) -> Self {
            Self {
                verify_ok,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for RecordingAdapter {
        fn source(&self) -> BounceSource {
            BounceSource::Sendgrid
        }

        async fn verify(&self, _raw: &[u8], _headers: &HeaderMap) -> Result<(), BounceError> {
            self.calls.lock().unwrap().push("verify");
            if self.verify_ok {
                Ok(())
            } else {
                Err(SignatureError::Mismatch.into())
            }
        }

        async fn parse(&self, raw: &[u8], _headers: &HeaderMap) -> Result<Ingest, BounceError> {
            self.calls.lock().unwrap().push("parse");
            let emails: Vec<String> = serde_json::from_slice(raw).map_err(BounceError::invalid_data)?;
            Ok(Ingest::Bounces(
                emails
                    .iter()
                    .map(|e| Bounce::for_email(e, BounceType::Soft, BounceSource::Sendgrid))
                    .collect(),
            ))
        }
    }

    fn config_all_enabled() -> Config {
        Config {
            ses_enabled: true,
            sendgrid_enabled: true,
            postmark_enabled: true,
            forwardemail_enabled: true,
            forwardemail_key: Some("k".to_string()),
            ..Config::default()
        }
    }

    fn from_config(config: &Config) -> BounceDispatcher {
        BounceDispatcher::from_config(
            config,
            Arc::new(InMemoryBounceStore::new()),
            Arc::new(BasicEmailSanitizer),
            Arc::new(FakeSns::default()),
        )
    }

    #[test]
    fn test_missing_secrets_disable_providers() {
        let dispatcher = from_config(&config_all_enabled());

        assert!(dispatcher.is_enabled(NATIVE_SERVICE));
        assert!(dispatcher.is_enabled("ses"));
        assert!(dispatcher.is_enabled("forwardemail"));
        assert!(!dispatcher.is_enabled("sendgrid"));
        assert!(!dispatcher.is_enabled("postmark"));
    }

    #[test]
    fn test_disabled_flags_leave_only_native() {
        let dispatcher = from_config(&Config {
            forwardemail_key: Some("k".to_string()),
            ..Config::default()
        });

        for service in ["ses", "sendgrid", "postmark", "forwardemail"] {
            assert!(!dispatcher.is_enabled(service), "{service}");
        }
        assert!(dispatcher.is_enabled(NATIVE_SERVICE));
    }

    #[test]
    fn test_blank_secret_counts_as_missing() {
        let dispatcher = from_config(&Config {
            postmark_username: Some("user".to_string()),
            postmark_password: Some("   ".to_string()),
            ..config_all_enabled()
        });

        assert!(!dispatcher.is_enabled("postmark"));
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_services_look_the_same() {
        let dispatcher = from_config(&Config::default());

        for service in ["mailgun", "ses", "SES"] {
            let err = dispatcher.handle(service, &HeaderMap::new(), b"{}").await.unwrap_err();
            assert!(matches!(err, BounceError::UnknownService), "{service}");
        }
    }

    #[tokio::test]
    async fn test_verify_runs_before_parse() {
        let adapter = Arc::new(RecordingAdapter::new(false));
        let dispatcher = BounceDispatcher::new(RecordingSink::new(Arc::new(InMemoryBounceStore::new())))
            .with_adapter("recording", adapter.clone());

        let err = dispatcher
            .handle("recording", &HeaderMap::new(), br#"["a@example.com"]"#)
            .await
            .unwrap_err();

        assert!(matches!(err, BounceError::Signature(SignatureError::Mismatch)));
        assert_eq!(adapter.calls.lock().unwrap().as_slice(), ["verify"]);
    }

    #[tokio::test]
    async fn test_store_failures_do_not_fail_the_request() {
        let store = Arc::new(FlakyStore {
            reject: vec!["b@example.com".to_string()],
            ..Default::default()
        });
        let adapter = Arc::new(RecordingAdapter::new(true));
        let dispatcher = BounceDispatcher::new(RecordingSink::new(store.clone())).with_adapter("recording", adapter.clone());

        let outcome = dispatcher
            .handle(
                "recording",
                &HeaderMap::new(),
                br#"["a@example.com", "b@example.com", "c@example.com"]"#,
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Recorded(RecordSummary { received: 3, recorded: 2, failed: 1 })
        );
        assert_eq!(dispatcher.stats().failed(), 1);
        assert_eq!(adapter.calls.lock().unwrap().as_slice(), ["verify", "parse"]);
    }

    #[tokio::test]
    async fn test_native_dispatch_records() {
        let store = Arc::new(InMemoryBounceStore::new());
        let dispatcher = BounceDispatcher::from_config(
            &Config::default(),
            store.clone(),
            Arc::new(BasicEmailSanitizer),
            Arc::new(FakeSns::default()),
        );

        let outcome = dispatcher
            .handle(NATIVE_SERVICE, &HeaderMap::new(), br#"{"email":"a@example.com","type":"soft"}"#)
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Recorded(s) if s.recorded == 1));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_ses_handshake_records_nothing() {
        let store = Arc::new(InMemoryBounceStore::new());
        let sns = Arc::new(FakeSns::default());
        let dispatcher = BounceDispatcher::from_config(
            &config_all_enabled(),
            store.clone(),
            Arc::new(BasicEmailSanitizer),
            sns.clone(),
        );

        let body = signed_envelope("SubscriptionConfirmation", "subscribe");
        let outcome = dispatcher
            .handle("ses", &sns_headers("SubscriptionConfirmation"), body.as_bytes())
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Acknowledged(_)));
        assert_eq!(sns.confirmed.lock().unwrap().len(), 1);
        assert!(store.is_empty().await);

        let body = signed_envelope("Notification", &bounce_message("Permanent", &["x@example.com"]));
        dispatcher
            .handle("ses", &sns_headers("Notification"), body.as_bytes())
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_forwardemail_signature_over_raw_bytes() {
        let store = Arc::new(InMemoryBounceStore::new());
        let dispatcher = BounceDispatcher::from_config(
            &config_all_enabled(),
            store.clone(),
            Arc::new(BasicEmailSanitizer),
            Arc::new(FakeSns::default()),
        );

        // Whitespace matters: the signature is over the bytes as sent.
        let body = br#"{ "recipient" : "r@example.com" }"#;
        let mut headers = HeaderMap::new();
        let sig = hmac_sha256_hex(b"k", body).unwrap();
        headers.insert("x-webhook-signature", HeaderValue::from_str(&sig).unwrap());

        dispatcher.handle("forwardemail", &headers, body).await.unwrap();
        assert_eq!(store.len().await, 1);

        let compact = br#"{"recipient":"r@example.com"}"#;
        let err = dispatcher.handle("forwardemail", &headers, compact).await.unwrap_err();
        assert!(matches!(err, BounceError::Signature(SignatureError::Mismatch)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_handshake_failure_is_reported() {
        struct RefusingSns;

        #[async_trait]
        impl SnsClient for RefusingSns {
            async fn signing_key(&self, url: &url::Url) -> Result<rsa::RsaPublicKey, BounceError> {
                FakeSns::default().signing_key(url).await
            }

            async fn confirm_subscription(&self, _url: &url::Url) -> Result<(), BounceError> {
                Err(BounceError::Handshake("connection refused".to_string()))
            }
        }

        let dispatcher = BounceDispatcher::new(RecordingSink::new(Arc::new(InMemoryBounceStore::new())))
            .with_adapter(
                "ses",
                Arc::new(SesAdapter::new(
                    Arc::new(RefusingSns),
                    "X-Campaign-UUID",
                    Arc::new(BasicEmailSanitizer),
                )),
            );

        let body = signed_envelope("SubscriptionConfirmation", "subscribe");
        let err = dispatcher
            .handle("ses", &sns_headers("SubscriptionConfirmation"), body.as_bytes())
            .await
            .unwrap_err();

        assert!(matches!(err, BounceError::Handshake(_)));
    }
}
