//! Bounce ingestion - webhook normalization for email delivery failures.
//!
//! Providers report bounces and complaints in their own formats. This crate
//! verifies each delivery, translates it into a canonical [`Bounce`] and
//! records it through a [`BounceStore`].
//!
//! ## Architecture
//!
//! ```text
//! HTTP body → BounceDispatcher → ProviderAdapter (verify, parse) → RecordingSink → BounceStore
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod providers;
pub mod sink;
pub mod store;
pub mod validate;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{BounceDispatcher, DispatchOutcome};
pub use error::BounceError;
pub use model::{Bounce, BounceSource, BounceType};
pub use sink::{RecordSummary, RecordingSink};
pub use store::{BounceStore, InMemoryBounceStore};
pub use validate::{BasicEmailSanitizer, EmailSanitizer, FieldValidator};
pub use web::{build_router, AppState};
