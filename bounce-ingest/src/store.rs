//! Storage collaborator for bounce records.
//!
//! The ingestion core only needs [`BounceStore::record`]. The remaining
//! operations back the administrative endpoints.

use std::cmp::Ordering;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::{Bounce, BounceSource};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("bounce not found")]
    NotFound,
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Column a query is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    CreatedAt,
    Email,
    CampaignId,
    Source,
}

impl OrderBy {
    /// Parse a user-supplied sort field, falling back to `created_at`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("email") => OrderBy::Email,
            Some("campaign_id") | Some("campaign") => OrderBy::CampaignId,
            Some("source") => OrderBy::Source,
            _ => OrderBy::CreatedAt,
        }
    }
}

/// Sort direction. Newest first unless asked otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }
}

/// Filters and paging for [`BounceStore::query`].
#[derive(Debug, Clone, Default)]
pub struct BounceQuery {
    pub campaign_id: Option<i64>,
    pub subscriber_uuid: Option<String>,
    pub source: Option<BounceSource>,
    pub order_by: OrderBy,
    pub order: SortOrder,
    pub offset: usize,
    /// `None` returns every matching row
    pub limit: Option<usize>,
}

impl BounceQuery {
    fn matches(&self, b: &Bounce) -> bool {
        self.campaign_id.map_or(true, |id| b.campaign_id == Some(id))
            && self
                .subscriber_uuid
                .as_deref()
                .map_or(true, |uuid| b.subscriber_uuid == uuid)
            && self.source.map_or(true, |source| b.source == source)
    }

    fn compare(&self, a: &Bounce, b: &Bounce) -> Ordering {
        let ord = match self.order_by {
            OrderBy::CreatedAt => a.created_at.cmp(&b.created_at),
            OrderBy::Email => a.email.cmp(&b.email),
            OrderBy::CampaignId => a.campaign_id.cmp(&b.campaign_id),
            OrderBy::Source => a.source.as_str().cmp(b.source.as_str()),
        }
        .then_with(|| a.id.cmp(&b.id));

        match self.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    }
}

/// Which records a delete applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteScope {
    All,
    Ids(Vec<i64>),
}

#[async_trait]
pub trait BounceStore: Send + Sync {
    /// Persist one bounce. The store assigns its id.
    async fn record(&self, bounce: &Bounce) -> Result<(), StoreError>;
    async fn get_by_id(&self, id: i64) -> Result<Bounce, StoreError>;
    /// Matching page of records plus the total number of matches.
    async fn query(&self, query: &BounceQuery) -> Result<(Vec<Bounce>, usize), StoreError>;
    async fn delete(&self, scope: &DeleteScope) -> Result<(), StoreError>;
}

/// In-memory store for lightweight deployments and tests.
#[derive(Default)]
pub struct InMemoryBounceStore {
    inner: RwLock<Rows>,
}

#[derive(Default)]
struct Rows {
    next_id: i64,
    bounces: Vec<Bounce>,
}

impl InMemoryBounceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.bounces.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BounceStore for InMemoryBounceStore {
    async fn record(&self, bounce: &Bounce) -> Result<(), StoreError> {
        let mut rows = self.inner.write().await;
        rows.next_id += 1;

        let mut stored = bounce.clone();
        stored.id = Some(rows.next_id);
        rows.bounces.push(stored);

        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Bounce, StoreError> {
        self.inner
            .read()
            .await
            .bounces
            .iter()
            .find(|b| b.id == Some(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn query(&self, query: &BounceQuery) -> Result<(Vec<Bounce>, usize), StoreError> {
        let rows = self.inner.read().await;

        let mut matched: Vec<&Bounce> = rows.bounces.iter().filter(|b| query.matches(b)).collect();
        matched.sort_by(|a, b| query.compare(a, b));

        let total = matched.len();
        let page = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok((page, total))
    }

    async fn delete(&self, scope: &DeleteScope) -> Result<(), StoreError> {
        let mut rows = self.inner.write().await;
        match scope {
            DeleteScope::All => rows.bounces.clear(),
            DeleteScope::Ids(ids) => rows
                .bounces
                .retain(|b| b.id.map_or(true, |id| !ids.contains(&id))),
        }
        Ok(())
    }
}
