//! Administrative bounce endpoints.
//!
//! Thin delegates over [`BounceStore`]: listing, lookup and deletion.
//! Every route sits behind [`require_admin_token`].

use std::str::FromStr;

use axum::{
    extract::{Path, Query, RawQuery, Request, State},
    middleware::Next,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::BounceError;
use crate::model::{is_valid_uuid, Bounce, BounceSource};
use crate::providers::header_str;
use crate::providers::signature::constant_time_compare;
use crate::store::{BounceQuery, DeleteScope, OrderBy, SortOrder};
use crate::web::handlers::{AppState, DataResponse};

pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Auth";

const DEFAULT_PER_PAGE: usize = 20;
const SUBSCRIBER_BOUNCE_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub campaign_id: Option<String>,
    pub source: Option<String>,
    pub order_by: Option<String>,
    pub order: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

/// One page of bounces.
#[derive(Debug, Serialize)]
pub struct PageResults {
    pub results: Vec<Bounce>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

/// `page` is 1-based. `per_page` of `None` means every matching record.
fn pagination(params: &ListParams) -> (usize, Option<usize>) {
    let page = params
        .page
        .as_deref()
        .and_then(|p| p.trim().parse::<usize>().ok())
        .filter(|p| *p > 0)
        .unwrap_or(1);

    let per_page = match params.per_page.as_deref().map(str::trim) {
        Some("all") => None,
        Some(raw) => Some(
            raw.parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_PER_PAGE),
        ),
        None => Some(DEFAULT_PER_PAGE),
    };

    (page, per_page)
}

/// Check `X-Admin-Auth` against the configured admin token.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, BounceError> {
    let expected = state.config.admin_token.as_deref().unwrap_or_default();

    match header_str(request.headers(), ADMIN_TOKEN_HEADER) {
        Some(token)
            if !expected.is_empty()
                && constant_time_compare(token.as_bytes(), expected.as_bytes()) =>
        {
            Ok(next.run(request).await)
        }
        None => {
            warn!(path = %request.uri().path(), "admin_auth_missing");
            Err(BounceError::AdminUnauthorized)
        }
        Some(_) => {
            warn!(path = %request.uri().path(), "admin_auth_invalid");
            Err(BounceError::AdminUnauthorized)
        }
    }
}

fn parse_id(raw: &str) -> Result<i64, BounceError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or(BounceError::InvalidId)
}

/// `GET /api/bounces`
pub async fn list_bounces(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<DataResponse<PageResults>>, BounceError> {
    let campaign_id = match params.campaign_id.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(parse_id(raw)?),
        _ => None,
    };
    let source = match params.source.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(
            BounceSource::from_str(raw)
                .map_err(|_| BounceError::InvalidData(format!("unknown source: {raw}")))?,
        ),
        _ => None,
    };

    let (page, per_page) = pagination(&params);
    let query = BounceQuery {
        campaign_id,
        source,
        order_by: OrderBy::parse(params.order_by.as_deref()),
        order: SortOrder::parse(params.order.as_deref()),
        offset: per_page.map_or(0, |n| (page - 1).saturating_mul(n)),
        limit: per_page,
        ..Default::default()
    };

    let (results, total) = state.store.query(&query).await?;

    Ok(DataResponse::new(PageResults {
        results,
        total,
        page,
        per_page: per_page.unwrap_or(total),
    }))
}

/// `GET /api/bounces/{id}`
pub async fn get_bounce(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<Bounce>>, BounceError> {
    let id = parse_id(&id)?;
    let bounce = state.store.get_by_id(id).await?;
    Ok(DataResponse::new(bounce))
}

/// `GET /api/subscribers/{uuid}/bounces`
pub async fn subscriber_bounces(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<DataResponse<Vec<Bounce>>>, BounceError> {
    if !is_valid_uuid(&uuid) {
        return Err(BounceError::InvalidId);
    }

    let query = BounceQuery {
        subscriber_uuid: Some(uuid.to_lowercase()),
        limit: Some(SUBSCRIBER_BOUNCE_LIMIT),
        ..Default::default()
    };
    let (results, _) = state.store.query(&query).await?;

    Ok(DataResponse::new(results))
}

/// `DELETE /api/bounces?id=1&id=2` or `DELETE /api/bounces?all=true`
pub async fn delete_bounces(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<DataResponse<bool>>, BounceError> {
    let mut all = false;
    let mut ids = Vec::new();

    for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "all" => all = matches!(value.as_ref(), "true" | "1"),
            "id" => ids.push(parse_id(&value)?),
            _ => {}
        }
    }

    let scope = if all {
        DeleteScope::All
    } else if !ids.is_empty() {
        DeleteScope::Ids(ids)
    } else {
        return Err(BounceError::InvalidId);
    };

    state.store.delete(&scope).await?;
    info!(scope = ?scope, "bounces_deleted");

    Ok(DataResponse::new(true))
}

/// `DELETE /api/bounces/{id}`
pub async fn delete_bounce(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<bool>>, BounceError> {
    let id = parse_id(&id)?;
    state.store.delete(&DeleteScope::Ids(vec![id])).await?;
    info!(id, "bounce_deleted");

    Ok(DataResponse::new(true))
}
