//! Admin-only audit dashboard endpoints.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use super::{AppState, SessionAuth};
use crate::error::PortalError;
use crate::store::audit::{AuditFilter, AuditPage, AuditStats, AuditStatus};

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub user: Option<String>,
    pub action: Option<String>,
    pub cluster: Option<String>,
    pub status: Option<AuditStatus>,
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
    pub page: Option<u32>,
}

fn require_admin(auth: &SessionAuth) -> Result<(), PortalError> {
    if auth.user.is_admin {
        Ok(())
    } else {
        Err(PortalError::Forbidden)
    }
}

pub async fn list(
    State(state): State<AppState>,
    auth: SessionAuth,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditPage>, PortalError> {
    require_admin(&auth)?;
    let filter = AuditFilter {
        username: query.user,
        action: query.action,
        cluster: query.cluster,
        status: query.status,
        start_date: query.start_date,
        end_date: query.end_date,
    };
    let page = state.audit.list(&filter, query.page.unwrap_or(1))?;
    Ok(Json(page))
}

pub async fn stats(
    State(state): State<AppState>,
    auth: SessionAuth,
) -> Result<Json<AuditStats>, PortalError> {
    require_admin(&auth)?;
    Ok(Json(state.audit.stats()?))
}
