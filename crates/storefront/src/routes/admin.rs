//! Admin JSON API. Every handler requires [`RequireAdmin`].
//!
//! ```text
//! GET  /api/admin/orders               - Orders, optionally by status
//! GET  /api/admin/analytics            - Revenue and top products
//! POST /api/admin/users/reset-password - Send a password reset email
//! POST /api/admin/users/set-admin      - Grant the admin claim
//! POST /api/admin/users/revoke-admin   - Revoke the admin claim
//! ```

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use emporium_core::{Email, OrderStatus};

use crate::db::OrderRepository;
use crate::error::{AppError, FieldError, Result};
use crate::middleware::RequireAdmin;
use crate::models::{AnalyticsSummary, Order};
use crate::services::{AdminClaimsService, AdminTarget, ClaimChange, MissingAccount};
use crate::state::AppState;

use super::ApiJson;

pub const DEFAULT_ORDER_LIMIT: i64 = 50;
pub const MAX_ORDER_LIMIT: i64 = 200;
const TOP_PRODUCTS: i64 = 5;

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

impl OrdersQuery {
    /// Validate the filter. Out-of-range limits are rejected, not clamped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming each bad parameter.
    pub fn parse(&self) -> Result<(Option<OrderStatus>, i64)> {
        let mut errors = Vec::new();

        let status = match self.status.as_deref().filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => match raw.parse::<OrderStatus>() {
                Ok(status) => Some(status),
                Err(message) => {
                    errors.push(FieldError::new("status", message));
                    None
                }
            },
        };

        let limit = self.limit.unwrap_or(DEFAULT_ORDER_LIMIT);
        if !(1..=MAX_ORDER_LIMIT).contains(&limit) {
            errors.push(FieldError::new(
                "limit",
                format!("must be between 1 and {MAX_ORDER_LIMIT}"),
            ));
        }

        if errors.is_empty() {
            Ok((status, limit))
        } else {
            Err(AppError::Validation(errors))
        }
    }
}

/// List orders, newest first.
pub async fn orders(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<Vec<Order>>> {
    let (status, limit) = query.parse()?;
    let orders = OrderRepository::new(state.pool()).list(status, limit).await?;
    Ok(Json(orders))
}

pub async fn analytics(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<AnalyticsSummary>> {
    let summary = OrderRepository::new(state.pool())
        .analytics(TOP_PRODUCTS)
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
}

/// Ask the identity provider to email a password reset link.
pub async fn reset_password(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(request): ApiJson<ResetPasswordRequest>,
) -> Result<Json<Value>> {
    let email = Email::parse(&request.email)
        .map_err(|e| AppError::Validation(vec![FieldError::new("email", e.to_string())]))?;

    state.identity().send_password_reset(&email).await?;
    tracing::info!(actor = %admin.uid, "Password reset email requested");

    Ok(Json(json!({ "success": true })))
}

/// Target of a claim change: exactly one of `uid` or `email`.
#[derive(Debug, Deserialize)]
pub struct ClaimTargetRequest {
    pub uid: Option<String>,
    pub email: Option<String>,
}

impl ClaimTargetRequest {
    fn target(&self) -> Result<AdminTarget> {
        Ok(AdminTarget::from_parts(
            self.uid.as_deref(),
            self.email.as_deref(),
        )?)
    }
}

/// Grant the admin claim to an existing account.
pub async fn set_admin(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(request): ApiJson<ClaimTargetRequest>,
) -> Result<Json<ClaimChange>> {
    let target = request.target()?;
    let change = AdminClaimsService::new(state.identity())
        .with_mirror(state.pool())
        .grant_admin(&target, MissingAccount::Fail, Some(&admin.uid))
        .await?;
    Ok(Json(change))
}

/// Revoke the admin claim. Admins cannot revoke their own claim.
pub async fn revoke_admin(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(request): ApiJson<ClaimTargetRequest>,
) -> Result<Json<ClaimChange>> {
    let target = request.target()?;
    let service = AdminClaimsService::new(state.identity()).with_mirror(state.pool());

    let account = service.lookup(&target).await?;
    if account.uid == admin.uid {
        return Err(AppError::BadRequest(
            "Cannot revoke your own admin access".to_string(),
        ));
    }

    let change = service
        .revoke_admin(&AdminTarget::Uid(account.uid), Some(&admin.uid))
        .await?;
    Ok(Json(change))
}
