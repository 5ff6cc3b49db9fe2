//! Customer order endpoints.
//!
//! ```text
//! GET  /api/orders  - The signed-in customer's orders
//! POST /api/orders  - Place an order
//! ```

use axum::{Json, extract::State, http::StatusCode};

use super::ApiJson;
use crate::error::{Result, add_breadcrumb};
use crate::middleware::RequireUser;
use crate::models::Order;
use crate::services::{CreateOrderRequest, OrderService, PlacedOrder};
use crate::state::AppState;

/// List the caller's orders, newest first.
pub async fn list(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> Result<Json<Vec<Order>>> {
    let orders = OrderService::new(state.pool(), state.stripe())
        .list_for_user(&user.uid)
        .await?;
    Ok(Json(orders))
}

/// Place an order and, when payments are configured, open a payment intent.
pub async fn create(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    ApiJson(request): ApiJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<PlacedOrder>)> {
    let item_count = request.items.len().to_string();
    add_breadcrumb(
        "checkout",
        "Placing order",
        Some(&[("items", item_count.as_str())]),
    );

    let placed = OrderService::new(state.pool(), state.stripe())
        .place_order(&user.uid, &request)
        .await?;

    Ok((StatusCode::CREATED, Json(placed)))
}
