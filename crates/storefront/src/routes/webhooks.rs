//! Payment provider webhooks.
//!
//! Mounted outside the API rate limiter: Stripe retries on failure and a
//! throttled webhook would delay order status updates.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use serde_json::{Value, json};

use emporium_core::OrderStatus;

use crate::db::{OrderRepository, PaymentStatusUpdate};
use crate::error::{AppError, Result};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Order status a payment intent event moves its order to, if any.
#[must_use]
pub fn status_for_event(event_type: &str) -> Option<OrderStatus> {
    match event_type {
        "payment_intent.succeeded" => Some(OrderStatus::Paid),
        "payment_intent.payment_failed" => Some(OrderStatus::PaymentFailed),
        "payment_intent.canceled" => Some(OrderStatus::Cancelled),
        _ => None,
    }
}

/// `POST /api/webhooks/stripe`
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let stripe = state
        .stripe()
        .ok_or_else(|| AppError::NotFound("Payments are not configured".to_string()))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    let event = stripe
        .verify_webhook(&body, signature)
        .inspect_err(|e| tracing::warn!(error = %e, "Rejected webhook"))?;

    let Some(status) = status_for_event(&event.event_type) else {
        tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
        return Ok(Json(json!({ "received": true })));
    };

    let intent_id = &event.data.object.id;
    match OrderRepository::new(state.pool())
        .set_status_by_payment_intent(intent_id, status)
        .await?
    {
        PaymentStatusUpdate::Applied(order_id) => tracing::info!(
            event_id = %event.id,
            %order_id,
            status = %status,
            "Order status updated from webhook"
        ),
        PaymentStatusUpdate::Unchanged { order_id, current } => tracing::info!(
            event_id = %event.id,
            %order_id,
            %current,
            event_status = %status,
            "Ignoring payment event for order in a later state"
        ),
        PaymentStatusUpdate::UnknownIntent => tracing::warn!(
            event_id = %event.id,
            payment_intent = %intent_id,
            "Webhook for unknown payment intent"
        ),
    }

    Ok(Json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_for_event() {
        assert_eq!(
            status_for_event("payment_intent.succeeded"),
            Some(OrderStatus::Paid)
        );
        assert_eq!(
            status_for_event("payment_intent.payment_failed"),
            Some(OrderStatus::PaymentFailed)
        );
        assert_eq!(
            status_for_event("payment_intent.canceled"),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(status_for_event("charge.refunded"), None);
    }
}
