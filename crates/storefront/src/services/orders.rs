//! Checkout: order placement as a compensated multi-step write.
//!
//! 1. Validate the request and price it from the catalog.
//! 2. Insert the order as `pending`.
//! 3. Create a payment intent keyed by the order id.
//! 4. Attach the intent id to the order.
//!
//! A failure after step 2 cancels the intent (if one was created) and marks
//! the order `cancelled` before the error is returned.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use emporium_core::{Currency, OrderId, OrderStatus, ProductId, Uid};

use super::payments::{PaymentError, PaymentGateway, StripeClient};
use crate::db::{NewOrder, OrderRepository, ProductRepository, RepositoryError};
use crate::error::FieldError;
use crate::models::{Order, OrderItem, Product, ShippingAddress};

pub const MAX_ITEMS: usize = 50;
pub const MAX_QUANTITY: i64 = 99;

/// Errors from order placement.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid order")]
    Validation(Vec<FieldError>),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("payment error: {0}")]
    Payment(#[from] PaymentError),
}

/// `POST /api/orders` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLineRequest>,
    pub shipping_address: ShippingAddress,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: i64,
}

/// A placed order and the secret the client needs to confirm payment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// A request line that passed shape validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Check item counts, quantities, duplicates, and the address.
///
/// # Errors
///
/// Returns every problem found as `OrderError::Validation`.
pub fn validate_request(request: &CreateOrderRequest) -> Result<Vec<ValidLine>, OrderError> {
    let mut errors = Vec::new();

    if request.items.is_empty() {
        errors.push(FieldError::new("items", "at least one item is required"));
    } else if request.items.len() > MAX_ITEMS {
        errors.push(FieldError::new(
            "items",
            format!("at most {MAX_ITEMS} items are allowed"),
        ));
    }

    let mut seen = HashSet::new();
    let mut lines = Vec::with_capacity(request.items.len());
    for (i, item) in request.items.iter().enumerate() {
        let product_id = item.product_id.trim();
        if product_id.is_empty() {
            errors.push(FieldError::new(
                format!("items[{i}].productId"),
                "is required",
            ));
            continue;
        }
        if !seen.insert(product_id) {
            errors.push(FieldError::new(
                format!("items[{i}].productId"),
                "duplicate product",
            ));
        }
        match u32::try_from(item.quantity) {
            Ok(quantity) if (1..=MAX_QUANTITY).contains(&item.quantity) => lines.push(ValidLine {
                product_id: ProductId::new(product_id),
                quantity,
            }),
            _ => errors.push(FieldError::new(
                format!("items[{i}].quantity"),
                format!("must be between 1 and {MAX_QUANTITY}"),
            )),
        }
    }

    let address = &request.shipping_address;
    for (field, value) in [
        ("shippingAddress.name", &address.name),
        ("shippingAddress.line1", &address.line1),
        ("shippingAddress.city", &address.city),
        ("shippingAddress.postalCode", &address.postal_code),
        ("shippingAddress.country", &address.country),
    ] {
        if value.trim().is_empty() {
            errors.push(FieldError::new(field, "is required"));
        }
    }

    if errors.is_empty() {
        Ok(lines)
    } else {
        Err(OrderError::Validation(errors))
    }
}

/// Snapshot catalog prices into line items and total them.
///
/// # Errors
///
/// Returns `OrderError::Validation` for unknown or inactive products, or a
/// cart that mixes currencies.
pub fn price_items(
    lines: &[ValidLine],
    products: &[Product],
) -> Result<(Vec<OrderItem>, Decimal, Currency), OrderError> {
    let catalog: HashMap<&ProductId, &Product> = products.iter().map(|p| (&p.id, p)).collect();

    let mut errors = Vec::new();
    let mut items = Vec::with_capacity(lines.len());
    let mut currency = None;

    for (i, line) in lines.iter().enumerate() {
        let field = format!("items[{i}].productId");
        let Some(product) = catalog.get(&line.product_id).filter(|p| p.active) else {
            errors.push(FieldError::new(field, "product is not available"));
            continue;
        };
        if *currency.get_or_insert(product.currency) != product.currency {
            errors.push(FieldError::new(field, "all items must share one currency"));
            continue;
        }
        items.push(OrderItem {
            product_id: product.id.clone(),
            name: product.name.clone(),
            unit_price: product.price,
            quantity: line.quantity,
        });
    }

    match currency {
        Some(currency) if errors.is_empty() => {
            let total = items.iter().map(OrderItem::line_total).sum();
            Ok((items, total, currency))
        }
        _ => Err(OrderError::Validation(errors)),
    }
}

/// Order storage checkout writes through.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn insert(&self, order: &NewOrder) -> Result<Order, RepositoryError>;

    async fn attach_payment_intent(
        &self,
        id: OrderId,
        payment_intent_id: &str,
    ) -> Result<Order, RepositoryError>;

    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), RepositoryError>;
}

#[async_trait]
impl<'a> OrderLedger for OrderRepository<'a> {
    async fn insert(&self, order: &NewOrder) -> Result<Order, RepositoryError> {
        self.create(order).await
    }

    async fn attach_payment_intent(
        &self,
        id: OrderId,
        payment_intent_id: &str,
    ) -> Result<Order, RepositoryError> {
        OrderRepository::attach_payment_intent(self, id, payment_intent_id).await
    }

    async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), RepositoryError> {
        OrderRepository::set_status(self, id, status).await
    }
}

/// Insert, open a payment intent, attach it; undo on failure.
pub struct Checkout<'a> {
    ledger: &'a dyn OrderLedger,
    payments: Option<&'a dyn PaymentGateway>,
}

impl<'a> Checkout<'a> {
    #[must_use]
    pub const fn new(ledger: &'a dyn OrderLedger, payments: Option<&'a dyn PaymentGateway>) -> Self {
        Self { ledger, payments }
    }

    /// Run the checkout steps for a priced order.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` or `OrderError::Payment` for the step
    /// that failed. Steps completed before it have been compensated.
    pub async fn run(&self, new_order: &NewOrder) -> Result<PlacedOrder, OrderError> {
        let order = self.ledger.insert(new_order).await?;
        tracing::info!(order_id = %order.id, total = %order.total_price().display(), "Order created");

        let Some(payments) = self.payments else {
            tracing::info!(order_id = %order.id, "Payments not configured; order left pending");
            return Ok(PlacedOrder {
                order,
                client_secret: None,
            });
        };

        let intent = match payments
            .create_payment_intent(order.id, &order.total_price())
            .await
        {
            Ok(intent) => intent,
            Err(e) => {
                tracing::error!(order_id = %order.id, error = %e, "Payment intent creation failed");
                self.compensate(order.id, None).await;
                return Err(e.into());
            }
        };

        match self.ledger.attach_payment_intent(order.id, &intent.id).await {
            Ok(order) => Ok(PlacedOrder {
                order,
                client_secret: intent.client_secret,
            }),
            Err(e) => {
                tracing::error!(order_id = %order.id, error = %e, "Attaching payment intent failed");
                self.compensate(order.id, Some(&intent.id)).await;
                Err(e.into())
            }
        }
    }

    async fn compensate(&self, order_id: OrderId, intent_id: Option<&str>) {
        if let (Some(payments), Some(intent_id)) = (self.payments, intent_id) {
            match payments.cancel_payment_intent(intent_id).await {
                Ok(()) => tracing::info!(%order_id, intent_id, "Cancelled payment intent"),
                Err(e) => tracing::error!(
                    %order_id,
                    intent_id,
                    error = %e,
                    "Failed to cancel payment intent; manual cleanup required"
                ),
            }
        }

        match self.ledger.set_status(order_id, OrderStatus::Cancelled).await {
            Ok(()) => tracing::info!(%order_id, "Order cancelled after failed checkout"),
            Err(e) => tracing::error!(
                %order_id,
                error = %e,
                "Failed to cancel order; manual cleanup required"
            ),
        }
    }
}

/// Places and reads orders.
pub struct OrderService<'a> {
    pool: &'a PgPool,
    payments: Option<&'a StripeClient>,
}

impl<'a> OrderService<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool, payments: Option<&'a StripeClient>) -> Self {
        Self { pool, payments }
    }

    /// Place an order for `user`.
    ///
    /// # Errors
    ///
    /// - `OrderError::Validation` if the request or cart is invalid
    /// - `OrderError::Repository` / `OrderError::Payment` if a step fails; by
    ///   then any completed step has been compensated
    #[instrument(skip(self, request), fields(user = %user))]
    pub async fn place_order(
        &self,
        user: &Uid,
        request: &CreateOrderRequest,
    ) -> Result<PlacedOrder, OrderError> {
        let lines = validate_request(request)?;
        let ids: Vec<ProductId> = lines.iter().map(|l| l.product_id.clone()).collect();
        let products = ProductRepository::new(self.pool).find_by_ids(&ids).await?;
        let (items, total, currency) = price_items(&lines, &products)?;

        let ledger = OrderRepository::new(self.pool);
        let payments = self.payments.map(|stripe| stripe as &dyn PaymentGateway);
        Checkout::new(&ledger, payments)
            .run(&NewOrder {
                id: OrderId::generate(),
                user_id: user.clone(),
                items,
                shipping_address: request.shipping_address.clone(),
                total,
                currency,
            })
            .await
    }

    /// A customer's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` if the query fails.
    pub async fn list_for_user(&self, user: &Uid) -> Result<Vec<Order>, OrderError> {
        Ok(OrderRepository::new(self.pool).list_for_user(user).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn address() -> ShippingAddress {
        ShippingAddress {
            name: "Ada Lovelace".into(),
            line1: "12 Analytical Way".into(),
            line2: None,
            city: "London".into(),
            postal_code: "N1 9GU".into(),
            country: "GB".into(),
        }
    }

    fn line(product_id: &str, quantity: i64) -> OrderLineRequest {
        OrderLineRequest {
            product_id: product_id.into(),
            quantity,
        }
    }

    fn product(id: &str, price: &str, currency: Currency, active: bool) -> Product {
        Product {
            id: ProductId::new(id),
            name: id.to_uppercase(),
            price: Decimal::from_str(price).unwrap(),
            currency,
            active,
        }
    }

    fn fields(err: OrderError) -> Vec<String> {
        match err {
            OrderError::Validation(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_request() {
        let request = CreateOrderRequest {
            items: vec![line("mug", 2), line("tee", 1)],
            shipping_address: address(),
        };
        let lines = validate_request(&request).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].quantity, 2);
    }

    #[test]
    fn test_empty_and_oversized_carts() {
        let empty = CreateOrderRequest {
            items: vec![],
            shipping_address: address(),
        };
        assert_eq!(fields(validate_request(&empty).unwrap_err()), ["items"]);

        let oversized = CreateOrderRequest {
            items: (0..=MAX_ITEMS).map(|i| line(&format!("p{i}"), 1)).collect(),
            shipping_address: address(),
        };
        assert_eq!(fields(validate_request(&oversized).unwrap_err()), ["items"]);
    }

    #[test]
    fn test_quantity_bounds_and_duplicates() {
        let request = CreateOrderRequest {
            items: vec![line("mug", 0), line("tee", 100), line("mug", 1), line("cap", -3)],
            shipping_address: address(),
        };
        assert_eq!(
            fields(validate_request(&request).unwrap_err()),
            [
                "items[0].quantity",
                "items[1].quantity",
                "items[2].productId",
                "items[3].quantity"
            ]
        );
    }

    #[test]
    fn test_blank_address_fields() {
        let mut shipping_address = address();
        shipping_address.city = "  ".into();
        shipping_address.country = String::new();
        let request = CreateOrderRequest {
            items: vec![line("mug", 1)],
            shipping_address,
        };
        assert_eq!(
            fields(validate_request(&request).unwrap_err()),
            ["shippingAddress.city", "shippingAddress.country"]
        );
    }

    #[test]
    fn test_pricing_uses_catalog() {
        let lines = vec![
            ValidLine {
                product_id: ProductId::new("mug"),
                quantity: 2,
            },
            ValidLine {
                product_id: ProductId::new("tee"),
                quantity: 1,
            },
        ];
        let products = vec![
            product("mug", "12.50", Currency::Usd, true),
            product("tee", "20.00", Currency::Usd, true),
        ];

        let (items, total, currency) = price_items(&lines, &products).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "MUG");
        assert_eq!(total, Decimal::from_str("45.00").unwrap());
        assert_eq!(currency, Currency::Usd);
    }

    #[test]
    fn test_pricing_rejects_unavailable_and_mixed_currency() {
        let lines = vec![
            ValidLine {
                product_id: ProductId::new("mug"),
                quantity: 1,
            },
            ValidLine {
                product_id: ProductId::new("retired"),
                quantity: 1,
            },
            ValidLine {
                product_id: ProductId::new("ghost"),
                quantity: 1,
            },
            ValidLine {
                product_id: ProductId::new("scarf"),
                quantity: 1,
            },
        ];
        let products = vec![
            product("mug", "12.50", Currency::Usd, true),
            product("retired", "5.00", Currency::Usd, false),
            product("scarf", "30.00", Currency::Eur, true),
        ];

        assert_eq!(
            fields(price_items(&lines, &products).unwrap_err()),
            ["items[1].productId", "items[2].productId", "items[3].productId"]
        );
    }

    mod checkout {
        use std::sync::Mutex;

        use axum::http::StatusCode;
        use chrono::Utc;
        use emporium_core::Price;

        use super::super::*;
        use super::address;
        use crate::error::AppError;
        use crate::services::payments::PaymentIntent;

        #[derive(Default)]
        struct MemoryLedger {
            orders: Mutex<HashMap<OrderId, Order>>,
            fail_attach: bool,
        }

        impl MemoryLedger {
            fn status(&self, id: OrderId) -> OrderStatus {
                self.orders.lock().unwrap()[&id].status
            }
        }

        #[async_trait]
        impl OrderLedger for MemoryLedger {
            async fn insert(&self, order: &NewOrder) -> Result<Order, RepositoryError> {
                let now = Utc::now();
                let order = Order {
                    id: order.id,
                    user_id: order.user_id.clone(),
                    items: order.items.clone(),
                    shipping_address: order.shipping_address.clone(),
                    total: order.total,
                    currency: order.currency,
                    status: OrderStatus::Pending,
                    payment_intent_id: None,
                    created_at: now,
                    updated_at: now,
                };
                self.orders.lock().unwrap().insert(order.id, order.clone());
                Ok(order)
            }

            async fn attach_payment_intent(
                &self,
                id: OrderId,
                payment_intent_id: &str,
            ) -> Result<Order, RepositoryError> {
                if self.fail_attach {
                    return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
                }
                let mut orders = self.orders.lock().unwrap();
                let order = orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
                order.payment_intent_id = Some(payment_intent_id.to_owned());
                Ok(order.clone())
            }

            async fn set_status(
                &self,
                id: OrderId,
                status: OrderStatus,
            ) -> Result<(), RepositoryError> {
                let mut orders = self.orders.lock().unwrap();
                orders.get_mut(&id).ok_or(RepositoryError::NotFound)?.status = status;
                Ok(())
            }
        }

        #[derive(Default)]
        struct RecordingGateway {
            fail_create: bool,
            created: Mutex<Vec<OrderId>>,
            cancelled: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl PaymentGateway for RecordingGateway {
            async fn create_payment_intent(
                &self,
                order_id: OrderId,
                _amount: &Price,
            ) -> Result<PaymentIntent, PaymentError> {
                if self.fail_create {
                    return Err(PaymentError::Api {
                        status: 402,
                        message: "card declined".into(),
                    });
                }
                let mut created = self.created.lock().unwrap();
                created.push(order_id);
                Ok(PaymentIntent {
                    id: format!("pi_{}", created.len()),
                    client_secret: Some("pi_secret".into()),
                    status: "requires_payment_method".into(),
                })
            }

            async fn cancel_payment_intent(&self, intent_id: &str) -> Result<(), PaymentError> {
                self.cancelled.lock().unwrap().push(intent_id.to_owned());
                Ok(())
            }
        }

        fn new_order() -> NewOrder {
            NewOrder {
                id: OrderId::generate(),
                user_id: Uid::new("shopper"),
                items: vec![OrderItem {
                    product_id: ProductId::new("mug"),
                    name: "MUG".into(),
                    unit_price: Decimal::new(1250, 2),
                    quantity: 2,
                }],
                shipping_address: address(),
                total: Decimal::new(2500, 2),
                currency: Currency::Usd,
            }
        }

        #[tokio::test]
        async fn test_checkout_attaches_intent() {
            let ledger = MemoryLedger::default();
            let gateway = RecordingGateway::default();
            let order = new_order();

            let placed = Checkout::new(&ledger, Some(&gateway)).run(&order).await.unwrap();

            assert_eq!(placed.order.status, OrderStatus::Pending);
            assert_eq!(placed.order.payment_intent_id.as_deref(), Some("pi_1"));
            assert_eq!(placed.client_secret.as_deref(), Some("pi_secret"));
            assert!(gateway.cancelled.lock().unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_checkout_without_payments_leaves_order_pending() {
            let ledger = MemoryLedger::default();
            let order = new_order();

            let placed = Checkout::new(&ledger, None).run(&order).await.unwrap();

            assert_eq!(placed.order.status, OrderStatus::Pending);
            assert!(placed.order.payment_intent_id.is_none());
            assert!(placed.client_secret.is_none());
        }

        #[tokio::test]
        async fn test_failed_intent_cancels_order() {
            let ledger = MemoryLedger::default();
            let gateway = RecordingGateway {
                fail_create: true,
                ..RecordingGateway::default()
            };
            let order = new_order();

            let err = Checkout::new(&ledger, Some(&gateway)).run(&order).await.unwrap_err();

            assert!(matches!(err, OrderError::Payment(PaymentError::Api { status: 402, .. })));
            assert_eq!(ledger.status(order.id), OrderStatus::Cancelled);
            assert!(gateway.cancelled.lock().unwrap().is_empty());
            assert_eq!(AppError::from(err).status(), StatusCode::INTERNAL_SERVER_ERROR);
        }

        #[tokio::test]
        async fn test_failed_attach_cancels_intent_and_order() {
            let ledger = MemoryLedger {
                fail_attach: true,
                ..MemoryLedger::default()
            };
            let gateway = RecordingGateway::default();
            let order = new_order();

            let err = Checkout::new(&ledger, Some(&gateway)).run(&order).await.unwrap_err();

            assert!(matches!(err, OrderError::Repository(RepositoryError::Database(_))));
            assert_eq!(*gateway.cancelled.lock().unwrap(), ["pi_1"]);
            assert_eq!(ledger.status(order.id), OrderStatus::Cancelled);
            assert_eq!(AppError::from(err).status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
