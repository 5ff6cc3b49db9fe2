//! Order repository and analytics queries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use emporium_core::{Currency, OrderId, OrderStatus, ProductId, Uid};

use super::RepositoryError;
use crate::models::{AnalyticsSummary, Order, OrderItem, ShippingAddress, TopProduct};

/// Statuses that count as revenue, as a SQL list.
const REVENUE_STATUSES: &str = "('paid', 'shipped', 'delivered')";

const ORDER_COLUMNS: &str = "id, user_id, items, shipping_address, total, currency, status, \
                             payment_intent_id, created_at, updated_at";

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: String,
    items: Json<Vec<OrderItem>>,
    shipping_address: Json<ShippingAddress>,
    total: Decimal,
    currency: String,
    status: OrderStatus,
    payment_intent_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let currency = row.currency.parse::<Currency>().map_err(|e| {
            RepositoryError::DataCorruption(format!("order {}: {e}", row.id))
        })?;

        Ok(Self {
            id: OrderId::from_uuid(row.id),
            user_id: Uid::new(row.user_id),
            items: row.items.0,
            shipping_address: row.shipping_address.0,
            total: row.total,
            currency,
            status: row.status,
            payment_intent_id: row.payment_intent_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TopProductRow {
    product_id: Option<String>,
    name: Option<String>,
    units_sold: i64,
    revenue: Decimal,
}

/// Outcome of applying a payment event to the order that owns the intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatusUpdate {
    /// The order moved to the event's status.
    Applied(OrderId),
    /// The order's current status does not accept the event.
    Unchanged { order_id: OrderId, current: OrderStatus },
    /// No order references the intent.
    UnknownIntent,
}

/// An order ready to be inserted in `pending` state.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: Uid,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub total: Decimal,
    pub currency: Currency,
}

/// Repository for order database operations.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new `pending` order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the order id already exists.
    /// Returns `RepositoryError::Database` for other database errors.
    pub async fn create(&self, order: &NewOrder) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            INSERT INTO orders (id, user_id, items, shipping_address, total, currency, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_str())
        .bind(Json(&order.items))
        .bind(Json(&order.shipping_address))
        .bind(order.total)
        .bind(order.currency.as_str())
        .fetch_one(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict("order already exists".to_owned());
            }
            RepositoryError::Database(e)
        })?;

        row.try_into()
    }

    /// A customer's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_for_user(&self, user_id: &Uid) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC
            "
        ))
        .bind(user_id.as_str())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    /// All orders, optionally filtered by status, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE ($1::order_status IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    /// Record the payment intent created for an order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn attach_payment_intent(
        &self,
        id: OrderId,
        payment_intent_id: &str,
    ) -> Result<Order, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r"
            UPDATE orders
            SET payment_intent_id = $2, updated_at = now()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(id.as_uuid())
        .bind(payment_intent_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        row.try_into()
    }

    /// Set an order's status.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    /// Returns `RepositoryError::Database` if the update fails.
    pub async fn set_status(&self, id: OrderId, status: OrderStatus) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE orders SET status = $2, updated_at = now()
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .bind(status)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    /// Move the order that owns a payment intent to `status`, but only from a
    /// status listed by [`OrderStatus::payment_event_sources`].
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    pub async fn set_status_by_payment_intent(
        &self,
        payment_intent_id: &str,
        status: OrderStatus,
    ) -> Result<PaymentStatusUpdate, RepositoryError> {
        let sources: Vec<String> = status
            .payment_event_sources()
            .iter()
            .map(|s| s.as_str().to_owned())
            .collect();

        let updated: Option<Uuid> = sqlx::query_scalar(
            r"
            UPDATE orders SET status = $2, updated_at = now()
            WHERE payment_intent_id = $1 AND status::TEXT = ANY($3)
            RETURNING id
            ",
        )
        .bind(payment_intent_id)
        .bind(status)
        .bind(sources)
        .fetch_optional(self.pool)
        .await?;

        if let Some(id) = updated {
            return Ok(PaymentStatusUpdate::Applied(OrderId::from_uuid(id)));
        }

        let current: Option<(Uuid, OrderStatus)> = sqlx::query_as(
            r"
            SELECT id, status FROM orders
            WHERE payment_intent_id = $1
            ",
        )
        .bind(payment_intent_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(current.map_or(PaymentStatusUpdate::UnknownIntent, |(id, current)| {
            PaymentStatusUpdate::Unchanged {
                order_id: OrderId::from_uuid(id),
                current,
            }
        }))
    }

    /// Store-wide analytics.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if any query fails.
    pub async fn analytics(&self, top_n: i64) -> Result<AnalyticsSummary, RepositoryError> {
        let (order_count, total_revenue): (i64, Decimal) = sqlx::query_as(&format!(
            r"
            SELECT COUNT(*)::BIGINT, COALESCE(SUM(total), 0)
            FROM orders
            WHERE status IN {REVENUE_STATUSES}
            "
        ))
        .fetch_one(self.pool)
        .await?;

        let by_status: Vec<(String, i64)> = sqlx::query_as(
            r"
            SELECT status::TEXT, COUNT(*)::BIGINT
            FROM orders
            GROUP BY status
            ",
        )
        .fetch_all(self.pool)
        .await?;

        let mut orders_by_status: BTreeMap<String, i64> = OrderStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_owned(), 0))
            .collect();
        orders_by_status.extend(by_status);

        let top_rows = sqlx::query_as::<_, TopProductRow>(&format!(
            r"
            SELECT item->>'productId' AS product_id,
                   MAX(item->>'name') AS name,
                   SUM((item->>'quantity')::BIGINT)::BIGINT AS units_sold,
                   SUM((item->>'unitPrice')::NUMERIC * (item->>'quantity')::NUMERIC) AS revenue
            FROM orders o
            CROSS JOIN LATERAL jsonb_array_elements(o.items) AS item
            WHERE o.status IN {REVENUE_STATUSES}
            GROUP BY item->>'productId'
            ORDER BY units_sold DESC, product_id
            LIMIT $1
            "
        ))
        .bind(top_n)
        .fetch_all(self.pool)
        .await?;

        let top_products = top_rows
            .into_iter()
            .filter_map(|row| {
                Some(TopProduct {
                    product_id: ProductId::new(row.product_id?),
                    name: row.name.unwrap_or_default(),
                    units_sold: row.units_sold,
                    revenue: row.revenue,
                })
            })
            .collect();

        Ok(AnalyticsSummary {
            order_count,
            total_revenue,
            average_order_value: AnalyticsSummary::average(total_revenue, order_count),
            orders_by_status,
            top_products,
        })
    }
}
