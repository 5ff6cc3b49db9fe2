//! Admin analytics view.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use emporium_core::ProductId;

/// Store-wide order statistics.
///
/// Revenue figures only count orders in a revenue status
/// (paid, shipped, delivered). `orders_by_status` counts every order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub order_count: i64,
    pub total_revenue: Decimal,
    pub average_order_value: Decimal,
    pub orders_by_status: BTreeMap<String, i64>,
    pub top_products: Vec<TopProduct>,
}

/// A best-selling product by units.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    pub product_id: ProductId,
    pub name: String,
    pub units_sold: i64,
    pub revenue: Decimal,
}

impl AnalyticsSummary {
    /// Average order value rounded to cents; zero when there are no orders.
    #[must_use]
    pub fn average(total_revenue: Decimal, order_count: i64) -> Decimal {
        if order_count <= 0 {
            return Decimal::ZERO;
        }
        (total_revenue / Decimal::from(order_count)).round_dp(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_handles_zero_orders() {
        assert_eq!(AnalyticsSummary::average(Decimal::ZERO, 0), Decimal::ZERO);
        assert_eq!(
            AnalyticsSummary::average(Decimal::from(100), 3),
            Decimal::new(3333, 2)
        );
    }
}
