//! Status enums for users and orders.

use serde::{Deserialize, Serialize};

/// Role recorded on the mirrored user profile.
///
/// This is a display copy of the identity provider's `admin` claim. It is
/// never consulted for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "user_role", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Regular shopper.
    #[default]
    Customer,
    /// Holds the admin claim.
    Admin,
}

impl UserRole {
    /// Role matching an admin flag.
    #[must_use]
    pub const fn from_admin(admin: bool) -> Self {
        if admin { Self::Admin } else { Self::Customer }
    }

    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "admin" => Ok(Self::Admin),
            _ => Err(format!("invalid user role: {s}")),
        }
    }
}

/// Lifecycle of an order.
///
/// Orders start `Pending`; the payment webhook moves them to `Paid`,
/// `PaymentFailed` or `Cancelled`, and a failed checkout compensation moves
/// them to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Paid,
    PaymentFailed,
    Cancelled,
    Shipped,
    Delivered,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Paid,
        Self::PaymentFailed,
        Self::Cancelled,
        Self::Shipped,
        Self::Delivered,
    ];

    /// Whether the order counts towards revenue.
    #[must_use]
    pub const fn is_revenue(self) -> bool {
        matches!(self, Self::Paid | Self::Shipped | Self::Delivered)
    }

    /// Statuses a payment event may move an order out of when it targets
    /// `self`.
    ///
    /// Payment events are redelivered and arrive out of order, so they only
    /// move an order forward from an unpaid state. A repeated event is a no-op.
    #[must_use]
    pub const fn payment_event_sources(self) -> &'static [Self] {
        match self {
            Self::Paid | Self::Cancelled => &[Self::Pending, Self::PaymentFailed],
            Self::PaymentFailed => &[Self::Pending],
            Self::Pending | Self::Shipped | Self::Delivered => &[],
        }
    }

    /// Whether a payment event targeting `target` may update an order in
    /// this status.
    #[must_use]
    pub fn accepts_payment_event(self, target: Self) -> bool {
        target.payment_event_sources().contains(&self)
    }

    /// Snake-case name as stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::PaymentFailed => "payment_failed",
            Self::Cancelled => "cancelled",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid order status: {s}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_round_trips_through_str() {
        for status in OrderStatus::ALL {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_order_status_serde_matches_display() {
        let json = serde_json::to_string(&OrderStatus::PaymentFailed).unwrap();
        assert_eq!(json, "\"payment_failed\"");
    }

    #[test]
    fn test_revenue_statuses() {
        assert!(OrderStatus::Paid.is_revenue());
        assert!(OrderStatus::Delivered.is_revenue());
        assert!(!OrderStatus::Pending.is_revenue());
        assert!(!OrderStatus::Cancelled.is_revenue());
    }

    #[test]
    fn test_payment_events_move_orders_forward_only() {
        use OrderStatus::{Cancelled, Delivered, Paid, PaymentFailed, Pending, Shipped};

        assert!(Pending.accepts_payment_event(Paid));
        assert!(PaymentFailed.accepts_payment_event(Paid));
        assert!(Pending.accepts_payment_event(PaymentFailed));
        assert!(Pending.accepts_payment_event(Cancelled));
        assert!(PaymentFailed.accepts_payment_event(Cancelled));

        // Redelivered success on an order that has moved on.
        for current in [Paid, Shipped, Delivered, Cancelled] {
            assert!(!current.accepts_payment_event(Paid), "{current}");
        }
        // Late failure after payment.
        for current in [Paid, Shipped, Delivered, Cancelled, PaymentFailed] {
            assert!(!current.accepts_payment_event(PaymentFailed), "{current}");
        }
        assert!(!Paid.accepts_payment_event(Cancelled));
        assert!(!Shipped.accepts_payment_event(Cancelled));

        // Webhooks never target fulfilment statuses.
        for target in [Pending, Shipped, Delivered] {
            assert!(target.payment_event_sources().is_empty());
        }
    }

    #[test]
    fn test_user_role_from_admin() {
        assert_eq!(UserRole::from_admin(true), UserRole::Admin);
        assert_eq!(UserRole::from_admin(false), UserRole::Customer);
        assert_eq!("admin".parse::<UserRole>().unwrap(), UserRole::Admin);
    }
}
