//! Catalog product as seen by checkout.

use rust_decimal::Decimal;

use emporium_core::{Currency, Price, ProductId};

/// A product row. Checkout reads prices from here, never from the client.
#[derive(Debug, Clone)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub currency: Currency,
    pub active: bool,
}

impl Product {
    #[must_use]
    pub const fn unit_price(&self) -> Price {
        Price::new(self.price, self.currency)
    }
}
