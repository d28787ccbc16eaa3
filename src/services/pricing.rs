use crate::{
    entities::{
        order::OrderItem,
        product::{self, Entity as ProductEntity},
    },
    errors::ServiceError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Client-sent price drift beyond this is logged; the catalog price wins
/// either way.
const PRICE_DRIFT_TOLERANCE: Decimal = dec!(0.01);

/// A line item as submitted by the client. The price is advisory: the
/// catalog is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<Decimal>,
    pub quantity: u32,
    #[serde(default)]
    pub size: Option<String>,
}

/// Prices intake line items against the catalog. Client-supplied prices are
/// never trusted for the total.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolve every line against the catalog and compute the order total.
    #[instrument(skip(self, items))]
    pub async fn price_items(
        &self,
        items: &[OrderItemInput],
    ) -> Result<(Vec<OrderItem>, Decimal), ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one item".to_string(),
            ));
        }

        let mut priced = Vec::with_capacity(items.len());
        let mut total = Decimal::ZERO;

        for item in items {
            if item.quantity == 0 {
                return Err(ServiceError::ValidationError(
                    "Item quantity must be at least 1".to_string(),
                ));
            }

            let product = ProductEntity::find_by_id(item.product_id)
                .one(&*self.db)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Unknown product: {}",
                        item.product_id
                    ))
                })?;

            if !product.active {
                return Err(ServiceError::ValidationError(format!(
                    "Product no longer available: {}",
                    product.name
                )));
            }

            if let Some(claimed) = item.price {
                let drift = (claimed - product.price).abs();
                if drift > PRICE_DRIFT_TOLERANCE {
                    warn!(
                        product_id = %product.id,
                        claimed = %claimed,
                        catalog = %product.price,
                        "Client price drifted from catalog; using catalog price"
                    );
                }
            }

            let line = OrderItem {
                product_id: Some(product.id),
                name: product.name.clone(),
                price: product.price,
                quantity: item.quantity,
                size: item.size.clone(),
            };
            total += line.subtotal();
            priced.push(line);
        }

        Ok((priced, total))
    }
}

/// Helper shared by services and tests: the invariant total for a priced
/// item set.
pub fn items_total(items: &[OrderItem]) -> Decimal {
    items.iter().map(OrderItem::subtotal).sum()
}
