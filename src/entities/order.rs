use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(regex(path = "crate::services::order_numbers::ORDER_NUMBER_RE"))]
    pub order_number: String,

    pub customer_id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,

    /// Point-in-time snapshot of the purchased line items. Not a foreign key
    /// into the live catalog; later catalog edits never rewrite history.
    pub items: Json,

    pub total_amount: Decimal,
    pub currency: String,

    pub pickup_date: NaiveDate,
    pub pickup_time: String,

    pub payment_method: String,
    pub payment_status: String,
    pub status: String,

    pub requires_preauth: bool,
    pub preauth_status: Option<String>,
    pub preauth_amount: Option<Decimal>,
    pub preauth_expires_at: Option<DateTime<Utc>>,

    /// External payment session / setup-intent id. Unique: one order per
    /// confirmation token.
    pub payment_reference: Option<String>,

    pub special_code_id: Option<Uuid>,
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::scheduled_reminder::Entity")]
    ScheduledReminders,
}

impl Related<super::scheduled_reminder::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ScheduledReminders.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {}

/// One line of an order, as snapshotted into the `items` column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<Uuid>,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl OrderItem {
    pub fn subtotal(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

impl Model {
    /// Deserialize the snapshotted line items.
    pub fn line_items(&self) -> Result<Vec<OrderItem>, serde_json::Error> {
        serde_json::from_value(self.items.clone())
    }
}
