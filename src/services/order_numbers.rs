use crate::{
    entities::order::{self, Entity as OrderEntity},
    errors::ServiceError,
};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, PaginatorTrait,
    QueryFilter, Statement,
};
use std::sync::Arc;
use tracing::{instrument, warn};

/// `DDMMYY-NNN`: two-digit day, month and year, then a 3-digit daily sequence.
pub static ORDER_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{6}-\d{3}$").unwrap());

/// How many times the defensive existence check may bump the sequence before
/// giving up on the counter value.
const MAX_COLLISION_BUMPS: u32 = 5;

pub fn format_order_number(date: NaiveDate, seq: u32) -> String {
    format!("{}-{:03}", date.format("%d%m%y"), seq)
}

/// Issues daily-sequential order numbers from the `order_counters` table.
///
/// The counter is bumped with a single conditional upsert, so concurrent
/// writers never see the same sequence value. The unique constraint on
/// `orders.order_number` remains the backstop: the materializer retries on
/// conflict.
#[derive(Clone)]
pub struct OrderNumberGenerator {
    db: Arc<DatabaseConnection>,
}

impl OrderNumberGenerator {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Next order number for the given instant.
    ///
    /// If the store cannot serve the counter, falls back to a
    /// timestamp-derived suffix instead of failing the order outright.
    #[instrument(skip(self))]
    pub async fn next(&self, now: DateTime<Utc>) -> Result<String, ServiceError> {
        let date = now.date_naive();

        let seq = match self.next_sequence(date).await {
            Ok(seq) => seq,
            Err(e) => {
                warn!(error = %e, "Order counter unavailable; falling back to timestamp suffix");
                let fallback = (now.timestamp_millis() % 1000) as u32;
                return Ok(format_order_number(date, fallback));
            }
        };

        // The counter should already be collision-free; the existence check
        // guards against a manually reset counter row.
        let mut seq = seq;
        for _ in 0..MAX_COLLISION_BUMPS {
            let candidate = format_order_number(date, seq);
            match self.number_exists(&candidate).await {
                Ok(false) => return Ok(candidate),
                Ok(true) => {
                    warn!(order_number = %candidate, "Order number already taken; bumping sequence");
                    seq += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Existence check failed; using candidate as-is");
                    return Ok(candidate);
                }
            }
        }

        Ok(format_order_number(date, seq))
    }

    /// Atomically bump and fetch the per-day sequence.
    async fn next_sequence(&self, date: NaiveDate) -> Result<u32, sea_orm::DbErr> {
        let day = date.format("%Y-%m-%d").to_string();
        let backend = self.db.get_database_backend();

        let sql = match backend {
            DbBackend::Postgres => {
                "INSERT INTO order_counters (day, last_seq) VALUES ($1, 1) \
                 ON CONFLICT (day) DO UPDATE SET last_seq = order_counters.last_seq + 1 \
                 RETURNING last_seq"
            }
            _ => {
                "INSERT INTO order_counters (day, last_seq) VALUES (?, 1) \
                 ON CONFLICT (day) DO UPDATE SET last_seq = order_counters.last_seq + 1 \
                 RETURNING last_seq"
            }
        };

        let stmt = Statement::from_sql_and_values(backend, sql, [day.into()]);
        let row = self
            .db
            .query_one(stmt)
            .await?
            .ok_or_else(|| sea_orm::DbErr::Custom("counter upsert returned no row".to_string()))?;

        let seq: i32 = row.try_get("", "last_seq")?;
        Ok(seq as u32)
    }

    async fn number_exists(&self, number: &str) -> Result<bool, sea_orm::DbErr> {
        let count = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(number))
            .count(&*self.db)
            .await?;
        Ok(count > 0)
    }
}
