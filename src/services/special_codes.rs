use crate::{
    entities::special_code::{self, Entity as SpecialCodeEntity, Model as SpecialCodeModel},
    errors::ServiceError,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Unambiguous alphabet for generated codes (no O/0, I/1).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 8;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SpecialCodeResponse {
    pub id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub used_by_order: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<SpecialCodeModel> for SpecialCodeResponse {
    fn from(model: SpecialCodeModel) -> Self {
        Self {
            id: model.id,
            code: model.code,
            expires_at: model.expires_at,
            used: model.used,
            used_at: model.used_at,
            used_by_order: model.used_by_order,
            created_at: model.created_at,
        }
    }
}

/// One-time codes that waive the first-order pre-authorization requirement.
#[derive(Clone)]
pub struct SpecialCodeService {
    db: Arc<DatabaseConnection>,
}

impl SpecialCodeService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Look up a code and verify it is redeemable. Read-only: consumption
    /// happens inside the order-creation transaction.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<SpecialCodeModel, ServiceError> {
        let normalized = code.trim().to_ascii_uppercase();

        let model = SpecialCodeEntity::find()
            .filter(special_code::Column::Code.eq(normalized.clone()))
            .one(&*self.db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::ValidationError("Invalid special code".to_string()))?;

        if model.used {
            return Err(ServiceError::ValidationError(
                "Special code has already been used".to_string(),
            ));
        }
        if model.expires_at <= now {
            return Err(ServiceError::ValidationError(
                "Special code has expired".to_string(),
            ));
        }

        Ok(model)
    }

    /// Flip a code to used inside the caller's transaction. Re-checks the
    /// used flag under the transaction so two concurrent orders cannot both
    /// redeem it.
    pub async fn consume_in_txn(
        &self,
        txn: &DatabaseTransaction,
        code_id: Uuid,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let model = SpecialCodeEntity::find_by_id(code_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Special code not found".to_string()))?;

        if model.used {
            warn!(code_id = %code_id, "Special code consumed concurrently");
            return Err(ServiceError::Conflict(
                "Special code has already been used".to_string(),
            ));
        }

        let mut active: special_code::ActiveModel = model.into();
        active.used = Set(true);
        active.used_at = Set(Some(now));
        active.used_by_order = Set(Some(order_id));
        active.update(txn).await.map_err(ServiceError::db_error)?;

        Ok(())
    }

    /// Generate a fresh code for the back office.
    #[instrument(skip(self))]
    pub async fn generate(&self, expires_in_days: i64) -> Result<SpecialCodeResponse, ServiceError> {
        if expires_in_days <= 0 {
            return Err(ServiceError::ValidationError(
                "Expiry must be at least one day".to_string(),
            ));
        }

        let now = Utc::now();
        let code = random_code();

        let model = special_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            expires_at: Set(now + Duration::days(expires_in_days)),
            used: Set(false),
            used_at: Set(None),
            used_by_order: Set(None),
            created_at: Set(now),
        };

        let inserted = model.insert(&*self.db).await.map_err(ServiceError::db_error)?;
        info!(code = %code, "Special code generated");

        Ok(inserted.into())
    }

    /// List codes, newest first.
    pub async fn list(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<SpecialCodeResponse>, u64), ServiceError> {
        let paginator = SpecialCodeEntity::find()
            .order_by_desc(special_code::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let codes = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::db_error)?;

        Ok((codes.into_iter().map(Into::into).collect(), total))
    }
}

fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_unambiguous_alphabet() {
        for _ in 0..50 {
            let code = random_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
            assert!(!code.contains('O') && !code.contains('0'));
        }
    }

    #[test]
    fn redeemable_checks_used_and_expiry() {
        let now = Utc::now();
        let base = SpecialCodeModel {
            id: Uuid::new_v4(),
            code: "ABCD2345".to_string(),
            expires_at: now + Duration::days(1),
            used: false,
            used_at: None,
            used_by_order: None,
            created_at: now,
        };
        assert!(base.is_redeemable(now));

        let used = SpecialCodeModel {
            used: true,
            ..base.clone()
        };
        assert!(!used.is_redeemable(now));

        let expired = SpecialCodeModel {
            expires_at: now - Duration::minutes(1),
            ..base
        };
        assert!(!expired.is_redeemable(now));
    }
}
