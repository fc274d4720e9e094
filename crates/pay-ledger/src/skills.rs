//! Read-only view of the shared `skills` table.

use async_trait::async_trait;
use pay_core::{
    Currency, PaymentError, PaymentResult, Price, PriceType, Skill, SkillDirectory,
};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Skill lookup against the catalog's `skills` table.
///
/// Prices there are `DECIMAL(10,2)` in the shop currency; they are converted
/// to minor units in SQL.
#[derive(Clone)]
pub struct PgSkillDirectory {
    pool: PgPool,
    currency: Currency,
}

impl PgSkillDirectory {
    pub fn new(pool: PgPool, currency: Currency) -> Self {
        Self { pool, currency }
    }
}

#[async_trait]
impl SkillDirectory for PgSkillDirectory {
    async fn find_skill(&self, skill_id: Uuid) -> PaymentResult<Option<Skill>> {
        let scale = 10_i64.pow(self.currency.decimal_places());

        let row = sqlx::query(
            r#"
            SELECT id, name, price_type, is_active,
                   ROUND(price * $2)::BIGINT AS price_minor
            FROM skills
            WHERE id = $1
            "#,
        )
        .bind(skill_id)
        .bind(scale)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PaymentError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let get_err = |e: sqlx::Error| PaymentError::Storage(e.to_string());
        let price_type: String = row.try_get("price_type").map_err(get_err)?;

        Ok(Some(Skill {
            id: row.try_get("id").map_err(get_err)?,
            name: row.try_get("name").map_err(get_err)?,
            price: Price::from_minor(row.try_get("price_minor").map_err(get_err)?, self.currency),
            price_type: if price_type == "free" {
                PriceType::Free
            } else {
                PriceType::Paid
            },
            is_active: row.try_get("is_active").map_err(get_err)?,
        }))
    }
}
