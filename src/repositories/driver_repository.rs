use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::DriverRepository;
use crate::models::Driver;
use crate::utils::errors::AppResult;

#[derive(Debug, sqlx::FromRow)]
struct DriverRow {
    id: Uuid,
    name: String,
    code: Option<String>,
    mobile: Option<String>,
}

impl From<DriverRow> for Driver {
    fn from(row: DriverRow) -> Self {
        Driver {
            id: row.id,
            name: row.name,
            code: row.code,
            mobile: row.mobile,
        }
    }
}

pub struct PgDriverRepository {
    pool: PgPool,
}

impl PgDriverRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DriverRepository for PgDriverRepository {
    async fn find_by_name_or_code(&self, name_or_code: &str) -> AppResult<Option<Driver>> {
        let needle = name_or_code.trim().to_lowercase();
        let driver = sqlx::query_as::<_, DriverRow>(
            r#"
            SELECT id, name, code, mobile FROM drivers
            WHERE LOWER(name) = $1 OR LOWER(code) = $1
            ORDER BY (LOWER(name) = $1) DESC
            LIMIT 1
            "#,
        )
        .bind(needle)
        .fetch_optional(&self.pool)
        .await?;

        Ok(driver.map(Driver::from))
    }
}
