//! Common test utilities
#![allow(dead_code)]

use logistics_core::db::{begin_tenant_transaction, MIGRATION_SQL};
use logistics_core::{Money, TenantId};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tokio::sync::OnceCell;
use uuid::Uuid;

static MIGRATED: OnceCell<()> = OnceCell::const_new();

/// Serializes schema setup across test binaries sharing one database
const MIGRATION_LOCK_KEY: i64 = 7_242_001;

/// Connect to `DATABASE_URL` and apply the schema.
///
/// Returns `None` when no database is configured so the suite still runs
/// (and skips) on machines without Postgres.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set; skipping database test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    MIGRATED
        .get_or_init(|| async {
            let mut conn = pool.acquire().await.expect("Failed to acquire connection");
            sqlx::query("SELECT pg_advisory_lock($1)")
                .bind(MIGRATION_LOCK_KEY)
                .execute(&mut *conn)
                .await
                .expect("Failed to take migration lock");
            (&mut *conn)
                .execute(MIGRATION_SQL)
                .await
                .expect("Failed to apply schema");
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(MIGRATION_LOCK_KEY)
                .execute(&mut *conn)
                .await
                .expect("Failed to release migration lock");
        })
        .await;

    Some(pool)
}

/// Fresh tenant per test keeps parallel tests from seeing each other's rows
pub fn new_tenant() -> TenantId {
    TenantId::new(Uuid::new_v4())
}

/// Insert an order owned by `tenant`, through the tenant's RLS scope
pub async fn seed_order(pool: &PgPool, tenant: TenantId, base_total: Money) -> Uuid {
    let order_id = Uuid::new_v4();
    let mut tx = begin_tenant_transaction(pool, tenant)
        .await
        .expect("Failed to begin tenant transaction");
    sqlx::query(
        r#"
        INSERT INTO orders (id, tenant_id, base_total_minor, currency)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(order_id)
    .bind(tenant.as_uuid())
    .bind(base_total.to_decimal().unwrap())
    .bind(base_total.currency().as_str())
    .execute(&mut *tx)
    .await
    .expect("Failed to seed order");
    tx.commit().await.expect("Failed to commit seeded order");
    order_id
}

/// Adjustment ids are globally unique; suffix them per run
pub fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

pub fn usd(minor: i128) -> Money {
    Money::new(minor, "USD").unwrap()
}
