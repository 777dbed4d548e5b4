//! Ledger Integration Tests

use logistics_core::ledger::{LedgerError, LedgerRepository};
use logistics_core::{DomainError, Money, TenantContext};
use uuid::Uuid;

mod common;
use common::usd;

async fn outbox_rows_for(pool: &sqlx::PgPool, order_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events WHERE aggregate_id = $1")
        .bind(order_id.to_string())
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_adjustment_e2e_and_duplicate_rejection() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let tenant = common::new_tenant();
    let order_id = common::seed_order(&pool, tenant, usd(1000)).await;
    let ledger = LedgerRepository::new(pool.clone());
    let adj1 = common::unique_id("ADJ1");

    TenantContext::scope(tenant, async {
        let adjustment = ledger
            .add_adjustment(order_id, usd(-200), "late delivery", "dispatcher", &adj1)
            .await
            .unwrap();
        assert_eq!(adjustment.amount, usd(-200));
        assert_eq!(adjustment.tenant_id, tenant);

        assert_eq!(ledger.get_net_order_total(order_id).await.unwrap(), usd(800));

        // Retry of the same financial fact
        let err = ledger
            .add_adjustment(order_id, usd(-200), "late delivery", "dispatcher", &adj1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::DuplicateAdjustment { .. })
        ));

        assert_eq!(ledger.get_net_order_total(order_id).await.unwrap(), usd(800));
        assert_eq!(ledger.list_adjustments(order_id).await.unwrap().len(), 1);
    })
    .await;

    // One event for the one committed adjustment; the rejected retry rolled back
    assert_eq!(outbox_rows_for(&pool, order_id).await, 1);
}

#[tokio::test]
async fn test_adjustment_emits_outbox_event() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let tenant = common::new_tenant();
    let order_id = common::seed_order(&pool, tenant, usd(5000)).await;
    let ledger = LedgerRepository::new(pool.clone());
    let adjustment_id = common::unique_id("ADJ");

    TenantContext::scope(tenant, async {
        ledger
            .add_adjustment(order_id, usd(150), "detention fee", "ops-lead", &adjustment_id)
            .await
            .unwrap();
    })
    .await;

    let (tenant_id, aggregate_type, event_type, status, payload): (
        Uuid,
        String,
        String,
        String,
        serde_json::Value,
    ) = sqlx::query_as(
        r#"
        SELECT tenant_id, aggregate_type, event_type, status, payload
        FROM outbox_events
        WHERE aggregate_id = $1
        "#,
    )
    .bind(order_id.to_string())
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(tenant_id, tenant.as_uuid());
    assert_eq!(aggregate_type, "Order");
    assert_eq!(event_type, "OrderAdjustmentRecorded");
    assert_eq!(status, "pending");
    assert_eq!(payload["adjustment_id"], adjustment_id.as_str());
    assert_eq!(payload["amount"]["amount"], "150");
    assert_eq!(payload["amount"]["currency"], "USD");
}

#[tokio::test]
async fn test_missing_order_is_not_found() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let tenant = common::new_tenant();
    let ledger = LedgerRepository::new(pool.clone());
    let missing = Uuid::new_v4();

    TenantContext::scope(tenant, async {
        let err = ledger
            .add_adjustment(missing, usd(-1), "typo", "ops", &common::unique_id("ADJ"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::OrderNotFound(_))));

        let err = ledger.get_net_order_total(missing).await.unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::OrderNotFound(_))));
    })
    .await;

    assert_eq!(outbox_rows_for(&pool, missing).await, 0);
}

#[tokio::test]
async fn test_other_tenants_order_is_invisible() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let owner = common::new_tenant();
    let intruder = common::new_tenant();
    let order_id = common::seed_order(&pool, owner, usd(1000)).await;
    let ledger = LedgerRepository::new(pool.clone());

    TenantContext::scope(intruder, async {
        let err = ledger
            .add_adjustment(order_id, usd(-999), "refund", "mallory", &common::unique_id("ADJ"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::OrderNotFound(_))));

        let err = ledger.get_net_order_total(order_id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::OrderNotFound(_))));
        assert!(ledger.list_adjustments(order_id).await.unwrap().is_empty());
    })
    .await;

    TenantContext::scope(owner, async {
        assert_eq!(ledger.get_net_order_total(order_id).await.unwrap(), usd(1000));
    })
    .await;
}

#[tokio::test]
async fn test_foreign_currency_adjustment_fails_net_total() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let tenant = common::new_tenant();
    let order_id = common::seed_order(&pool, tenant, usd(1000)).await;
    let ledger = LedgerRepository::new(pool.clone());

    TenantContext::scope(tenant, async {
        ledger
            .add_adjustment(
                order_id,
                Money::new(50, "EUR").unwrap(),
                "customs",
                "broker",
                &common::unique_id("ADJ"),
            )
            .await
            .unwrap();

        let err = ledger.get_net_order_total(order_id).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::CurrencyMismatch { .. })
        ));
    })
    .await;
}

#[tokio::test]
async fn test_adjustments_listed_in_insertion_order() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let tenant = common::new_tenant();
    let order_id = common::seed_order(&pool, tenant, usd(10_000)).await;
    let ledger = LedgerRepository::new(pool.clone());
    let ids: Vec<String> = (0..4).map(|i| common::unique_id(&format!("ADJ{}", i))).collect();

    TenantContext::scope(tenant, async {
        for (i, id) in ids.iter().enumerate() {
            ledger
                .add_adjustment(order_id, usd(-(i as i128 + 1) * 100), "partial refund", "cs", id)
                .await
                .unwrap();
        }

        let listed: Vec<String> = ledger
            .list_adjustments(order_id)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(listed, ids);

        // 10000 - (100 + 200 + 300 + 400)
        assert_eq!(ledger.get_net_order_total(order_id).await.unwrap(), usd(9_000));
    })
    .await;
}

#[tokio::test]
async fn test_ledger_requires_tenant_context() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let ledger = LedgerRepository::new(pool);

    let err = ledger.get_net_order_total(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Domain(DomainError::TenantContextMissing)
    ));
}
