// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::*;
use serde_json::json;
use tfg_receipt::{Receipt, ReceiptBuilder};

async fn store() -> SqliteStore {
    SqliteStore::in_memory().await.expect("in-memory store")
}

fn receipt(trace: &str, hop: u64, prev: Option<&str>) -> Receipt {
    let mut b = ReceiptBuilder::new(trace, "acme")
        .hop(hop)
        .ts("2026-01-15T12:00:00Z")
        .cid(format!("sha256:{hop:064x}"));
    if let Some(p) = prev {
        b = b.prev_receipt_hash(p);
    }
    b.with_hash().unwrap()
}

// ── Chain append ───────────────────────────────────────────────────

#[tokio::test]
async fn first_append_creates_head() {
    let s = store().await;
    let r1 = receipt("t1", 1, None);
    let hop = s.append_receipt(&r1, None).await.unwrap();
    assert_eq!(hop, 1);

    let head = s.get_head("t1").await.unwrap().unwrap();
    assert_eq!(head.last_hop, 1);
    assert_eq!(
        head.last_receipt_hash,
        r1.receipt_hash.clone().unwrap()
    );
}

#[tokio::test]
async fn chained_appends_advance_head() {
    let s = store().await;
    let r1 = receipt("t1", 1, None);
    s.append_receipt(&r1, None).await.unwrap();

    let prev = r1.receipt_hash.as_deref().unwrap();
    let r2 = receipt("t1", 2, Some(prev));
    let hop = s.append_receipt(&r2, Some(prev)).await.unwrap();
    assert_eq!(hop, 2);

    let head = s.get_head("t1").await.unwrap().unwrap();
    assert_eq!(head.last_hop, 2);
    assert_eq!(head.last_receipt_hash, r2.receipt_hash.unwrap());
}

#[tokio::test]
async fn stale_expected_prev_conflicts_without_side_effect() {
    let s = store().await;
    let r1 = receipt("t1", 1, None);
    s.append_receipt(&r1, None).await.unwrap();

    let r2 = receipt("t1", 2, Some("sha256:stale"));
    let err = s.append_receipt(&r2, Some("sha256:stale")).await.unwrap_err();
    assert!(matches!(err, StoreError::ChainConflict));

    // Nothing changed: head still at hop 1, chain length 1.
    assert_eq!(s.get_head("t1").await.unwrap().unwrap().last_hop, 1);
    assert_eq!(s.get_chain("t1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn second_first_hop_conflicts() {
    let s = store().await;
    s.append_receipt(&receipt("t1", 1, None), None).await.unwrap();
    let err = s
        .append_receipt(&receipt("t1", 1, None), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ChainConflict));
}

#[tokio::test]
async fn expected_prev_on_fresh_trace_conflicts() {
    let s = store().await;
    let r = receipt("fresh", 2, Some("sha256:ghost"));
    let err = s
        .append_receipt(&r, Some("sha256:ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ChainConflict));
    assert!(s.get_head("fresh").await.unwrap().is_none());
}

#[tokio::test]
async fn unhashed_receipt_rejected() {
    let s = store().await;
    let r = ReceiptBuilder::new("t1", "acme").cid("sha256:aa").build();
    let err = s.append_receipt(&r, None).await.unwrap_err();
    assert!(matches!(err, StoreError::UnhashedReceipt));
}

#[tokio::test]
async fn concurrent_appends_one_wins() {
    let s = store().await;
    let r1 = receipt("race", 1, None);
    s.append_receipt(&r1, None).await.unwrap();
    let prev = r1.receipt_hash.as_deref().unwrap();

    // Both contenders read the same head and race the CAS.
    let a = receipt("race", 2, Some(prev));
    let b = receipt("race", 2, Some(prev));
    let (ra, rb) = tokio::join!(
        s.append_receipt(&a, Some(prev)),
        s.append_receipt(&b, Some(prev)),
    );

    let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one append wins the hop");
    assert!(
        [ra, rb]
            .into_iter()
            .filter_map(Result::err)
            .all(|e| matches!(e, StoreError::ChainConflict))
    );
    assert_eq!(s.get_head("race").await.unwrap().unwrap().last_hop, 2);
}

// ── Chain reads ────────────────────────────────────────────────────

#[tokio::test]
async fn get_chain_roundtrips_receipts_in_order() {
    let s = store().await;
    let r1 = receipt("t1", 1, None);
    s.append_receipt(&r1, None).await.unwrap();
    let prev = r1.receipt_hash.as_deref().unwrap();
    let r2 = receipt("t1", 2, Some(prev));
    s.append_receipt(&r2, Some(prev)).await.unwrap();

    let chain = s.get_chain("t1").await.unwrap();
    assert_eq!(chain, vec![r1, r2]);
    tfg_receipt::verify_chain(&chain).unwrap();
}

#[tokio::test]
async fn fallback_fields_roundtrip() {
    let s = store().await;
    let r = ReceiptBuilder::new("t1", "acme")
        .ts("2026-01-15T12:00:00Z")
        .cid("sha256:aa")
        .fallback(412)
        .with_hash()
        .unwrap();
    s.append_receipt(&r, None).await.unwrap();
    let chain = s.get_chain("t1").await.unwrap();
    assert_eq!(chain[0].fallback_used, Some(true));
    assert_eq!(chain[0].fu_tokens, Some(412));
}

#[tokio::test]
async fn unknown_trace_is_empty() {
    let s = store().await;
    assert!(s.get_chain("nope").await.unwrap().is_empty());
    assert!(s.get_head("nope").await.unwrap().is_none());
}

// ── Idempotency ────────────────────────────────────────────────────

#[tokio::test]
async fn idempotency_cache_roundtrip() {
    let s = store().await;
    assert!(s.get_idempotent("k", "idem-1").await.unwrap().is_none());

    let resp = json!({"trace_id": "t1", "normalized": {"x": 1}});
    s.cache_idempotent("k", "idem-1", &resp).await.unwrap();
    assert_eq!(s.get_idempotent("k", "idem-1").await.unwrap(), Some(resp));

    // Scoped by API key.
    assert!(s.get_idempotent("other", "idem-1").await.unwrap().is_none());
}

#[tokio::test]
async fn prune_idempotency_by_age() {
    let s = store().await;
    s.cache_idempotent("k", "old", &json!({"n": 1})).await.unwrap();
    // Entries written "now" survive a cutoff in the past.
    let removed = s.prune_idempotency("2000-01-01T00:00:00Z").await.unwrap();
    assert_eq!(removed, 0);
    // A cutoff in the far future removes them.
    let removed = s.prune_idempotency("2999-01-01T00:00:00Z").await.unwrap();
    assert_eq!(removed, 1);
    assert!(s.get_idempotent("k", "old").await.unwrap().is_none());
}

// ── Usage ledger ───────────────────────────────────────────────────

#[tokio::test]
async fn usage_rollup_by_tenant_and_month() {
    let s = store().await;
    let row = UsageRow {
        api_key: "k".to_string(),
        tenant: "acme".to_string(),
        trace_id: "t1".to_string(),
        hop: 1,
        verified: true,
        vex_units: 1,
        fu_tokens: 250,
        ts: "2026-01-15T12:00:00Z".to_string(),
    };
    s.record_usage(&row).await.unwrap();
    s.record_usage(&UsageRow {
        fu_tokens: 50,
        hop: 2,
        ..row.clone()
    })
    .await
    .unwrap();
    // A different tenant and an earlier month must not count.
    s.record_usage(&UsageRow {
        tenant: "other".to_string(),
        ..row.clone()
    })
    .await
    .unwrap();
    s.record_usage(&UsageRow {
        ts: "2025-12-31T23:59:59Z".to_string(),
        ..row.clone()
    })
    .await
    .unwrap();

    let usage = s.monthly_usage("acme", "2026-01-01T00:00:00Z").await.unwrap();
    assert_eq!(usage.vex_used, 2);
    assert_eq!(usage.fu_used, 300);
}

#[tokio::test]
async fn empty_ledger_rolls_up_to_zero() {
    let s = store().await;
    let usage = s.monthly_usage("acme", "2026-01-01T00:00:00Z").await.unwrap();
    assert_eq!(usage, MonthlyUsage::default());
}

// ── Billing queue ──────────────────────────────────────────────────

#[tokio::test]
async fn billing_queue_is_fifo() {
    let s = store().await;
    s.enqueue_billing("k", "si_vex", 1, 100).await.unwrap();
    s.enqueue_billing("k", "si_fu", 250, 101).await.unwrap();
    s.enqueue_billing("k", "si_vex", 1, 102).await.unwrap();

    let batch = s.dequeue_billing_batch(2).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert!(batch[0].id < batch[1].id);
    assert_eq!(batch[0].stripe_item, "si_vex");
    assert_eq!(batch[1].stripe_item, "si_fu");
    assert_eq!(batch[1].units, 250);
}

#[tokio::test]
async fn delete_and_retry_bump() {
    let s = store().await;
    s.enqueue_billing("k", "si", 1, 100).await.unwrap();
    s.enqueue_billing("k", "si", 2, 101).await.unwrap();
    let batch = s.dequeue_billing_batch(10).await.unwrap();

    s.delete_billing_items(&[batch[0].id]).await.unwrap();
    s.bump_billing_retries(&[batch[1].id]).await.unwrap();

    let rest = s.dequeue_billing_batch(10).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].units, 2);
    assert_eq!(rest[0].retries, 1);
}

#[tokio::test]
async fn current_month_start_shape() {
    let ts = current_month_start();
    assert!(ts.ends_with("-01T00:00:00Z"));
    assert_eq!(ts.len(), 20);
}

// ── File-backed store ──────────────────────────────────────────────

#[tokio::test]
async fn file_backed_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("receipts.db");
    let path = path.to_str().unwrap();

    {
        let s = SqliteStore::connect(path).await.unwrap();
        s.append_receipt(&receipt("t1", 1, None), None).await.unwrap();
    }

    let reopened = SqliteStore::connect(path).await.unwrap();
    let chain = reopened.get_chain("t1").await.unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(reopened.backend_name(), "sqlite");
    tfg_receipt::verify_chain(&chain).unwrap();
}
