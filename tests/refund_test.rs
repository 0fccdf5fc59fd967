mod common;

use common::*;
use pix_reconcile::domain::hooks::HookKind;
use pix_reconcile::domain::order::OrderStatus;
use pix_reconcile::domain::payment::PaymentState;
use pix_reconcile::infra::memory::InMemoryRepository;
use pix_reconcile::services::reconciler::{ProcessResult, process_notification};
use rust_decimal_macros::dec;
use uuid::Uuid;

async fn confirmed_order(repo: &InMemoryRepository) -> Uuid {
    let id = seed_order(repo, "FOOBAR", "CODE").await;
    process_notification(repo, &received("CODE", 10000), repo_timeout(), ACTOR)
        .await
        .unwrap();
    id
}

// ── 1. full refund refunds the order ──────────────────────────────────────

#[tokio::test]
async fn full_refund_moves_payment_and_order_to_refunded() {
    let repo = InMemoryRepository::new();
    let id = confirmed_order(&repo).await;

    let n = with_refunds("CODE", 10000, &[("refund-1", 10000)]);
    let result = process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();
    assert_eq!(
        result,
        ProcessResult::Refunded {
            payment_id: id,
            applied: 1,
            fully_refunded: true
        }
    );

    let payment = repo.payment(id).await.unwrap();
    assert_eq!(payment.state(), PaymentState::Refunded);
    assert_eq!(payment.refunded_amount().cents(), 10000);
    assert_eq!(repo.order("FOOBAR").await.unwrap().status, OrderStatus::Refunded);

    let hooks = repo.hooks().await;
    let refunded: Vec<_> = hooks
        .iter()
        .filter(|h| h.job.kind == HookKind::PaymentRefunded)
        .collect();
    assert_eq!(refunded.len(), 1);
    assert_eq!(refunded[0].job.amount.cents(), 10000);
}

// ── 2. redelivered refund list is a no-op ─────────────────────────────────

#[tokio::test]
async fn redelivered_refund_applies_once() {
    let repo = InMemoryRepository::new();
    let id = confirmed_order(&repo).await;
    let n = with_refunds("CODE", 10000, &[("refund-1", 10000)]);

    process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();
    let hooks_before = repo.hooks().await.len();

    let again = process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();
    assert!(
        !matches!(again, ProcessResult::Refunded { .. }),
        "refund re-applied: {again:?}"
    );

    assert_eq!(repo.payment(id).await.unwrap().refunded_amount().cents(), 10000);
    assert_eq!(repo.applied_refunds().await.len(), 1);
    assert_eq!(repo.hooks().await.len(), hooks_before);
}

// ── 3. partial refunds accumulate ─────────────────────────────────────────

#[tokio::test]
async fn partial_refunds_accumulate_until_full() {
    let repo = InMemoryRepository::new();
    let id = confirmed_order(&repo).await;

    let first = with_refunds("CODE", 10000, &[("refund-1", 4000)]);
    let result = process_notification(&repo, &first, repo_timeout(), ACTOR).await.unwrap();
    assert_eq!(
        result,
        ProcessResult::Refunded {
            payment_id: id,
            applied: 1,
            fully_refunded: false
        }
    );
    assert_eq!(repo.payment(id).await.unwrap().state(), PaymentState::Confirmed);
    assert_eq!(repo.order("FOOBAR").await.unwrap().status, OrderStatus::Paid);

    // The provider resends the whole list each time.
    let second = with_refunds("CODE", 10000, &[("refund-1", 4000), ("refund-2", 6000)]);
    let result = process_notification(&repo, &second, repo_timeout(), ACTOR).await.unwrap();
    assert_eq!(
        result,
        ProcessResult::Refunded {
            payment_id: id,
            applied: 1,
            fully_refunded: true
        }
    );

    let payment = repo.payment(id).await.unwrap();
    assert_eq!(payment.refunded_amount().cents(), 10000);
    assert_eq!(payment.state(), PaymentState::Refunded);
    assert_eq!(repo.order("FOOBAR").await.unwrap().status, OrderStatus::Refunded);
}

// ── 4. refund larger than the balance is flagged, not applied ─────────────

#[tokio::test]
async fn refund_over_outstanding_is_flagged() {
    let repo = InMemoryRepository::new();
    let id = confirmed_order(&repo).await;

    let n = with_refunds("CODE", 10000, &[("refund-big", 10001)]);
    let result = process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();
    assert_eq!(result, ProcessResult::Duplicate(id));

    assert_eq!(repo.payment(id).await.unwrap().refunded_amount().cents(), 0);
    assert!(repo.applied_refunds().await.is_empty());
    let audit = repo.audit_entries().await;
    let flagged = audit.iter().find(|a| a.action == "refund_anomaly").unwrap();
    assert_eq!(flagged.detail["refund_id"], "refund-big");
    assert_eq!(flagged.detail["outstanding"], 10000);
}

// ── 5. refunds on a payment that never settled ────────────────────────────

#[tokio::test]
async fn refund_event_for_unconfirmed_payment_is_skipped() {
    let repo = InMemoryRepository::new();
    let id = seed_order(&repo, "FOOBAR", "CODE").await;

    let body = payload(
        REFUND_RECEIVED,
        "CODE",
        10000,
        serde_json::json!([{"refundId": "refund-1", "value": 10000, "status": "CONFIRMED"}]),
    );
    let result = process_notification(&repo, &parse(&body), repo_timeout(), ACTOR)
        .await
        .unwrap();

    assert_eq!(result, ProcessResult::RefundsSkipped(id));
    assert_eq!(repo.payment(id).await.unwrap().state(), PaymentState::Pending);
    assert!(repo.applied_refunds().await.is_empty());
}

// ── 6. refunds the provider has not settled yet ───────────────────────────

#[tokio::test]
async fn unsettled_refund_is_left_for_a_later_delivery() {
    let repo = InMemoryRepository::new();
    let id = confirmed_order(&repo).await;

    let body = payload(
        TRANSACTION_RECEIVED,
        "CODE",
        10000,
        serde_json::json!([{"refundId": "refund-1", "value": 5000, "status": "IN_PROCESSING"}]),
    );
    let result = process_notification(&repo, &parse(&body), repo_timeout(), ACTOR)
        .await
        .unwrap();
    assert_eq!(result, ProcessResult::Duplicate(id));
    assert!(repo.applied_refunds().await.is_empty());

    // Once it settles the same id is applied.
    let n = with_refunds("CODE", 10000, &[("refund-1", 5000)]);
    let result = process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();
    assert!(matches!(result, ProcessResult::Refunded { applied: 1, .. }));
}

// ── 7. refund event without a refunds list ────────────────────────────────

#[tokio::test]
async fn refund_event_uses_pix_block_when_list_is_empty() {
    let repo = InMemoryRepository::new();
    let id = confirmed_order(&repo).await;

    let body = payload(REFUND_RECEIVED, "CODE", 2500, serde_json::json!([]));
    let result = process_notification(&repo, &parse(&body), repo_timeout(), ACTOR)
        .await
        .unwrap();
    assert_eq!(
        result,
        ProcessResult::Refunded {
            payment_id: id,
            applied: 1,
            fully_refunded: false
        }
    );

    let refunds = repo.applied_refunds().await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].refund_id.as_str(), "Ef6223604800442e9852227415e7b6141");
    assert_eq!(refunds[0].amount.cents(), 2500);

    // Same delivery again changes nothing.
    let again = process_notification(&repo, &parse(&body), repo_timeout(), ACTOR)
        .await
        .unwrap();
    assert_eq!(again, ProcessResult::RefundsSkipped(id));
    assert_eq!(repo.payment(id).await.unwrap().refunded_amount().cents(), 2500);
}

// ── 8. another confirmed payment still covers the order ───────────────────

#[tokio::test]
async fn full_refund_of_one_payment_keeps_order_paid_when_still_covered() {
    let repo = InMemoryRepository::new();
    let ids = seed_order_with(
        &repo,
        "OVER",
        dec!(50.00),
        &[(dec!(50.00), "OVER-1"), (dec!(50.00), "OVER-2")],
    )
    .await;
    for r in ["OVER-1", "OVER-2"] {
        process_notification(&repo, &received(r, 5000), repo_timeout(), ACTOR)
            .await
            .unwrap();
    }
    assert_eq!(repo.order("OVER").await.unwrap().status, OrderStatus::Paid);

    let n = with_refunds("OVER-1", 5000, &[("refund-1", 5000)]);
    process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();

    assert_eq!(repo.payment(ids[0]).await.unwrap().state(), PaymentState::Refunded);
    assert_eq!(repo.payment(ids[1]).await.unwrap().state(), PaymentState::Confirmed);
    assert_eq!(repo.order("OVER").await.unwrap().status, OrderStatus::Paid);
}

// ── 9. refund that uncovers a split order ─────────────────────────────────

#[tokio::test]
async fn full_refund_reopens_split_order() {
    let repo = InMemoryRepository::new();
    seed_order_with(
        &repo,
        "SPLIT",
        dec!(100.00),
        &[(dec!(60.00), "SPLIT-1"), (dec!(40.00), "SPLIT-2")],
    )
    .await;
    process_notification(&repo, &received("SPLIT-1", 6000), repo_timeout(), ACTOR)
        .await
        .unwrap();
    process_notification(&repo, &received("SPLIT-2", 4000), repo_timeout(), ACTOR)
        .await
        .unwrap();

    let n = with_refunds("SPLIT-2", 4000, &[("refund-1", 4000)]);
    process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();

    assert_eq!(repo.order("SPLIT").await.unwrap().status, OrderStatus::Pending);
}

// ── 10. a failed commit applies no refund at all ──────────────────────────

#[tokio::test]
async fn failed_commit_leaves_refunds_unapplied() {
    let repo = InMemoryRepository::new();
    let id = confirmed_order(&repo).await;
    let hooks_before = repo.hooks().await.len();

    let n = with_refunds("CODE", 10000, &[("refund-1", 3000), ("refund-2", 7000)]);
    repo.fail_next_commit();
    let err = process_notification(&repo, &n, repo_timeout(), ACTOR)
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let payment = repo.payment(id).await.unwrap();
    assert_eq!(payment.state(), PaymentState::Confirmed);
    assert_eq!(payment.refunded_amount().cents(), 0);
    assert!(repo.applied_refunds().await.is_empty());
    assert_eq!(repo.hooks().await.len(), hooks_before);

    let retry = process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();
    assert_eq!(
        retry,
        ProcessResult::Refunded {
            payment_id: id,
            applied: 2,
            fully_refunded: true
        }
    );
    assert_eq!(repo.order("FOOBAR").await.unwrap().status, OrderStatus::Refunded);
}

// ── 11. redeliveries after a full refund are duplicates, not anomalies ────

#[tokio::test]
async fn redelivery_after_full_refund_is_duplicate() {
    let repo = InMemoryRepository::new();
    let id = confirmed_order(&repo).await;
    let n = with_refunds("CODE", 10000, &[("r1", 10000)]);

    let first = process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();
    assert!(matches!(first, ProcessResult::Refunded { fully_refunded: true, .. }));
    let audit_before = repo.audit_entries().await.len();
    let hooks_before = repo.hooks().await.len();

    for _ in 0..2 {
        let again = process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();
        assert_eq!(again, ProcessResult::Duplicate(id));
    }

    let audit = repo.audit_entries().await;
    assert_eq!(audit.len(), audit_before);
    assert!(!audit.iter().any(|a| a.action == "anomaly"));
    assert_eq!(repo.hooks().await.len(), hooks_before);
    assert_eq!(repo.payment(id).await.unwrap().state(), PaymentState::Refunded);
    assert_eq!(repo.order("FOOBAR").await.unwrap().status, OrderStatus::Refunded);
}

// ── 12. a refunded payment still rejects a different outcome ──────────────

#[tokio::test]
async fn different_value_on_refunded_payment_is_stale() {
    let repo = InMemoryRepository::new();
    let id = confirmed_order(&repo).await;
    let n = with_refunds("CODE", 10000, &[("r1", 10000)]);
    process_notification(&repo, &n, repo_timeout(), ACTOR).await.unwrap();

    let result = process_notification(&repo, &received("CODE", 5000), repo_timeout(), ACTOR)
        .await
        .unwrap();
    assert_eq!(result, ProcessResult::Stale(id));
    assert!(repo.audit_entries().await.iter().any(|a| a.action == "anomaly"));
}
