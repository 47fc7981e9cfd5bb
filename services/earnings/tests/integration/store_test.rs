use futures::future::join_all;
use uuid::Uuid;

use payday_earnings::domain::repository::{MAX_UPDATE_ATTEMPTS, PayoutRepository};
use payday_earnings::domain::types::PayoutStatus;
use payday_earnings::error::EarningsServiceError;

use crate::helpers::{MockPayoutRepo, test_payout};

#[tokio::test]
async fn should_store_one_payout_per_worker_and_period_under_concurrent_creates() {
    let repo = MockPayoutRepo::default().interleaving();
    let worker_id = Uuid::now_v7();
    let candidates: Vec<_> = (0..8)
        .map(|_| test_payout(worker_id, PayoutStatus::Pending))
        .collect();

    let results = join_all(candidates.iter().map(|p| repo.create(p))).await;

    let inserted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
    assert_eq!(inserted, 1);
    assert_eq!(repo.payouts_handle().lock().unwrap().len(), 1);
}

#[tokio::test]
async fn should_apply_each_concurrent_mutation_exactly_once() {
    let payout = test_payout(Uuid::now_v7(), PayoutStatus::Pending);
    let repo = MockPayoutRepo::new(vec![payout.clone()]).interleaving();
    let callers = MAX_UPDATE_ATTEMPTS as usize;

    let results = join_all((0..callers).map(|_| {
        repo.update_with_retry(payout.id, |p| {
            p.retry_count += 1;
            Ok(())
        })
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    let stored = repo.get(payout.id);
    assert_eq!(stored.retry_count, callers as i32);
    assert_eq!(stored.row_version, payout.row_version + callers as i64);
    assert!(repo.conflict_count() > 0, "updates should have collided");
}

#[tokio::test]
async fn should_lose_no_update_when_contention_exhausts_retries() {
    let payout = test_payout(Uuid::now_v7(), PayoutStatus::Pending);
    let repo = MockPayoutRepo::new(vec![payout.clone()]).interleaving();

    let results = join_all((0..10).map(|_| {
        repo.update_with_retry(payout.id, |p| {
            p.retry_count += 1;
            Ok(())
        })
    }))
    .await;

    let applied = results.iter().filter(|r| r.is_ok()).count();
    let contended = results
        .iter()
        .filter(|r| matches!(r, Err(EarningsServiceError::Contention(id)) if *id == payout.id))
        .count();
    assert_eq!(applied + contended, 10);
    assert_eq!(repo.get(payout.id).retry_count, applied as i32);
}

#[tokio::test]
async fn should_return_bumped_version_from_update() {
    let payout = test_payout(Uuid::now_v7(), PayoutStatus::Pending);
    let repo = MockPayoutRepo::new(vec![payout.clone()]);

    let updated = repo
        .update_with_retry(payout.id, |p| {
            p.status = PayoutStatus::Processing;
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(updated.row_version, payout.row_version + 1);
    assert_eq!(updated, repo.get(payout.id));
}

#[tokio::test]
async fn should_skip_write_when_mutation_changes_nothing() {
    let payout = test_payout(Uuid::now_v7(), PayoutStatus::Pending);
    let repo = MockPayoutRepo::new(vec![payout.clone()]);

    let unchanged = repo.update_with_retry(payout.id, |_| Ok(())).await.unwrap();

    assert_eq!(unchanged.row_version, payout.row_version);
    assert_eq!(repo.get(payout.id).updated_at, payout.updated_at);
}

#[tokio::test]
async fn should_not_write_when_mutation_rejects() {
    let payout = test_payout(Uuid::now_v7(), PayoutStatus::Paid);
    let repo = MockPayoutRepo::new(vec![payout.clone()]);

    let result = repo
        .update_with_retry(payout.id, |p| {
            if p.status == PayoutStatus::Paid {
                return Err(EarningsServiceError::InvalidTransition {
                    id: p.id,
                    status: p.status,
                });
            }
            p.status = PayoutStatus::Failed;
            Ok(())
        })
        .await;

    assert!(matches!(
        result,
        Err(EarningsServiceError::InvalidTransition { status: PayoutStatus::Paid, .. })
    ));
    assert_eq!(repo.get(payout.id), payout);
}

#[tokio::test]
async fn should_report_missing_payout() {
    let repo = MockPayoutRepo::default();
    let id = Uuid::now_v7();

    let result = repo.update_with_retry(id, |_| Ok(())).await;

    assert!(matches!(result, Err(EarningsServiceError::PayoutNotFound(missing)) if missing == id));
}
