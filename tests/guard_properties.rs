//! Guard safety properties exercised through the public API.

use chrono::Duration;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

use marshal::{ExecutionGuard, ExecutionLimits, ValidationRequest};

fn no_cooldown() -> ExecutionLimits {
    ExecutionLimits {
        cooldown_secs: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn any_position_above_the_cap_is_invalid() {
    let guard = ExecutionGuard::new(no_cooldown());
    for size in [dec!(10_000_001), dec!(15_000_000), dec!(900_000_000)] {
        let report = guard
            .validate_execution(ValidationRequest::new(
                Uuid::new_v4(),
                "orchestrator",
                "open_position",
                size,
            ))
            .await;
        assert!(!report.is_valid, "size {} must be rejected", size);
        assert!(report.errors.iter().any(|e| e.contains("position size")));
    }
}

#[tokio::test]
async fn failure_streak_opens_the_breaker_until_explicit_reset() {
    let guard = ExecutionGuard::new(ExecutionLimits {
        cooldown_secs: 3600,
        ..Default::default()
    });

    for _ in 0..3 {
        let id = Uuid::new_v4();
        guard
            .start_execution(id, "orchestrator", "open_position", json!({}), true)
            .await;
        guard.fail_execution(id, "downstream failure").await;
    }
    assert!(guard.status().await.breaker.is_open);

    // Admission stays closed while the cooldown runs.
    let report = guard
        .validate_execution(ValidationRequest::new(
            Uuid::new_v4(),
            "orchestrator",
            "open_position",
            dec!(1000),
        ))
        .await;
    assert!(!report.is_valid);

    guard.reset_breaker().await;
    let report = guard
        .validate_execution(
            ValidationRequest::new(Uuid::new_v4(), "orchestrator", "analyze", dec!(0))
                .read_only(true),
        )
        .await;
    assert!(report.is_valid);
}

#[tokio::test]
async fn quorum_two_of_three_decides_either_way() {
    let guard = ExecutionGuard::new(no_cooldown());

    // Two approvals approve.
    let approving = Uuid::new_v4();
    let proposal = guard
        .request_consensus(
            approving,
            "open position",
            vec!["a".into(), "b".into(), "c".into()],
            Duration::seconds(60),
        )
        .await;
    assert_eq!(proposal.required_votes, 2);
    guard.submit_vote(approving, "a", true, "fine").await;
    guard.submit_vote(approving, "b", true, "fine").await;
    let outcome = guard.check_consensus(approving).await.unwrap();
    assert!(outcome.reached && outcome.approved);

    // Two rejections reject without waiting for the third voter.
    let rejecting = Uuid::new_v4();
    guard
        .request_consensus(
            rejecting,
            "open position",
            vec!["a".into(), "b".into(), "c".into()],
            Duration::seconds(60),
        )
        .await;
    guard.submit_vote(rejecting, "a", false, "too risky").await;
    guard.submit_vote(rejecting, "b", false, "too risky").await;
    let outcome = guard.check_consensus(rejecting).await.unwrap();
    assert!(outcome.reached);
    assert!(!outcome.approved);
}

#[tokio::test]
async fn same_day_volume_is_additive() {
    let guard = ExecutionGuard::new(no_cooldown());
    guard.add_volume(dec!(125_000)).await;
    guard.add_volume(dec!(375_000)).await;
    assert_eq!(guard.status().await.daily_volume_usd, dec!(500_000));
}
