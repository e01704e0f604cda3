//! End-to-end orchestration scenarios through the public API.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use marshal::{
    bootstrap, AgentKind, AppConfig, AuditFilter, AuditResult, ExecutionLimits, FixedFeed,
    HmacAttestor, IntentAction, IntentParams, Orchestrator, RiskTolerance, TradeIntent,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("marshal=debug")
        .try_init();
}

fn market_feed() -> Arc<FixedFeed> {
    Arc::new(FixedFeed::new().with_quote("BTC-USD", dec!(45), dec!(64000)))
}

async fn system(limits: ExecutionLimits, feed: Arc<FixedFeed>) -> Orchestrator {
    init_tracing();
    let config = AppConfig {
        limits,
        ..Default::default()
    };
    bootstrap(config, feed, Arc::new(HmacAttestor::new("it-secret")))
        .await
        .expect("bootstrap")
}

fn open_intent(amount: Decimal) -> TradeIntent {
    TradeIntent::new(
        IntentAction::OpenPosition,
        "portfolio-7",
        "yield-rotation",
        IntentParams {
            amount_usd: amount,
            symbol: "BTC-USD".to_string(),
            target_apy: Some(dec!(12)),
            risk_tolerance: RiskTolerance::Balanced,
            leverage: None,
            max_slippage_pct: None,
        },
    )
}

#[tokio::test]
async fn analysis_only_intent_succeeds_without_side_effects() {
    let orchestrator = system(ExecutionLimits::default(), market_feed()).await;

    let report = orchestrator
        .execute(TradeIntent::analysis("portfolio-7", "BTC-USD"))
        .await;

    assert!(report.is_success());
    assert!(report.risk.as_ref().unwrap().success);
    assert!(report.hedging.is_none());
    assert!(report.settlement.is_none());
    assert!(report.consensus.is_none());
    assert!(report.attestations.is_empty());

    let status = orchestrator.guard().status().await;
    assert_eq!(status.daily_volume_usd, Decimal::ZERO);
    assert_eq!(status.in_flight, 0);
    assert!(!status.breaker.is_open);

    // Read-only completion still leaves an audit record.
    let entries = orchestrator
        .guard()
        .audit_logs(&AuditFilter {
            execution_id: Some(report.execution_id),
            ..Default::default()
        })
        .await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].result, AuditResult::Success);
}

#[tokio::test]
async fn oversized_intent_is_denied_before_any_agent_runs() {
    let orchestrator = system(
        ExecutionLimits {
            cooldown_secs: 0,
            ..Default::default()
        },
        market_feed(),
    )
    .await;

    let intent = open_intent(dec!(12_000_000)).with_agents([
        AgentKind::Risk,
        AgentKind::Hedging,
        AgentKind::Settlement,
        AgentKind::Reporting,
    ]);
    let report = orchestrator.execute(intent).await;

    assert!(!report.is_success());
    assert!(report.errors.iter().any(|e| e.contains("position size")));
    assert!(report.risk.is_none());
    assert!(report.hedging.is_none());

    // No agent was invoked and nothing reached the guard's ledger.
    for snapshot in orchestrator.registry().snapshots().await {
        assert_eq!(snapshot.history_len, 0, "agent {} was invoked", snapshot.id);
    }
    let status = orchestrator.guard().status().await;
    assert_eq!(status.audit_entries, 0);
    assert_eq!(status.in_flight, 0);
}

#[tokio::test]
async fn consensus_gated_intent_runs_all_stages_and_accounts_volume() {
    let orchestrator = system(
        ExecutionLimits {
            cooldown_secs: 0,
            ..Default::default()
        },
        market_feed(),
    )
    .await;

    let intent = open_intent(dec!(500_000)).with_agents([
        AgentKind::Risk,
        AgentKind::Hedging,
        AgentKind::Settlement,
    ]);
    let report = orchestrator.execute(intent).await;

    assert!(report.is_success(), "errors: {:?}", report.errors);

    // Three voters at quorum 0.67 needed two approvals; all three agreed.
    let consensus = report.consensus.as_ref().unwrap();
    assert_eq!(consensus.required_votes, 2);
    assert_eq!(consensus.approvals, 3);
    assert!(consensus.approved);

    assert!(report.risk.as_ref().unwrap().success);
    assert!(report.hedging.as_ref().unwrap().success);
    assert!(report.settlement.as_ref().unwrap().success);

    // $500k sits above the attestation threshold: exactly one handle,
    // recorded both on the report and the terminal audit entry.
    assert_eq!(report.attestations.len(), 1);
    let entries = orchestrator
        .guard()
        .audit_logs(&AuditFilter {
            execution_id: Some(report.execution_id),
            ..Default::default()
        })
        .await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].result, AuditResult::Success);
    assert_eq!(
        entries[0].attestation.as_deref(),
        Some(report.attestations[0].as_str())
    );
    // All three approving voters signed the terminal entry.
    assert_eq!(entries[0].signatures.len(), 3);

    // Volume was added exactly once.
    let status = orchestrator.guard().status().await;
    assert_eq!(status.daily_volume_usd, dec!(500_000));
    assert_eq!(status.in_flight, 0);
}

#[tokio::test]
async fn failed_stage_preserves_partial_results() {
    // The feed only knows BTC: hedging succeeds on BTC, but settlement is
    // capped low enough to fail after hedging ran.
    let orchestrator = {
        init_tracing();
        let mut config = AppConfig::default();
        config.limits.cooldown_secs = 0;
        config.limits.require_consensus = false;
        config.agents.settlement_max_single_transfer_usd = dec!(1_000);
        bootstrap(config, market_feed(), Arc::new(HmacAttestor::new("it-secret")))
            .await
            .unwrap()
    };

    let intent = open_intent(dec!(500_000)).with_agents([
        AgentKind::Risk,
        AgentKind::Hedging,
        AgentKind::Settlement,
        AgentKind::Reporting,
    ]);
    let report = orchestrator.execute(intent).await;

    assert!(!report.is_success());
    // Upstream stages stay on the report; downstream ones never ran.
    assert!(report.risk.as_ref().unwrap().success);
    assert!(report.hedging.as_ref().unwrap().success);
    assert!(!report.settlement.as_ref().unwrap().success);
    assert!(report.reporting.is_none());
    assert!(report.attestations.is_empty());

    // The failure is on the guard's ledger and counts toward the streak.
    let status = orchestrator.guard().status().await;
    assert_eq!(status.breaker.consecutive_failures, 1);
    assert_eq!(status.daily_volume_usd, Decimal::ZERO);
}

#[tokio::test]
async fn three_failures_lock_the_system_until_reset() {
    // A feed with no quotes makes every risk stage fail fast.
    let orchestrator = system(
        ExecutionLimits {
            cooldown_secs: 600,
            ..Default::default()
        },
        Arc::new(FixedFeed::new()),
    )
    .await;

    for _ in 0..3 {
        let report = orchestrator
            .execute(TradeIntent::analysis("portfolio-7", "BTC-USD"))
            .await;
        assert!(!report.is_success());
        assert!(report.errors.iter().any(|e| e.contains("no quote")));
    }

    assert!(orchestrator.guard().status().await.breaker.is_open);

    // Even a harmless analysis intent is refused while the breaker holds.
    let report = orchestrator
        .execute(TradeIntent::analysis("portfolio-7", "BTC-USD"))
        .await;
    assert!(!report.is_success());
    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("circuit breaker open")));

    // An explicit reset restores admission; the feed is still broken, so
    // the run fails downstream rather than at the gate.
    orchestrator.guard().reset_breaker().await;
    let report = orchestrator
        .execute(TradeIntent::analysis("portfolio-7", "BTC-USD"))
        .await;
    assert!(!report.is_success());
    assert!(report.errors.iter().any(|e| e.contains("no quote")));
}

#[tokio::test]
async fn reporting_stage_produces_the_summary() {
    let orchestrator = system(
        ExecutionLimits {
            cooldown_secs: 0,
            require_consensus: false,
            ..Default::default()
        },
        market_feed(),
    )
    .await;

    let intent = open_intent(dec!(50_000)).with_agents([
        AgentKind::Risk,
        AgentKind::Hedging,
        AgentKind::Settlement,
        AgentKind::Reporting,
    ]);
    let report = orchestrator.execute(intent).await;

    assert!(report.is_success(), "errors: {:?}", report.errors);
    let summary = report.summary.as_deref().unwrap();
    assert!(summary.contains("yield-rotation"));
    assert!(summary.contains("risk: ok"));
    // $50k is below both the consensus and attestation thresholds.
    assert!(report.consensus.is_none());
    assert!(report.attestations.is_empty());
}
