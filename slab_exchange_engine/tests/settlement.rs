//! Escrow settlement: capture, the two settlement paths, retries and the retry cutoff.
use chrono::{Duration, Utc};
use slab_exchange_engine::{
    db_types::{CardStatus, EscrowStatus, JobKind, OrderStatus, SettlementPath},
    helpers::charge_key,
    AccountManagement,
    EngineConfig,
    ExchangeDatabase,
};
use sx_common::Cents;

mod support;

use support::{setup, setup_with, tear_down};

#[tokio::test]
async fn vault_first_trade_settles_immediately() {
    let x = setup().await;
    x.fund_user("alice").await;
    x.fund_user("bob").await;
    let instance = x.vault_instance("alice", "pikachu-1999", "1001", 9.0).await;
    x.list_for_sale("alice", "pikachu-1999", instance.id, 10_000).await;
    let buy = x.place_buy("bob", "pikachu-1999", 10_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    let trade = &outcome.trades[0];
    assert_eq!(trade.settlement_path, SettlementPath::AlreadyCustodied);

    let trade = x.settlement().process_trade_payment(trade).await.unwrap();
    assert_eq!(trade.escrow_status, EscrowStatus::Released);
    assert!(trade.payment_ref.is_some());
    assert!(trade.payout_ref.is_some());
    // 2.5% of $100.00
    assert_eq!(trade.fee_amount, Cents::from(250));
    assert_eq!(trade.net_to_seller(), Cents::from(9_750));
    let instance = x.db.fetch_card_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(instance.owner_id, "bob");
    // One charge, one payout.
    assert_eq!(x.gateway.effect_count(), 2);
    tear_down(x).await;
}

#[tokio::test]
async fn sell_first_trade_waits_for_shipment() {
    let x = setup().await;
    x.fund_user("alice").await;
    x.fund_user("bob").await;
    let instance = x.home_instance("alice", "charizard-1999", "1002", 9.5).await;
    x.list_for_sale("alice", "charizard-1999", instance.id, 50_000).await;
    let buy = x.place_buy("bob", "charizard-1999", 50_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    let trade = &outcome.trades[0];
    assert_eq!(trade.settlement_path, SettlementPath::RequiresShipment);

    let trade = x.settlement().process_trade_payment(trade).await.unwrap();
    assert_eq!(trade.escrow_status, EscrowStatus::Captured, "funds stay in escrow until verification");
    assert!(trade.ship_by.is_some());
    assert!(trade.payout_ref.is_none());
    let instance = x.db.fetch_card_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(instance.status, CardStatus::PendingShipment);
    assert_eq!(instance.owner_id, "alice", "ownership only moves after verification");
    tear_down(x).await;
}

#[tokio::test]
async fn declined_charge_schedules_a_retry_with_the_same_key() {
    let x = setup().await;
    x.fund_user("alice").await;
    x.fund_user("bob").await;
    let instance = x.vault_instance("alice", "blastoise-1999", "1003", 8.0).await;
    x.list_for_sale("alice", "blastoise-1999", instance.id, 8_000).await;
    let buy = x.place_buy("bob", "blastoise-1999", 8_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();

    x.gateway.decline_next_charges(1);
    let trade = x.settlement().process_trade_payment(&outcome.trades[0]).await.unwrap();
    assert_eq!(trade.escrow_status, EscrowStatus::PaymentFailed);
    assert_eq!(trade.payment_attempts, 1);

    let trade = x.settlement().retry_payment(trade.id).await.unwrap().unwrap();
    assert_eq!(trade.escrow_status, EscrowStatus::Released);
    // Two attempts, one financial effect per operation type.
    assert_eq!(x.gateway.attempts_for(&charge_key(trade.id)), 2);
    assert_eq!(x.gateway.effect_count(), 2);
    tear_down(x).await;
}

#[tokio::test]
async fn retry_after_capture_is_a_no_op() {
    let x = setup().await;
    x.fund_user("alice").await;
    x.fund_user("bob").await;
    let instance = x.vault_instance("alice", "venusaur-1999", "1004", 8.0).await;
    x.list_for_sale("alice", "venusaur-1999", instance.id, 8_000).await;
    let buy = x.place_buy("bob", "venusaur-1999", 8_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    let trade = x.settlement().process_trade_payment(&outcome.trades[0]).await.unwrap();
    assert_eq!(trade.escrow_status, EscrowStatus::Released);

    let result = x.settlement().retry_payment(trade.id).await.unwrap();
    assert!(result.is_none(), "a settled trade must not be charged again");
    assert_eq!(x.gateway.attempts_for(&charge_key(trade.id)), 1);
    tear_down(x).await;
}

#[tokio::test]
async fn replayed_capture_resumes_sell_first_settlement() {
    let x = setup().await;
    x.fund_user("alice").await;
    x.fund_user("bob").await;
    let instance = x.home_instance("alice", "dragonite-1999", "1007", 9.0).await;
    x.list_for_sale("alice", "dragonite-1999", instance.id, 20_000).await;
    let buy = x.place_buy("bob", "dragonite-1999", 20_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    let trade = &outcome.trades[0];

    // The capture landed but the process died before the post-capture leg ran.
    x.db.mark_escrow_captured(trade.id, "pay-manual").await.unwrap();

    let trade = x.settlement().process_trade_payment(trade).await.unwrap();
    assert_eq!(trade.escrow_status, EscrowStatus::Captured);
    assert!(trade.ship_by.is_some());
    assert_eq!(x.gateway.attempts_for(&charge_key(trade.id)), 0, "the recorded capture is honoured");
    let instance = x.db.fetch_card_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(instance.status, CardStatus::PendingShipment);
    // The resumed run scheduled both deadline jobs.
    let jobs = x.db.claim_due_jobs(Utc::now() + Duration::days(30), 10).await.unwrap();
    let kinds: Vec<_> = jobs.iter().map(|j| j.kind).collect();
    assert!(kinds.contains(&JobKind::ShipWarning), "missing ship warning job: {kinds:?}");
    assert!(kinds.contains(&JobKind::ShipDeadline), "missing ship deadline job: {kinds:?}");
    tear_down(x).await;
}

#[tokio::test]
async fn late_payment_failure_cannot_clobber_released_escrow() {
    let x = setup().await;
    x.fund_user("alice").await;
    x.fund_user("bob").await;
    let instance = x.vault_instance("alice", "raichu-1999", "1008", 8.5).await;
    x.list_for_sale("alice", "raichu-1999", instance.id, 6_000).await;
    let buy = x.place_buy("bob", "raichu-1999", 6_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    let trade = x.settlement().process_trade_payment(&outcome.trades[0]).await.unwrap();
    assert_eq!(trade.escrow_status, EscrowStatus::Released);

    // A straggling gateway failure callback arrives after settlement completed.
    let err = x.db.mark_payment_failed(trade.id).await.unwrap_err();
    assert!(err.to_string().contains("Illegal escrow transition"), "unexpected error: {err}");
    let trade = x.db.fetch_trade(trade.id).await.unwrap().unwrap();
    assert_eq!(trade.escrow_status, EscrowStatus::Released);
    tear_down(x).await;
}

#[tokio::test]
async fn retry_cutoff_cancels_and_restores_the_listing() {
    let mut config = EngineConfig::default();
    config.payment_retry_cutoff = Duration::zero();
    let x = setup_with(config).await;
    x.fund_user("alice").await;
    x.fund_user("bob").await;
    let instance = x.vault_instance("alice", "mewtwo-1999", "1005", 9.0).await;
    let ask = x.list_for_sale("alice", "mewtwo-1999", instance.id, 12_000).await;
    let buy = x.place_buy("bob", "mewtwo-1999", 12_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();

    x.gateway.decline_next_charges(10);
    let trade = x.settlement().process_trade_payment(&outcome.trades[0]).await.unwrap();
    assert_eq!(trade.escrow_status, EscrowStatus::Cancelled);

    // The sell order is back on the book with its quantity restored.
    let ask = x.db.fetch_order(ask.id).await.unwrap().unwrap();
    assert_eq!(ask.status, OrderStatus::Open);
    assert_eq!(ask.filled_quantity, 0);
    let instance = x.db.fetch_card_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(instance.status, CardStatus::Listed);
    assert_eq!(instance.owner_id, "alice");
    tear_down(x).await;
}

#[tokio::test]
async fn buyer_without_payment_method_fails_capture() {
    let x = setup().await;
    x.fund_user("alice").await;
    // bob never registered a payment method
    let instance = x.vault_instance("alice", "gyarados-1999", "1006", 7.5).await;
    x.list_for_sale("alice", "gyarados-1999", instance.id, 3_000).await;
    let buy = x.place_buy("bob", "gyarados-1999", 3_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();

    let trade = x.settlement().process_trade_payment(&outcome.trades[0]).await.unwrap();
    assert_eq!(trade.escrow_status, EscrowStatus::PaymentFailed);
    assert_eq!(x.gateway.effect_count(), 0, "no gateway call is made without a payment method");
    tear_down(x).await;
}
