//! Surveillance heuristics: circular trading, price deviation and pair frequency.
use slab_exchange_engine::{
    db_types::{AlertRule, AlertSeverity, Trade},
    AccountManagement,
};

mod support;

use support::{setup, tear_down, TestExchange};

/// Executes one vault-first trade between `seller` and `buyer` at `price` and returns it. Surveillance is not run;
/// the caller decides which trades to check.
async fn trade_between(x: &TestExchange, seller: &str, buyer: &str, card: &str, cert: &str, price: i64) -> Trade {
    let instance = x.vault_instance(seller, card, cert, 9.0).await;
    x.list_for_sale(seller, card, instance.id, price).await;
    let buy = x.place_buy(buyer, card, price, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    assert_eq!(outcome.trades_created(), 1);
    outcome.trades[0].clone()
}

#[tokio::test]
async fn repeated_pair_trades_on_one_card_raise_a_circular_alert() {
    let x = setup().await;
    x.fund_user("alice").await;
    x.fund_user("bob").await;
    let first = trade_between(&x, "alice", "bob", "pikachu-1999", "4001", 10_000).await;
    assert!(x.surveillance().check_trade(&first).await.unwrap().is_empty());
    // Settle so the card changes hands and Bob can sell it straight back to Alice.
    x.settlement().process_trade_payment(&first).await.unwrap();

    let instance = x.db.fetch_card_instance(first.card_instance_id).await.unwrap().unwrap();
    assert_eq!(instance.owner_id, "bob");
    x.list_for_sale("bob", "pikachu-1999", instance.id, 10_000).await;
    let buy = x.place_buy("alice", "pikachu-1999", 10_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    let alerts = x.surveillance().check_trade(&outcome.trades[0]).await.unwrap();

    let circular = alerts.iter().find(|a| a.rule == AlertRule::CircularTrading).expect("no circular alert");
    assert_eq!(circular.severity, AlertSeverity::High);
    let stored = x.db.fetch_alerts_for_trade(outcome.trades[0].id).await.unwrap();
    assert!(!stored.is_empty());
    tear_down(x).await;
}

#[tokio::test]
async fn large_price_deviation_is_flagged() {
    let x = setup().await;
    let first = trade_between(&x, "alice", "bob", "charizard-1999", "4002", 10_000).await;
    assert!(x.surveillance().check_trade(&first).await.unwrap().is_empty(), "no reference price yet");

    // 150% above the previous trade: high severity.
    let spike = trade_between(&x, "carol", "dave", "charizard-1999", "4003", 25_000).await;
    let alerts = x.surveillance().check_trade(&spike).await.unwrap();
    let deviation = alerts.iter().find(|a| a.rule == AlertRule::PriceDeviation).expect("no deviation alert");
    assert_eq!(deviation.severity, AlertSeverity::High);

    // 60% below the new reference: medium severity.
    let dip = trade_between(&x, "erin", "frank", "charizard-1999", "4004", 10_000).await;
    let alerts = x.surveillance().check_trade(&dip).await.unwrap();
    let deviation = alerts.iter().find(|a| a.rule == AlertRule::PriceDeviation).expect("no deviation alert");
    assert_eq!(deviation.severity, AlertSeverity::Medium);
    tear_down(x).await;
}

#[tokio::test]
async fn small_price_moves_are_not_flagged() {
    let x = setup().await;
    trade_between(&x, "alice", "bob", "blastoise-1999", "4005", 10_000).await;
    let second = trade_between(&x, "carol", "dave", "blastoise-1999", "4006", 12_000).await;
    let alerts = x.surveillance().check_trade(&second).await.unwrap();
    assert!(alerts.iter().all(|a| a.rule != AlertRule::PriceDeviation));
    tear_down(x).await;
}

#[tokio::test]
async fn busy_pairs_raise_a_frequency_alert() {
    let x = setup().await;
    let mut last = None;
    // Six trades between the same pair across different cards inside the window.
    for i in 0..6 {
        let card = format!("filler-{i}");
        let cert = format!("40{i:02}0");
        let trade = trade_between(&x, "alice", "bob", &card, &cert, 5_000).await;
        last = Some(trade);
    }
    let alerts = x.surveillance().check_trade(&last.unwrap()).await.unwrap();
    let frequency = alerts.iter().find(|a| a.rule == AlertRule::HighFrequency).expect("no frequency alert");
    assert_eq!(frequency.severity, AlertSeverity::Medium);
    tear_down(x).await;
}
