//! Order intake: validation, idempotent placement, cancellation and the asynchronous matching worker.
use std::time::Duration;

use slab_exchange_engine::{
    db_types::{CardStatus, EscrowStatus, NewOrder, OrderSide, OrderStatus},
    test_utils::StaticCatalog,
    AccountManagement,
    ExchangeDatabase,
    OrderFlowApi,
};
use sx_common::Cents;

mod support;

use support::{setup, tear_down};

#[tokio::test]
async fn placement_is_idempotent_on_the_client_key() {
    let x = setup().await;
    let (api, _worker, _sender) = x.order_flow();
    let order = NewOrder::limit("bob", "pikachu-1999", OrderSide::Buy, Cents::from(10_000), 1)
        .with_idempotency_key("req-abc");
    let (first, inserted) = api.place_order(order.clone()).await.unwrap();
    assert!(inserted);
    let (replay, inserted) = api.place_order(order).await.unwrap();
    assert!(!inserted);
    assert_eq!(first.id, replay.id);
    tear_down(x).await;
}

#[tokio::test]
async fn shape_validation_rejects_bad_orders() {
    let x = setup().await;
    let (api, _worker, _sender) = x.order_flow();

    let err = api.place_order(NewOrder::limit("bob", "pikachu-1999", OrderSide::Buy, Cents::from(0), 1)).await;
    assert!(err.is_err(), "zero limit price");

    let err = api.place_order(NewOrder::limit("bob", "pikachu-1999", OrderSide::Buy, Cents::from(100), 0)).await;
    assert!(err.is_err(), "zero quantity");

    let mut market_with_price = NewOrder::market("bob", "pikachu-1999", OrderSide::Buy, 1);
    market_with_price.price = Some(Cents::from(100));
    assert!(api.place_order(market_with_price).await.is_err(), "market orders must not carry a price");

    let err = api.place_order(NewOrder::limit("alice", "pikachu-1999", OrderSide::Sell, Cents::from(100), 1)).await;
    assert!(err.is_err(), "sell orders need a bound instance");

    let filtered_sell = NewOrder::limit("alice", "pikachu-1999", OrderSide::Sell, Cents::from(100), 1)
        .with_instance(1)
        .with_grading_filter(Some("PSA"), None);
    assert!(api.place_order(filtered_sell).await.is_err(), "grading filters are buy-only");

    let out_of_range = NewOrder::limit("bob", "pikachu-1999", OrderSide::Buy, Cents::from(100), 1)
        .with_grading_filter(None, Some(11.0));
    assert!(api.place_order(out_of_range).await.is_err(), "grades run from 1 to 10");
    tear_down(x).await;
}

#[tokio::test]
async fn unknown_cards_are_rejected() {
    let x = setup().await;
    let catalog = StaticCatalog::with_cards(&["pikachu-1999"]);
    let (_, _worker, sender) = x.order_flow();
    let api = OrderFlowApi::new(x.db.clone(), catalog, sender, x.producers.clone());

    assert!(api.place_order(NewOrder::limit("bob", "pikachu-1999", OrderSide::Buy, Cents::from(100), 1)).await.is_ok());
    let err = api
        .place_order(NewOrder::limit("bob", "bootleg-charizard", OrderSide::Buy, Cents::from(100), 1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not exist in the catalog"), "unexpected error: {err}");
    tear_down(x).await;
}

#[tokio::test]
async fn one_instance_cannot_be_listed_twice() {
    let x = setup().await;
    let instance = x.vault_instance("alice", "charizard-1999", "5001", 9.0).await;
    x.list_for_sale("alice", "charizard-1999", instance.id, 10_000).await;

    let second = NewOrder::limit("alice", "charizard-1999", OrderSide::Sell, Cents::from(11_000), 1)
        .with_instance(instance.id);
    let err = x.db.insert_order(second).await.unwrap_err();
    assert!(err.to_string().contains("already bound"), "unexpected error: {err}");
    tear_down(x).await;
}

#[tokio::test]
async fn only_the_instance_owner_may_list_it() {
    let x = setup().await;
    let instance = x.vault_instance("alice", "blastoise-1999", "5002", 8.0).await;
    let order = NewOrder::limit("mallory", "blastoise-1999", OrderSide::Sell, Cents::from(100), 1)
        .with_instance(instance.id);
    let err = x.db.insert_order(order).await.unwrap_err();
    assert!(err.to_string().contains("does not belong"), "unexpected error: {err}");
    tear_down(x).await;
}

#[tokio::test]
async fn cancelling_a_listing_frees_the_instance() {
    let x = setup().await;
    let instance = x.vault_instance("alice", "venusaur-1999", "5003", 9.0).await;
    let ask = x.list_for_sale("alice", "venusaur-1999", instance.id, 10_000).await;
    let instance = x.db.fetch_card_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(instance.status, CardStatus::Listed);

    let err = x.db.cancel_order("mallory", ask.id).await;
    assert!(err.is_err(), "only the owner may cancel");

    let ask = x.db.cancel_order("alice", ask.id).await.unwrap();
    assert_eq!(ask.status, OrderStatus::Cancelled);
    let instance = x.db.fetch_card_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(instance.status, CardStatus::Verified);

    let err = x.db.cancel_order("alice", ask.id).await.unwrap_err();
    assert!(err.to_string().contains("cannot be cancelled"), "cancel is not repeatable: {err}");
    tear_down(x).await;
}

#[tokio::test]
async fn the_worker_matches_and_settles_in_the_background() {
    let x = setup().await;
    x.fund_user("alice").await;
    x.fund_user("bob").await;
    let instance = x.vault_instance("alice", "mewtwo-1999", "5004", 9.5).await;
    let (api, worker, _sender) = x.order_flow();
    tokio::spawn(worker.run());

    api.place_order(
        NewOrder::limit("alice", "mewtwo-1999", OrderSide::Sell, Cents::from(12_000), 1).with_instance(instance.id),
    )
    .await
    .unwrap();
    let (buy, _) = api
        .place_order(NewOrder::limit("bob", "mewtwo-1999", OrderSide::Buy, Cents::from(12_000), 1))
        .await
        .unwrap();

    // The worker matches and settles asynchronously; poll until the card changes hands.
    let mut settled = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let current = x.db.fetch_card_instance(instance.id).await.unwrap().unwrap();
        if current.owner_id == "bob" {
            settled = true;
            break;
        }
    }
    assert!(settled, "the worker never matched and settled the crossing orders");
    let buy = x.db.fetch_order(buy.id).await.unwrap().unwrap();
    assert_eq!(buy.status, OrderStatus::Filled);
    tear_down(x).await;
}

#[tokio::test]
async fn the_worker_drives_escrow_to_a_terminal_state() {
    let x = setup().await;
    x.fund_user("alice").await;
    x.fund_user("bob").await;
    let instance = x.vault_instance("alice", "snorlax-1999", "5005", 8.5).await;
    let (api, worker, _sender) = x.order_flow();
    tokio::spawn(worker.run());

    api.place_order(
        NewOrder::limit("alice", "snorlax-1999", OrderSide::Sell, Cents::from(9_000), 1).with_instance(instance.id),
    )
    .await
    .unwrap();
    api.place_order(NewOrder::limit("bob", "snorlax-1999", OrderSide::Buy, Cents::from(9_000), 1)).await.unwrap();

    let mut released = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(trade) = x.db.fetch_trade(1).await.unwrap() {
            if trade.escrow_status == EscrowStatus::Released {
                released = true;
                break;
            }
        }
    }
    assert!(released, "the worker never settled the trade");
    tear_down(x).await;
}
