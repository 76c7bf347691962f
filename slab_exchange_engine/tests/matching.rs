//! Matching loop behaviour: price-time priority, the resting-price rule, market order tails and grading filters.
use slab_exchange_engine::{
    db_types::{NewOrder, OrderSide, OrderStatus},
    AccountManagement,
    ExchangeDatabase,
};
use sx_common::Cents;

mod support;

use support::{setup, tear_down};

#[tokio::test]
async fn equal_price_fills_in_arrival_order() {
    let x = setup().await;
    let first = x.vault_instance("alice", "pikachu-1999", "0001", 9.0).await;
    let second = x.vault_instance("bob", "pikachu-1999", "0002", 9.0).await;
    let first_ask = x.list_for_sale("alice", "pikachu-1999", first.id, 10_000).await;
    let second_ask = x.list_for_sale("bob", "pikachu-1999", second.id, 10_000).await;

    let buy = x.place_buy("carol", "pikachu-1999", 10_000, 2).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();

    assert_eq!(outcome.trades_created(), 2);
    assert_eq!(outcome.trades[0].sell_order_id, first_ask.id, "the older ask must fill first");
    assert_eq!(outcome.trades[1].sell_order_id, second_ask.id);
    let buy = x.db.fetch_order(buy.id).await.unwrap().unwrap();
    assert_eq!(buy.status, OrderStatus::Filled);
    tear_down(x).await;
}

#[tokio::test]
async fn better_price_beats_earlier_arrival() {
    let x = setup().await;
    let pricey = x.vault_instance("alice", "charizard-1999", "0003", 9.0).await;
    let cheap = x.vault_instance("bob", "charizard-1999", "0004", 9.0).await;
    x.list_for_sale("alice", "charizard-1999", pricey.id, 20_000).await;
    let cheap_ask = x.list_for_sale("bob", "charizard-1999", cheap.id, 18_000).await;

    let buy = x.place_buy("carol", "charizard-1999", 25_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();

    assert_eq!(outcome.trades_created(), 1);
    assert_eq!(outcome.trades[0].sell_order_id, cheap_ask.id);
    tear_down(x).await;
}

#[tokio::test]
async fn trades_execute_at_the_resting_price() {
    let x = setup().await;
    let instance = x.vault_instance("alice", "blastoise-1999", "0005", 8.5).await;
    x.list_for_sale("alice", "blastoise-1999", instance.id, 9_000).await;

    // Aggressive bid at $100 against an ask resting at $90: the maker's price wins.
    let buy = x.place_buy("bob", "blastoise-1999", 10_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    assert_eq!(outcome.trades[0].price, Cents::from(9_000));
    tear_down(x).await;
}

#[tokio::test]
async fn incoming_sell_takes_the_resting_bid_price() {
    let x = setup().await;
    let instance = x.vault_instance("alice", "venusaur-1999", "0006", 8.0).await;
    x.place_buy("bob", "venusaur-1999", 10_000, 1).await;

    let ask = x.list_for_sale("alice", "venusaur-1999", instance.id, 8_000).await;
    let outcome = x.engine().match_order(&ask).await.unwrap();
    assert_eq!(outcome.trades_created(), 1);
    assert_eq!(outcome.trades[0].price, Cents::from(10_000), "the resting bid's price applies");
    tear_down(x).await;
}

#[tokio::test]
async fn market_order_tail_is_cancelled() {
    let x = setup().await;
    let instance = x.vault_instance("alice", "mewtwo-1999", "0007", 9.5).await;
    x.list_for_sale("alice", "mewtwo-1999", instance.id, 15_000).await;

    let buy = NewOrder::market("bob", "mewtwo-1999", OrderSide::Buy, 3);
    let (buy, _) = x.db.insert_order(buy).await.unwrap();
    let outcome = x.engine().match_order(&buy).await.unwrap();

    assert_eq!(outcome.trades_created(), 1);
    assert_eq!(outcome.cancelled_remainder, 2);
    let buy = x.db.fetch_order(buy.id).await.unwrap().unwrap();
    assert_eq!(buy.status, OrderStatus::Cancelled);
    assert_eq!(buy.filled_quantity, 1);
    tear_down(x).await;
}

#[tokio::test]
async fn market_buy_walks_the_book_level_by_level() {
    let x = setup().await;
    let cheap = x.vault_instance("alice", "raichu-1999", "0012", 9.0).await;
    let mid = x.vault_instance("bob", "raichu-1999", "0013", 9.0).await;
    let dear = x.vault_instance("dave", "raichu-1999", "0014", 9.0).await;
    // Listed out of price order; the walk must still take the cheapest level first.
    x.list_for_sale("dave", "raichu-1999", dear.id, 12_000).await;
    x.list_for_sale("alice", "raichu-1999", cheap.id, 10_000).await;
    x.list_for_sale("bob", "raichu-1999", mid.id, 11_000).await;

    let buy = NewOrder::market("carol", "raichu-1999", OrderSide::Buy, 5);
    let (buy, _) = x.db.insert_order(buy).await.unwrap();
    let outcome = x.engine().match_order(&buy).await.unwrap();

    assert_eq!(outcome.trades_created(), 3);
    let prices: Vec<_> = outcome.trades.iter().map(|t| t.price).collect();
    assert_eq!(prices, vec![Cents::from(10_000), Cents::from(11_000), Cents::from(12_000)]);
    assert!(outcome.trades.iter().all(|t| t.quantity == 1), "one unit per level");
    assert_eq!(outcome.cancelled_remainder, 2);
    let buy = x.db.fetch_order(buy.id).await.unwrap().unwrap();
    assert_eq!(buy.status, OrderStatus::Cancelled);
    assert_eq!(buy.filled_quantity, 3);
    tear_down(x).await;
}

#[tokio::test]
async fn users_never_trade_with_themselves() {
    let x = setup().await;
    let instance = x.vault_instance("alice", "gyarados-1999", "0008", 7.0).await;
    x.list_for_sale("alice", "gyarados-1999", instance.id, 5_000).await;

    let buy = x.place_buy("alice", "gyarados-1999", 6_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    assert_eq!(outcome.trades_created(), 0);
    let buy = x.db.fetch_order(buy.id).await.unwrap().unwrap();
    assert_eq!(buy.status, OrderStatus::Open, "the bid rests instead of self-matching");
    tear_down(x).await;
}

#[tokio::test]
async fn grading_filters_skip_ineligible_listings() {
    let x = setup().await;
    let low_grade = x.vault_instance("alice", "alakazam-1999", "0009", 8.0).await;
    let high_grade = x.vault_instance("bob", "alakazam-1999", "0010", 9.5).await;
    // The ineligible listing is cheaper; the filter must skip it anyway.
    x.list_for_sale("alice", "alakazam-1999", low_grade.id, 4_000).await;
    let eligible_ask = x.list_for_sale("bob", "alakazam-1999", high_grade.id, 6_000).await;

    let buy = NewOrder::limit("carol", "alakazam-1999", OrderSide::Buy, Cents::from(7_000), 1)
        .with_grading_filter(Some("PSA"), Some(9.0));
    let (buy, _) = x.db.insert_order(buy).await.unwrap();
    let outcome = x.engine().match_order(&buy).await.unwrap();

    assert_eq!(outcome.trades_created(), 1);
    assert_eq!(outcome.trades[0].sell_order_id, eligible_ask.id);
    tear_down(x).await;
}

#[tokio::test]
async fn unmatched_limit_order_rests_on_the_book() {
    let x = setup().await;
    let buy = x.place_buy("bob", "dragonite-1999", 12_000, 1).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    assert_eq!(outcome.trades_created(), 0);

    let book = x.db.order_book("dragonite-1999").await.unwrap();
    assert_eq!(book.bids.len(), 1);
    assert_eq!(book.bids[0].price, Cents::from(12_000));
    assert_eq!(book.bids[0].open_quantity, 1);
    assert!(book.asks.is_empty());
    assert!(book.spread.is_none());
    tear_down(x).await;
}

#[tokio::test]
async fn partial_fill_leaves_the_remainder_open() {
    let x = setup().await;
    let instance = x.vault_instance("alice", "snorlax-1999", "0011", 8.5).await;
    x.list_for_sale("alice", "snorlax-1999", instance.id, 7_500).await;

    let buy = x.place_buy("bob", "snorlax-1999", 7_500, 3).await;
    let outcome = x.engine().match_order(&buy).await.unwrap();
    assert_eq!(outcome.trades_created(), 1);
    let buy = x.db.fetch_order(buy.id).await.unwrap().unwrap();
    assert_eq!(buy.status, OrderStatus::PartiallyFilled);
    assert_eq!(buy.remaining(), 2);
    tear_down(x).await;
}
