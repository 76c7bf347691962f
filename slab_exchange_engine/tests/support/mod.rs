//! Shared harness for the integration tests: a throwaway SQLite exchange with the in-memory gateway wired in.
#![allow(dead_code)]

use log::*;
use slab_exchange_engine::{
    db_types::{CardInstance, CardStatus, NewCardInstance, NewOrder, NewShipment, Order, ShipmentDirection, ShipmentStatus},
    events::EventProducers,
    test_utils::{
        prepare_env::{prepare_test_env, random_db_path},
        MemoryGateway,
        StaticCatalog,
    },
    AccountManagement,
    CustodyApi,
    CustodyManagement,
    DeadlineScheduler,
    EngineConfig,
    ExchangeDatabase,
    MatchSender,
    MatchWorker,
    MatchingEngine,
    OrderFlowApi,
    SettlementApi,
    SqliteDatabase,
    SurveillanceApi,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};
use sx_common::Cents;

pub const VERIFIER: &str = "verifier-1";

pub struct TestExchange {
    pub db: SqliteDatabase,
    pub gateway: MemoryGateway,
    pub catalog: StaticCatalog,
    pub config: EngineConfig,
    pub producers: EventProducers,
}

pub async fn setup() -> TestExchange {
    setup_with(EngineConfig::default()).await
}

pub async fn setup_with(config: EngineConfig) -> TestExchange {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    TestExchange {
        db,
        gateway: MemoryGateway::new(),
        catalog: StaticCatalog::allow_all(),
        config,
        producers: EventProducers::default(),
    }
}

pub async fn tear_down(exchange: TestExchange) {
    let mut db = exchange.db;
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(db.url()).await.unwrap();
}

impl TestExchange {
    pub fn engine(&self) -> MatchingEngine<SqliteDatabase> {
        MatchingEngine::new(self.db.clone(), self.config.clone(), self.producers.clone())
    }

    pub fn settlement(&self) -> SettlementApi<SqliteDatabase, MemoryGateway> {
        SettlementApi::new(self.db.clone(), self.gateway.clone(), self.config.clone(), self.producers.clone())
    }

    pub fn custody(&self) -> CustodyApi<SqliteDatabase, MemoryGateway> {
        CustodyApi::new(self.db.clone(), self.settlement(), self.config.clone(), self.producers.clone())
    }

    pub fn surveillance(&self) -> SurveillanceApi<SqliteDatabase> {
        SurveillanceApi::new(self.db.clone())
    }

    pub fn scheduler(&self) -> DeadlineScheduler<SqliteDatabase, MemoryGateway> {
        DeadlineScheduler::new(self.db.clone(), self.settlement(), self.config.clone())
    }

    /// The order intake API plus the matching worker feeding off it. Most tests keep the worker idle and drive
    /// [`MatchingEngine`] by hand for determinism.
    pub fn order_flow(
        &self,
    ) -> (OrderFlowApi<SqliteDatabase, StaticCatalog>, MatchWorker<SqliteDatabase, MemoryGateway>, MatchSender) {
        let (worker, sender) = MatchWorker::new(self.engine(), self.settlement(), self.surveillance(), 64);
        let api = OrderFlowApi::new(self.db.clone(), self.catalog.clone(), sender.clone(), self.producers.clone());
        (api, worker, sender)
    }

    /// Registers gateway handles for a user so charges and payouts succeed.
    pub async fn fund_user(&self, user_id: &str) {
        self.db
            .update_account_gateway_refs(
                user_id,
                Some(&format!("cust-{user_id}")),
                Some(&format!("pm-{user_id}")),
                Some(&format!("acct-{user_id}")),
            )
            .await
            .expect("Error funding user");
    }

    /// Registers an instance and walks it through the full deposit flow: ship in, deliver, claim, approve. The
    /// result is a `Verified` card sitting in the vault.
    pub async fn vault_instance(&self, owner: &str, card_id: &str, cert: &str, grade: f64) -> CardInstance {
        let custody = self.custody();
        let instance = custody
            .register_instance(NewCardInstance {
                card_id: card_id.to_string(),
                owner_id: owner.to_string(),
                status: CardStatus::PendingShipment,
                grading_company: "PSA".to_string(),
                cert_number: cert.to_string(),
                grade,
            })
            .await
            .expect("Error registering instance");
        let shipment = custody
            .create_inbound_shipment(owner, NewShipment {
                card_instance_id: instance.id,
                trade_id: None,
                direction: ShipmentDirection::Inbound,
                carrier: Some("UPS".to_string()),
                tracking_number: Some("1Z999".to_string()),
            })
            .await
            .expect("Error creating inbound shipment");
        custody.update_shipment_status(shipment.id, ShipmentStatus::Delivered).await.expect("Error delivering");
        custody.claim_instance(instance.id, VERIFIER).await.expect("Error claiming");
        let (instance, _) = custody.approve_verification(instance.id, VERIFIER).await.expect("Error approving");
        assert_eq!(instance.status, CardStatus::Verified);
        instance
    }

    /// Registers a card the seller still holds at home: eligible for a sell-first listing, never verified.
    pub async fn home_instance(&self, owner: &str, card_id: &str, cert: &str, grade: f64) -> CardInstance {
        self.db
            .register_card_instance(NewCardInstance {
                card_id: card_id.to_string(),
                owner_id: owner.to_string(),
                status: CardStatus::Listed,
                grading_company: "PSA".to_string(),
                cert_number: cert.to_string(),
                grade,
            })
            .await
            .expect("Error registering instance")
    }

    pub async fn list_for_sale(&self, seller: &str, card_id: &str, instance_id: i64, price: i64) -> Order {
        let order = NewOrder::limit(seller, card_id, slab_exchange_engine::db_types::OrderSide::Sell, Cents::from(price), 1)
            .with_instance(instance_id);
        let (order, inserted) = self.db.insert_order(order).await.expect("Error listing for sale");
        assert!(inserted);
        order
    }

    pub async fn place_buy(&self, buyer: &str, card_id: &str, price: i64, quantity: i64) -> Order {
        let order = NewOrder::limit(buyer, card_id, slab_exchange_engine::db_types::OrderSide::Buy, Cents::from(price), quantity);
        let (order, inserted) = self.db.insert_order(order).await.expect("Error placing buy");
        assert!(inserted);
        order
    }
}
