//! Physical custody flows.
//!
//! `CustodyApi` wraps the backend's custody state machine and wires verification outcomes into settlement: an
//! approved card releases any escrow waiting on it, a rejected one triggers a full refund.
use std::fmt::Debug;

use log::*;
use serde_json::json;
use thiserror::Error;

use crate::{
    config::EngineConfig,
    db_types::{CardInstance, NewCardInstance, NewShipment, Shipment, ShipmentStatus, Trade},
    events::{EventProducers, NotificationEvent, NotificationKind},
    settlement::{SettlementApi, SettlementError},
    traits::{CustodyError, ExchangeDatabase, PaymentGateway},
};

pub struct CustodyApi<B, G> {
    db: B,
    settlement: SettlementApi<B, G>,
    config: EngineConfig,
    producers: EventProducers,
}

impl<B, G> Debug for CustodyApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CustodyApi")
    }
}

impl<B, G> Clone for CustodyApi<B, G>
where
    B: Clone,
    G: Clone,
{
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            settlement: self.settlement.clone(),
            config: self.config.clone(),
            producers: self.producers.clone(),
        }
    }
}

impl<B, G> CustodyApi<B, G>
where
    B: ExchangeDatabase,
    G: PaymentGateway,
{
    pub fn new(db: B, settlement: SettlementApi<B, G>, config: EngineConfig, producers: EventProducers) -> Self {
        Self { db, settlement, config, producers }
    }

    pub async fn register_instance(&self, instance: NewCardInstance) -> Result<CardInstance, CustodyApiError> {
        let instance = self.db.register_card_instance(instance).await?;
        Ok(instance)
    }

    pub async fn create_inbound_shipment(
        &self,
        user_id: &str,
        shipment: NewShipment,
    ) -> Result<Shipment, CustodyApiError> {
        let shipment = self.db.create_inbound_shipment(user_id, shipment).await?;
        Ok(shipment)
    }

    pub async fn update_shipment_status(
        &self,
        shipment_id: i64,
        status: ShipmentStatus,
    ) -> Result<(Shipment, CardInstance), CustodyApiError> {
        let (shipment, instance) = self.db.update_shipment_status(shipment_id, status).await?;
        Ok((shipment, instance))
    }

    /// Takes the verification claim, using the configured lease.
    pub async fn claim_instance(&self, instance_id: i64, verifier_id: &str) -> Result<CardInstance, CustodyApiError> {
        let instance = self.db.claim_instance(instance_id, verifier_id, self.config.claim_lease).await?;
        Ok(instance)
    }

    pub async fn unclaim_instance(&self, instance_id: i64, verifier_id: &str) -> Result<CardInstance, CustodyApiError> {
        let instance = self.db.unclaim_instance(instance_id, verifier_id).await?;
        Ok(instance)
    }

    /// Approves verification. If a captured trade was waiting on this card, ownership has already moved to the buyer
    /// inside the database transaction; the escrow release (a gateway call) happens here, after it commits.
    pub async fn approve_verification(
        &self,
        instance_id: i64,
        verifier_id: &str,
    ) -> Result<(CardInstance, Option<Trade>), CustodyApiError> {
        let (instance, pending) = self.db.approve_verification(instance_id, verifier_id).await?;
        match &pending {
            Some(trade) => {
                let trade = self.settlement.release_escrow(trade).await?;
                let event = NotificationEvent::new(
                    &trade.buyer_id,
                    NotificationKind::VerificationPassed,
                    "Your card passed verification",
                    "The card you bought arrived at the vault and passed verification.",
                )
                .with_data(json!({ "trade_id": trade.id, "instance_id": instance_id }));
                self.producers.notify(event).await;
            },
            // A deposit with no trade attached: the owner vaulted their own card.
            None => {
                let event = NotificationEvent::new(
                    &instance.owner_id,
                    NotificationKind::DepositVerified,
                    "Your card is in the vault",
                    "Your deposited card passed verification and is ready to list.",
                )
                .with_data(json!({ "instance_id": instance_id }));
                self.producers.notify(event).await;
            },
        }
        Ok((instance, pending))
    }

    /// Rejects verification. The card is queued for return to the sender; any captured trade is refunded in full.
    pub async fn reject_verification(
        &self,
        instance_id: i64,
        verifier_id: &str,
        reason: &str,
    ) -> Result<(CardInstance, Option<Trade>), CustodyApiError> {
        let (instance, pending) = self.db.reject_verification(instance_id, verifier_id).await?;
        warn!("🎴️ Instance #{instance_id} rejected: {reason}");
        if let Some(trade) = &pending {
            self.settlement.refund_for_rejection(trade).await?;
        }
        let event = NotificationEvent::new(
            &instance.owner_id,
            NotificationKind::VerificationFailed,
            "Your card failed verification",
            "The card did not match its listing and will be returned to you.",
        )
        .with_data(json!({ "instance_id": instance_id, "reason": reason }));
        self.producers.notify(event).await;
        Ok((instance, pending))
    }

    pub async fn redeem_instance(
        &self,
        instance_id: i64,
        owner_id: &str,
        carrier: Option<&str>,
    ) -> Result<(CardInstance, Shipment), CustodyApiError> {
        let (instance, shipment) = self.db.redeem_instance(instance_id, owner_id, carrier).await?;
        Ok((instance, shipment))
    }
}

#[derive(Debug, Clone, Error)]
pub enum CustodyApiError {
    #[error("{0}")]
    Custody(#[from] CustodyError),
    #[error("{0}")]
    Settlement(#[from] SettlementError),
}
