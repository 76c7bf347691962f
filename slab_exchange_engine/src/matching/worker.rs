use log::*;
use tokio::sync::mpsc;

use crate::{
    db_types::Order,
    matching::MatchingEngine,
    settlement::SettlementApi,
    surveillance::SurveillanceApi,
    traits::{ExchangeDatabase, PaymentGateway},
};

/// Submission handle for the matching worker. Cheap to clone; hand one to every order intake path.
#[derive(Clone)]
pub struct MatchSender {
    sender: mpsc::Sender<Order>,
}

impl MatchSender {
    /// Queues an accepted order for matching. Failure means the worker has shut down; the order stays safely on the
    /// book and will match when it is next the resting side.
    pub async fn submit(&self, order: Order) {
        if let Err(e) = self.sender.send(order).await {
            error!("🔄️ Matching worker is gone. Order #{} not queued: {e}", e.0.id);
        }
    }
}

/// The single consumer of the matching queue.
///
/// Exactly one worker runs per process, so matching runs are strictly sequential: no two orders are ever matched
/// concurrently and the fill order within a price level is the arrival order. After each run the worker drives
/// settlement and surveillance for every trade the run produced; neither can fail the matching itself.
pub struct MatchWorker<B, G> {
    receiver: mpsc::Receiver<Order>,
    engine: MatchingEngine<B>,
    settlement: SettlementApi<B, G>,
    surveillance: SurveillanceApi<B>,
}

impl<B, G> MatchWorker<B, G>
where
    B: ExchangeDatabase,
    G: PaymentGateway,
{
    pub fn new(
        engine: MatchingEngine<B>,
        settlement: SettlementApi<B, G>,
        surveillance: SurveillanceApi<B>,
        buffer_size: usize,
    ) -> (Self, MatchSender) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let worker = Self { receiver, engine, settlement, surveillance };
        (worker, MatchSender { sender })
    }

    /// Consumes the queue until every sender is dropped.
    pub async fn run(mut self) {
        info!("🔄️ Matching worker started");
        while let Some(order) = self.receiver.recv().await {
            self.process(order).await;
        }
        info!("🔄️ Matching worker shutting down");
    }

    async fn process(&self, order: Order) {
        let outcome = match self.engine.match_order(&order).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("🔄️ Matching run for order #{} failed: {e}", order.id);
                return;
            },
        };
        for trade in &outcome.trades {
            if let Err(e) = self.settlement.process_trade_payment(trade).await {
                error!("💰️ Settlement for trade #{} failed: {e}", trade.id);
            }
            if let Err(e) = self.surveillance.check_trade(trade).await {
                error!("🚨️ Surveillance check for trade #{} failed: {e}", trade.id);
            }
        }
    }
}
