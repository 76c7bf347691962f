//! Durable deadline enforcement.
//!
//! `DeadlineScheduler` polls the scheduled-job table and executes whatever has come due. Claiming a job stamps its
//! `executed_at` inside the claim query, so a job is executed at most once even with several scheduler processes
//! polling the same database. Job execution failures are logged, never retried automatically, and never take the
//! polling loop down.
use std::fmt::Debug;

use chrono::Utc;
use futures_util::{stream, StreamExt};
use log::*;

use crate::{
    config::EngineConfig,
    db_types::{JobKind, ScheduledJob},
    settlement::SettlementApi,
    traits::{ExchangeDatabase, ExchangeError, PaymentGateway},
};

const CLAIM_BATCH_SIZE: i64 = 20;

pub struct DeadlineScheduler<B, G> {
    db: B,
    settlement: SettlementApi<B, G>,
    config: EngineConfig,
}

impl<B, G> Debug for DeadlineScheduler<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeadlineScheduler")
    }
}

impl<B, G> DeadlineScheduler<B, G>
where
    B: ExchangeDatabase,
    G: PaymentGateway,
{
    pub fn new(db: B, settlement: SettlementApi<B, G>, config: EngineConfig) -> Self {
        Self { db, settlement, config }
    }

    /// Polls forever. Runs until the task is dropped.
    pub async fn run(self) {
        let period = self.config.scheduler_poll_interval.to_std().unwrap_or(std::time::Duration::from_secs(30));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("⏰️ Deadline scheduler started, polling every {period:?}");
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("⏰️ Scheduler tick failed: {e}");
            }
        }
    }

    /// One polling pass: claims everything due and executes the claimed jobs, at most `scheduler_concurrency` at a
    /// time. Exposed separately so tests can drive the scheduler without waiting on wall-clock time.
    pub async fn tick(&self) -> Result<usize, ExchangeError> {
        let jobs = self.db.claim_due_jobs(Utc::now(), CLAIM_BATCH_SIZE).await?;
        if jobs.is_empty() {
            return Ok(0);
        }
        debug!("⏰️ Claimed {} due jobs", jobs.len());
        let count = jobs.len();
        stream::iter(jobs)
            .for_each_concurrent(self.config.scheduler_concurrency, |job| async move {
                self.execute_job(job).await;
            })
            .await;
        Ok(count)
    }

    async fn execute_job(&self, job: ScheduledJob) {
        trace!("⏰️ Executing job {} (trade #{})", job.job_key, job.trade_id);
        let result = match job.kind {
            JobKind::ShipWarning => self.settlement.send_ship_warning(job.trade_id).await,
            JobKind::ShipDeadline => self.settlement.enforce_ship_deadline(job.trade_id).await.map(|_| ()),
            JobKind::PaymentRetry => self.settlement.retry_payment(job.trade_id).await.map(|_| ()),
        };
        match result {
            Ok(()) => trace!("⏰️ Job {} done", job.job_key),
            Err(e) => error!("⏰️ Job {} failed: {e}", job.job_key),
        }
    }
}
