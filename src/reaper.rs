//! Background sweep over settled deals and abandoned trigger claims
//!
//! Completed deals that have been idle past the threshold get a membership
//! refresh for each resolvable counterparty and are then archived so later
//! sweeps skip them. Trigger claims left in `Processing` by an open attempt
//! that never finished are dropped once they pass the claim timeout.
//!
//! The reaper shares nothing in-process with the deal service; it relies on
//! the ledger's compare-and-swap primitives alone.
use crate::config::ReaperConfig;
use crate::deal::{DealStatus, TimeStamp};
use crate::error::DealError;
use crate::ledger::{self, Ledger};
use crate::marker::TriggerMarker;
use crate::notify::Notifier;
use chrono::TimeDelta;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub archived: usize,
    pub refresh_failures: usize,
    pub stale_claims: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.archived == 0 && self.refresh_failures == 0 && self.stale_claims == 0
    }
}

pub struct Reaper {
    ledger: Ledger,
    notifier: Arc<dyn Notifier>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(ledger: Ledger, notifier: Arc<dyn Notifier>, config: ReaperConfig) -> Self {
        Self {
            ledger,
            notifier,
            config,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, DealError> {
        self.sweep_at(TimeStamp::now()).await
    }

    /// One pass over the ledger as of `now`.
    pub async fn sweep_at(&self, now: TimeStamp) -> Result<SweepReport, DealError> {
        let idle_threshold = to_delta(self.config.idle_threshold);
        let mut report = SweepReport::default();

        // Snapshot first so no iterator is held across the notifier calls
        let mut idle = Vec::new();
        for deal in self.ledger.deals() {
            let deal = deal?;
            if deal.status != DealStatus::Completed {
                continue;
            }
            if let Some(completed_at) = deal.completed_at {
                if now.since(&completed_at) >= idle_threshold {
                    idle.push(deal);
                }
            }
        }

        for deal in idle {
            for member in deal.counterparties.known_members() {
                if let Err(err) = self
                    .notifier
                    .refresh_membership(&deal.group_ref, member)
                    .await
                {
                    report.refresh_failures += 1;
                    warn!(
                        deal_ref = %deal.deal_ref,
                        member,
                        error = %err,
                        "membership refresh failed"
                    );
                }
            }

            match self.ledger.archive_completed(&deal.deal_ref, now) {
                Ok(true) => {
                    report.archived += 1;
                    debug!(deal_ref = %deal.deal_ref, deal_id = %deal.deal_id, "deal archived");
                }
                Ok(false) => {}
                Err(err) => error!(deal_ref = %deal.deal_ref, error = %err, "archive failed"),
            }
        }

        report.stale_claims = self.drop_stale_claims(&now)?;
        Ok(report)
    }

    fn drop_stale_claims(&self, now: &TimeStamp) -> Result<usize, DealError> {
        let timeout = to_delta(self.config.claim_timeout);
        let mut dropped = 0;

        for entry in self.ledger.triggers.iter() {
            let (key, raw) = entry?;
            let marker: TriggerMarker = ledger::decode(&key, &raw)?;
            if !marker.is_stale(now, timeout) {
                continue;
            }
            // only removes the exact claim that was observed
            if self.ledger.release_trigger(&key, &raw)? {
                dropped += 1;
                warn!(
                    trigger = %String::from_utf8_lossy(&key),
                    "dropped stale trigger claim"
                );
            }
        }
        Ok(dropped)
    }

    /// Sweep every `interval` until `shutdown` flips to true or its sender
    /// goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => match self.sweep().await {
                    Ok(report) if !report.is_empty() => info!(
                        archived = report.archived,
                        refresh_failures = report.refresh_failures,
                        stale_claims = report.stale_claims,
                        "reaper sweep"
                    ),
                    Ok(_) => debug!("reaper sweep found nothing"),
                    Err(err) => error!(error = %err, "reaper sweep failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("reaper stopped");
    }

    pub fn spawn(self) -> ReaperHandle {
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(self.run(signal));
        ReaperHandle { shutdown, task }
    }
}

pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        // the loop also exits if the receiver is already gone
        let _ = self.shutdown.send(true);
        self.task.await
    }
}

fn to_delta(duration: std::time::Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
