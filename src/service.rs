//! Service layer API for the deal lifecycle
//!
//! `open_deal` claims the trigger with an atomic insert-if-absent before any
//! other write; the sequence bump, the deal record and the resolved trigger
//! marker then land in a single transaction. `complete_deal` and
//! `cancel_deal` apply the status change, processed markers and statistics
//! in one transaction as well, so a crash never leaves half a transition.
use crate::audit::{AuditAction, AuditEntry};
use crate::config::LedgerConfig;
use crate::deal::{Counterparties, Currency, Deal, DealStatus, Receipt, TimeStamp};
use crate::error::DealError;
use crate::ledger::{self, Ledger, abort_on, read_u64};
use crate::limits::{Grant, Limit, LimitAuthority, ModeratorLimit};
use crate::lock::TriggerLock;
use crate::marker::{Disposition, TriggerMarker};
use crate::notify::{NoopNotifier, Notifier};
use crate::stats::{DealStats, Leaderboard, Report, ReportEntry};
use crate::utils;
use chrono::TimeDelta;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree, abort};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type TxResult<T> = ConflictableTransactionResult<T, DealError>;

/// Everything the chat layer knows when a moderator starts a deal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub trigger_ref: String,
    pub group_ref: String,
    pub moderator_id: String,
    pub amount: u64,
    pub currency: Currency,
    pub counterparties: Counterparties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedDeal {
    pub deal_id: String,
    pub deal_ref: String,
}

pub struct DealService {
    ledger: Ledger,
    limits: LimitAuthority,
    lock: Option<TriggerLock>,
    notifier: Arc<dyn Notifier>,
}

impl DealService {
    pub fn new(ledger: Ledger, config: LedgerConfig) -> Self {
        Self {
            limits: LimitAuthority::new(&ledger),
            lock: config.use_trigger_lock.then(TriggerLock::new),
            notifier: Arc::new(NoopNotifier),
            ledger,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn limits(&self) -> &LimitAuthority {
        &self.limits
    }

    /// Open a deal against a trigger message
    pub async fn open_deal(&self, request: OpenRequest) -> Result<OpenedDeal, DealError> {
        validate(&request)?;

        // Fast path for duplicate commands inside this process
        let _guard = match &self.lock {
            Some(lock) => match lock.try_guard(&request.group_ref, &request.trigger_ref) {
                Some(guard) => Some(guard),
                None => {
                    debug!(trigger = %request.trigger_ref, "trigger busy in process");
                    return Err(DealError::AlreadyActive {
                        trigger: request.trigger_ref,
                    });
                }
            },
            None => None,
        };

        let trigger_key = ledger::trigger_key(&request.group_ref, &request.trigger_ref);
        let processed_key = ledger::processed_trigger_key(&request.group_ref, &request.trigger_ref);

        if let Some(disposition) = self.ledger.processed(&processed_key)? {
            debug!(trigger = %request.trigger_ref, %disposition, "trigger already processed");
            return Err(DealError::AlreadyProcessed {
                subject: format!("trigger {}", request.trigger_ref),
                disposition,
            });
        }

        // Claim the trigger. This insert is the only serialization point.
        let claim = ledger::encode(&TriggerMarker::processing(
            utils::new_claim()?,
            TimeStamp::now(),
        ))?;
        if !self.ledger.claim_trigger(&trigger_key, &claim)? {
            // a settle may have landed between the first check and the claim
            if let Some(disposition) = self.ledger.processed(&processed_key)? {
                return Err(DealError::AlreadyProcessed {
                    subject: format!("trigger {}", request.trigger_ref),
                    disposition,
                });
            }
            debug!(trigger = %request.trigger_ref, "trigger already claimed");
            return Err(DealError::AlreadyActive {
                trigger: request.trigger_ref,
            });
        }

        match self.commit_open(&request, &trigger_key, &claim) {
            Ok(deal) => {
                info!(
                    deal_id = %deal.deal_id,
                    deal_ref = %deal.deal_ref,
                    moderator = %deal.moderator_id,
                    amount = deal.amount,
                    currency = %deal.currency,
                    "deal opened"
                );
                Ok(OpenedDeal {
                    deal_id: deal.deal_id,
                    deal_ref: deal.deal_ref,
                })
            }
            Err(err) => {
                // Compensate so the trigger is not stuck in processing
                match self.ledger.release_trigger(&trigger_key, &claim) {
                    Ok(_) => debug!(trigger = %request.trigger_ref, %err, "open rejected"),
                    Err(release_err) => error!(
                        trigger = %request.trigger_ref,
                        %release_err,
                        "failed to release trigger claim"
                    ),
                }
                Err(err)
            }
        }
    }

    fn commit_open(
        &self,
        request: &OpenRequest,
        trigger_key: &[u8],
        claim: &[u8],
    ) -> Result<Deal, DealError> {
        match self
            .limits
            .limit_for(&request.moderator_id, request.currency)?
        {
            Limit::Ceiling(ceiling) if request.amount > ceiling => {
                return Err(DealError::LimitExceeded {
                    moderator: request.moderator_id.clone(),
                    amount: request.amount,
                    limit: ceiling,
                    currency: request.currency,
                });
            }
            _ => {}
        }

        let deal_ref = utils::new_deal_ref()?;
        let resolved = ledger::encode(&TriggerMarker::Resolved {
            deal_ref: deal_ref.clone(),
        })?;
        let sequence_key = ledger::sequence_key(request.currency);
        let outstanding_key = ledger::outstanding_key(request.currency);
        let opened_at = TimeStamp::now();
        let audit_key = self.ledger.next_audit_key_at(&opened_at)?;

        let trees = (
            &self.ledger.counters,
            &self.ledger.deals,
            &self.ledger.triggers,
            &self.ledger.audit,
        );
        let deal = trees.transaction(|(counters, deals, triggers, audit)| -> TxResult<Deal> {
            // The reconciliation sweep may have dropped a slow claim
            match triggers.get(trigger_key)? {
                Some(current) if &*current == claim => {}
                _ => {
                    return abort(DealError::ClaimExpired {
                        trigger: request.trigger_ref.clone(),
                    });
                }
            }

            let sequence = read_u64(counters.get(&sequence_key)?.as_ref()) + 1;
            let outstanding = read_u64(counters.get(&outstanding_key)?.as_ref()) + 1;

            let deal = Deal {
                deal_ref: deal_ref.clone(),
                deal_id: Deal::label(sequence),
                trigger_ref: request.trigger_ref.clone(),
                group_ref: request.group_ref.clone(),
                moderator_id: request.moderator_id.clone(),
                amount: request.amount,
                currency: request.currency,
                status: DealStatus::Active,
                opened_at,
                completed_at: None,
                counterparties: request.counterparties.clone(),
                archived_at: None,
            };

            counters.insert(sequence_key.as_slice(), &sequence.to_be_bytes()[..])?;
            counters.insert(outstanding_key.as_slice(), &outstanding.to_be_bytes()[..])?;
            deals.insert(deal_ref.as_bytes(), abort_on(ledger::encode(&deal))?)?;
            triggers.insert(trigger_key, resolved.as_slice())?;

            let entry = AuditEntry::new(
                opened_at,
                deal.moderator_id.as_str(),
                AuditAction::DealOpened,
                deal.deal_id.as_str(),
                format!("{} {}", deal.amount, deal.currency),
            );
            audit.insert(audit_key.as_slice(), abort_on(ledger::encode(&entry))?)?;

            Ok(deal)
        })?;

        Ok(deal)
    }

    /// Complete an active deal. Only the opening moderator may do this.
    pub async fn complete_deal(
        &self,
        deal_ref: &str,
        requester_id: &str,
    ) -> Result<Receipt, DealError> {
        let deal = self.settle(deal_ref, requester_id, Disposition::Completed)?;
        let receipt = Receipt::new(deal, Disposition::Completed)?;
        info!(
            deal_id = %receipt.deal.deal_id,
            deal_ref,
            moderator = requester_id,
            amount = receipt.deal.amount,
            currency = %receipt.deal.currency,
            "deal completed"
        );

        if let Err(err) = self.notifier.deal_completed(&receipt).await {
            warn!(deal_ref, error = %err, "completion notice failed");
        }
        Ok(receipt)
    }

    /// Cancel an active deal. Cancelled deals do not count toward statistics.
    pub async fn cancel_deal(
        &self,
        deal_ref: &str,
        requester_id: &str,
    ) -> Result<Receipt, DealError> {
        let deal = self.settle(deal_ref, requester_id, Disposition::Cancelled)?;
        let receipt = Receipt::new(deal, Disposition::Cancelled)?;
        info!(
            deal_id = %receipt.deal.deal_id,
            deal_ref,
            moderator = requester_id,
            "deal cancelled"
        );

        if let Err(err) = self.notifier.deal_cancelled(&receipt).await {
            warn!(deal_ref, error = %err, "cancellation notice failed");
        }
        Ok(receipt)
    }

    fn settle(
        &self,
        deal_ref: &str,
        requester_id: &str,
        disposition: Disposition,
    ) -> Result<Deal, DealError> {
        let key = deal_ref.as_bytes();
        let deal_marker_key = ledger::processed_deal_key(deal_ref);
        let marker = ledger::encode(&disposition)?;
        let now = TimeStamp::now();
        let audit_key = self.ledger.next_audit_key_at(&now)?;
        let (target, action) = match disposition {
            Disposition::Completed => (DealStatus::Completed, AuditAction::DealCompleted),
            Disposition::Cancelled => (DealStatus::Cancelled, AuditAction::DealCancelled),
        };

        let trees = (
            &self.ledger.deals,
            &self.ledger.processed,
            &self.ledger.counters,
            &self.ledger.mod_stats,
            &self.ledger.member_stats,
            &self.ledger.reports,
            &self.ledger.audit,
        );
        let result = trees.transaction(
            |(deals, processed, counters, mod_stats, member_stats, reports, audit)| -> TxResult<Deal> {
                let Some(bytes) = deals.get(key)? else {
                    return abort(DealError::NotFound {
                        deal_ref: deal_ref.to_owned(),
                    });
                };
                let mut deal: Deal = abort_on(ledger::decode(key, &bytes))?;

                if let Some(previous) = deal.status.disposition() {
                    return abort(DealError::AlreadyProcessed {
                        subject: format!("deal {}", deal.deal_id),
                        disposition: previous,
                    });
                }
                if deal.moderator_id != requester_id {
                    return abort(DealError::Forbidden {
                        requester: requester_id.to_owned(),
                        moderator: deal.moderator_id.clone(),
                    });
                }

                deal.status = target;
                if disposition == Disposition::Completed {
                    deal.completed_at = Some(now);
                }
                deals.insert(key, abort_on(ledger::encode(&deal))?)?;

                processed.insert(deal_marker_key.as_slice(), marker.as_slice())?;
                processed.insert(
                    ledger::processed_trigger_key(&deal.group_ref, &deal.trigger_ref),
                    marker.as_slice(),
                )?;

                let open_key = ledger::outstanding_key(deal.currency);
                let open = read_u64(counters.get(&open_key)?.as_ref()).saturating_sub(1);
                counters.insert(open_key.as_slice(), &open.to_be_bytes()[..])?;

                if disposition == Disposition::Completed {
                    record_stats(mod_stats, &deal.moderator_id, &deal)?;
                    let members: BTreeSet<&str> =
                        deal.counterparties.known_members().collect();
                    for member in members {
                        record_stats(member_stats, member, &deal)?;
                    }

                    let entry = ReportEntry {
                        completed_at: now,
                        amount: deal.amount,
                        currency: deal.currency,
                    };
                    reports.insert(
                        ledger::report_key(&now, &deal.deal_ref),
                        abort_on(ledger::encode(&entry))?,
                    )?;
                }

                let entry = AuditEntry::new(
                    now,
                    requester_id,
                    action,
                    deal.deal_id.as_str(),
                    format!("{} {}", deal.amount, deal.currency),
                );
                audit.insert(audit_key.as_slice(), abort_on(ledger::encode(&entry))?)?;

                Ok(deal)
            },
        );

        result.map_err(|err| {
            let err = DealError::from(err);
            debug!(deal_ref, requester = requester_id, %err, %disposition, "settle rejected");
            err
        })
    }

    pub fn get_deal(&self, deal_ref: &str) -> Result<Deal, DealError> {
        self.ledger
            .get_deal(deal_ref)?
            .ok_or_else(|| DealError::NotFound {
                deal_ref: deal_ref.to_owned(),
            })
    }

    pub fn list_active_deals(&self) -> Result<Vec<Deal>, DealError> {
        let mut active = Vec::new();
        for deal in self.ledger.deals() {
            let deal = deal?;
            if deal.is_active() {
                active.push(deal);
            }
        }
        Ok(active)
    }

    /// The active deal a member takes part in, used to route a seller's
    /// release request to the right moderator.
    pub fn find_active_by_member(&self, member_id: &str) -> Result<Option<Deal>, DealError> {
        for deal in self.ledger.deals() {
            let deal = deal?;
            if deal.is_active() && deal.involves_member(member_id) {
                return Ok(Some(deal));
            }
        }
        Ok(None)
    }

    pub fn stats_for(&self, id: &str, as_moderator: bool) -> Result<DealStats, DealError> {
        let tree = if as_moderator {
            &self.ledger.mod_stats
        } else {
            &self.ledger.member_stats
        };
        let key = id.as_bytes();
        Ok(tree
            .get(key)?
            .map(|bytes| ledger::decode(key, &bytes))
            .transpose()?
            .unwrap_or_default())
    }

    /// Completed deals within the trailing `window`. A window reaching
    /// past the start of the calendar covers the whole history.
    pub fn report_since(&self, window: Duration) -> Result<Report, DealError> {
        let mut report = Report::default();
        for entry in scan_window(&self.ledger.reports, window) {
            let (key, value) = entry?;
            let entry: ReportEntry = ledger::decode(&key, &value)?;
            report.add(&entry);
        }
        Ok(report)
    }

    pub fn daily_report(&self) -> Result<Report, DealError> {
        self.report_since(Duration::from_secs(24 * 60 * 60))
    }

    pub fn weekly_report(&self) -> Result<Report, DealError> {
        self.report_since(Duration::from_secs(7 * 24 * 60 * 60))
    }

    /// Audit entries within the trailing `window`, oldest first.
    pub fn audit_since(&self, window: Duration) -> Result<Vec<AuditEntry>, DealError> {
        let mut entries = Vec::new();
        for entry in scan_window(&self.ledger.audit, window) {
            let (key, value) = entry?;
            entries.push(ledger::decode(&key, &value)?);
        }
        Ok(entries)
    }

    pub fn leaderboard(&self) -> Result<Leaderboard, DealError> {
        let mut ranking = Vec::new();
        for entry in self.ledger.mod_stats.iter() {
            let (key, value) = entry?;
            let stats: DealStats = ledger::decode(&key, &value)?;
            ranking.push((String::from_utf8_lossy(&key).into_owned(), stats));
        }
        Ok(Leaderboard::from_entries(ranking))
    }

    /// Number of deals in `currency` that are still active.
    pub fn outstanding(&self, currency: Currency) -> Result<u64, DealError> {
        Ok(self.ledger.counter(&ledger::outstanding_key(currency))?)
    }

    pub fn grant_limit(
        &self,
        granter_id: &str,
        moderator_id: &str,
        grant: Grant,
    ) -> Result<ModeratorLimit, DealError> {
        let record = self.limits.grant(moderator_id, grant)?;
        let detail = match grant {
            Grant::Role(role) => format!("role {role:?}"),
            Grant::Ceiling { amount, currency } => format!("{amount} {currency}"),
        };
        self.ledger.append_audit(&AuditEntry::new(
            TimeStamp::now(),
            granter_id,
            AuditAction::LimitGranted,
            moderator_id,
            detail,
        ))?;
        Ok(record)
    }

    pub fn revoke_limit(&self, granter_id: &str, moderator_id: &str) -> Result<(), DealError> {
        self.limits.revoke(moderator_id)?;
        self.ledger.append_audit(&AuditEntry::new(
            TimeStamp::now(),
            granter_id,
            AuditAction::LimitRevoked,
            moderator_id,
            "",
        ))?;
        Ok(())
    }

    pub fn query_limit(&self, moderator_id: &str) -> Result<ModeratorLimit, DealError> {
        Ok(self.limits.record_for(moderator_id)?)
    }
}

/// Entries of a time-keyed tree from `now - window` onwards. A cutoff
/// before the earliest representable time scans everything.
fn scan_window(tree: &sled::Tree, window: Duration) -> sled::Iter {
    let cutoff = TimeDelta::from_std(window)
        .ok()
        .and_then(|window| TimeStamp::now().checked_sub(window));
    match cutoff {
        Some(cutoff) => tree.range(ledger::time_prefix(&cutoff)..),
        None => tree.iter(),
    }
}

fn validate(request: &OpenRequest) -> Result<(), DealError> {
    if request.amount == 0 {
        return Err(DealError::Validation("amount must be positive".into()));
    }
    if request.trigger_ref.is_empty() || request.group_ref.is_empty() {
        return Err(DealError::Validation(
            "trigger and group references are required".into(),
        ));
    }
    if request.moderator_id.is_empty() {
        return Err(DealError::Validation("moderator id is required".into()));
    }
    Ok(())
}

fn record_stats(
    tree: &TransactionalTree,
    id: &str,
    deal: &Deal,
) -> TxResult<()> {
    let key = id.as_bytes();
    let mut stats: DealStats = match tree.get(key)? {
        Some(bytes) => abort_on(ledger::decode(key, &bytes))?,
        None => DealStats::default(),
    };
    stats.record(deal.amount, deal.currency);
    tree.insert(key, abort_on(ledger::encode(&stats))?)?;
    Ok(())
}
