mod common;

use async_trait::async_trait;
use chrono::TimeDelta;
use common::{GROUP, request, service};
use escrow_ledger::ledger::{self, TRIGGERS};
use escrow_ledger::marker::TriggerMarker;
use escrow_ledger::notify::Notifier;
use escrow_ledger::reaper::Reaper;
use escrow_ledger::{
    Currency, DealError, DealStatus, Grant, Receipt, ReaperConfig, Role, TimeStamp,
};
use std::sync::{Arc, Mutex};

/// Records refresh requests and fails for one chosen member.
#[derive(Default)]
struct RecordingNotifier {
    refreshed: Mutex<Vec<String>>,
    fail_for: Option<String>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deal_completed(&self, _: &Receipt) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deal_cancelled(&self, _: &Receipt) -> anyhow::Result<()> {
        Ok(())
    }

    async fn refresh_membership(&self, _group_ref: &str, member_id: &str) -> anyhow::Result<()> {
        if self.fail_for.as_deref() == Some(member_id) {
            anyhow::bail!("chat api refused {member_id}");
        }
        self.refreshed.lock().unwrap().push(member_id.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn archives_only_after_idle_threshold() -> anyhow::Result<()> {
    let (_dir, service) = service()?;
    service.grant_limit(common::OWNER, "mod-a", Grant::Role(Role::Mod))?;

    let opened = service
        .open_deal(request("t1", "mod-a", 10, Currency::Primary))
        .await?;
    let receipt = service.complete_deal(&opened.deal_ref, "mod-a").await?;
    let completed_at = receipt.deal.completed_at.expect("completion time");

    let notifier = Arc::new(RecordingNotifier::default());
    let reaper = Reaper::new(
        service.ledger().clone(),
        notifier.clone(),
        ReaperConfig::default(),
    );

    let early = reaper.sweep_at(completed_at + TimeDelta::seconds(599)).await?;
    assert_eq!(early.archived, 0);
    assert_eq!(service.get_deal(&opened.deal_ref)?.status, DealStatus::Completed);

    let late = reaper.sweep_at(completed_at + TimeDelta::seconds(601)).await?;
    assert_eq!(late.archived, 1);
    let deal = service.get_deal(&opened.deal_ref)?;
    assert_eq!(deal.status, DealStatus::Archived);
    assert!(deal.archived_at.is_some());

    let mut refreshed = notifier.refreshed.lock().unwrap().clone();
    refreshed.sort();
    assert_eq!(refreshed, vec!["buyer-1", "seller-1"]);

    // archived deals are skipped, statistics untouched
    let rerun = reaper.sweep_at(completed_at + TimeDelta::seconds(900)).await?;
    assert!(rerun.is_empty());
    assert_eq!(notifier.refreshed.lock().unwrap().len(), 2);
    assert_eq!(service.stats_for("mod-a", true)?.deals, 1);

    Ok(())
}

#[tokio::test]
async fn refresh_failure_does_not_block_archive() -> anyhow::Result<()> {
    let (_dir, service) = service()?;
    service.grant_limit(common::OWNER, "mod-a", Grant::Role(Role::Mod))?;

    let opened = service
        .open_deal(request("t1", "mod-a", 10, Currency::Secondary))
        .await?;
    let receipt = service.complete_deal(&opened.deal_ref, "mod-a").await?;
    let completed_at = receipt.deal.completed_at.expect("completion time");

    let notifier = Arc::new(RecordingNotifier {
        fail_for: Some("buyer-1".to_string()),
        ..Default::default()
    });
    let reaper = Reaper::new(
        service.ledger().clone(),
        notifier.clone(),
        ReaperConfig::default(),
    );

    let report = reaper
        .sweep_at(completed_at + TimeDelta::seconds(3600))
        .await?;
    assert_eq!(report.refresh_failures, 1);
    assert_eq!(report.archived, 1);
    assert_eq!(*notifier.refreshed.lock().unwrap(), vec!["seller-1"]);

    Ok(())
}

#[tokio::test]
async fn active_and_cancelled_deals_are_left_alone() -> anyhow::Result<()> {
    let (_dir, service) = service()?;
    service.grant_limit(common::OWNER, "mod-a", Grant::Role(Role::Mod))?;

    let active = service
        .open_deal(request("t1", "mod-a", 10, Currency::Primary))
        .await?;
    let cancelled = service
        .open_deal(request("t2", "mod-a", 10, Currency::Primary))
        .await?;
    service.cancel_deal(&cancelled.deal_ref, "mod-a").await?;

    let reaper = Reaper::new(
        service.ledger().clone(),
        Arc::new(RecordingNotifier::default()),
        ReaperConfig::default(),
    );
    let report = reaper
        .sweep_at(TimeStamp::now() + TimeDelta::days(30))
        .await?;
    assert_eq!(report.archived, 0);
    assert!(service.get_deal(&active.deal_ref)?.is_active());
    assert_eq!(
        service.get_deal(&cancelled.deal_ref)?.status,
        DealStatus::Cancelled
    );

    Ok(())
}

#[tokio::test]
async fn stale_claim_is_dropped_and_trigger_reopens() -> anyhow::Result<()> {
    let (_dir, service) = service()?;
    service.grant_limit(common::OWNER, "mod-a", Grant::Role(Role::Mod))?;

    // an open attempt that died after claiming
    let claimed_at = TimeStamp::now() - TimeDelta::seconds(300);
    let marker = ledger::encode(&TriggerMarker::processing(
        "claim_abandoned".to_string(),
        claimed_at,
    ))?;
    let triggers = service.ledger().db().open_tree(TRIGGERS)?;
    triggers.insert(ledger::trigger_key(GROUP, "t-stuck"), marker)?;

    let blocked = service
        .open_deal(request("t-stuck", "mod-a", 10, Currency::Primary))
        .await;
    assert!(matches!(blocked, Err(DealError::AlreadyActive { .. })));

    let reaper = Reaper::new(
        service.ledger().clone(),
        Arc::new(RecordingNotifier::default()),
        ReaperConfig::default(),
    );
    let report = reaper.sweep().await?;
    assert_eq!(report.stale_claims, 1);

    let opened = service
        .open_deal(request("t-stuck", "mod-a", 10, Currency::Primary))
        .await?;
    assert_eq!(opened.deal_id, "#Escrow1");
    let marker = service
        .ledger()
        .trigger_marker(&ledger::trigger_key(GROUP, "t-stuck"))?;
    assert_eq!(
        marker,
        Some(TriggerMarker::Resolved {
            deal_ref: opened.deal_ref.clone()
        })
    );

    // resolved markers never count as stale
    let again = reaper.sweep_at(TimeStamp::now() + TimeDelta::days(1)).await?;
    assert_eq!(again.stale_claims, 0);

    Ok(())
}
