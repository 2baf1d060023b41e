mod common;

use common::{request, service_in};
use escrow_ledger::{Currency, DealError, DealService, Grant, LedgerConfig, Role};
use std::collections::HashSet;
use std::sync::Arc;

const RACERS: usize = 16;

async fn race_same_trigger(config: LedgerConfig) -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let service = Arc::new(service_in(&temp_dir, config)?);
    service.grant_limit(common::OWNER, "mod-a", Grant::Role(Role::Mod))?;

    let mut handles = Vec::with_capacity(RACERS);
    for _ in 0..RACERS {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .open_deal(request("hot", "mod-a", 25, Currency::Primary))
                .await
        }));
    }

    let mut opened = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => opened += 1,
            Err(DealError::AlreadyActive { .. }) => {}
            Err(other) => anyhow::bail!("unexpected open error: {other}"),
        }
    }

    assert_eq!(opened, 1);
    assert_eq!(service.list_active_deals()?.len(), 1);
    assert_eq!(service.outstanding(Currency::Primary)?, 1);
    Ok(())
}

/// Only the store-level claim decides the winner.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_open_per_trigger_without_process_lock() -> anyhow::Result<()> {
    race_same_trigger(LedgerConfig {
        use_trigger_lock: false,
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_open_per_trigger_with_process_lock() -> anyhow::Result<()> {
    race_same_trigger(LedgerConfig::default()).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_get_distinct_sequences() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let service = Arc::new(service_in(&temp_dir, LedgerConfig::default())?);
    service.grant_limit(common::OWNER, "mod-a", Grant::Role(Role::Mod))?;

    let mut handles = Vec::with_capacity(RACERS);
    for i in 0..RACERS {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .open_deal(request(&format!("t{i}"), "mod-a", 5, Currency::Secondary))
                .await
        }));
    }

    let mut labels = HashSet::new();
    for handle in handles {
        labels.insert(handle.await??.deal_id);
    }

    let expected: HashSet<String> = (1..=RACERS).map(|n| format!("#Escrow{n}")).collect();
    assert_eq!(labels, expected);
    Ok(())
}

async fn settle_race(service: Arc<DealService>, deal_ref: String) -> anyhow::Result<usize> {
    let mut handles = Vec::with_capacity(RACERS);
    for i in 0..RACERS {
        let service = Arc::clone(&service);
        let deal_ref = deal_ref.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                service.complete_deal(&deal_ref, "mod-a").await.map(|_| ())
            } else {
                service.cancel_deal(&deal_ref, "mod-a").await.map(|_| ())
            }
        }));
    }

    let mut settled = 0;
    for handle in handles {
        match handle.await? {
            Ok(()) => settled += 1,
            Err(DealError::AlreadyProcessed { .. }) => {}
            Err(other) => anyhow::bail!("unexpected settle error: {other}"),
        }
    }
    Ok(settled)
}

/// Completion and cancellation racing on one deal: exactly one terminal
/// outcome and statistics counted at most once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_terminal_outcome_per_deal() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let service = Arc::new(service_in(&temp_dir, LedgerConfig::default())?);
    service.grant_limit(common::OWNER, "mod-a", Grant::Role(Role::Mod))?;

    let opened = service
        .open_deal(request("t1", "mod-a", 40, Currency::Primary))
        .await?;

    let settled = settle_race(Arc::clone(&service), opened.deal_ref.clone()).await?;
    assert_eq!(settled, 1);

    let deal = service.get_deal(&opened.deal_ref)?;
    let stats = service.stats_for("mod-a", true)?;
    match deal.status {
        escrow_ledger::DealStatus::Completed => {
            assert_eq!(stats.deals, 1);
            assert_eq!(stats.primary, 40);
        }
        escrow_ledger::DealStatus::Cancelled => assert_eq!(stats.deals, 0),
        other => anyhow::bail!("deal left in {other:?}"),
    }
    assert_eq!(service.outstanding(Currency::Primary)?, 0);
    Ok(())
}
