#![allow(dead_code)]

use escrow_ledger::{
    Counterparties, Currency, DealService, Grant, Ledger, LedgerConfig, OpenRequest, Party,
};
use tempfile::TempDir;

pub const GROUP: &str = "-1001234";
pub const OWNER: &str = "owner";

// Sled holds a file lock on its directory, so every test gets its own
// database under a temp dir that is removed on drop.
pub fn service_in(temp_dir: &TempDir, config: LedgerConfig) -> anyhow::Result<DealService> {
    let ledger = Ledger::open(temp_dir.path().join("escrow.db"))?;
    Ok(DealService::new(ledger, config))
}

pub fn service() -> anyhow::Result<(TempDir, DealService)> {
    let temp_dir = tempfile::tempdir()?;
    let service = service_in(&temp_dir, LedgerConfig::default())?;
    Ok((temp_dir, service))
}

pub fn request(trigger: &str, moderator: &str, amount: u64, currency: Currency) -> OpenRequest {
    OpenRequest {
        trigger_ref: trigger.to_string(),
        group_ref: GROUP.to_string(),
        moderator_id: moderator.to_string(),
        amount,
        currency,
        counterparties: Counterparties::new()
            .set_buyer(Party::new("@buyer").with_member("buyer-1"))
            .set_seller(Party::new("@seller").with_member("seller-1")),
    }
}

pub fn allow(
    service: &DealService,
    moderator: &str,
    amount: u64,
    currency: Currency,
) -> anyhow::Result<()> {
    service.grant_limit(OWNER, moderator, Grant::Ceiling { amount, currency })?;
    Ok(())
}
