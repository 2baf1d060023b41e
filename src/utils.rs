//! Identifier minting for ledger records

use crate::error::LedgerError;
use bech32::Bech32m;
use uuid7::uuid7;

pub const DEAL_PREFIX: &str = "deal_";
pub const CLAIM_PREFIX: &str = "claim_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String, LedgerError> {
    let hrp = bech32::Hrp::parse(hrp).map_err(|e| LedgerError::Identifier(e.to_string()))?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| LedgerError::Identifier(e.to_string()))?;
    Ok(encode)
}

pub fn new_deal_ref() -> Result<String, LedgerError> {
    new_uuid_to_bech32(DEAL_PREFIX)
}

pub fn new_claim() -> Result<String, LedgerError> {
    new_uuid_to_bech32(CLAIM_PREFIX)
}
