//! Per-moderator spending authority
//!
//! A moderator without a record is a `Standard` moderator with every ceiling
//! at zero, so nobody can open deals until they are granted something.
//! `Mod` and `SuperMod` are unlimited; only a `SuperMod` may grant.
use crate::deal::Currency;
use crate::error::LedgerError;
use crate::ledger::{self, Ledger};
use sled::Tree;
use tracing::info;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[n(0)]
    #[default]
    Standard,
    #[n(1)]
    Mod,
    #[n(2)]
    SuperMod,
}

impl Role {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Role::Mod | Role::SuperMod)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeratorLimit {
    #[n(0)]
    pub role: Role,
    #[n(1)]
    pub primary: u64,
    #[n(2)]
    pub secondary: u64,
}

/// Effective authority for one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Unlimited,
    Ceiling(u64),
}

impl Limit {
    /// Ceilings are inclusive.
    pub fn permits(&self, amount: u64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Ceiling(ceiling) => amount <= *ceiling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Role(Role),
    Ceiling { amount: u64, currency: Currency },
}

impl ModeratorLimit {
    pub fn ceiling(&self, currency: Currency) -> u64 {
        match currency {
            Currency::Primary => self.primary,
            Currency::Secondary => self.secondary,
        }
    }

    pub fn limit(&self, currency: Currency) -> Limit {
        if self.role.is_unlimited() {
            Limit::Unlimited
        } else {
            Limit::Ceiling(self.ceiling(currency))
        }
    }

    /// A role grant keeps the stored ceilings untouched. A ceiling grant
    /// always demotes the moderator back to `Standard`.
    pub fn apply(mut self, grant: Grant) -> Self {
        match grant {
            Grant::Role(role) => self.role = role,
            Grant::Ceiling { amount, currency } => {
                match currency {
                    Currency::Primary => self.primary = amount,
                    Currency::Secondary => self.secondary = amount,
                }
                self.role = Role::Standard;
            }
        }
        self
    }
}

#[derive(Clone)]
pub struct LimitAuthority {
    limits: Tree,
}

impl LimitAuthority {
    pub fn new(ledger: &Ledger) -> Self {
        Self {
            limits: ledger.limits.clone(),
        }
    }

    pub fn record_for(&self, moderator_id: &str) -> Result<ModeratorLimit, LedgerError> {
        let key = moderator_id.as_bytes();
        Ok(self
            .limits
            .get(key)?
            .map(|bytes| ledger::decode(key, &bytes))
            .transpose()?
            .unwrap_or_default())
    }

    pub fn limit_for(&self, moderator_id: &str, currency: Currency) -> Result<Limit, LedgerError> {
        Ok(self.record_for(moderator_id)?.limit(currency))
    }

    pub fn can_grant(&self, moderator_id: &str) -> Result<bool, LedgerError> {
        Ok(self.record_for(moderator_id)?.role == Role::SuperMod)
    }

    pub fn grant(&self, moderator_id: &str, grant: Grant) -> Result<ModeratorLimit, LedgerError> {
        let record = ledger::update(
            &self.limits,
            moderator_id.as_bytes(),
            |current: Option<ModeratorLimit>| current.unwrap_or_default().apply(grant),
        )?;
        info!(moderator = moderator_id, ?grant, role = ?record.role, "limit granted");
        Ok(record)
    }

    /// Reset to the zero record.
    pub fn revoke(&self, moderator_id: &str) -> Result<(), LedgerError> {
        self.limits.insert(
            moderator_id.as_bytes(),
            ledger::encode(&ModeratorLimit::default())?,
        )?;
        info!(moderator = moderator_id, "limit revoked");
        Ok(())
    }
}
