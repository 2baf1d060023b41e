//! Durable ledger store backed by sled
//!
//! Each collection lives in its own tree. Records are CBOR encoded; counters
//! are big-endian `u64`s. Callers only get the primitives the deal lifecycle
//! needs: plain reads, insert-if-absent on trigger markers, a compare-and-swap
//! update loop, and multi-tree transactions through the public tree handles.
use crate::audit::AuditEntry;
use crate::deal::{Currency, Deal, DealStatus, TimeStamp};
use crate::error::LedgerError;
use crate::marker::{Disposition, TriggerMarker};
use sled::transaction::ConflictableTransactionError;
use sled::{IVec, Tree};
use std::path::Path;

pub const DEALS: &str = "deals";
pub const TRIGGERS: &str = "triggers";
pub const PROCESSED: &str = "processed";
pub const LIMITS: &str = "limits";
pub const COUNTERS: &str = "counters";
pub const MOD_STATS: &str = "mod_stats";
pub const MEMBER_STATS: &str = "member_stats";
pub const REPORTS: &str = "reports";
pub const AUDIT: &str = "audit";

#[derive(Clone)]
pub struct Ledger {
    db: sled::Db,
    pub(crate) deals: Tree,
    pub(crate) triggers: Tree,
    pub(crate) processed: Tree,
    pub(crate) limits: Tree,
    pub(crate) counters: Tree,
    pub(crate) mod_stats: Tree,
    pub(crate) member_stats: Tree,
    pub(crate) reports: Tree,
    pub(crate) audit: Tree,
}

impl Ledger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory ledger removed when dropped.
    pub fn temporary() -> Result<Self, LedgerError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    pub fn from_db(db: sled::Db) -> Result<Self, LedgerError> {
        Ok(Self {
            deals: db.open_tree(DEALS)?,
            triggers: db.open_tree(TRIGGERS)?,
            processed: db.open_tree(PROCESSED)?,
            limits: db.open_tree(LIMITS)?,
            counters: db.open_tree(COUNTERS)?,
            mod_stats: db.open_tree(MOD_STATS)?,
            member_stats: db.open_tree(MEMBER_STATS)?,
            reports: db.open_tree(REPORTS)?,
            audit: db.open_tree(AUDIT)?,
            db,
        })
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    pub async fn flush(&self) -> Result<usize, LedgerError> {
        Ok(self.db.flush_async().await?)
    }

    pub fn get_deal(&self, deal_ref: &str) -> Result<Option<Deal>, LedgerError> {
        self.deals
            .get(deal_ref.as_bytes())?
            .map(|bytes| decode(deal_ref.as_bytes(), &bytes))
            .transpose()
    }

    /// Every stored deal in key order.
    pub fn deals(&self) -> impl Iterator<Item = Result<Deal, LedgerError>> + '_ {
        self.deals.iter().map(|entry| {
            let (key, value) = entry?;
            decode(&key, &value)
        })
    }

    pub fn trigger_marker(&self, key: &[u8]) -> Result<Option<TriggerMarker>, LedgerError> {
        self.triggers
            .get(key)?
            .map(|bytes| decode(key, &bytes))
            .transpose()
    }

    /// Atomically store `marker` under `key` unless a marker is already
    /// there. Returns false if the trigger was claimed before.
    pub fn claim_trigger(&self, key: &[u8], marker: &[u8]) -> Result<bool, LedgerError> {
        let swapped = self
            .triggers
            .compare_and_swap(key, None::<&[u8]>, Some(marker))?;
        Ok(swapped.is_ok())
    }

    /// Remove the marker under `key` only if it still holds `expected`, so a
    /// claim taken over by someone else is never dropped.
    pub fn release_trigger(&self, key: &[u8], expected: &[u8]) -> Result<bool, LedgerError> {
        let swapped = self
            .triggers
            .compare_and_swap(key, Some(expected), None::<&[u8]>)?;
        Ok(swapped.is_ok())
    }

    pub fn processed(&self, key: &[u8]) -> Result<Option<Disposition>, LedgerError> {
        self.processed
            .get(key)?
            .map(|bytes| decode(key, &bytes))
            .transpose()
    }

    /// Key for an audit entry stamped `at`. Unique even for entries
    /// sharing a timestamp.
    pub fn next_audit_key_at(&self, at: &TimeStamp) -> Result<Vec<u8>, LedgerError> {
        Ok(audit_key(at, self.db.generate_id()?))
    }

    /// Append an entry outside of any deal transaction.
    pub fn append_audit(&self, entry: &AuditEntry) -> Result<(), LedgerError> {
        self.audit
            .insert(self.next_audit_key_at(&entry.at)?, encode(entry)?)?;
        Ok(())
    }

    pub fn counter(&self, key: &[u8]) -> Result<u64, LedgerError> {
        Ok(read_u64(self.counters.get(key)?.as_ref()))
    }

    /// Move a completed deal to archived. Returns false when the deal is
    /// missing or not in the completed state, which makes reruns no-ops.
    pub fn archive_completed(&self, deal_ref: &str, now: TimeStamp) -> Result<bool, LedgerError> {
        let key = deal_ref.as_bytes();
        loop {
            let Some(current) = self.deals.get(key)? else {
                return Ok(false);
            };
            let mut deal: Deal = decode(key, &current)?;
            if !deal.status.can_transition_to(DealStatus::Archived) {
                return Ok(false);
            }
            deal.status = DealStatus::Archived;
            deal.archived_at = Some(now);

            let next = encode(&deal)?;
            if self
                .deals
                .compare_and_swap(key, Some(current), Some(next))?
                .is_ok()
            {
                return Ok(true);
            }
        }
    }
}

/// Read-modify-write of a single record through a compare-and-swap loop.
/// `f` may run more than once under contention.
pub fn update<T, F>(tree: &Tree, key: &[u8], mut f: F) -> Result<T, LedgerError>
where
    T: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()>,
    F: FnMut(Option<T>) -> T,
{
    loop {
        let current = tree.get(key)?;
        let decoded = current
            .as_ref()
            .map(|bytes| decode::<T>(key, bytes))
            .transpose()?;
        let next = f(decoded);
        let bytes = encode(&next)?;
        if tree.compare_and_swap(key, current, Some(bytes))?.is_ok() {
            return Ok(next);
        }
    }
}

pub fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, LedgerError> {
    minicbor::to_vec(value).map_err(|e| LedgerError::Encode(e.to_string()))
}

pub fn decode<T>(key: &[u8], bytes: &[u8]) -> Result<T, LedgerError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| LedgerError::Decode {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: e.to_string(),
    })
}

/// Lift a codec failure into a transaction abort.
pub(crate) fn abort_on<T, E: From<LedgerError>>(
    result: Result<T, LedgerError>,
) -> Result<T, ConflictableTransactionError<E>> {
    result.map_err(|e| ConflictableTransactionError::Abort(E::from(e)))
}

pub fn read_u64(bytes: Option<&IVec>) -> u64 {
    bytes
        .and_then(|b| <[u8; 8]>::try_from(&b[..]).ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

/// The group ref is length-prefixed, so separators inside either ref can
/// never make two different pairs collide.
pub fn trigger_key(group_ref: &str, trigger_ref: &str) -> Vec<u8> {
    format!("{}:{group_ref}:{trigger_ref}", group_ref.len()).into_bytes()
}

pub fn processed_trigger_key(group_ref: &str, trigger_ref: &str) -> Vec<u8> {
    let mut key = b"trigger/".to_vec();
    key.extend_from_slice(&trigger_key(group_ref, trigger_ref));
    key
}

pub fn processed_deal_key(deal_ref: &str) -> Vec<u8> {
    format!("deal/{deal_ref}").into_bytes()
}

/// Last issued deal sequence for a currency.
pub fn sequence_key(currency: Currency) -> Vec<u8> {
    format!("seq/{}", currency.as_str()).into_bytes()
}

/// Number of currently active deals in a currency.
pub fn outstanding_key(currency: Currency) -> Vec<u8> {
    format!("open/{}", currency.as_str()).into_bytes()
}

/// Report entries sort by completion time so a window is one range scan.
pub fn report_key(completed_at: &TimeStamp, deal_ref: &str) -> Vec<u8> {
    let mut key = time_prefix(completed_at).to_vec();
    key.extend_from_slice(deal_ref.as_bytes());
    key
}

pub fn audit_key(at: &TimeStamp, id: u64) -> Vec<u8> {
    let mut key = time_prefix(at).to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Order-preserving byte encoding of a signed nanosecond timestamp.
pub fn time_prefix(at: &TimeStamp) -> [u8; 8] {
    ((at.nanos() as u64) ^ (1 << 63)).to_be_bytes()
}
