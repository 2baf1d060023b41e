//! Deal records and the types carried alongside them
use crate::error::LedgerError;
use crate::marker::Disposition;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::fmt;

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum Currency {
    #[n(0)]
    Primary,
    #[n(1)]
    Secondary,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Primary, Currency::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Primary => "primary",
            Currency::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Active -> {Completed, Cancelled} -> Archived`. Only completed deals are
/// ever archived.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Completed,
    #[n(2)]
    Cancelled,
    #[n(3)]
    Archived,
}

impl DealStatus {
    pub fn can_transition_to(&self, next: DealStatus) -> bool {
        matches!(
            (self, next),
            (DealStatus::Active, DealStatus::Completed)
                | (DealStatus::Active, DealStatus::Cancelled)
                | (DealStatus::Completed, DealStatus::Archived)
        )
    }

    /// The processed disposition a deal in this status has reached, if any.
    pub fn disposition(&self) -> Option<Disposition> {
        match self {
            DealStatus::Active => None,
            DealStatus::Completed | DealStatus::Archived => Some(Disposition::Completed),
            DealStatus::Cancelled => Some(Disposition::Cancelled),
        }
    }
}

/// One side of a trade. The handle is free text and may be a placeholder
/// such as "unknown"; the member id is only set when the chat layer could
/// resolve the participant.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Default)]
pub struct Party {
    #[n(0)]
    pub handle: String,
    #[n(1)]
    pub member_id: Option<String>,
}

impl Party {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            member_id: None,
        }
    }
    pub fn with_member(mut self, member_id: impl Into<String>) -> Self {
        self.member_id = Some(member_id.into());
        self
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Default)]
pub struct Counterparties {
    #[n(0)]
    pub buyer: Option<Party>,
    #[n(1)]
    pub seller: Option<Party>,
}

impl Counterparties {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_buyer(mut self, party: Party) -> Self {
        self.buyer = Some(party);
        self
    }
    pub fn set_seller(mut self, party: Party) -> Self {
        self.seller = Some(party);
        self
    }
    /// Member ids of the parties the chat layer could resolve, buyer first.
    pub fn known_members(&self) -> impl Iterator<Item = &str> {
        [self.buyer.as_ref(), self.seller.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|party| party.member_id.as_deref())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Deal {
    #[n(0)]
    pub deal_ref: String, // bech32m handle minted at open
    #[n(1)]
    pub deal_id: String, // "#Escrow<n>", sequential per currency
    #[n(2)]
    pub trigger_ref: String,
    #[n(3)]
    pub group_ref: String,
    #[n(4)]
    pub moderator_id: String,
    #[n(5)]
    pub amount: u64,
    #[n(6)]
    pub currency: Currency,
    #[n(7)]
    pub status: DealStatus,
    #[n(8)]
    pub opened_at: TimeStamp,
    #[n(9)]
    pub completed_at: Option<TimeStamp>,
    #[n(10)]
    pub counterparties: Counterparties,
    #[n(11)]
    pub archived_at: Option<TimeStamp>,
}

impl Deal {
    pub fn label(sequence: u64) -> String {
        format!("#Escrow{sequence}")
    }

    pub fn is_active(&self) -> bool {
        self.status == DealStatus::Active
    }

    pub fn involves_member(&self, member_id: &str) -> bool {
        self.counterparties
            .known_members()
            .any(|member| member == member_id)
    }

    /// sha256 over the CBOR encoding of this snapshot.
    pub fn digest(&self) -> Result<String, LedgerError> {
        let cbor = minicbor::to_vec(self).map_err(|e| LedgerError::Encode(e.to_string()))?;
        Ok(sha256::digest(&cbor))
    }
}

/// Snapshot handed back from a terminal transition so the chat layer can
/// post proof of the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub deal: Deal,
    pub disposition: Disposition,
    pub digest: String,
}

impl Receipt {
    pub fn new(deal: Deal, disposition: Disposition) -> Result<Self, LedgerError> {
        let digest = deal.digest()?;
        Ok(Self {
            deal,
            disposition,
            digest,
        })
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
            .unwrap_or_else(|| Self(DateTime::from_timestamp_nanos(0)))
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Time elapsed from `earlier` to `self`, negative if `earlier` is later.
    pub fn since(&self, earlier: &TimeStamp) -> TimeDelta {
        self.0 - earlier.0
    }
    /// Nanoseconds since the epoch, clamped to the `i64` range so that
    /// ordering is preserved for times outside roughly 1677..2262.
    pub fn nanos(&self) -> i64 {
        self.0.timestamp_nanos_opt().unwrap_or(if self.0.timestamp() < 0 {
            i64::MIN
        } else {
            i64::MAX
        })
    }
    pub fn checked_sub(&self, delta: TimeDelta) -> Option<TimeStamp> {
        self.0.checked_sub_signed(delta).map(TimeStamp)
    }
}

// Saturating at the ends of the representable calendar.
impl std::ops::Add<TimeDelta> for TimeStamp {
    type Output = TimeStamp;

    fn add(self, rhs: TimeDelta) -> Self::Output {
        TimeStamp(self.0.checked_add_signed(rhs).unwrap_or(if rhs < TimeDelta::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        }))
    }
}

impl std::ops::Sub<TimeDelta> for TimeStamp {
    type Output = TimeStamp;

    fn sub(self, rhs: TimeDelta) -> Self::Output {
        TimeStamp(self.0.checked_sub_signed(rhs).unwrap_or(if rhs < TimeDelta::zero() {
            DateTime::<Utc>::MAX_UTC
        } else {
            DateTime::<Utc>::MIN_UTC
        }))
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
