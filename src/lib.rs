//! Escrow deal ledger for moderated peer-to-peer trades.
//!
//! A moderator opens a deal against a trigger message, and the deal reaches
//! exactly one terminal outcome. The [`service::DealService`] drives that
//! lifecycle over a sled-backed [`ledger::Ledger`]; the [`reaper::Reaper`]
//! archives idle completed deals in the background.

pub mod audit;
pub mod config;
pub mod deal;
pub mod error;
pub mod ledger;
pub mod limits;
pub mod lock;
pub mod marker;
pub mod notify;
pub mod reaper;
pub mod service;
pub mod stats;
pub mod utils;

pub use audit::{AuditAction, AuditEntry};
pub use config::{LedgerConfig, ReaperConfig};
pub use deal::{Counterparties, Currency, Deal, DealStatus, Party, Receipt, TimeStamp};
pub use error::{DealError, LedgerError};
pub use ledger::Ledger;
pub use limits::{Grant, Limit, ModeratorLimit, Role};
pub use marker::Disposition;
pub use service::{DealService, OpenRequest, OpenedDeal};
