//! Settled-deal statistics and report aggregates
use crate::deal::{Currency, TimeStamp};

/// Rolling totals for one actor, either as moderator or as a participant.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DealStats {
    #[n(0)]
    pub deals: u64,
    #[n(1)]
    pub primary: u64,
    #[n(2)]
    pub secondary: u64,
}

impl DealStats {
    pub fn record(&mut self, amount: u64, currency: Currency) {
        self.deals += 1;
        match currency {
            Currency::Primary => self.primary = self.primary.saturating_add(amount),
            Currency::Secondary => self.secondary = self.secondary.saturating_add(amount),
        }
    }

    pub fn total(&self, currency: Currency) -> u64 {
        match currency {
            Currency::Primary => self.primary,
            Currency::Secondary => self.secondary,
        }
    }

    fn absorb(&mut self, other: &DealStats) {
        self.deals += other.deals;
        self.primary = self.primary.saturating_add(other.primary);
        self.secondary = self.secondary.saturating_add(other.secondary);
    }
}

/// One completed deal in the report history.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    #[n(0)]
    pub completed_at: TimeStamp,
    #[n(1)]
    pub amount: u64,
    #[n(2)]
    pub currency: Currency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report {
    pub deals: u64,
    pub total_primary: u64,
    pub total_secondary: u64,
}

impl Report {
    pub fn add(&mut self, entry: &ReportEntry) {
        self.deals += 1;
        match entry.currency {
            Currency::Primary => self.total_primary = self.total_primary.saturating_add(entry.amount),
            Currency::Secondary => {
                self.total_secondary = self.total_secondary.saturating_add(entry.amount)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Leaderboard {
    /// Moderators ordered by settled deal count, highest first.
    pub ranking: Vec<(String, DealStats)>,
    pub totals: DealStats,
}

impl Leaderboard {
    pub fn from_entries(mut ranking: Vec<(String, DealStats)>) -> Self {
        ranking.sort_by(|a, b| b.1.deals.cmp(&a.1.deals).then_with(|| a.0.cmp(&b.0)));
        let mut totals = DealStats::default();
        for (_, stats) in &ranking {
            totals.absorb(stats);
        }
        Self { ranking, totals }
    }
}
